use crate::error::{Result, TracerError};

#[cfg(target_arch = "x86_64")]
pub mod x86_64;

/// Typed view of a tracee's registers at a ptrace stop.
///
/// The return value is only meaningful at a syscall-exit stop.
pub trait RegisterSnapshot {
    fn syscall_number(&self) -> u64;
    fn args(&self) -> [u64; 6];
    fn return_value(&self) -> i64;
}

#[cfg(target_arch = "x86_64")]
pub use self::x86_64::{classify_syscall, read_registers};

/// Register snapshot type on hosts without a register accessor. It has no
/// values, so nothing can ever be decoded from it.
#[cfg(not(target_arch = "x86_64"))]
#[derive(Debug, Clone, Copy)]
pub enum Unsupported {}

#[cfg(not(target_arch = "x86_64"))]
impl RegisterSnapshot for Unsupported {
    fn syscall_number(&self) -> u64 {
        match *self {}
    }

    fn args(&self) -> [u64; 6] {
        match *self {}
    }

    fn return_value(&self) -> i64 {
        match *self {}
    }
}

#[cfg(not(target_arch = "x86_64"))]
pub fn read_registers(_pid: nix::unistd::Pid) -> Result<Unsupported> {
    Err(TracerError::UnsupportedArch(std::env::consts::ARCH.to_string()).into())
}

#[cfg(not(target_arch = "x86_64"))]
pub fn classify_syscall(_nr: u64) -> Option<crate::tracer::decoder::FsSyscall> {
    None
}

/// Fails on hosts whose syscall register layout has no accessor.
pub fn ensure_supported() -> Result<()> {
    if cfg!(target_arch = "x86_64") {
        Ok(())
    } else {
        Err(TracerError::UnsupportedArch(std::env::consts::ARCH.to_string()).into())
    }
}
