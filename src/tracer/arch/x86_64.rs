use super::RegisterSnapshot;
use crate::error::{Result, TracerError};
use crate::tracer::decoder::FsSyscall;
use nix::sys::ptrace;
use nix::unistd::Pid;

// Not exported by every libc release we build against.
const SYS_OPENAT2: libc::c_long = 437;
const SYS_FACCESSAT2: libc::c_long = 439;

/// The syscall ABI subset of `user_regs_struct`.
///
/// Argument registers survive the syscall on x86_64, so they are still valid
/// at the exit stop next to the return value in `rax`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UserRegs {
    pub orig_rax: u64,
    pub rax: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rdx: u64,
    pub r10: u64,
    pub r8: u64,
    pub r9: u64,
}

impl From<libc::user_regs_struct> for UserRegs {
    fn from(regs: libc::user_regs_struct) -> Self {
        Self {
            orig_rax: regs.orig_rax,
            rax: regs.rax,
            rdi: regs.rdi,
            rsi: regs.rsi,
            rdx: regs.rdx,
            r10: regs.r10,
            r8: regs.r8,
            r9: regs.r9,
        }
    }
}

impl RegisterSnapshot for UserRegs {
    fn syscall_number(&self) -> u64 {
        self.orig_rax
    }

    fn args(&self) -> [u64; 6] {
        [self.rdi, self.rsi, self.rdx, self.r10, self.r8, self.r9]
    }

    fn return_value(&self) -> i64 {
        self.rax as i64
    }
}

pub fn read_registers(pid: Pid) -> Result<UserRegs> {
    ptrace::getregs(pid)
        .map(UserRegs::from)
        .map_err(|source| {
            TracerError::Ptrace {
                pid: pid.as_raw(),
                source,
            }
            .into()
        })
}

pub fn classify_syscall(nr: u64) -> Option<FsSyscall> {
    match nr as libc::c_long {
        libc::SYS_access => Some(FsSyscall::Access),
        libc::SYS_faccessat => Some(FsSyscall::FaccessAt),
        SYS_FACCESSAT2 => Some(FsSyscall::FaccessAt2),
        libc::SYS_open => Some(FsSyscall::Open),
        libc::SYS_creat => Some(FsSyscall::Creat),
        libc::SYS_openat => Some(FsSyscall::OpenAt),
        SYS_OPENAT2 => Some(FsSyscall::OpenAt2),
        libc::SYS_close => Some(FsSyscall::Close),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_follow_the_syscall_calling_convention() {
        let regs = UserRegs {
            orig_rax: 257,
            rax: 5,
            rdi: 1,
            rsi: 2,
            rdx: 3,
            r10: 4,
            r8: 5,
            r9: 6,
        };
        assert_eq!(regs.syscall_number(), 257);
        assert_eq!(regs.args(), [1, 2, 3, 4, 5, 6]);
        assert_eq!(regs.return_value(), 5);
    }

    #[test]
    fn negative_return_is_sign_extended() {
        let regs = UserRegs {
            rax: (-2i64) as u64,
            ..Default::default()
        };
        assert_eq!(regs.return_value(), -2);
    }

    #[test]
    fn classifies_filesystem_syscalls() {
        assert_eq!(classify_syscall(21), Some(FsSyscall::Access));
        assert_eq!(classify_syscall(269), Some(FsSyscall::FaccessAt));
        assert_eq!(classify_syscall(439), Some(FsSyscall::FaccessAt2));
        assert_eq!(classify_syscall(2), Some(FsSyscall::Open));
        assert_eq!(classify_syscall(85), Some(FsSyscall::Creat));
        assert_eq!(classify_syscall(257), Some(FsSyscall::OpenAt));
        assert_eq!(classify_syscall(437), Some(FsSyscall::OpenAt2));
        assert_eq!(classify_syscall(3), Some(FsSyscall::Close));
    }

    #[test]
    fn other_syscalls_are_irrelevant() {
        assert_eq!(classify_syscall(0), None); // read
        assert_eq!(classify_syscall(59), None); // execve
        assert_eq!(classify_syscall(u64::MAX), None);
    }
}
