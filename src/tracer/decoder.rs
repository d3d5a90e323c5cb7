use super::arch::{self, RegisterSnapshot};
use super::memory::{self, RemotePtr, WordReader};
use crate::event::{DirContext, FileEvent, FileEventKind};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};

/// The filesystem syscalls this tracer understands, independent of their
/// per-architecture numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsSyscall {
    Access,
    FaccessAt,
    FaccessAt2,
    Open,
    Creat,
    OpenAt,
    OpenAt2,
    Close,
}

/// Which side of the read/write split gets reported for access checks and opens.
/// Closes are always reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReportPolicy {
    /// Report access checks and opens without write intent.
    #[default]
    ReadOnly,
    /// Report only access checks and opens asking for write access.
    WriteIntent,
    /// Report every access check and open.
    All,
}

impl ReportPolicy {
    pub fn reports(self, write_intent: bool) -> bool {
        match self {
            ReportPolicy::ReadOnly => !write_intent,
            ReportPolicy::WriteIntent => write_intent,
            ReportPolicy::All => true,
        }
    }
}

/// A decoded call whose path, if any, still lives in the tracee.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyscallEvent {
    FileAccess {
        pid: Pid,
        dir: DirContext,
        path: RemotePtr,
        mode: u32,
        result: i64,
    },
    FileOpen {
        pid: Pid,
        dir: DirContext,
        path: RemotePtr,
        /// `None` when the flags could not be read out of the tracee.
        flags: Option<u64>,
        result: i64,
    },
    FileClose {
        pid: Pid,
        fd: i32,
        result: i64,
    },
}

const CREAT_FLAGS: u64 = (libc::O_CREAT | libc::O_WRONLY | libc::O_TRUNC) as u64;

/// Decode the registers of a syscall-exit stop. Syscalls outside the
/// filesystem set, and calls the policy filters out, give `None`.
///
/// `words` is only consulted for `openat2`, whose flags live in a struct.
pub fn decode<R, W>(regs: &R, pid: Pid, policy: ReportPolicy, words: &W) -> Option<SyscallEvent>
where
    R: RegisterSnapshot + ?Sized,
    W: WordReader + ?Sized,
{
    decode_call(regs, pid, words).filter(|event| event.reported_under(policy))
}

fn decode_call<R, W>(regs: &R, pid: Pid, words: &W) -> Option<SyscallEvent>
where
    R: RegisterSnapshot + ?Sized,
    W: WordReader + ?Sized,
{
    let syscall = arch::classify_syscall(regs.syscall_number())?;
    let args = regs.args();
    let result = regs.return_value();

    let event = match syscall {
        FsSyscall::Access => access_check(pid, DirContext::Cwd, args[0], args[1], result),
        FsSyscall::FaccessAt | FsSyscall::FaccessAt2 => {
            access_check(pid, DirContext::from_raw(args[0]), args[1], args[2], result)
        }
        FsSyscall::Open => open(pid, DirContext::Cwd, args[0], Some(args[1]), result),
        FsSyscall::Creat => open(pid, DirContext::Cwd, args[0], Some(CREAT_FLAGS), result),
        FsSyscall::OpenAt => open(
            pid,
            DirContext::from_raw(args[0]),
            args[1],
            Some(args[2]),
            result,
        ),
        FsSyscall::OpenAt2 => {
            // struct open_how starts with the u64 flags.
            let flags = memory::read_u64(words, args[2]);
            if flags.is_none() {
                log::warn!(
                    "[{}] openat2 = {}: open_how at {:#x} unreadable, flags unknown",
                    pid,
                    result,
                    args[2]
                );
            }
            open(pid, DirContext::from_raw(args[0]), args[1], flags, result)
        }
        FsSyscall::Close => SyscallEvent::FileClose {
            pid,
            fd: args[0] as i32,
            result,
        },
    };
    Some(event)
}

fn access_check(pid: Pid, dir: DirContext, path: u64, mode: u64, result: i64) -> SyscallEvent {
    SyscallEvent::FileAccess {
        pid,
        dir,
        path: RemotePtr(path),
        mode: mode as u32,
        result,
    }
}

fn open(pid: Pid, dir: DirContext, path: u64, flags: Option<u64>, result: i64) -> SyscallEvent {
    SyscallEvent::FileOpen {
        pid,
        dir,
        path: RemotePtr(path),
        flags,
        result,
    }
}

impl SyscallEvent {
    /// Whether the call asked for write access. `None` for closes and for
    /// opens whose flags are unknown.
    pub fn write_intent(&self) -> Option<bool> {
        match self {
            SyscallEvent::FileAccess { mode, .. } => Some(mode & libc::W_OK as u32 != 0),
            SyscallEvent::FileOpen { flags, .. } => {
                flags.map(|f| f & (libc::O_WRONLY | libc::O_RDWR) as u64 != 0)
            }
            SyscallEvent::FileClose { .. } => None,
        }
    }

    /// Calls without a known write intent are reported under every policy.
    pub fn reported_under(&self, policy: ReportPolicy) -> bool {
        self.write_intent().map_or(true, |w| policy.reports(w))
    }

    /// The descriptor a successful open returned.
    pub fn opened_fd(&self) -> Option<i32> {
        match self {
            SyscallEvent::FileOpen { result, .. } if *result >= 0 => Some(*result as i32),
            _ => None,
        }
    }

    pub fn pid(&self) -> Pid {
        match self {
            SyscallEvent::FileAccess { pid, .. }
            | SyscallEvent::FileOpen { pid, .. }
            | SyscallEvent::FileClose { pid, .. } => *pid,
        }
    }

    /// Read the path out of the tracee and turn this into a report event.
    /// `words` must belong to the same pid the event was decoded for. The
    /// directory path is left for the process table to fill in.
    pub fn resolve<W>(self, words: &W, max_path: usize) -> FileEvent
    where
        W: WordReader + ?Sized,
    {
        let timestamp = chrono::Utc::now();
        match self {
            SyscallEvent::FileAccess {
                pid,
                dir,
                path,
                mode,
                result,
            } => {
                let (path, truncated) = read_path(words, path, max_path);
                FileEvent {
                    timestamp,
                    pid: pid.as_raw(),
                    kind: FileEventKind::Access {
                        path,
                        truncated,
                        dir,
                        dir_path: None,
                        mode,
                    },
                    result,
                }
            }
            SyscallEvent::FileOpen {
                pid,
                dir,
                path,
                flags,
                result,
            } => {
                let (path, truncated) = read_path(words, path, max_path);
                FileEvent {
                    timestamp,
                    pid: pid.as_raw(),
                    kind: FileEventKind::Open {
                        path,
                        truncated,
                        dir,
                        dir_path: None,
                        flags,
                    },
                    result,
                }
            }
            SyscallEvent::FileClose { pid, fd, result } => FileEvent {
                timestamp,
                pid: pid.as_raw(),
                kind: FileEventKind::Close { fd },
                result,
            },
        }
    }
}

fn read_path<W>(
    words: &W,
    ptr: RemotePtr,
    max_path: usize,
) -> (String, Option<memory::TruncationCause>)
where
    W: WordReader + ?Sized,
{
    match memory::read_cstring(words, ptr.0, max_path) {
        Ok(path) => (path, None),
        Err(truncated) => {
            log::debug!("{}", truncated);
            (truncated.partial, Some(truncated.cause))
        }
    }
}

/// Symbolic form of an `access(2)` mode, e.g. `R_OK|X_OK`.
pub fn access_mode_names(mode: u32) -> String {
    if mode == libc::F_OK as u32 {
        return "F_OK".to_string();
    }

    let mut parts = Vec::new();
    if mode & libc::R_OK as u32 != 0 {
        parts.push("R_OK");
    }
    if mode & libc::W_OK as u32 != 0 {
        parts.push("W_OK");
    }
    if mode & libc::X_OK as u32 != 0 {
        parts.push("X_OK");
    }
    parts.join("|")
}

/// Symbolic form of `open(2)` flags, e.g. `O_RDONLY|O_CLOEXEC`.
pub fn open_flag_names(flags: u64) -> String {
    let mut parts = Vec::new();

    match flags & libc::O_ACCMODE as u64 {
        0o0 => parts.push("O_RDONLY"),
        0o1 => parts.push("O_WRONLY"),
        0o2 => parts.push("O_RDWR"),
        _ => parts.push("O_ACCMODE"),
    }

    const NAMED: &[(libc::c_int, &str)] = &[
        (libc::O_CREAT, "O_CREAT"),
        (libc::O_EXCL, "O_EXCL"),
        (libc::O_TRUNC, "O_TRUNC"),
        (libc::O_APPEND, "O_APPEND"),
        (libc::O_NONBLOCK, "O_NONBLOCK"),
        (libc::O_DIRECTORY, "O_DIRECTORY"),
        (libc::O_NOFOLLOW, "O_NOFOLLOW"),
        (libc::O_CLOEXEC, "O_CLOEXEC"),
        (libc::O_PATH, "O_PATH"),
    ];
    for (bit, name) in NAMED {
        if flags & *bit as u64 != 0 {
            parts.push(*name);
        }
    }

    parts.join("|")
}
