use crate::tracer::memory::TruncationCause;
use chrono::{DateTime, Utc};
use nix::sys::signal::Signal;
use serde::{Serialize, Serializer};
use std::fmt;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum TraceEvent {
    Process(ProcessEvent),
    File(FileEvent),
    Summary(TraceSummary),
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessEvent {
    pub timestamp: DateTime<Utc>,
    pub pid: i32,
    pub kind: ProcessEventKind,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProcessEventKind {
    Attached,
    Exited { code: i32 },
    Signaled { signal: String },
}

/// A filesystem syscall with its path argument already read out of the
/// tracee. `result` is the raw return value; negative values are `-errno`.
#[derive(Debug, Clone, Serialize)]
pub struct FileEvent {
    pub timestamp: DateTime<Utc>,
    pub pid: i32,
    pub kind: FileEventKind,
    pub result: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FileEventKind {
    Access {
        path: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        truncated: Option<TruncationCause>,
        dir: DirContext,
        /// Directory a relative `path` resolves against, when known.
        #[serde(skip_serializing_if = "Option::is_none")]
        dir_path: Option<String>,
        mode: u32,
    },
    Open {
        path: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        truncated: Option<TruncationCause>,
        dir: DirContext,
        #[serde(skip_serializing_if = "Option::is_none")]
        dir_path: Option<String>,
        /// `null` when the flags could not be read.
        flags: Option<u64>,
    },
    Close {
        fd: i32,
    },
}

/// What a path argument is resolved against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirContext {
    /// `AT_FDCWD`, or a syscall without a dirfd argument.
    Cwd,
    Fd(i32),
}

impl DirContext {
    /// Interpret a raw dirfd register. The kernel only looks at the low
    /// 32 bits.
    pub fn from_raw(raw: u64) -> Self {
        let fd = raw as i32;
        if fd == libc::AT_FDCWD {
            DirContext::Cwd
        } else {
            DirContext::Fd(fd)
        }
    }
}

impl fmt::Display for DirContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirContext::Cwd => write!(f, "AT_FDCWD"),
            DirContext::Fd(fd) => write!(f, "{fd}"),
        }
    }
}

impl Serialize for DirContext {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            DirContext::Cwd => serializer.serialize_str("AT_FDCWD"),
            DirContext::Fd(fd) => serializer.serialize_i32(*fd),
        }
    }
}

/// How a tracee ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExitStatus {
    Exited { code: i32 },
    Signaled { signal: String, signo: i32 },
}

impl ExitStatus {
    pub fn signaled(signal: Signal) -> Self {
        ExitStatus::Signaled {
            signal: signal.as_str().to_string(),
            signo: signal as i32,
        }
    }

    /// Shell-style status: the exit code, or 128 + signal number.
    pub fn code(&self) -> i32 {
        match self {
            ExitStatus::Exited { code } => *code,
            ExitStatus::Signaled { signo, .. } => 128 + signo,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TraceSummary {
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    pub tracees: u64,
    pub syscall_stops: u64,
    pub file_access: u64,
    pub file_open: u64,
    pub file_close: u64,
    /// Tracees still alive when the root exited.
    pub orphaned: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_exit: Option<ExitStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dir_context_from_raw_register() {
        assert_eq!(DirContext::from_raw(libc::AT_FDCWD as i64 as u64), DirContext::Cwd);
        // Upper bits are garbage as far as the kernel is concerned.
        assert_eq!(
            DirContext::from_raw(0xdead_beef_0000_0000 | (libc::AT_FDCWD as u32 as u64)),
            DirContext::Cwd
        );
        assert_eq!(DirContext::from_raw(3), DirContext::Fd(3));
    }

    #[test]
    fn file_event_json_shape() {
        let event = TraceEvent::File(FileEvent {
            timestamp: Utc::now(),
            pid: 42,
            kind: FileEventKind::Open {
                path: "/tmp/x".to_string(),
                truncated: None,
                dir: DirContext::Cwd,
                dir_path: None,
                flags: Some(0),
            },
            result: 5,
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event_type"], "file");
        assert_eq!(value["pid"], 42);
        assert_eq!(value["result"], 5);
        assert_eq!(
            value["kind"],
            json!({"type": "open", "path": "/tmp/x", "dir": "AT_FDCWD", "flags": 0})
        );
    }

    #[test]
    fn truncated_path_is_flagged() {
        let kind = FileEventKind::Access {
            path: "/usr/li".to_string(),
            truncated: Some(TruncationCause::Unreadable),
            dir: DirContext::Fd(4),
            dir_path: Some("/srv".to_string()),
            mode: libc::R_OK as u32,
        };
        let value = serde_json::to_value(&kind).unwrap();
        assert_eq!(value["truncated"], "unreadable");
        assert_eq!(value["dir"], 4);
        assert_eq!(value["dir_path"], "/srv");
    }

    #[test]
    fn unknown_open_flags_are_null() {
        let kind = FileEventKind::Open {
            path: "data".to_string(),
            truncated: None,
            dir: DirContext::Cwd,
            dir_path: None,
            flags: None,
        };
        let value = serde_json::to_value(&kind).unwrap();
        assert!(value["flags"].is_null());
        assert!(value.get("dir_path").is_none());
    }

    #[test]
    fn process_event_json_shape() {
        let event = TraceEvent::Process(ProcessEvent {
            timestamp: Utc::now(),
            pid: 9,
            kind: ProcessEventKind::Exited { code: 3 },
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event_type"], "process");
        assert_eq!(value["kind"], json!({"type": "exited", "code": 3}));
    }

    #[test]
    fn exit_status_codes() {
        assert_eq!(ExitStatus::Exited { code: 0 }.code(), 0);
        assert_eq!(ExitStatus::Exited { code: 127 }.code(), 127);
        let killed = ExitStatus::signaled(Signal::SIGKILL);
        assert_eq!(killed.code(), 137);
        assert_eq!(
            killed,
            ExitStatus::Signaled {
                signal: "SIGKILL".to_string(),
                signo: 9
            }
        );
    }
}
