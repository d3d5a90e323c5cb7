use std::io::{self, Write};

use colored::Colorize;
use nix::errno::Errno;

use super::OutputSink;
use crate::error::{OutputError, Result};
use crate::event::*;
use crate::tracer::decoder::{access_mode_names, open_flag_names};

/// Colored, strace-like terminal output sink (writes to stderr).
pub struct TerminalSink;

impl TerminalSink {
    pub fn new(no_color: bool) -> Self {
        if no_color {
            colored::control::set_override(false);
        }
        Self
    }

    fn format_file(&self, event: &FileEvent) -> String {
        let ts = event.timestamp.format("%H:%M:%S%.3f");
        let pid = format!("[{}]", event.pid).dimmed().to_string();

        let call = match &event.kind {
            FileEventKind::Access {
                path,
                truncated,
                dir,
                dir_path,
                mode,
            } => format!(
                "{} {} in {} {}",
                "access".cyan(),
                format_path(path, truncated.is_some()),
                format_dir(dir, dir_path.as_deref()),
                access_mode_names(*mode)
            ),
            FileEventKind::Open {
                path,
                truncated,
                dir,
                dir_path,
                flags,
            } => format!(
                "{} {} in {} {}",
                "open".cyan(),
                format_path(path, truncated.is_some()),
                format_dir(dir, dir_path.as_deref()),
                (*flags).map_or_else(|| "?".to_string(), open_flag_names)
            ),
            FileEventKind::Close { fd } => format!("{} {}", "close".cyan(), fd),
        };

        format!("{ts} {pid} {call} {}", format_result(event.result))
    }

    fn format_process(&self, event: &ProcessEvent) -> String {
        let ts = event.timestamp.format("%H:%M:%S%.3f");
        let pid = format!("[{}]", event.pid).dimmed().to_string();

        match &event.kind {
            ProcessEventKind::Attached => {
                format!("{ts} {pid} {}", "attached".blue().bold())
            }
            ProcessEventKind::Exited { code } => {
                let status = if *code == 0 {
                    format!("exited {code}").green().to_string()
                } else {
                    format!("exited {code}").red().to_string()
                };
                format!("{ts} {pid} {status}")
            }
            ProcessEventKind::Signaled { signal } => {
                format!("{ts} {pid} {}", format!("killed by {signal}").yellow().bold())
            }
        }
    }

    fn format_summary(&self, summary: &TraceSummary) -> String {
        let mut lines = Vec::new();
        lines.push(format!("\n{}", "=== Trace Summary ===".bold()));
        lines.push(format!("Duration:      {}ms", summary.duration_ms));
        lines.push(format!("Processes:     {}", summary.tracees));
        lines.push(format!("Syscall stops: {}", summary.syscall_stops));
        lines.push(format!(
            "Reported:      {} access, {} open, {} close",
            summary.file_access, summary.file_open, summary.file_close
        ));
        if let Some(exit) = &summary.root_exit {
            lines.push(format!("Exit code:     {}", exit.code()));
        }
        if summary.orphaned > 0 {
            lines.push(format!(
                "{}",
                format!("Still running: {} (not traced further)", summary.orphaned).yellow()
            ));
        }
        lines.join("\n")
    }
}

/// Quote a path; a truncated one gets a trailing `...`.
fn format_path(path: &str, truncated: bool) -> String {
    if truncated {
        format!("{path:?}...")
    } else {
        format!("{path:?}")
    }
}

/// `AT_FDCWD`, or `3 (/srv/data)` when the directory is known.
fn format_dir(dir: &DirContext, dir_path: Option<&str>) -> String {
    match dir_path {
        Some(p) => format!("{dir} ({p})"),
        None => dir.to_string(),
    }
}

/// `= 3`, or `= -2 ENOENT (No such file or directory)` for failures.
fn format_result(result: i64) -> String {
    if result >= 0 {
        return format!("= {result}");
    }
    let errno = Errno::from_raw(result.unsigned_abs() as i32);
    format!("= {result} {errno:?} ({})", errno.desc()).red().to_string()
}

impl OutputSink for TerminalSink {
    fn emit(&mut self, event: &TraceEvent) -> Result<()> {
        let line = match event {
            TraceEvent::File(e) => self.format_file(e),
            TraceEvent::Process(e) => self.format_process(e),
            TraceEvent::Summary(s) => self.format_summary(s),
        };
        writeln!(io::stderr(), "{line}").map_err(OutputError::Io)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        io::stderr().flush().map_err(OutputError::Io)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sink() -> TerminalSink {
        TerminalSink::new(true)
    }

    fn file_event(kind: FileEventKind, result: i64) -> FileEvent {
        FileEvent {
            timestamp: Utc::now(),
            pid: 77,
            kind,
            result,
        }
    }

    #[test]
    fn access_line() {
        let line = sink().format_file(&file_event(
            FileEventKind::Access {
                path: "/etc/hostname".to_string(),
                truncated: None,
                dir: DirContext::Cwd,
                dir_path: None,
                mode: libc::R_OK as u32,
            },
            0,
        ));
        assert!(line.ends_with("[77] access \"/etc/hostname\" in AT_FDCWD R_OK = 0"), "{line}");
    }

    #[test]
    fn failed_open_shows_errno_text() {
        let line = sink().format_file(&file_event(
            FileEventKind::Open {
                path: "/nope".to_string(),
                truncated: None,
                dir: DirContext::Fd(3),
                dir_path: None,
                flags: Some(libc::O_RDONLY as u64),
            },
            -(libc::ENOENT as i64),
        ));
        assert!(line.contains("open \"/nope\" in 3 O_RDONLY"), "{line}");
        assert!(line.ends_with("= -2 ENOENT (No such file or directory)"), "{line}");
    }

    #[test]
    fn truncated_path_is_marked() {
        let line = sink().format_file(&file_event(
            FileEventKind::Open {
                path: "/very/lo".to_string(),
                truncated: Some(crate::tracer::memory::TruncationCause::Limit),
                dir: DirContext::Cwd,
                dir_path: None,
                flags: Some(0),
            },
            4,
        ));
        assert!(line.contains("\"/very/lo\"..."), "{line}");
    }

    #[test]
    fn known_directory_and_unknown_flags() {
        let line = sink().format_file(&file_event(
            FileEventKind::Open {
                path: "notes.txt".to_string(),
                truncated: None,
                dir: DirContext::Fd(4),
                dir_path: Some("/srv/data".to_string()),
                flags: None,
            },
            -14,
        ));
        assert!(line.contains("open \"notes.txt\" in 4 (/srv/data) ? = -14 EFAULT"), "{line}");
    }

    #[test]
    fn close_line() {
        let line = sink().format_file(&file_event(FileEventKind::Close { fd: 5 }, 0));
        assert!(line.ends_with("[77] close 5 = 0"), "{line}");
    }

    #[test]
    fn process_lines() {
        let event = |kind| ProcessEvent {
            timestamp: Utc::now(),
            pid: 12,
            kind,
        };
        assert!(sink()
            .format_process(&event(ProcessEventKind::Attached))
            .ends_with("[12] attached"));
        assert!(sink()
            .format_process(&event(ProcessEventKind::Exited { code: 1 }))
            .ends_with("[12] exited 1"));
        assert!(sink()
            .format_process(&event(ProcessEventKind::Signaled {
                signal: "SIGKILL".to_string()
            }))
            .ends_with("[12] killed by SIGKILL"));
    }

    #[test]
    fn summary_mentions_orphans_only_when_present() {
        let mut summary = TraceSummary {
            timestamp: Utc::now(),
            duration_ms: 5,
            tracees: 2,
            syscall_stops: 40,
            file_access: 1,
            file_open: 3,
            file_close: 3,
            orphaned: 0,
            root_exit: Some(ExitStatus::Exited { code: 0 }),
        };
        let text = sink().format_summary(&summary);
        assert!(text.contains("1 access, 3 open, 3 close"));
        assert!(text.contains("Exit code:     0"));
        assert!(!text.contains("Still running"));

        summary.orphaned = 1;
        assert!(sink().format_summary(&summary).contains("Still running: 1"));
    }
}
