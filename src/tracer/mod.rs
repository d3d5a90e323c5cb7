use crate::error::{LaunchError, Result, TracerError};
use crate::event::{
    ExitStatus, FileEvent, FileEventKind, ProcessEvent, ProcessEventKind, TraceEvent, TraceSummary,
};
use crate::output::OutputManager;
use nix::errno::Errno;
use nix::sys::ptrace;
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use std::time::Instant;

pub mod arch;
pub mod decoder;
pub mod launcher;
pub mod memory;
pub mod state;

use decoder::ReportPolicy;
use memory::PtraceWords;
use state::ProcessTable;

/// Knobs for one trace run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceConfig {
    pub policy: ReportPolicy,
    /// Byte budget for reading one path out of a tracee.
    pub max_path: usize,
    pub follow_forks: bool,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            policy: ReportPolicy::default(),
            max_path: libc::PATH_MAX as usize,
            follow_forks: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    Running,
    Done,
}

#[derive(Debug, Default)]
struct TraceStats {
    tracees: u64,
    syscall_stops: u64,
    file_access: u64,
    file_open: u64,
    file_close: u64,
}

impl TraceStats {
    fn count(&mut self, event: &FileEvent) {
        match event.kind {
            FileEventKind::Access { .. } => self.file_access += 1,
            FileEventKind::Open { .. } => self.file_open += 1,
            FileEventKind::Close { .. } => self.file_close += 1,
        }
    }
}

/// Drives a traced process tree from launch until the root exits.
///
/// Everything here runs on one thread; the blocking `waitpid` in the loop is
/// the only place it ever waits.
pub struct Tracer {
    config: TraceConfig,
    output: OutputManager,
    table: ProcessTable,
    root: Option<Pid>,
    root_exit: Option<ExitStatus>,
    stats: TraceStats,
    start_time: Instant,
}

impl Tracer {
    pub fn new(config: TraceConfig, output: OutputManager) -> Result<Self> {
        arch::ensure_supported()?;

        Ok(Self {
            config,
            output,
            table: ProcessTable::new(),
            root: None,
            root_exit: None,
            stats: TraceStats::default(),
            start_time: Instant::now(),
        })
    }

    /// Launch `command` (program followed by its arguments) and trace it.
    /// Returns how the root process ended, if that was observed.
    pub fn run(&mut self, command: &[String]) -> Result<Option<ExitStatus>> {
        let (program, args) = command.split_first().ok_or(LaunchError::EmptyCommand)?;

        let root = launcher::launch(
            program,
            args,
            launcher::trace_options(self.config.follow_forks),
        )?;
        log::info!("Tracing {} as pid {}", program, root);
        self.root = Some(root);
        self.start_time = Instant::now();

        let result = self.trace_loop();

        self.emit_summary();

        result.map(|()| self.root_exit.clone())
    }

    fn trace_loop(&mut self) -> Result<()> {
        let mut state = LoopState::Running;

        while state == LoopState::Running {
            let status = match waitpid(None::<Pid>, Some(WaitPidFlag::__WALL)) {
                Ok(s) => s,
                Err(Errno::EINTR) => continue,
                Err(Errno::ECHILD) => {
                    log::debug!("No tracees left to wait for");
                    break;
                }
                Err(e) => return Err(TracerError::Wait(e).into()),
            };

            state = self.step(status)?;
        }

        Ok(())
    }

    /// Handle one wait status. Every stopped tracee is resumed before this
    /// returns.
    fn step(&mut self, status: WaitStatus) -> Result<LoopState> {
        match status {
            WaitStatus::Exited(pid, code) => self.handle_exit(pid, ExitStatus::Exited { code }),
            WaitStatus::Signaled(pid, signal, _) => {
                self.handle_exit(pid, ExitStatus::signaled(signal))
            }
            WaitStatus::PtraceSyscall(pid) => {
                self.handle_syscall(pid)?;
                self.resume(pid, None)?;
                Ok(LoopState::Running)
            }
            WaitStatus::PtraceEvent(pid, _, event) => {
                self.handle_ptrace_event(pid, event)?;
                self.resume(pid, None)?;
                Ok(LoopState::Running)
            }
            WaitStatus::Stopped(pid, signal) => {
                let inject = self.handle_signal(pid, signal)?;
                self.resume(pid, inject)?;
                Ok(LoopState::Running)
            }
            other => {
                log::trace!("Ignoring wait status {:?}", other);
                Ok(LoopState::Running)
            }
        }
    }

    /// Make sure `pid` is tracked, announcing it the first time it is seen.
    /// Returns true if it was new.
    fn observe(&mut self, pid: Pid) -> Result<bool> {
        let (_, created) = self.table.resolve(pid)?;
        if created {
            self.report_attached(pid)?;
        }
        Ok(created)
    }

    fn handle_syscall(&mut self, pid: Pid) -> Result<()> {
        self.stats.syscall_stops += 1;

        let (exit_stop, created) = {
            let (tracee, created) = self.table.resolve(pid)?;
            (tracee.on_syscall_stop(), created)
        };
        if created {
            self.report_attached(pid)?;
        }
        if !exit_stop {
            return Ok(());
        }

        let regs = match arch::read_registers(pid) {
            Ok(regs) => regs,
            Err(e) => {
                log::warn!("[{}] registers unavailable at syscall exit: {}", pid, e);
                return Ok(());
            }
        };

        // Decode everything: unreported opens still feed the descriptor table.
        let words = PtraceWords::new(pid);
        let Some(call) = decoder::decode(&regs, pid, ReportPolicy::All, &words) else {
            return Ok(());
        };
        let reported = call.reported_under(self.config.policy);
        if !reported && call.opened_fd().is_none() {
            return Ok(());
        }

        log::trace!("[{}] decoded {:?}", call.pid(), call);
        let mut event = call.resolve(&words, self.config.max_path);
        if let Some(tracee) = self.table.get_mut(pid) {
            tracee.track(&mut event);
            if reported {
                tracee.decoded += 1;
            }
        }
        if !reported {
            return Ok(());
        }

        self.stats.count(&event);
        self.output.emit_event(TraceEvent::File(event))
    }

    /// Decide which signal, if any, goes back to a tracee stopped by one.
    fn handle_signal(&mut self, pid: Pid, signal: Signal) -> Result<Option<Signal>> {
        let created = self.observe(pid)?;

        // A fresh auto-attached child starts with a SIGSTOP of its own.
        if created && signal == Signal::SIGSTOP {
            log::debug!("[{}] attach stop", pid);
            return Ok(None);
        }

        log::debug!("[{}] passing {} through", pid, signal);
        Ok(Some(signal))
    }

    fn handle_ptrace_event(&mut self, pid: Pid, event: i32) -> Result<()> {
        self.observe(pid)?;

        match event {
            libc::PTRACE_EVENT_FORK | libc::PTRACE_EVENT_VFORK | libc::PTRACE_EVENT_CLONE => {
                match ptrace::getevent(pid) {
                    Ok(child) => log::debug!("[{}] spawned {}", pid, child),
                    Err(e) => log::debug!("[{}] spawned a child, pid unavailable: {}", pid, e),
                }
            }
            libc::PTRACE_EVENT_EXEC => log::debug!("[{}] exec", pid),
            other => log::trace!("[{}] ptrace event {}", pid, other),
        }

        Ok(())
    }

    fn handle_exit(&mut self, pid: Pid, status: ExitStatus) -> Result<LoopState> {
        match self.table.evict(pid) {
            Some(tracee) => log::debug!(
                "[{}] gone after {} syscalls, {} reported",
                pid,
                tracee.entries,
                tracee.decoded
            ),
            None => log::debug!("[{}] exit of an untracked process", pid),
        }

        let kind = match &status {
            ExitStatus::Exited { code } => ProcessEventKind::Exited { code: *code },
            ExitStatus::Signaled { signal, .. } => ProcessEventKind::Signaled {
                signal: signal.clone(),
            },
        };
        self.output.emit_event(TraceEvent::Process(ProcessEvent {
            timestamp: chrono::Utc::now(),
            pid: pid.as_raw(),
            kind,
        }))?;

        if self.root == Some(pid) {
            self.root_exit = Some(status);
            return Ok(LoopState::Done);
        }
        Ok(LoopState::Running)
    }

    fn report_attached(&mut self, pid: Pid) -> Result<()> {
        if let Some(tracee) = self.table.get_mut(pid) {
            tracee.cwd = state::read_cwd(pid);
        }
        self.stats.tracees += 1;
        self.output.emit_event(TraceEvent::Process(ProcessEvent {
            timestamp: chrono::Utc::now(),
            pid: pid.as_raw(),
            kind: ProcessEventKind::Attached,
        }))
    }

    /// Continue `pid` to its next syscall boundary.
    fn resume(&self, pid: Pid, signal: Option<Signal>) -> Result<()> {
        match ptrace::syscall(pid, signal) {
            Ok(()) => Ok(()),
            // Killed while stopped; its exit status is still to come.
            Err(Errno::ESRCH) => {
                log::debug!("[{}] gone before it could be resumed", pid);
                Ok(())
            }
            Err(source) => Err(TracerError::Ptrace {
                pid: pid.as_raw(),
                source,
            }
            .into()),
        }
    }

    fn emit_summary(&mut self) {
        // Descendants still running are not waited for; they are detached
        // by the kernel once this process exits.
        let orphaned = self.table.len();
        if orphaned > 0 {
            let pids: Vec<String> = self.table.pids().map(|p| p.to_string()).collect();
            log::info!(
                "Root exited with {} tracee(s) still running: {}",
                orphaned,
                pids.join(", ")
            );
        }

        let summary = TraceSummary {
            timestamp: chrono::Utc::now(),
            duration_ms: self.start_time.elapsed().as_millis() as u64,
            tracees: self.stats.tracees,
            syscall_stops: self.stats.syscall_stops,
            file_access: self.stats.file_access,
            file_open: self.stats.file_open,
            file_close: self.stats.file_close,
            orphaned,
            root_exit: self.root_exit.clone(),
        };

        let _ = self.output.emit_event(TraceEvent::Summary(summary));
        let _ = self.output.flush();
    }
}
