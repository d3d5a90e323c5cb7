use crate::error::{Result, TracerError};
use crate::event::{DirContext, FileEvent, FileEventKind};
use nix::unistd::Pid;
use std::collections::HashMap;
use std::path::Path;

/// Where a tracee stands relative to its current syscall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyscallPhase {
    /// Running user code; the next syscall stop is an entry.
    #[default]
    Outside,
    /// Entry stop seen, exit pending.
    Inside,
}

impl SyscallPhase {
    pub fn toggle(self) -> Self {
        match self {
            SyscallPhase::Outside => SyscallPhase::Inside,
            SyscallPhase::Inside => SyscallPhase::Outside,
        }
    }
}

#[derive(Debug)]
pub struct Tracee {
    pub pid: Pid,
    pub phase: SyscallPhase,
    /// Syscall-entry stops observed.
    pub entries: u64,
    /// Events decoded at exit stops.
    pub decoded: u64,
    /// Working directory when the tracee was first seen.
    pub cwd: Option<String>,
    /// Paths behind descriptors this tracee was seen to open.
    pub fds: HashMap<i32, String>,
}

impl Tracee {
    pub fn new(pid: Pid) -> Self {
        Self {
            pid,
            phase: SyscallPhase::Outside,
            entries: 0,
            decoded: 0,
            cwd: None,
            fds: HashMap::new(),
        }
    }

    /// Advance the phase on a syscall stop. Returns true when the stop closes
    /// an entry/exit pair, i.e. the return value is available.
    /// Directory a path passed with `dir` resolves against. Absolute and
    /// empty paths have none.
    pub fn dir_path(&self, dir: DirContext, path: &str) -> Option<String> {
        if path.is_empty() || path.starts_with('/') {
            return None;
        }
        match dir {
            DirContext::Cwd => self.cwd.clone(),
            DirContext::Fd(fd) => self.fds.get(&fd).cloned(),
        }
    }

    /// Attach the directory path to `event` and keep the descriptor table
    /// in step with successful opens and closes. Paths are joined as given,
    /// never normalized.
    pub fn track(&mut self, event: &mut FileEvent) {
        match &mut event.kind {
            FileEventKind::Access {
                path,
                dir,
                dir_path,
                ..
            } => *dir_path = self.dir_path(*dir, path),
            FileEventKind::Open {
                path,
                truncated,
                dir,
                dir_path,
                ..
            } => {
                *dir_path = self.dir_path(*dir, path);
                if event.result < 0 {
                    return;
                }
                let fd = event.result as i32;
                let full = if truncated.is_some() || path.is_empty() {
                    None
                } else if path.starts_with('/') {
                    Some(path.clone())
                } else {
                    dir_path
                        .as_deref()
                        .map(|d| Path::new(d).join(path.as_str()).to_string_lossy().into_owned())
                };
                match full {
                    Some(full) => {
                        self.fds.insert(fd, full);
                    }
                    None => {
                        self.fds.remove(&fd);
                    }
                }
            }
            FileEventKind::Close { fd } => {
                if event.result == 0 {
                    self.fds.remove(fd);
                }
            }
        }
    }

    pub fn on_syscall_stop(&mut self) -> bool {
        self.phase = self.phase.toggle();
        match self.phase {
            SyscallPhase::Inside => {
                self.entries += 1;
                false
            }
            SyscallPhase::Outside => true,
        }
    }
}

/// Every live tracee, keyed by pid.
///
/// Tracees show up here lazily: a forked child's first stop is the only
/// sign that it exists.
#[derive(Debug, Default)]
pub struct ProcessTable {
    tracees: Vec<Tracee>,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up `pid`, creating a fresh entry if it is not tracked yet. The
    /// flag is true when the entry was just created.
    pub fn resolve(&mut self, pid: Pid) -> Result<(&mut Tracee, bool)> {
        if let Some(idx) = self.position(pid) {
            return Ok((&mut self.tracees[idx], false));
        }

        self.tracees
            .try_reserve(1)
            .map_err(|source| TracerError::TableExhausted {
                pid: pid.as_raw(),
                source,
            })?;
        self.tracees.push(Tracee::new(pid));
        let idx = self.tracees.len() - 1;
        Ok((&mut self.tracees[idx], true))
    }

    /// Drop `pid`. Unknown pids are ignored. Remaining entries keep their
    /// relative order.
    pub fn evict(&mut self, pid: Pid) -> Option<Tracee> {
        self.position(pid).map(|idx| self.tracees.remove(idx))
    }

    pub fn get(&self, pid: Pid) -> Option<&Tracee> {
        self.tracees.iter().find(|t| t.pid == pid)
    }

    pub fn get_mut(&mut self, pid: Pid) -> Option<&mut Tracee> {
        self.tracees.iter_mut().find(|t| t.pid == pid)
    }

    pub fn len(&self) -> usize {
        self.tracees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracees.is_empty()
    }

    pub fn pids(&self) -> impl Iterator<Item = Pid> + '_ {
        self.tracees.iter().map(|t| t.pid)
    }

    fn position(&self, pid: Pid) -> Option<usize> {
        self.tracees.iter().position(|t| t.pid == pid)
    }
}

/// Current working directory of `pid`, from procfs.
pub fn read_cwd(pid: Pid) -> Option<String> {
    match procfs::process::Process::new(pid.as_raw()).and_then(|p| p.cwd()) {
        Ok(cwd) => Some(cwd.to_string_lossy().into_owned()),
        Err(e) => {
            log::debug!("[{}] cwd unavailable: {}", pid, e);
            None
        }
    }
}
