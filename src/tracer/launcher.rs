use crate::error::{LaunchError, Result, TracerError};
use nix::sys::ptrace;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{execvp, fork, ForkResult, Pid};
use std::ffi::CString;

/// Exit status of a child whose exec failed, as shells report it.
const EXEC_FAILED: i32 = 127;

/// ptrace options for the root tracee.
///
/// `TRACESYSGOOD` marks syscall stops as `SIGTRAP | 0x80`. `TRACEEXEC` turns
/// the post-exec `SIGTRAP` into an event stop so it is never mistaken for a
/// real signal. The fork options attach every descendant automatically.
pub fn trace_options(follow_forks: bool) -> ptrace::Options {
    let mut options = ptrace::Options::PTRACE_O_TRACESYSGOOD | ptrace::Options::PTRACE_O_TRACEEXEC;
    if follow_forks {
        options |= ptrace::Options::PTRACE_O_TRACEFORK
            | ptrace::Options::PTRACE_O_TRACEVFORK
            | ptrace::Options::PTRACE_O_TRACECLONE;
    }
    options
}

/// Start `command` with `args` as a tracee and return its pid once it is
/// running under ptrace, resumed towards its first syscall stop.
///
/// A command that cannot be executed is not an error here: the child exits
/// with status 127 and the trace loop sees an ordinary exit.
pub fn launch(command: &str, args: &[String], options: ptrace::Options) -> Result<Pid> {
    // Everything the child needs is allocated before forking.
    let argv = std::iter::once(command)
        .chain(args.iter().map(String::as_str))
        .map(CString::new)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(LaunchError::InvalidArgument)?;

    match unsafe { fork() } {
        Ok(ForkResult::Child) => run_child(&argv),
        Ok(ForkResult::Parent { child }) => attach(child, options),
        Err(e) => Err(LaunchError::Fork(e).into()),
    }
}

fn run_child(argv: &[CString]) -> ! {
    if let Err(e) = ptrace::traceme() {
        eprintln!("watchtrace: PTRACE_TRACEME failed: {}", e);
        unsafe { libc::_exit(EXEC_FAILED) }
    }

    // Park until the tracer has set its options.
    if let Err(e) = signal::raise(Signal::SIGSTOP) {
        eprintln!("watchtrace: failed to stop for tracer: {}", e);
        unsafe { libc::_exit(EXEC_FAILED) }
    }

    let Err(e) = execvp(&argv[0], argv);
    eprintln!(
        "watchtrace: failed to execute {}: {}",
        argv[0].to_string_lossy(),
        e
    );
    unsafe { libc::_exit(EXEC_FAILED) }
}

fn attach(child: Pid, options: ptrace::Options) -> Result<Pid> {
    let status = waitpid(child, None).map_err(|source| LaunchError::InitialWait {
        pid: child.as_raw(),
        source,
    })?;

    match status {
        WaitStatus::Stopped(_, Signal::SIGSTOP) => {
            log::debug!("Child {} stopped, setting ptrace options", child);
        }
        other => {
            return Err(LaunchError::UnexpectedInitialStatus {
                pid: child.as_raw(),
                status: format!("{:?}", other),
            }
            .into());
        }
    }

    ptrace::setoptions(child, options).map_err(|source| LaunchError::SetOptions {
        pid: child.as_raw(),
        source,
    })?;

    ptrace::syscall(child, None).map_err(|source| TracerError::Ptrace {
        pid: child.as_raw(),
        source,
    })?;

    Ok(child)
}
