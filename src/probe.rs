//! Process liveness probing.
//!
//! Supported platforms: Linux (reap check, signal-0 existence check and the
//! `/proc/<pid>/stat` state field) and other Unix systems (reap check and
//! signal-0 existence check only).
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

/// Result of a single probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessState {
    Alive,
    Dead,
    /// The OS lookup itself failed; the process may or may not exist.
    Indeterminate(ProbeError),
}

/// OS-level failure while looking up a process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeError {
    pub operation: &'static str,
    pub errno: Errno,
}

impl ProbeError {
    pub fn new(operation: &'static str, errno: Errno) -> Self {
        Self { operation, errno }
    }
}

impl std::fmt::Display for ProbeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} failed: {}", self.operation, self.errno)
    }
}

impl std::error::Error for ProbeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.errno)
    }
}

/// Queries the liveness of a process by PID. Implementations must not change OS state
/// beyond reaping an already-exited child of this process.
pub trait ProcessProbe {
    fn probe(&self, pid: u32) -> ProcessState;
}

/// Probe backed by `waitpid`, `kill(pid, 0)` and, on Linux, procfs.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProbe;

impl ProcessProbe for SystemProbe {
    fn probe(&self, pid: u32) -> ProcessState {
        let raw = match i32::try_from(pid) {
            Ok(raw) if raw > 0 => raw,
            _ => return ProcessState::Dead,
        };
        let pid = Pid::from_raw(raw);

        // Reaps our own child if it has exited, so it never lingers as a zombie.
        match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(_, code)) => {
                tracing::debug!(%pid, code, "child exited");
                return ProcessState::Dead;
            }
            Ok(WaitStatus::Signaled(_, signal, _)) => {
                tracing::debug!(%pid, ?signal, "child killed by signal");
                return ProcessState::Dead;
            }
            Ok(_) | Err(Errno::ECHILD) => {}
            Err(errno) => return ProcessState::Indeterminate(ProbeError::new("waitpid", errno)),
        }

        match kill(pid, None) {
            Ok(()) => {}
            Err(Errno::ESRCH) => return ProcessState::Dead,
            Err(errno) => return ProcessState::Indeterminate(ProbeError::new("kill", errno)),
        }

        #[cfg(target_os = "linux")]
        {
            if let Some(state) = proc_state(raw).filter(|s| is_terminated_state(*s)) {
                tracing::debug!(%pid, %state, "process is defunct");
                return ProcessState::Dead;
            }
        }

        ProcessState::Alive
    }
}

#[cfg(target_os = "linux")]
fn proc_state(pid: i32) -> Option<char> {
    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    parse_stat_state(&stat)
}

/// Extract the state letter from a `/proc/<pid>/stat` line.
///
/// The command name is wrapped in parentheses and may itself contain spaces or
/// parentheses, so the state is read after the last `)`.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_stat_state(stat: &str) -> Option<char> {
    let (_, rest) = stat.rsplit_once(')')?;
    rest.trim_start().chars().next()
}

/// `Z` is a zombie, `X` is dead.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn is_terminated_state(state: char) -> bool {
    matches!(state, 'Z' | 'X')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::{Command, Stdio};
    use std::time::{Duration, Instant};

    fn wait_for_dead(pid: u32) -> ProcessState {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let state = SystemProbe.probe(pid);
            if state == ProcessState::Dead || Instant::now() > deadline {
                return state;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    #[test]
    fn test_parse_stat_state_simple() {
        let stat = "1234 (bash) S 1 1234 1234 0 -1 4194560";
        assert_eq!(parse_stat_state(stat), Some('S'));
    }

    #[test]
    fn test_parse_stat_state_name_with_parens_and_spaces() {
        let stat = "42 (my (weird) app) Z 1 42 42 0";
        assert_eq!(parse_stat_state(stat), Some('Z'));
    }

    #[test]
    fn test_parse_stat_state_garbage() {
        assert_eq!(parse_stat_state("no parens here"), None);
        assert_eq!(parse_stat_state("1 (x)"), None);
    }

    #[test]
    fn test_terminated_states() {
        assert!(is_terminated_state('Z'));
        assert!(is_terminated_state('X'));
        assert!(!is_terminated_state('R'));
        assert!(!is_terminated_state('S'));
        assert!(!is_terminated_state('T'));
    }

    #[test]
    fn test_probe_self_is_alive() {
        assert_eq!(SystemProbe.probe(std::process::id()), ProcessState::Alive);
    }

    #[test]
    fn test_probe_nonexistent_pid_is_dead() {
        assert_eq!(SystemProbe.probe(i32::MAX as u32), ProcessState::Dead);
    }

    #[test]
    fn test_probe_invalid_pid_is_dead() {
        assert_eq!(SystemProbe.probe(0), ProcessState::Dead);
        assert_eq!(SystemProbe.probe(u32::MAX), ProcessState::Dead);
    }

    #[test]
    fn test_probe_running_child_then_exited_child() {
        let mut child = Command::new("sleep")
            .arg("30")
            .stdout(Stdio::null())
            .spawn()
            .unwrap();
        let pid = child.id();
        assert_eq!(SystemProbe.probe(pid), ProcessState::Alive);

        child.kill().unwrap();
        assert_eq!(wait_for_dead(pid), ProcessState::Dead);
    }

    #[test]
    fn test_probe_reaps_child_that_exits_immediately() {
        let child = Command::new("true").spawn().unwrap();
        let pid = child.id();
        assert_eq!(wait_for_dead(pid), ProcessState::Dead);
    }

    #[test]
    fn test_probe_error_display() {
        let err = ProbeError::new("kill", Errno::EPERM);
        assert!(err.to_string().starts_with("kill failed"));
    }
}
