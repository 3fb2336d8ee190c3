//! Waiting on a detached target while an external leak checker finishes.

use crate::config::types::Result;
use log::{debug, warn};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How a detached process was last observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitObservation {
    Exited(i32),
    Signaled(Signal),
    /// Exited, but not our child so no status is available
    Gone,
    /// Still alive when the wait bound expired
    StillRunning,
}

/// Wait for `pid` to exit, up to `timeout`.
/// Reaps the process when it is our child, otherwise polls for its disappearance.
pub fn wait_for_exit(pid: u32, timeout: Duration) -> Result<ExitObservation> {
    let pid = Pid::from_raw(pid as i32);
    let deadline = Instant::now() + timeout;
    let mut reapable = true;

    loop {
        if reapable {
            match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::Exited(_, code)) => {
                    debug!("Process {} exited with code {}", pid, code);
                    return Ok(ExitObservation::Exited(code));
                }
                Ok(WaitStatus::Signaled(_, sig, _)) => {
                    debug!("Process {} terminated by {}", pid, sig);
                    return Ok(ExitObservation::Signaled(sig));
                }
                Ok(_) => {}
                Err(Errno::ECHILD) => {
                    debug!("Process {} is not our child, polling instead", pid);
                    reapable = false;
                }
                Err(e) => return Err(e.into()),
            }
        }

        if !reapable {
            match signal::kill(pid, None) {
                Err(Errno::ESRCH) => return Ok(ExitObservation::Gone),
                Ok(()) | Err(Errno::EPERM) => {}
                Err(e) => return Err(e.into()),
            }
        }

        if Instant::now() >= deadline {
            warn!("Process {} still running after {:?}", pid, timeout);
            return Ok(ExitObservation::StillRunning);
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_for_child_exit() {
        let child = match std::process::Command::new("true").spawn() {
            Ok(child) => child,
            Err(e) => {
                println!("cannot spawn `true`: {}", e);
                return;
            }
        };
        let observed = wait_for_exit(child.id(), Duration::from_secs(5)).unwrap();
        assert_eq!(observed, ExitObservation::Exited(0));
    }
}
