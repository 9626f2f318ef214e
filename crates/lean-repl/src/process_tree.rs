//! Process-tree termination for the checker.
//!
//! `lake env repl` forks the actual REPL, so killing only the direct child
//! leaves the Lean process running and holding the pipes.

use std::collections::HashSet;
use std::time::Duration;

use sysinfo::{Pid, ProcessStatus, Signal, System};

/// Collect `root` and all of its descendants, children before parents.
pub fn collect_tree(root: u32) -> Vec<u32> {
    let mut system = System::new();
    system.refresh_processes();

    let root = Pid::from_u32(root);
    let mut seen: HashSet<Pid> = HashSet::from([root]);
    let mut frontier = vec![root];
    let mut ordered = Vec::new();

    while let Some(parent) = frontier.pop() {
        ordered.push(parent);
        for (pid, process) in system.processes() {
            if process.parent() == Some(parent) && seen.insert(*pid) {
                frontier.push(*pid);
            }
        }
    }

    ordered.reverse();
    ordered.into_iter().map(|pid| pid.as_u32()).collect()
}

/// Terminate every process in `pids`: SIGTERM first, then SIGKILL for
/// anything still alive after `grace`.
///
/// Returns the number of processes that had to be force-killed.
pub async fn terminate(pids: &[u32], grace: Duration) -> usize {
    if pids.is_empty() {
        return 0;
    }

    let mut system = System::new();
    system.refresh_processes();
    for pid in pids {
        if let Some(process) = system.process(Pid::from_u32(*pid)) {
            if process.kill_with(Signal::Term).is_none() {
                // SIGTERM unsupported on this platform, go straight to kill
                process.kill();
            }
        }
    }

    tokio::time::sleep(grace).await;

    system.refresh_processes();
    let mut killed = 0;
    for pid in pids {
        let Some(process) = system.process(Pid::from_u32(*pid)) else {
            continue;
        };
        if process.status() != ProcessStatus::Zombie {
            tracing::warn!(pid, "Process still running after SIGTERM, sending SIGKILL");
            if process.kill() {
                killed += 1;
            }
        }
    }
    killed
}
