//! Worker Pool (C8): N command-executing workers plus one down-bound sweeper.

use crate::action::ActionQueue;
use crate::preprocessor::preprocess;
use crate::rule::Rule;
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

const POP_TIMEOUT: Duration = Duration::from_millis(500);
const SWEEP_INTERVAL: Duration = Duration::from_secs(5);

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Runs a command through the platform shell, logging its exit status. No timeout is imposed.
fn execute(command: &str) {
    match Command::new("/bin/sh").arg("-c").arg(command).status() {
        Ok(status) => {
            if status.success() {
                tracing::debug!(command, "action completed");
            } else {
                tracing::warn!(command, status = %status, "action exited non-zero");
            }
        }
        Err(err) => tracing::error!(command, error = %err, "failed to spawn action"),
    }
}

/// Spawns `n` command-executing workers, each looping `pop -> execute -> log`.
pub fn spawn_executors(n: usize, queue: ActionQueue, running: Arc<AtomicBool>) -> Vec<JoinHandle<()>> {
    (0..n)
        .map(|id| {
            let queue = queue.clone();
            let running = Arc::clone(&running);
            thread::Builder::new()
                .name(format!("logwarden-worker-{id}"))
                .spawn(move || {
                    while running.load(Ordering::SeqCst) {
                        if let Some(command) = queue.pop_timeout(POP_TIMEOUT) {
                            execute(&command);
                        }
                    }
                })
                .expect("failed to spawn worker thread")
        })
        .collect()
}

/// Spawns the sweeper: every 5 seconds, deprecates every Rule's windows and fires down-bound
/// actions once the process has been up long enough to have had a chance to observe events.
pub fn spawn_sweeper(
    rules: Arc<Mutex<Vec<Arc<Rule>>>>,
    queue: ActionQueue,
    running: Arc<AtomicBool>,
    started_at: Instant,
) -> JoinHandle<()> {
    thread::Builder::new()
        .name("logwarden-sweeper".to_string())
        .spawn(move || {
            while running.load(Ordering::SeqCst) {
                thread::sleep(SWEEP_INTERVAL);
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                let uptime = started_at.elapsed().as_secs();
                let now = now_secs();
                let snapshot: Vec<Arc<Rule>> = rules.lock().unwrap().clone();
                for rule in snapshot {
                    rule.deprecate(now);
                    if rule.has_down_action() && rule.down_bound_exceeded(uptime) {
                        let caps = vec![String::new()];
                        let command = preprocess(&rule.down_action_template, "", &caps);
                        queue.push(command);
                        rule.reset_down();
                    }
                }
            }
        })
        .expect("failed to spawn sweeper thread")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::freq::FreqSpec;

    #[test]
    fn sweeper_does_not_fire_before_uptime_gate() {
        let rule = Arc::new(
            Rule::new(
                "x".to_string(),
                ".*",
                String::new(),
                "echo quiet".to_string(),
                String::new(),
                FreqSpec::new(0, 1),
                FreqSpec::new(1, 10),
                0,
                false,
            )
            .unwrap(),
        );
        assert!(!rule.down_bound_exceeded(0));
        assert!(rule.down_bound_exceeded(10));
    }
}
