//! Supervisor shutdown through process signals.
//!
//! Kept in its own test binary: the signals are delivered to the whole
//! test process.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use orgvault_core::cycle::CommandCycle;
use orgvault_core::{Environment, Supervisor};
use orgvault_test_utils::TestWorkspace;
use pretty_assertions::assert_eq;

fn line_count(path: &Path) -> usize {
    std::fs::read_to_string(path)
        .map(|s| s.lines().count())
        .unwrap_or(0)
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

/// Deliver `sig` while the second cycle is in flight and expect the loop
/// to return once that cycle completes.
async fn stops_after_in_flight_cycle(sig: Signal) {
    let ws = TestWorkspace::new();
    let starts = ws.join("starts.log");
    let script = format!("echo start >> '{}'; sleep 0.3", starts.display());
    let cycle = CommandCycle::new(
        vec!["sh".to_string(), "-c".to_string(), script],
        Environment::isolated(),
    );
    let supervisor = Arc::new(
        Supervisor::new(ws.pid_file(), Arc::new(cycle)).with_interval(Duration::from_millis(50)),
    );

    let task = tokio::spawn({
        let supervisor = supervisor.clone();
        async move { supervisor.run().await }
    });

    wait_until(|| line_count(&starts) >= 2).await;
    kill(Pid::this(), sig).unwrap();

    let cycles = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("supervisor did not stop")
        .unwrap()
        .unwrap();
    assert_eq!(cycles, 2);
    assert_eq!(line_count(&starts), 2);
    assert!(!ws.pid_file().exists());
}

#[test_log::test(tokio::test)]
async fn test_signals_stop_loop_mid_cycle() {
    stops_after_in_flight_cycle(Signal::SIGINT).await;
    stops_after_in_flight_cycle(Signal::SIGTERM).await;
}
