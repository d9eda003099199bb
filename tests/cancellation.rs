mod common;

use std::time::Instant;

use subprocess_runner::{run_blocking, RunnerError, SpawnOptions};

use common::CancelOnFirstOutput;

#[test]
fn cancelling_a_spinning_command_surfaces_cancelled_error() {
    let opts = SpawnOptions::new(vec![
        "/bin/sh".to_string(),
        "-c".to_string(),
        "while true; do :; done".to_string(),
    ]);

    let start = Instant::now();
    let err = run_blocking(opts, CancelOnFirstOutput).expect_err("a cancelled run must surface an error");
    let elapsed = start.elapsed();

    match err {
        RunnerError::Cancelled { .. } => {}
        other => panic!("expected Cancelled, got {other:?}"),
    }
    // Cancel fires at ~200ms; a busy loop with no i/o wouldn't otherwise
    // exit on its own, so a prompt return is evidence the signal escalation
    // path actually worked rather than waiting out some other timeout.
    assert!(elapsed < std::time::Duration::from_secs(5), "cancellation should not wait out the grace window twice");
}
