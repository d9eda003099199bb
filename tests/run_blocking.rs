mod common;

use pretty_assertions::assert_eq;
use subprocess_runner::{run_blocking, RunnerError, SpawnOptions};

use common::{Collecting, PanicsOnFirstOutput, TimeoutOnIdle, WriteThenCollect};

#[test]
fn echo_hello_captures_stdout() {
    let opts = SpawnOptions::new(vec!["/bin/echo".to_string(), "hello".to_string()]);
    let result = run_blocking(opts, Collecting::default()).expect("echo should succeed");

    assert_eq!(result.stdout, b"hello\n");
    assert!(result.exit_status.expect("exit observed").success());
}

#[test]
fn cat_echoes_stdin_to_stdout() {
    let mut opts = SpawnOptions::new(vec!["/bin/cat".to_string()]);
    opts.stdin = subprocess_runner::PipeMode::Pipe;
    let result = run_blocking(opts, WriteThenCollect::new(b"ping".to_vec())).expect("cat should succeed");

    assert_eq!(result.stdout, b"ping");
    assert!(result.exit_status.expect("exit observed").success());
}

#[test]
fn whole_process_idle_timeout_surfaces_as_timeout_error() {
    let mut opts = SpawnOptions::new(vec!["/bin/sleep".to_string(), "5".to_string()]);
    opts.timeouts.whole_process_idle = std::time::Duration::from_millis(100);
    opts.stdout = subprocess_runner::PipeMode::Suppress;
    opts.stderr = subprocess_runner::PipeMode::Suppress;
    opts.stdin = subprocess_runner::PipeMode::Suppress;
    opts.grace_window = std::time::Duration::from_millis(200);

    let err = run_blocking(opts, TimeoutOnIdle).expect_err("sleep should be killed for inactivity");
    match err {
        RunnerError::Timeout { .. } => {}
        other => panic!("expected Timeout, got {other:?}"),
    }
}

#[test]
fn panicking_protocol_callback_is_captured_not_propagated() {
    let opts = SpawnOptions::new(vec!["/bin/echo".to_string(), "hello".to_string()]);

    let err = run_blocking(opts, PanicsOnFirstOutput).expect_err("a panicking callback must surface as an error");
    match err {
        RunnerError::Protocol { .. } => {}
        other => panic!("expected Protocol, got {other:?}"),
    }
}
