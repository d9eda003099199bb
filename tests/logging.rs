mod common;

use subprocess_runner::{run_blocking, SpawnOptions};
use tracing_test::traced_test;

use common::Collecting;

#[test]
#[traced_test]
fn spawning_a_child_emits_the_expected_trace_events() {
    let opts = SpawnOptions::new(vec!["/bin/echo".to_string(), "hi".to_string()]);
    let result = run_blocking(opts, Collecting::default()).expect("echo should succeed");
    assert!(result.exit_status.expect("exit observed").success());

    assert!(logs_contain("child spawned"));
    assert!(logs_contain("run finished cleanly"));
}
