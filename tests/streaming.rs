mod common;

use pretty_assertions::assert_eq;
use subprocess_runner::{run_streaming, SpawnOptions};

use common::LineStreamer;

#[test]
fn printf_lines_stream_one_at_a_time() {
    let opts = SpawnOptions::new(vec![
        "/bin/sh".to_string(),
        "-c".to_string(),
        "printf '%s\\n%s\\n%s\\n' alpha beta gamma".to_string(),
    ]);

    let generator = run_streaming(opts, LineStreamer::new).expect("printf should start");
    let lines: Vec<String> = generator.map(|item| item.expect("no failures expected")).collect();

    assert_eq!(lines, vec!["alpha".to_string(), "beta".to_string(), "gamma".to_string()]);
}

#[test]
fn dropping_the_generator_early_still_tears_down_cleanly() {
    let opts = SpawnOptions::new(vec![
        "/bin/sh".to_string(),
        "-c".to_string(),
        "for i in $(seq 1 100); do echo line$i; sleep 0.05; done".to_string(),
    ]);

    let mut generator = run_streaming(opts, LineStreamer::new).expect("sh should start");
    let first = generator.next().expect("at least one line before drop");
    assert!(first.is_ok());
    drop(generator);
}
