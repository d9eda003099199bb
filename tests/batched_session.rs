use std::fs;

use pretty_assertions::assert_eq;
use subprocess_runner::{BatchedSession, SentinelDecoder, SpawnOptions};

#[test]
fn sentinel_decoder_frames_responses_over_cat() {
    let opts = SpawnOptions::new(vec!["/bin/cat".to_string()]);
    let mut session = BatchedSession::new(opts, Box::new(|| Box::<SentinelDecoder>::default()));

    let responses = session
        .submit(vec!["one\n".to_string(), "two\nmore\n".to_string()])
        .expect("cat should echo back framed responses");

    assert_eq!(responses, vec![vec!["one".to_string(), String::new()], vec!["two".to_string(), "more".to_string(), String::new()]]);

    session.close().expect("session should close cleanly");
}

#[test]
fn session_restarts_transparently_after_child_exits() {
    // Each spawned child appends a line to a scratch marker file before
    // doing its single request/response round, so the number of distinct
    // children actually spawned can be counted after the fact rather than
    // just inferred from the responses looking right.
    let scratch = tempfile::tempdir().expect("create scratch dir");
    let marker = scratch.path().join("spawns.log");

    let script = format!("echo spawned >> {}; read x; echo \"$x\"; echo", marker.display());
    let opts = SpawnOptions::new(vec!["/bin/sh".to_string(), "-c".to_string(), script]);
    let mut session = BatchedSession::new(opts, Box::new(|| Box::<SentinelDecoder>::default()));

    let first = session.submit(vec!["hello\n".to_string()]).expect("first round succeeds");
    assert_eq!(first, vec![vec!["hello".to_string(), String::new()]]);

    // The child has exited by now; the next submit restarts it rather than
    // surfacing a stale-session error.
    let second = session.submit(vec!["world\n".to_string()]).expect("session restarts transparently");
    assert_eq!(second, vec![vec!["world".to_string(), String::new()]]);

    session.close().expect("session should close cleanly");

    let spawn_log = fs::read_to_string(&marker).expect("marker file written by both children");
    assert_eq!(spawn_log.lines().count(), 2, "expected exactly two distinct child processes spawned");
}
