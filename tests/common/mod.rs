use std::process::ExitStatus;

use subprocess_runner::{PipeId, Protocol, Transport};

/// A run-to-completion protocol that just buffers everything (§8 scenarios
/// 1-3): good enough for any test that wants plain captured output.
#[derive(Default)]
pub struct Collecting {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_status: Option<ExitStatus>,
    pub data_events: Vec<(PipeId, usize)>,
}

impl Protocol for Collecting {
    fn pipe_data_received(&mut self, id: PipeId, bytes: &[u8]) {
        self.data_events.push((id, bytes.len()));
        match id {
            PipeId::Stdout => self.stdout.extend_from_slice(bytes),
            PipeId::Stderr => self.stderr.extend_from_slice(bytes),
            PipeId::Stdin => {}
        }
    }

    fn process_exited(&mut self, status: ExitStatus) {
        self.exit_status = Some(status);
    }
}

impl subprocess_runner::BlockingProtocol for Collecting {
    type Output = Collecting;

    fn prepare_result(self) -> Self::Output {
        self
    }
}

/// Echoes every received stdout line back through a [`subprocess_runner::ResultSink`]
/// as soon as it completes (§8 scenario 5).
pub struct LineStreamer {
    sink: subprocess_runner::ResultSink<String>,
    buf: Vec<u8>,
}

impl LineStreamer {
    pub fn new(sink: subprocess_runner::ResultSink<String>) -> Self {
        Self { sink, buf: Vec::new() }
    }
}

impl Protocol for LineStreamer {
    fn pipe_data_received(&mut self, id: PipeId, bytes: &[u8]) {
        if id != PipeId::Stdout {
            return;
        }
        self.buf.extend_from_slice(bytes);
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]).into_owned();
            self.sink.send_result(line);
        }
    }
}

impl subprocess_runner::StreamingProtocol for LineStreamer {
    type Item = String;
}

/// Writes `input` to stdin and closes it as soon as the child starts, then
/// collects everything the child writes back (§8 scenario 2: a `cat` that
/// echoes stdin to stdout).
pub struct WriteThenCollect {
    pub input: Vec<u8>,
    pub stdout: Vec<u8>,
    pub exit_status: Option<ExitStatus>,
}

impl WriteThenCollect {
    pub fn new(input: impl Into<Vec<u8>>) -> Self {
        Self { input: input.into(), stdout: Vec::new(), exit_status: None }
    }
}

impl Protocol for WriteThenCollect {
    fn connection_made(&mut self, transport: &Transport) {
        transport.write(std::mem::take(&mut self.input));
        transport.close_stdin();
    }

    fn pipe_data_received(&mut self, id: PipeId, bytes: &[u8]) {
        if id == PipeId::Stdout {
            self.stdout.extend_from_slice(bytes);
        }
    }

    fn process_exited(&mut self, status: ExitStatus) {
        self.exit_status = Some(status);
    }
}

impl subprocess_runner::BlockingProtocol for WriteThenCollect {
    type Output = WriteThenCollect;

    fn prepare_result(self) -> Self::Output {
        self
    }
}

/// Always asks the coordinator to act on an expired timeout, for tests that
/// exercise the per-endpoint or whole-process idle budget (§8 scenario 3).
#[derive(Default)]
pub struct TimeoutOnIdle;

impl Protocol for TimeoutOnIdle {
    fn timeout(&mut self, _id: Option<PipeId>) -> bool {
        true
    }
}

impl subprocess_runner::BlockingProtocol for TimeoutOnIdle {
    type Output = ();

    fn prepare_result(self) -> Self::Output {}
}

/// Panics as soon as it sees any stdout data, to exercise the coordinator's
/// `catch_unwind` boundary around protocol callbacks (spec §7 "Protocol
/// error").
#[derive(Default)]
pub struct PanicsOnFirstOutput;

impl Protocol for PanicsOnFirstOutput {
    fn pipe_data_received(&mut self, _id: PipeId, _bytes: &[u8]) {
        panic!("boom");
    }
}

impl subprocess_runner::BlockingProtocol for PanicsOnFirstOutput {
    type Output = ();

    fn prepare_result(self) -> Self::Output {}
}

/// Cancels the run from within the first `data` event it observes (§8
/// scenario 6: cancel an in-progress command).
#[derive(Default)]
pub struct CancelOnFirstOutput;

impl Protocol for CancelOnFirstOutput {
    fn connection_made(&mut self, transport: &Transport) {
        let transport = transport.clone();
        std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(200));
            transport.request_cancel();
        });
    }
}

impl subprocess_runner::BlockingProtocol for CancelOnFirstOutput {
    type Output = ();

    fn prepare_result(self) -> Self::Output {}
}
