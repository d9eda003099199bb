use std::collections::HashMap;
use std::io;
use std::process::ExitStatus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::coordinator::run_background;
use crate::error::{PartialOutput, Result, RunnerError};
use crate::event::PipeId;
use crate::line_decode::{LineSplitter, ResponseDecoder};
use crate::protocol::Protocol;
use crate::spawn::{PipeMode, SpawnOptions};

pub type DecoderFactory = Box<dyn Fn() -> Box<dyn ResponseDecoder> + Send + Sync>;

/// Feeds stdout through a [`LineSplitter`] and a pluggable [`ResponseDecoder`]
/// to turn raw bytes into complete responses; buffers stderr untouched for
/// on-demand inspection (§4.5's "error channel").
struct LineFramingProtocol {
    splitter: LineSplitter,
    decoder: Box<dyn ResponseDecoder>,
    response_tx: Sender<Vec<String>>,
    stderr_buf: Arc<Mutex<Vec<u8>>>,
    exited: Arc<AtomicBool>,
}

impl Protocol for LineFramingProtocol {
    fn pipe_data_received(&mut self, id: PipeId, bytes: &[u8]) {
        match id {
            PipeId::Stdout => {
                for line in self.splitter.push(bytes) {
                    if let Some(response) = self.decoder.push_line(line) {
                        // Unbounded: a protocol callback must never block.
                        let _ = self.response_tx.send(response);
                    }
                }
            }
            PipeId::Stderr => {
                if let Ok(mut buf) = self.stderr_buf.lock() {
                    buf.extend_from_slice(bytes);
                }
            }
            PipeId::Stdin => {}
        }
    }

    fn process_exited(&mut self, _status: ExitStatus) {
        self.exited.store(true, Ordering::SeqCst);
    }
}

struct RunningChild {
    transport: crate::transport::Transport,
    response_rx: Receiver<Vec<String>>,
    stderr_buf: Arc<Mutex<Vec<u8>>>,
    exited: Arc<AtomicBool>,
    join: Option<JoinHandle<Option<RunnerError>>>,
}

/// A long-lived child kept alive across many request/response cycles
/// (§4.5). One child, many `submit` calls; the child is restarted
/// transparently at the session boundary (never mid-`submit`) if it has
/// exited.
pub struct BatchedSession {
    opts: SpawnOptions,
    decoder_factory: DecoderFactory,
    running: Option<RunningChild>,
    last_used: Instant,
}

impl BatchedSession {
    /// A Batched Session always submits commands over the child's stdin, so
    /// it forces `stdin: PipeMode::Pipe` regardless of what the caller set
    /// (the crate's own default is `Suppress`, correct for one-shot runs
    /// that never write to stdin).
    pub fn new(mut opts: SpawnOptions, decoder_factory: DecoderFactory) -> Self {
        opts.stdin = PipeMode::Pipe;
        Self { opts, decoder_factory, running: None, last_used: Instant::now() }
    }

    fn spawn_child(&self) -> Result<RunningChild> {
        let (response_tx, response_rx) = crossbeam_channel::unbounded();
        let stderr_buf = Arc::new(Mutex::new(Vec::new()));
        let exited = Arc::new(AtomicBool::new(false));
        let protocol = LineFramingProtocol {
            splitter: LineSplitter::with_mode(self.opts.framing_mode),
            decoder: (self.decoder_factory)(),
            response_tx,
            stderr_buf: stderr_buf.clone(),
            exited: exited.clone(),
        };
        let (transport, join) = run_background(self.opts.clone(), protocol)?;
        Ok(RunningChild { transport, response_rx, stderr_buf, exited, join: Some(join) })
    }

    fn ensure_started(&mut self) -> Result<()> {
        let needs_restart = match &self.running {
            None => true,
            Some(running) => running.exited.load(Ordering::SeqCst),
        };
        if needs_restart {
            if self.running.is_some() {
                tracing::info!(argv = ?self.opts.argv, "batched session child exited, restarting");
            }
            if let Some(mut stale) = self.running.take() {
                if let Some(join) = stale.join.take() {
                    let _ = join.join();
                }
            }
            self.running = Some(self.spawn_child()?);
        }
        Ok(())
    }

    /// Sends each command as one line and blocks until all `K` responses
    /// have been parsed, in order (§4.5 "Send/receive contract"). Not safe
    /// to call concurrently from multiple caller threads; serialization is
    /// the caller's responsibility.
    pub fn submit(&mut self, cmds: Vec<String>) -> Result<Vec<Vec<String>>> {
        self.ensure_started()?;
        let response_timeout = self.opts.timeouts.stdout;

        let mut responses = Vec::with_capacity(cmds.len());
        for cmd in cmds {
            let mut line = cmd;
            line.push('\n');

            let running = self.running.as_ref().expect("ensure_started just populated this");
            let wrote = running.transport.write(line.into_bytes());
            if !wrote {
                return Err(self.fail_mid_response("stdin queue rejected write; child likely gone"));
            }

            let running = self.running.as_ref().expect("ensure_started just populated this");
            match running.response_rx.recv_timeout(response_timeout) {
                Ok(response) => responses.push(response),
                Err(RecvTimeoutError::Disconnected) | Err(RecvTimeoutError::Timeout) => {
                    return Err(self.fail_mid_response("child exited or stalled mid-response"));
                }
            }
        }

        self.last_used = Instant::now();
        Ok(responses)
    }

    /// A request fails mid-response: per §9 this is surfaced as an
    /// I/O-failure-kind error and the session is marked closed so the next
    /// `submit` restarts transparently.
    fn fail_mid_response(&mut self, message: &str) -> RunnerError {
        let stderr_tail = self
            .running
            .as_ref()
            .and_then(|r| r.stderr_buf.lock().ok().map(|b| b.clone()))
            .unwrap_or_default();
        if let Some(mut running) = self.running.take() {
            if let Some(join) = running.join.take() {
                let _ = join.join();
            }
        }
        RunnerError::Io {
            id: PipeId::Stdout,
            source: io::Error::new(io::ErrorKind::BrokenPipe, message.to_string()),
            partial: PartialOutput { stdout_tail: Vec::new(), stderr_tail },
        }
    }

    /// Buffered stderr for the currently (or most recently) running child.
    pub fn stderr(&self) -> Vec<u8> {
        self.running.as_ref().and_then(|r| r.stderr_buf.lock().ok().map(|b| b.clone())).unwrap_or_default()
    }

    pub fn is_running(&self) -> bool {
        self.running.as_ref().is_some_and(|r| !r.exited.load(Ordering::SeqCst))
    }

    fn idle_for(&self) -> Duration {
        self.last_used.elapsed()
    }

    /// Posts the stdin sentinel, waits up to the configured grace window,
    /// and tears the coordinator down; failure to exit within grace
    /// escalates to forceful termination (§4.5 "Close").
    pub fn close(&mut self) -> Result<()> {
        let Some(mut running) = self.running.take() else {
            return Ok(());
        };
        running.transport.close_stdin();

        let deadline = Instant::now() + self.opts.grace_window;
        while !running.exited.load(Ordering::SeqCst) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(20));
        }
        if !running.exited.load(Ordering::SeqCst) {
            running.transport.request_cancel();
        }
        if let Some(join) = running.join.take() {
            let _ = join.join();
        }
        Ok(())
    }
}

impl Drop for BatchedSession {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Resource ceiling for long-lived sessions (§5): bounds concurrent
/// sessions and evicts ones that have been idle too long.
pub struct BatchedSessionPool {
    max_concurrent: usize,
    max_idle_age: Duration,
    sessions: HashMap<String, BatchedSession>,
}

impl BatchedSessionPool {
    pub fn new(max_concurrent: usize, max_idle_age: Duration) -> Self {
        Self { max_concurrent, max_idle_age, sessions: HashMap::new() }
    }

    fn evict_idle(&mut self) {
        let stale: Vec<String> =
            self.sessions.iter().filter(|(_, s)| s.idle_for() > self.max_idle_age).map(|(k, _)| k.clone()).collect();
        for key in stale {
            if let Some(mut session) = self.sessions.remove(&key) {
                let _ = session.close();
            }
        }
    }

    fn evict_oldest(&mut self) {
        if let Some(oldest_key) = self.sessions.iter().max_by_key(|(_, s)| s.idle_for()).map(|(k, _)| k.clone()) {
            if let Some(mut session) = self.sessions.remove(&oldest_key) {
                let _ = session.close();
            }
        }
    }

    /// Submits `cmds` to the session for `key`, creating it via
    /// `make_session` on first use.
    pub fn submit(
        &mut self,
        key: &str,
        make_session: impl FnOnce() -> (SpawnOptions, DecoderFactory),
        cmds: Vec<String>,
    ) -> Result<Vec<Vec<String>>> {
        self.evict_idle();
        if !self.sessions.contains_key(key) {
            if self.sessions.len() >= self.max_concurrent {
                self.evict_oldest();
            }
            let (opts, decoder_factory) = make_session();
            self.sessions.insert(key.to_string(), BatchedSession::new(opts, decoder_factory));
        }
        self.sessions.get_mut(key).expect("just inserted or already present").submit(cmds)
    }

    pub fn close_all(&mut self) {
        for (_, mut session) in self.sessions.drain() {
            let _ = session.close();
        }
    }
}
