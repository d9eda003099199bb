use std::fmt;
use std::io;
use std::process::ExitStatus;

/// One of the child's standard descriptors attached via a pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipeId {
    Stdin = 0,
    Stdout = 1,
    Stderr = 2,
}

impl fmt::Display for PipeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PipeId::Stdin => "stdin",
            PipeId::Stdout => "stdout",
            PipeId::Stderr => "stderr",
        };
        f.write_str(s)
    }
}

/// A tagged record placed on the output queue by a Pipe Mover or the Child
/// Waiter. For a given [`PipeId`], `PipeClosed` is always the terminal event:
/// no further `Data` for that id follows it.
#[derive(Debug)]
pub enum Event {
    ConnectionMade,
    Data { id: PipeId, bytes: Vec<u8> },
    PipeClosed { id: PipeId, error: Option<io::Error> },
    StdinDrained,
    ProcessExited { status: ExitStatus },
    MoverFailed { id: PipeId, error: io::Error },
    /// The Child Waiter's `wait()` call itself failed (e.g. the pid was
    /// reaped out from under it). Exceptional; not part of the normal
    /// event vocabulary in spec §3, but the coordinator must still be able
    /// to finalize instead of waiting forever for an exit that will never
    /// be posted.
    WaiterFailed(io::Error),
    Heartbeat,
}

/// Message sent to the stdin input mover.
pub(crate) enum StdinMsg {
    Write(Vec<u8>),
    Close,
}

/// Bounded tail of recently-seen bytes, kept purely so errors can carry a
/// partial capture per endpoint without the protocol having to cooperate.
#[derive(Debug, Clone, Default)]
pub struct TailBuffer {
    max_len: usize,
    buf: Vec<u8>,
}

impl TailBuffer {
    pub fn new(max_len: usize) -> Self {
        Self { max_len, buf: Vec::new() }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
        if self.buf.len() > self.max_len {
            let drop_len = self.buf.len() - self.max_len;
            self.buf.drain(..drop_len);
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }
}
