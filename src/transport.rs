use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::Sender;

use crate::event::StdinMsg;

/// The coordinator-provided handle through which a protocol writes to the
/// child's stdin and requests cancellation. Cheap to clone; every clone
/// refers to the same run.
#[derive(Clone)]
pub struct Transport {
    stdin_tx: Option<Sender<StdinMsg>>,
    pid: u32,
    alive: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
}

impl Transport {
    pub(crate) fn new(
        stdin_tx: Option<Sender<StdinMsg>>,
        pid: u32,
        alive: Arc<AtomicBool>,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self { stdin_tx, pid, alive, cancel }
    }

    /// Enqueues `bytes` onto the stdin input queue. Non-blocking: if the
    /// bounded queue is full the write is rejected (returns `false`) rather
    /// than stalling the caller, since this may be invoked from inside a
    /// protocol callback which must never block on the child.
    pub fn write(&self, bytes: Vec<u8>) -> bool {
        match &self.stdin_tx {
            Some(tx) => tx.try_send(StdinMsg::Write(bytes)).is_ok(),
            None => false,
        }
    }

    /// Enqueues the stdin sentinel. The input mover closes the descriptor
    /// once it observes this and posts `stdin_drained`.
    pub fn close_stdin(&self) {
        if let Some(tx) = &self.stdin_tx {
            let _ = tx.try_send(StdinMsg::Close);
        }
    }

    pub fn get_pid(&self) -> u32 {
        self.pid
    }

    /// Whether the child has been observed to exit. Becomes `false` the
    /// moment `process_exited` is recorded, even if descriptors are still
    /// draining.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Triggers cancellation (§4.4). Idempotent; a no-op if the run has
    /// already finalized.
    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }
}
