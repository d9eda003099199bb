use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};

use crate::coordinator::run_background;
use crate::error::{Result, RunnerError};
use crate::protocol::StreamingProtocol;
use crate::spawn::SpawnOptions;
use crate::transport::Transport;

/// Handed to a [`StreamingProtocol`] so it can push one item at a time from
/// within any callback (§4.3 "send_result"). Sending blocks once the
/// consumer-side [`ResultGenerator`] is not keeping up: that backpressure
/// *is* the suspension point described in spec §9 ("the coordinator loop
/// runs until the protocol emits a value").
#[derive(Clone)]
pub struct ResultSink<T> {
    tx: Sender<T>,
}

impl<T> ResultSink<T> {
    pub fn send_result(&self, value: T) -> bool {
        self.tx.send(value).is_ok()
    }
}

/// Bridges the protocol's push-based `send_result` calls to a pull-based
/// iterator (§4.6). Values are yielded in the order `send_result` was
/// called; the final item, if the run failed, is an `Err` carrying the
/// captured error ("raises it at termination").
///
/// Dropping the generator before it is exhausted still triggers
/// cancellation and joins the coordinator thread, guaranteeing the child
/// and its threads are torn down (§4.6 last bullet).
pub struct ResultGenerator<T> {
    rx: Receiver<T>,
    transport: Transport,
    join: Option<JoinHandle<Option<RunnerError>>>,
    done: bool,
}

/// Starts a streaming run in the background and returns the generator the
/// caller pulls items from.
pub fn run_streaming<P: StreamingProtocol + 'static>(
    opts: SpawnOptions,
    build_protocol: impl FnOnce(ResultSink<P::Item>) -> P,
) -> Result<ResultGenerator<P::Item>> {
    run_streaming_with_capacity(opts, 1, build_protocol)
}

/// Like [`run_streaming`], but with an explicit channel capacity between
/// the protocol and the consuming iterator (the Batched Session uses a
/// larger capacity than the default tight lockstep of 1).
pub(crate) fn run_streaming_with_capacity<P: StreamingProtocol + 'static>(
    opts: SpawnOptions,
    capacity: usize,
    build_protocol: impl FnOnce(ResultSink<P::Item>) -> P,
) -> Result<ResultGenerator<P::Item>> {
    let (tx, rx) = crossbeam_channel::bounded(capacity);
    let protocol = build_protocol(ResultSink { tx });
    let (transport, join) = run_background(opts, protocol)?;
    Ok(ResultGenerator { rx, transport, join: Some(join), done: false })
}

impl<T> ResultGenerator<T> {
    /// The transport for the run backing this generator, for callers that
    /// need to write stdin or cancel without owning a protocol reference.
    pub fn transport(&self) -> &Transport {
        &self.transport
    }
}

impl<T> Iterator for ResultGenerator<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.rx.recv() {
            Ok(v) => Some(Ok(v)),
            Err(_) => {
                self.done = true;
                let err = self.join.take().and_then(|j| j.join().ok()).flatten();
                err.map(Err)
            }
        }
    }
}

impl<T> Drop for ResultGenerator<T> {
    fn drop(&mut self) {
        if let Some(join) = self.join.take() {
            self.transport.request_cancel();
            let _ = join.join();
        }
    }
}
