use std::io;
use std::process::ExitStatus;

use crate::error::RunnerError;
use crate::event::PipeId;
use crate::transport::Transport;

/// The capability set a run is parameterized by. A concrete adapter
/// implements only the callbacks it cares about; the rest are no-ops.
///
/// Callbacks for a single run all execute on the coordinator's thread, in
/// the order their triggering events were dequeued, so a `Protocol` needs no
/// internal synchronization (spec §4.3, §5).
pub trait Protocol: Send {
    /// Invoked immediately after the child starts, before any data events.
    fn connection_made(&mut self, _transport: &Transport) {}

    /// Invoked once per `data` event consumed from the output queue. Must
    /// not block, and must not call back into the transport other than to
    /// write stdin or request cancellation.
    fn pipe_data_received(&mut self, _id: PipeId, _bytes: &[u8]) {}

    /// Invoked once per `pipe_closed` event. `err` is `None` on EOF.
    fn pipe_connection_lost(&mut self, _id: PipeId, _err: Option<&io::Error>) {}

    /// Invoked on inactivity expiry for `id`, or for the whole process when
    /// `id` is `None`. Returning `true` tells the coordinator to close that
    /// descriptor (or terminate the process when `id` is `None`); `false`
    /// resets the timer and continues.
    fn timeout(&mut self, _id: Option<PipeId>) -> bool {
        false
    }

    /// Invoked after the `process_exited` event is consumed.
    fn process_exited(&mut self, _status: ExitStatus) {}

    /// The final callback for this run: invoked once, after every other
    /// callback is guaranteed to not fire again. `err` carries the reason
    /// the run failed, if any.
    fn connection_lost(&mut self, _err: Option<&RunnerError>) {}
}

/// Finish mode for a run that produces a single opaque result once
/// `connection_lost` fires.
pub trait BlockingProtocol: Protocol {
    type Output;

    /// Produces the value returned to the caller. Invoked exactly once,
    /// after `connection_lost`, and only when the run did not fail.
    fn prepare_result(self) -> Self::Output;
}

/// Marker for protocols meant to be driven through [`crate::ResultGenerator`].
/// The protocol pushes items to the caller via a [`crate::ResultSink`] it
/// holds internally (typically stored alongside its own state) from within
/// whichever callback produces a value.
pub trait StreamingProtocol: Protocol {
    type Item: Send + 'static;
}
