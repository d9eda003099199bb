use std::process::Child;
use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;

use crate::event::Event;

/// A single thread that performs the blocking "wait for exit" call and
/// posts `process_exited` (§4.2). Keeping the wait off the coordinator
/// thread lets the coordinator keep draining buffered `data` events after
/// the child has already exited.
///
/// The waiter owns the (by now pipe-less) `Child` outright; termination
/// signals are sent by the coordinator directly to the pid via the OS
/// (§4.4), so no other thread ever needs mutable access to this `Child`.
pub(crate) struct ChildWaiter;

impl ChildWaiter {
    pub fn spawn(mut child: Child, tx: Sender<Event>) -> JoinHandle<()> {
        thread::spawn(move || match child.wait() {
            Ok(status) => {
                let _ = tx.send(Event::ProcessExited { status });
            }
            Err(e) => {
                let _ = tx.send(Event::WaiterFailed(e));
            }
        })
    }
}
