use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, SendTimeoutError, Sender};

use crate::event::{Event, PipeId, StdinMsg};

#[cfg(unix)]
fn set_nonblocking<F: std::os::unix::io::AsRawFd>(f: &F) -> io::Result<()> {
    let fd = f.as_raw_fd();
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    let ret = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Moves bytes from one child descriptor into the output queue using a
/// blocking read, honoring an explicit stop flag (§4.1).
///
/// On Unix the descriptor is switched to non-blocking mode so the stop flag
/// can actually interrupt the read loop between attempts: a single `read()`
/// blocked indefinitely on a pipe cannot otherwise be canceled without
/// poll/select, which the design deliberately avoids (spec §9). On
/// platforms without that primitive the mover instead exits only on EOF,
/// error, or the shared cancellation flag observed at the queue-put point.
pub(crate) struct OutputMover;

impl OutputMover {
    /// Unix: the descriptor is switched to non-blocking first, so the stop
    /// flag is checked between read attempts instead of sitting blocked
    /// indefinitely in the kernel.
    #[cfg(unix)]
    pub fn spawn<R>(
        id: PipeId,
        mut reader: R,
        tx: Sender<Event>,
        stop: Arc<AtomicBool>,
        chunk_size: usize,
        put_timeout: Duration,
    ) -> JoinHandle<()>
    where
        R: Read + Send + std::os::unix::io::AsRawFd + 'static,
    {
        thread::spawn(move || {
            let _ = set_nonblocking(&reader);

            let mut buf = vec![0u8; chunk_size];
            loop {
                if stop.load(Ordering::SeqCst) {
                    let _ = tx.send(Event::PipeClosed { id, error: None });
                    return;
                }

                match reader.read(&mut buf) {
                    Ok(0) => {
                        let _ = tx.send(Event::PipeClosed { id, error: None });
                        return;
                    }
                    Ok(n) => {
                        if !enqueue(&tx, Event::Data { id, bytes: buf[..n].to_vec() }, &stop, put_timeout) {
                            return;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        thread::sleep(Duration::from_millis(20));
                        continue;
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        let _ = tx.send(Event::PipeClosed { id, error: Some(e) });
                        return;
                    }
                }
            }
        })
    }

    /// Windows: `ChildStdout`/`ChildStderr` expose `AsRawHandle`, not
    /// `AsRawFd`, and there is no cheap non-blocking-pipe-read primitive
    /// reachable from safe code here, so the stop flag is only observed at
    /// the queue-put point; a stuck read is instead bounded by the
    /// whole-process idle timeout and process exit (see DESIGN.md's open
    /// question on this).
    #[cfg(not(unix))]
    pub fn spawn<R>(
        id: PipeId,
        mut reader: R,
        tx: Sender<Event>,
        stop: Arc<AtomicBool>,
        chunk_size: usize,
        put_timeout: Duration,
    ) -> JoinHandle<()>
    where
        R: Read + Send + 'static,
    {
        thread::spawn(move || {
            let mut buf = vec![0u8; chunk_size];
            loop {
                if stop.load(Ordering::SeqCst) {
                    let _ = tx.send(Event::PipeClosed { id, error: None });
                    return;
                }

                match reader.read(&mut buf) {
                    Ok(0) => {
                        let _ = tx.send(Event::PipeClosed { id, error: None });
                        return;
                    }
                    Ok(n) => {
                        if !enqueue(&tx, Event::Data { id, bytes: buf[..n].to_vec() }, &stop, put_timeout) {
                            return;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        let _ = tx.send(Event::PipeClosed { id, error: Some(e) });
                        return;
                    }
                }
            }
        })
    }
}

/// Moves buffers from the stdin input queue to the child's stdin descriptor
/// (§4.1, input mover).
pub(crate) struct InputMover;

impl InputMover {
    pub fn spawn<W>(mut writer: W, rx: Receiver<StdinMsg>, tx: Sender<Event>, loop_wait: Duration) -> JoinHandle<()>
    where
        W: Write + Send + 'static,
    {
        thread::spawn(move || loop {
            match rx.recv_timeout(loop_wait) {
                Ok(StdinMsg::Write(bytes)) => {
                    if let Err(e) = write_all_retrying(&mut writer, &bytes) {
                        let _ = tx.send(Event::PipeClosed { id: PipeId::Stdin, error: Some(e) });
                        return;
                    }
                }
                Ok(StdinMsg::Close) => {
                    drop(writer);
                    let _ = tx.send(Event::StdinDrained);
                    return;
                }
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                    drop(writer);
                    let _ = tx.send(Event::StdinDrained);
                    return;
                }
            }
        })
    }
}

fn write_all_retrying<W: Write>(writer: &mut W, mut bytes: &[u8]) -> io::Result<()> {
    while !bytes.is_empty() {
        match writer.write(bytes) {
            Ok(0) => return Err(io::Error::new(io::ErrorKind::WriteZero, "short write with no progress")),
            Ok(n) => bytes = &bytes[n..],
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Bounded put with a retry loop: on timeout, checks the cancellation flag
/// and retries; returns `false` once the queue is gone or cancellation has
/// been observed.
fn enqueue(tx: &Sender<Event>, mut event: Event, stop: &AtomicBool, put_timeout: Duration) -> bool {
    loop {
        match tx.send_timeout(event, put_timeout) {
            Ok(()) => return true,
            Err(SendTimeoutError::Timeout(ev)) => {
                if stop.load(Ordering::SeqCst) {
                    return false;
                }
                event = ev;
                continue;
            }
            Err(SendTimeoutError::Disconnected(_)) => return false,
        }
    }
}
