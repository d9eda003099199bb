use std::collections::{HashMap, HashSet};
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::process::ExitStatus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

use crate::child_waiter::ChildWaiter;
use crate::error::{PartialOutput, Result, RunnerError};
use crate::event::{Event, PipeId, StdinMsg, TailBuffer};
use crate::pipe_mover::{InputMover, OutputMover};
use crate::protocol::{BlockingProtocol, Protocol};
use crate::signal;
use crate::spawn::SpawnOptions;
use crate::transport::Transport;

/// Why a run ultimately failed, decided as events arrive; the first cause
/// recorded wins (spec doesn't order severities among concurrent causes,
/// and in practice they rarely race).
enum FailureReason {
    Io(PipeId, io::Error),
    Timeout,
    Cancelled,
    Protocol(String),
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "protocol callback panicked".to_string()
    }
}

/// Invokes a protocol callback behind `catch_unwind` (spec §7 "Protocol
/// error": a callback raising an exception must be captured, not propagated
/// through the coordinator loop and past the mover/waiter cleanup below it).
/// Once a callback has panicked the protocol is presumed corrupted and every
/// later callback for this run is skipped; the run is cancelled so it still
/// reaches finalization instead of hanging on a child nobody is driving.
fn call_protocol<P, F, T>(
    protocol: &mut P,
    protocol_broken: &mut bool,
    reason: &mut Option<FailureReason>,
    cancel: &Arc<AtomicBool>,
    pid: u32,
    f: F,
) -> Option<T>
where
    F: FnOnce(&mut P) -> T,
{
    if *protocol_broken {
        return None;
    }
    match panic::catch_unwind(AssertUnwindSafe(|| f(protocol))) {
        Ok(v) => Some(v),
        Err(payload) => {
            let message = panic_message(&*payload);
            tracing::error!(pid, message = %message, "protocol callback panicked");
            if reason.is_none() {
                *reason = Some(FailureReason::Protocol(message));
            }
            *protocol_broken = true;
            cancel.store(true, Ordering::SeqCst);
            None
        }
    }
}

pub(crate) struct RunHandles {
    output_rx: Receiver<Event>,
    stdin_tx: Option<Sender<StdinMsg>>,
    pid: u32,
    alive: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
    mover_stops: HashMap<PipeId, Arc<AtomicBool>>,
    mover_handles: Vec<JoinHandle<()>>,
    waiter_handle: JoinHandle<()>,
    attached: HashSet<PipeId>,
}

/// Creates the child, wires up a Pipe Mover per attached descriptor, and
/// starts the Child Waiter (§4.4 "Start"). No thread is started if spawning
/// itself fails.
pub(crate) fn spawn_child_and_threads(opts: &SpawnOptions) -> Result<RunHandles> {
    let mut command = opts.build_command().ok_or_else(|| RunnerError::StartFailure {
        argv: opts.argv.clone(),
        source: io::Error::new(io::ErrorKind::InvalidInput, "argv must be non-empty"),
    })?;

    let mut child = command.spawn().map_err(|source| RunnerError::StartFailure { argv: opts.argv.clone(), source })?;

    let pid = child.id();
    tracing::debug!(pid, argv = ?opts.argv, "child spawned");
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let stdin = child.stdin.take();

    let (output_tx, output_rx) = bounded(1024);
    let mut mover_handles = Vec::new();
    let mut mover_stops = HashMap::new();
    let mut attached = HashSet::new();

    if let Some(out) = stdout {
        let stop = Arc::new(AtomicBool::new(false));
        mover_stops.insert(PipeId::Stdout, stop.clone());
        attached.insert(PipeId::Stdout);
        mover_handles.push(OutputMover::spawn(
            PipeId::Stdout,
            out,
            output_tx.clone(),
            stop,
            opts.mover_chunk_size,
            opts.queue_put_timeout,
        ));
    }
    if let Some(err) = stderr {
        let stop = Arc::new(AtomicBool::new(false));
        mover_stops.insert(PipeId::Stderr, stop.clone());
        attached.insert(PipeId::Stderr);
        mover_handles.push(OutputMover::spawn(
            PipeId::Stderr,
            err,
            output_tx.clone(),
            stop,
            opts.mover_chunk_size,
            opts.queue_put_timeout,
        ));
    }

    let stdin_tx = if let Some(sin) = stdin {
        attached.insert(PipeId::Stdin);
        let (tx, rx) = bounded(256);
        mover_handles.push(InputMover::spawn(sin, rx, output_tx.clone(), opts.loop_wait));
        Some(tx)
    } else {
        None
    };

    let waiter_handle = ChildWaiter::spawn(child, output_tx);

    Ok(RunHandles {
        output_rx,
        stdin_tx,
        pid,
        alive: Arc::new(AtomicBool::new(true)),
        cancel: Arc::new(AtomicBool::new(false)),
        mover_stops,
        mover_handles,
        waiter_handle,
        attached,
    })
}

fn build_error(
    reason: FailureReason,
    argv: &[String],
    exit_status: Option<ExitStatus>,
    stdout_tail: &TailBuffer,
    stderr_tail: &TailBuffer,
) -> RunnerError {
    let partial = PartialOutput {
        stdout_tail: stdout_tail.as_bytes().to_vec(),
        stderr_tail: stderr_tail.as_bytes().to_vec(),
    };
    match reason {
        FailureReason::Io(id, source) => RunnerError::Io { id, source, partial },
        FailureReason::Timeout => RunnerError::Timeout { argv: argv.to_vec(), exit_status, partial },
        FailureReason::Cancelled => RunnerError::Cancelled { argv: argv.to_vec(), exit_status, partial },
        FailureReason::Protocol(message) => RunnerError::Protocol { message, partial },
    }
}

/// Runs the coordinator's main loop (§4.4) to completion: dequeues events,
/// dispatches protocol callbacks, evaluates timeouts, and drives
/// cancellation, until both "process exited" and "all endpoints closed"
/// hold. Returns the protocol (so a blocking caller can call
/// `prepare_result`) and the run's terminal error, if any.
pub(crate) fn drive_loop<P: Protocol>(mut protocol: P, argv: Vec<String>, opts: &SpawnOptions, mut handles: RunHandles) -> (P, Option<RunnerError>) {
    let transport = Transport::new(handles.stdin_tx.clone(), handles.pid, handles.alive.clone(), handles.cancel.clone());

    let now = Instant::now();
    let mut last_activity: HashMap<PipeId, Instant> = handles.attached.iter().map(|id| (*id, now)).collect();
    let mut open = handles.attached.clone();
    let mut exit_status: Option<ExitStatus> = None;
    let mut exit_observed = false;
    let mut all_closed_since: Option<Instant> = None;
    let mut cancel_initiated = false;
    let mut forceful_deadline: Option<Instant> = None;
    let mut reason: Option<FailureReason> = None;
    let mut protocol_broken = false;
    let mut stdout_tail = TailBuffer::new(opts.tail_capture_bytes);
    let mut stderr_tail = TailBuffer::new(opts.tail_capture_bytes);

    call_protocol(&mut protocol, &mut protocol_broken, &mut reason, &handles.cancel, handles.pid, |p| {
        p.connection_made(&transport)
    });

    loop {
        match handles.output_rx.recv_timeout(opts.loop_wait) {
            Ok(Event::ConnectionMade) | Ok(Event::Heartbeat) => {}
            Ok(Event::Data { id, bytes }) => {
                last_activity.insert(id, Instant::now());
                match id {
                    PipeId::Stdout => stdout_tail.push(&bytes),
                    PipeId::Stderr => stderr_tail.push(&bytes),
                    PipeId::Stdin => {}
                }
                call_protocol(&mut protocol, &mut protocol_broken, &mut reason, &handles.cancel, handles.pid, |p| {
                    p.pipe_data_received(id, &bytes)
                });
            }
            Ok(Event::PipeClosed { id, error }) => {
                open.remove(&id);
                call_protocol(&mut protocol, &mut protocol_broken, &mut reason, &handles.cancel, handles.pid, |p| {
                    p.pipe_connection_lost(id, error.as_ref())
                });
                if let Some(e) = error {
                    if reason.is_none() {
                        reason = Some(FailureReason::Io(id, e));
                    }
                }
            }
            Ok(Event::StdinDrained) => {
                open.remove(&PipeId::Stdin);
            }
            Ok(Event::ProcessExited { status }) => {
                exit_status = Some(status);
                exit_observed = true;
                handles.alive.store(false, Ordering::SeqCst);
                call_protocol(&mut protocol, &mut protocol_broken, &mut reason, &handles.cancel, handles.pid, |p| {
                    p.process_exited(status)
                });
            }
            Ok(Event::MoverFailed { id, error }) => {
                open.remove(&id);
                if reason.is_none() {
                    reason = Some(FailureReason::Io(id, error));
                }
            }
            Ok(Event::WaiterFailed(e)) => {
                exit_observed = true;
                handles.alive.store(false, Ordering::SeqCst);
                if reason.is_none() {
                    reason = Some(FailureReason::Io(PipeId::Stdout, e));
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                evaluate_timeouts(
                    &open,
                    &mut last_activity,
                    &mut all_closed_since,
                    exit_observed,
                    opts,
                    &mut protocol,
                    &mut protocol_broken,
                    &handles.mover_stops,
                    &handles.stdin_tx,
                    &mut reason,
                    handles.pid,
                    &mut forceful_deadline,
                    &handles.cancel,
                );
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if !cancel_initiated && handles.cancel.load(Ordering::SeqCst) {
            cancel_initiated = true;
            if reason.is_none() {
                reason = Some(FailureReason::Cancelled);
            }
            tracing::info!(pid = handles.pid, "cancellation requested, sending polite termination");
            if let Some(tx) = &handles.stdin_tx {
                let _ = tx.try_send(StdinMsg::Close);
            }
            signal::terminate_politely(handles.pid);
            forceful_deadline = Some(Instant::now() + opts.grace_window);
        }
        if let Some(deadline) = forceful_deadline {
            if !exit_observed && Instant::now() >= deadline {
                tracing::warn!(pid = handles.pid, "grace window elapsed, escalating to forceful termination");
                signal::terminate_forcefully(handles.pid);
                forceful_deadline = None;
            }
        }

        if exit_observed && open.is_empty() {
            break;
        }
    }

    for handle in handles.mover_handles {
        let _ = handle.join();
    }
    let _ = handles.waiter_handle.join();

    let final_error = reason.map(|r| build_error(r, &argv, exit_status, &stdout_tail, &stderr_tail));
    match &final_error {
        Some(e) => tracing::warn!(pid = handles.pid, error = %e, "run finished with an error"),
        None => tracing::debug!(pid = handles.pid, "run finished cleanly"),
    }
    if !protocol_broken {
        if panic::catch_unwind(AssertUnwindSafe(|| protocol.connection_lost(final_error.as_ref()))).is_err() {
            tracing::error!(pid = handles.pid, "protocol connection_lost callback panicked");
        }
    }
    (protocol, final_error)
}

#[allow(clippy::too_many_arguments)]
fn evaluate_timeouts<P: Protocol>(
    open: &HashSet<PipeId>,
    last_activity: &mut HashMap<PipeId, Instant>,
    all_closed_since: &mut Option<Instant>,
    exit_observed: bool,
    opts: &SpawnOptions,
    protocol: &mut P,
    protocol_broken: &mut bool,
    mover_stops: &HashMap<PipeId, Arc<AtomicBool>>,
    stdin_tx: &Option<Sender<StdinMsg>>,
    reason: &mut Option<FailureReason>,
    pid: u32,
    forceful_deadline: &mut Option<Instant>,
    cancel: &Arc<AtomicBool>,
) {
    let now = Instant::now();

    for id in open.iter().copied().collect::<Vec<_>>() {
        let budget = match id {
            PipeId::Stdin => opts.timeouts.stdin,
            PipeId::Stdout => opts.timeouts.stdout,
            PipeId::Stderr => opts.timeouts.stderr,
        };
        let last = *last_activity.entry(id).or_insert(now);
        if now.duration_since(last) <= budget {
            continue;
        }
        let fired = call_protocol(protocol, protocol_broken, reason, cancel, pid, |p| p.timeout(Some(id))).unwrap_or(false);
        if fired {
            tracing::warn!(pid, %id, "endpoint inactivity timeout, closing descriptor");
            if reason.is_none() {
                *reason = Some(FailureReason::Timeout);
            }
            match id {
                PipeId::Stdin => {
                    if let Some(tx) = stdin_tx {
                        let _ = tx.try_send(StdinMsg::Close);
                    }
                }
                PipeId::Stdout | PipeId::Stderr => {
                    if let Some(stop) = mover_stops.get(&id) {
                        stop.store(true, Ordering::SeqCst);
                    }
                }
            }
        } else {
            last_activity.insert(id, now);
        }
    }

    if open.is_empty() && !exit_observed {
        match all_closed_since {
            Some(since) => {
                let fired = now.duration_since(*since) > opts.timeouts.whole_process_idle
                    && call_protocol(protocol, protocol_broken, reason, cancel, pid, |p| p.timeout(None)).unwrap_or(false);
                if fired {
                    tracing::warn!(pid, "whole-process idle timeout, sending polite termination");
                    if reason.is_none() {
                        *reason = Some(FailureReason::Timeout);
                    }
                    signal::terminate_politely(pid);
                    *forceful_deadline = Some(now + opts.grace_window);
                }
            }
            None => *all_closed_since = Some(now),
        }
    } else {
        *all_closed_since = None;
    }
}

/// Runs to a single opaque result produced by `prepare_result` once the
/// process exits and every endpoint has closed (blocking finish mode,
/// §4.4). Runs entirely on the calling thread aside from the Pipe Movers
/// and Child Waiter it spawns and joins before returning.
pub fn run_blocking<P: BlockingProtocol>(opts: SpawnOptions, protocol: P) -> Result<P::Output> {
    let argv = opts.argv.clone();
    let handles = spawn_child_and_threads(&opts)?;
    let (protocol, final_error) = drive_loop(protocol, argv, &opts, handles);
    match final_error {
        Some(e) => Err(e),
        None => Ok(protocol.prepare_result()),
    }
}

/// Spawns the child and starts the coordinator's event loop on a dedicated
/// background thread, returning immediately with a [`Transport`] the caller
/// can write to and a handle to observe the run's terminal error. Used by
/// both the Result Generator (§4.6) and the Batched Session (§4.5), which
/// both need a run that outlives the call that started it.
pub(crate) fn run_background<P: Protocol + 'static>(opts: SpawnOptions, protocol: P) -> Result<(Transport, JoinHandle<Option<RunnerError>>)> {
    let argv = opts.argv.clone();
    let handles = spawn_child_and_threads(&opts)?;
    let transport = Transport::new(handles.stdin_tx.clone(), handles.pid, handles.alive.clone(), handles.cancel.clone());
    let join = thread::spawn(move || {
        let (_protocol, final_error) = drive_loop(protocol, argv, &opts, handles);
        final_error
    });
    Ok((transport, join))
}
