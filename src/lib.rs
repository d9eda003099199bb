//! Threaded subprocess runner: a child process's stdin/stdout/stderr are
//! each owned by a dedicated OS thread, events from those threads and the
//! child's exit are merged onto a single queue, and a coordinator thread
//! drains that queue and dispatches it to a caller-supplied protocol. Three
//! finish modes share the same coordinator: run-to-completion
//! ([`run_blocking`]), streaming ([`run_streaming`]), and a long-lived
//! request/response session ([`batched`]).
//!
//! No async runtime is involved anywhere in this crate; concurrency is
//! plain OS threads and blocking channel operations throughout.

// All user-visible output from this library must go through `tracing`, not
// directly to stdout/stderr.
#![deny(clippy::print_stdout, clippy::print_stderr)]

mod batched;
mod child_waiter;
mod coordinator;
mod environment;
mod error;
mod event;
mod line_decode;
mod logging;
mod pipe_mover;
mod protocol;
mod result_generator;
mod signal;
mod spawn;
mod transport;

pub use batched::{BatchedSession, BatchedSessionPool, DecoderFactory};
pub use coordinator::run_blocking;
pub use environment::{EnvironmentPolicy, InheritMode};
pub use error::{PartialOutput, Result, RunnerError};
pub use event::{PipeId, TailBuffer};
pub use line_decode::{FixedCountDecoder, FramingMode, LineSplitter, ResponseDecoder, SentinelDecoder};
pub use logging::GrammarLayer;
pub use protocol::{BlockingProtocol, Protocol, StreamingProtocol};
pub use result_generator::{run_streaming, ResultGenerator, ResultSink};
pub use spawn::{EndpointTimeouts, PipeMode, SpawnOptions};
pub use transport::Transport;
