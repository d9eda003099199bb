use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;

use crate::environment::EnvironmentPolicy;
use crate::line_decode::FramingMode;

/// How a given standard descriptor should be attached to the child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeMode {
    /// Share the parent's descriptor; no Pipe Mover is spawned for it.
    Inherit,
    /// Attach a pipe; a Pipe Mover is spawned for it.
    Pipe,
    /// Redirect to the null device; no Pipe Mover is spawned for it.
    Suppress,
}

impl PipeMode {
    fn to_stdio(self) -> Stdio {
        match self {
            PipeMode::Inherit => Stdio::inherit(),
            PipeMode::Pipe => Stdio::piped(),
            PipeMode::Suppress => Stdio::null(),
        }
    }

    pub fn is_piped(self) -> bool {
        matches!(self, PipeMode::Pipe)
    }
}

/// Per-endpoint inactivity budgets plus the whole-process idle timer (§3).
#[derive(Debug, Clone)]
pub struct EndpointTimeouts {
    pub stdin: Duration,
    pub stdout: Duration,
    pub stderr: Duration,
    /// How long all endpoints may sit closed before the process is
    /// considered to be stuck exiting.
    pub whole_process_idle: Duration,
}

impl Default for EndpointTimeouts {
    fn default() -> Self {
        let minute = Duration::from_secs(60);
        Self {
            stdin: minute,
            stdout: minute,
            stderr: minute,
            whole_process_idle: Duration::from_secs(10),
        }
    }
}

/// Inputs to a run (spec §6 "Child invocation surface").
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    pub argv: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env_policy: EnvironmentPolicy,
    pub stdin: PipeMode,
    pub stdout: PipeMode,
    pub stderr: PipeMode,
    pub timeouts: EndpointTimeouts,
    /// Grace window between a polite and a forceful termination signal.
    pub grace_window: Duration,
    /// Chunk size used by output Pipe Movers.
    pub mover_chunk_size: usize,
    /// How long a mover waits for the output queue to have room before
    /// checking cancellation and retrying.
    pub queue_put_timeout: Duration,
    /// How long the coordinator waits for the next event before evaluating
    /// timeouts (§4.4, 10 Hz resolution).
    pub loop_wait: Duration,
    /// Bound of the per-endpoint tail kept for error reporting.
    pub tail_capture_bytes: usize,
    /// Text-mode vs byte-mode hint for line framing (spec §6): how the
    /// Batched Session's `LineSplitter` treats a trailing `\r` and decodes
    /// each line. Has no effect on anything but line framing.
    pub framing_mode: FramingMode,
}

impl SpawnOptions {
    /// Stdin defaults to `Suppress`: most children (the teacher's own
    /// `codex-rs/core/src/exec.rs` included) never read stdin, and an
    /// attached-but-never-written-or-closed stdin pipe keeps its endpoint
    /// "open" forever, which the coordinator's finalization condition
    /// (§4.4: process exited AND all endpoints closed) then waits on
    /// indefinitely. Callers that do need to write to the child's stdin
    /// (or `BatchedSession`, which forces this itself) must opt in
    /// explicitly.
    pub fn new(argv: Vec<String>) -> Self {
        Self {
            argv,
            cwd: None,
            env_policy: EnvironmentPolicy::default(),
            stdin: PipeMode::Suppress,
            stdout: PipeMode::Pipe,
            stderr: PipeMode::Pipe,
            timeouts: EndpointTimeouts::default(),
            grace_window: Duration::from_secs(3),
            mover_chunk_size: 64 * 1024,
            queue_put_timeout: Duration::from_millis(100),
            loop_wait: Duration::from_millis(100),
            tail_capture_bytes: 8 * 1024,
            framing_mode: FramingMode::default(),
        }
    }

    pub(crate) fn build_command(&self) -> Option<Command> {
        let (program, args) = self.argv.split_first()?;
        let mut command = Command::new(program);
        command.args(args);
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }
        command.env_clear();
        command.envs(self.env_policy.build());
        command.stdin(self.stdin.to_stdio());
        command.stdout(self.stdout.to_stdio());
        command.stderr(self.stderr.to_stdio());

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // New process group so the whole-process signal escalation path
            // (§4.4, §9) can target the child and any grandchildren it
            // forks without also touching the parent, and so the child does
            // not inherit a disposition for SIGPIPE that would surprise it.
            unsafe {
                command.pre_exec(|| {
                    if libc::setpgid(0, 0) != 0 {
                        return Err(std::io::Error::last_os_error());
                    }
                    libc::signal(libc::SIGPIPE, libc::SIG_DFL);
                    Ok(())
                });
            }
        }

        Some(command)
    }
}
