//! A `tracing_subscriber::Layer` that renders events in the fixed,
//! line-oriented grammar mandated for any logs the core writes (§6):
//! `<timestamp> <level> <pid> <tag> <message>`. The crate never installs a
//! global subscriber itself — callers wire `GrammarLayer` into their own
//! `tracing_subscriber::registry()` alongside whatever else they use.

use std::fmt::Write as _;
use std::io::Write as _;
use std::sync::Mutex;

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

/// Writes one grammar-compliant line per event to the wrapped sink.
///
/// `tag` is the event's `target` (the module path tracing already
/// attaches), matching how most of the corpus treats `target` as the
/// closest stand-in for a free-form log tag.
pub struct GrammarLayer<W> {
    pid: u32,
    sink: Mutex<W>,
}

impl<W: std::io::Write + Send + 'static> GrammarLayer<W> {
    pub fn new(sink: W) -> Self {
        Self { pid: std::process::id(), sink: Mutex::new(sink) }
    }
}

struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else if !self.message.is_empty() {
            let _ = write!(self.message, " {}={:?}", field.name(), value);
        } else {
            let _ = write!(self.message, "{}={:?}", field.name(), value);
        }
    }
}

impl<S, W> Layer<S> for GrammarLayer<W>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: std::io::Write + Send + 'static,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor { message: String::new() };
        event.record(&mut visitor);

        let timestamp = OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_else(|_| "unknown-time".to_string());
        let level = event.metadata().level();
        let tag = event.metadata().target();
        let message = visitor.message.replace(['\n', '\r'], " ");

        let Ok(mut sink) = self.sink.lock() else {
            return;
        };
        let _ = writeln!(sink, "{timestamp} {level} {pid} {tag} {message}", pid = self.pid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::Registry;

    #[test]
    fn emits_fixed_grammar_line() {
        let buf: Vec<u8> = Vec::new();
        let shared = std::sync::Arc::new(Mutex::new(buf));

        struct SharedWriter(std::sync::Arc<Mutex<Vec<u8>>>);
        impl std::io::Write for SharedWriter {
            fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
                self.0.lock().unwrap().write(data)
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let layer = GrammarLayer::new(SharedWriter(shared.clone()));
        let subscriber = Registry::default().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(target: "subprocess_runner::coordinator", "child started");
        });

        let written = String::from_utf8(shared.lock().unwrap().clone()).unwrap();
        assert!(written.contains("INFO"));
        assert!(written.contains("subprocess_runner::coordinator"));
        assert!(written.contains("child started"));
        let field_count = written.split_whitespace().count();
        assert!(field_count >= 5);
    }
}
