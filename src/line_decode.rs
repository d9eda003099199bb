//! Byte-mode vs text-mode line framing (spec §6: "affects line framing
//! only"). The core stays byte-oriented end to end; this is a reusable
//! helper for protocols (in particular the Batched Session's built-in
//! decoders, §4.5) that want newline-delimited framing without
//! reimplementing buffering per protocol.

/// Text-mode vs byte-mode hint for line framing (spec §6: "text-mode vs
/// byte-mode hint (affects line framing only)"). Decoding to `String`
/// happens either way (nothing downstream of `LineSplitter` accepts raw
/// bytes); what the mode controls is whether a trailing `\r` is treated as
/// part of the line terminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FramingMode {
    /// CRLF- and LF-framed children read the same: a trailing `\r` before
    /// the `\n` is stripped along with the `\n`.
    #[default]
    Text,
    /// Only `\n` ends a line; a trailing `\r`, if present, is kept as part
    /// of the line's content.
    Bytes,
}

/// Accumulates bytes and yields completed lines (newline consumed; in
/// [`FramingMode::Text`] a trailing `\r` is also stripped so CRLF-framed
/// children work the same as LF-framed ones).
#[derive(Debug)]
pub struct LineSplitter {
    buf: Vec<u8>,
    mode: FramingMode,
}

impl Default for LineSplitter {
    fn default() -> Self {
        Self::with_mode(FramingMode::default())
    }
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mode(mode: FramingMode) -> Self {
        Self { buf: Vec::new(), mode }
    }

    /// Feeds more bytes in and returns every line completed so far, in
    /// order. Bytes not yet terminated by a newline remain buffered for the
    /// next call.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop(); // drop '\n'
            if self.mode == FramingMode::Text && line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }
}

/// Decides when a run of lines constitutes one complete response to a
/// submitted Batched Session command (§4.5).
pub trait ResponseDecoder: Send {
    /// Folds one more line into the in-progress response. Returns
    /// `Some(response)` once the response is complete.
    fn push_line(&mut self, line: String) -> Option<Vec<String>>;
}

/// A response is exactly `n` lines.
pub struct FixedCountDecoder {
    n: usize,
    buf: Vec<String>,
}

impl FixedCountDecoder {
    pub fn new(n: usize) -> Self {
        Self { n, buf: Vec::with_capacity(n) }
    }
}

impl ResponseDecoder for FixedCountDecoder {
    fn push_line(&mut self, line: String) -> Option<Vec<String>> {
        self.buf.push(line);
        if self.buf.len() >= self.n {
            Some(std::mem::take(&mut self.buf))
        } else {
            None
        }
    }
}

/// A response runs until an empty line is seen; the empty line is included
/// as the final line of the response.
#[derive(Default)]
pub struct SentinelDecoder {
    buf: Vec<String>,
}

impl ResponseDecoder for SentinelDecoder {
    fn push_line(&mut self, line: String) -> Option<Vec<String>> {
        let is_sentinel = line.is_empty();
        self.buf.push(line);
        if is_sentinel {
            Some(std::mem::take(&mut self.buf))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_lf_and_crlf() {
        let mut splitter = LineSplitter::new();
        let lines = splitter.push(b"a\nb\r\nc");
        assert_eq!(lines, vec!["a".to_string(), "b".to_string()]);
        let lines = splitter.push(b"\n");
        assert_eq!(lines, vec!["c".to_string()]);
    }

    #[test]
    fn byte_mode_keeps_trailing_cr() {
        let mut splitter = LineSplitter::with_mode(FramingMode::Bytes);
        let lines = splitter.push(b"a\r\nb\n");
        assert_eq!(lines, vec!["a\r".to_string(), "b".to_string()]);
    }

    #[test]
    fn fixed_count_decoder_completes_at_n() {
        let mut decoder = FixedCountDecoder::new(2);
        assert_eq!(decoder.push_line("a".into()), None);
        assert_eq!(decoder.push_line("b".into()), Some(vec!["a".to_string(), "b".to_string()]));
    }

    #[test]
    fn sentinel_decoder_includes_empty_line() {
        let mut decoder = SentinelDecoder::default();
        assert_eq!(decoder.push_line("one".into()), None);
        assert_eq!(decoder.push_line(String::new()), Some(vec!["one".to_string(), String::new()]));
    }
}
