//! Incremental line decoding for streamed HTTP bodies.
//!
//! Bytes are buffered until a full line is available so multi-byte UTF-8
//! sequences split across network chunks are decoded intact.

use futures::StreamExt;
use stepwise_core::error::ProviderError;

#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `bytes` and returns every line completed by them, without
    /// the trailing `\n` / `\r\n`.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(decode_line(&raw[..raw.len() - 1]));
        }
        lines
    }

    /// Returns the unterminated tail, if any.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.pending);
        Some(decode_line(&raw))
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

/// Drives `response` line by line, handing each line to `on_line`.
/// `on_line` returns `false` to stop reading early.
pub async fn for_each_line<F>(response: reqwest::Response, mut on_line: F) -> Result<(), ProviderError>
where
    F: FnMut(&str) -> Result<bool, ProviderError>,
{
    let mut bytes = response.bytes_stream();
    let mut buffer = LineBuffer::new();

    while let Some(chunk) = bytes.next().await {
        let chunk = chunk.map_err(|e| ProviderError::StreamInterrupted(e.to_string()))?;
        for line in buffer.push(&chunk) {
            if !on_line(&line)? {
                return Ok(());
            }
        }
    }

    if let Some(line) = buffer.finish() {
        on_line(&line)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_lines_across_chunks() {
        let mut buffer = LineBuffer::new();
        assert!(buffer.push(b"data: {\"a\"").is_empty());
        assert_eq!(buffer.push(b":1}\r\ndata: [DO"), vec!["data: {\"a\":1}"]);
        assert_eq!(buffer.push(b"NE]\n\n"), vec!["data: [DONE]", ""]);
        assert_eq!(buffer.finish(), None);
    }

    #[test]
    fn keeps_multibyte_characters_whole() {
        let text = "caf\u{e9}\n".as_bytes();
        let mut buffer = LineBuffer::new();
        // split inside the two-byte 'é'
        assert!(buffer.push(&text[..4]).is_empty());
        assert_eq!(buffer.push(&text[4..]), vec!["caf\u{e9}"]);
    }

    #[test]
    fn finish_returns_unterminated_tail() {
        let mut buffer = LineBuffer::new();
        buffer.push(b"{\"done\":true}");
        assert_eq!(buffer.finish().as_deref(), Some("{\"done\":true}"));
        assert_eq!(buffer.finish(), None);
    }
}
