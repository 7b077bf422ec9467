use bytes::Bytes;
use serde::Serialize;

pub const SSE_DONE_FRAME: &[u8] = b"data: [DONE]\n\n";

/// Incremental decoder for `data:`-prefixed event streams.
///
/// Input is buffered as raw bytes and only split on `\n`, so a chunk boundary
/// that lands inside a multi-byte character never corrupts a line.
#[derive(Debug, Default)]
pub struct SseLineDecoder {
    buffer: Vec<u8>,
}

impl SseLineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one read and returns the payload of every completed data line.
    pub fn push_bytes(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut payloads = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(payload) = data_payload(&line[..line.len() - 1]) {
                payloads.push(payload);
            }
        }

        payloads
    }

    /// Flushes a trailing line that was not newline-terminated.
    pub fn finish(&mut self) -> Vec<String> {
        let line = std::mem::take(&mut self.buffer);
        data_payload(&line).into_iter().collect()
    }
}

fn data_payload(line: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(line);
    let line = line.strip_suffix('\r').unwrap_or(&line);
    if line.trim().is_empty() {
        return None;
    }
    let value = line.strip_prefix("data:")?.trim();
    if value.is_empty() {
        return None;
    }
    Some(value.to_string())
}

pub fn sse_json_bytes<T: Serialize>(value: &T) -> Option<Bytes> {
    let payload = serde_json::to_vec(value).ok()?;
    let mut data = Vec::with_capacity(payload.len() + 8);
    data.extend_from_slice(b"data: ");
    data.extend_from_slice(&payload);
    data.extend_from_slice(b"\n\n");
    Some(Bytes::from(data))
}

pub fn sse_done_bytes() -> Bytes {
    Bytes::from_static(SSE_DONE_FRAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_blank_comment_and_foreign_lines() {
        let mut decoder = SseLineDecoder::new();
        let out = decoder.push_bytes(b"\n: ping\nevent: x\ndata: {\"a\":1}\r\ndata:\n");
        assert_eq!(out, vec!["{\"a\":1}".to_string()]);
    }

    #[test]
    fn holds_partial_line_until_newline() {
        let mut decoder = SseLineDecoder::new();
        assert!(decoder.push_bytes(b"data: {\"a\"").is_empty());
        assert_eq!(decoder.push_bytes(b":2}\n"), vec!["{\"a\":2}".to_string()]);
    }

    #[test]
    fn split_inside_multibyte_character() {
        let text = "data: \"привет\"\n".as_bytes();
        let mut decoder = SseLineDecoder::new();
        let mut out = decoder.push_bytes(&text[..9]);
        out.extend(decoder.push_bytes(&text[9..]));
        assert_eq!(out, vec!["\"привет\"".to_string()]);
    }

    #[test]
    fn finish_flushes_unterminated_line() {
        let mut decoder = SseLineDecoder::new();
        assert!(decoder.push_bytes(b"data: tail").is_empty());
        assert_eq!(decoder.finish(), vec!["tail".to_string()]);
        assert!(decoder.finish().is_empty());
    }
}
