//! Terminal output decoding.
//! PTY reads split the byte stream at arbitrary points, so a multi-byte UTF-8
//! sequence may straddle two chunks. The decoder carries the incomplete tail
//! over to the next chunk instead of emitting replacement characters.

/// Longest UTF-8 sequence; a tail longer than this can never complete
const MAX_UTF8_SEQUENCE: usize = 4;

/// Incremental UTF-8 decoder for one output stream
#[derive(Debug, Default)]
pub struct TerminalDecoder {
    pending: Vec<u8>,
}

impl TerminalDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a chunk. Returns `None` when everything received so far is an
    /// incomplete sequence.
    pub fn push(&mut self, chunk: &[u8]) -> Option<String> {
        self.pending.extend_from_slice(chunk);

        let split = complete_prefix_len(&self.pending);
        if split == 0 {
            return None;
        }

        let tail = self.pending.split_off(split);
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending = tail;
        Some(text)
    }

    /// Flush whatever is buffered, replacing an incomplete tail.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(text)
    }
}

/// Length of the prefix that does not end in an incomplete UTF-8 sequence.
fn complete_prefix_len(bytes: &[u8]) -> usize {
    let len = bytes.len();
    let window = len.min(MAX_UTF8_SEQUENCE - 1);

    for back in 1..=window {
        let idx = len - back;
        let byte = bytes[idx];
        if byte & 0b1100_0000 == 0b1000_0000 {
            // continuation byte, keep scanning for the lead byte
            continue;
        }
        let needed = match byte {
            b if b & 0b1110_0000 == 0b1100_0000 => 2,
            b if b & 0b1111_0000 == 0b1110_0000 => 3,
            b if b & 0b1111_1000 == 0b1111_0000 => 4,
            _ => 1,
        };
        return if needed > back { idx } else { len };
    }
    len
}
