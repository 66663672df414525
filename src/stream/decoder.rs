/// Stateful, lossy UTF-8 decoder for chunked response bodies.
///
/// Code points split across chunk boundaries are carried over to the next
/// call. Invalid sequences are replaced with U+FFFD; decoding never fails.
#[derive(Debug, Default)]
pub struct Utf8ChunkDecoder {
    remainder: Vec<u8>,
}

impl Utf8ChunkDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the next chunk, holding back a trailing incomplete sequence.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        if self.remainder.is_empty() {
            let mut out = String::with_capacity(chunk.len());
            let consumed = decode_lossy_into(chunk, &mut out);
            self.remainder.extend_from_slice(&chunk[consumed..]);
            return out;
        }

        let mut joined = std::mem::take(&mut self.remainder);
        joined.extend_from_slice(chunk);
        let mut out = String::with_capacity(joined.len());
        let consumed = decode_lossy_into(&joined, &mut out);
        self.remainder.extend_from_slice(&joined[consumed..]);
        out
    }

    /// Flush any held-back bytes as replacement characters.
    pub fn finish(&mut self) -> String {
        if self.remainder.is_empty() {
            return String::new();
        }
        let out = String::from_utf8_lossy(&self.remainder).into_owned();
        self.remainder.clear();
        out
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.remainder.is_empty()
    }
}

/// Decode as much of `bytes` as possible, returning the number of bytes
/// consumed. Only an incomplete sequence at the very end is left unconsumed.
fn decode_lossy_into(bytes: &[u8], out: &mut String) -> usize {
    let mut pos = 0usize;
    loop {
        match std::str::from_utf8(&bytes[pos..]) {
            Ok(text) => {
                out.push_str(text);
                return bytes.len();
            }
            Err(e) => {
                let valid_up_to = pos + e.valid_up_to();
                // Safety: `valid_up_to` is guaranteed to be a valid UTF-8 boundary.
                out.push_str(unsafe { std::str::from_utf8_unchecked(&bytes[pos..valid_up_to]) });
                match e.error_len() {
                    Some(invalid_len) => {
                        out.push(char::REPLACEMENT_CHARACTER);
                        pos = valid_up_to + invalid_len;
                    }
                    None => return valid_up_to,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_ascii() {
        let mut decoder = Utf8ChunkDecoder::new();
        assert_eq!(decoder.decode(b"data: hi\n\n"), "data: hi\n\n");
        assert!(!decoder.has_pending());
    }

    #[test]
    fn test_code_point_split_across_chunks() {
        let snowman = "☃".as_bytes();
        let mut decoder = Utf8ChunkDecoder::new();
        assert_eq!(decoder.decode(&snowman[..1]), "");
        assert!(decoder.has_pending());
        assert_eq!(decoder.decode(&snowman[1..2]), "");
        assert_eq!(decoder.decode(&snowman[2..]), "☃");
        assert!(!decoder.has_pending());
    }

    #[test]
    fn test_invalid_bytes_are_replaced() {
        let mut decoder = Utf8ChunkDecoder::new();
        assert_eq!(decoder.decode(b"a\xffb"), "a\u{FFFD}b");
        assert_eq!(decoder.decode(b"\xc3\x28"), "\u{FFFD}(");
    }

    #[test]
    fn test_finish_flushes_truncated_sequence() {
        let mut decoder = Utf8ChunkDecoder::new();
        assert_eq!(decoder.decode(b"ok\xe2\x98"), "ok");
        assert_eq!(decoder.finish(), "\u{FFFD}");
        assert!(!decoder.has_pending());
    }
}
