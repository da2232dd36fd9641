//! Incremental UTF-8 decoding of pipe reads.

/// Decodes a byte stream into text chunks, carrying incomplete multi-byte
/// sequences over to the next read. Invalid bytes become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode as much of `pending + bytes` as possible
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + bad);
                        }
                        None => {
                            // truncated sequence at the end; wait for more bytes
                            self.pending.drain(..valid);
                            break;
                        }
                    }
                }
            }
        }

        out
    }

    /// Flush whatever is left once the stream has closed
    pub fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_ascii() {
        let mut dec = Utf8Decoder::new();
        assert_eq!(dec.push(b"hello"), "hello");
        assert_eq!(dec.finish(), "");
    }

    #[test]
    fn test_split_multibyte_sequence() {
        let bytes = "héllo".as_bytes();
        // 'é' is two bytes starting at index 1
        let mut dec = Utf8Decoder::new();
        assert_eq!(dec.push(&bytes[..2]), "h");
        assert_eq!(dec.push(&bytes[2..]), "éllo");
    }

    #[test]
    fn test_four_byte_sequence_one_byte_at_a_time() {
        let bytes = "🦀".as_bytes();
        let mut dec = Utf8Decoder::new();
        let mut out = String::new();
        for b in bytes {
            out.push_str(&dec.push(std::slice::from_ref(b)));
        }
        assert_eq!(out, "🦀");
    }

    #[test]
    fn test_invalid_byte_is_replaced() {
        let mut dec = Utf8Decoder::new();
        assert_eq!(dec.push(b"a\xffb"), "a\u{FFFD}b");
    }

    #[test]
    fn test_truncated_tail_flushed_on_finish() {
        let mut dec = Utf8Decoder::new();
        assert_eq!(dec.push(b"ok\xe2\x82"), "ok");
        assert_eq!(dec.finish(), "\u{FFFD}");
    }
}
