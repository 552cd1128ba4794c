//! Newline framing for the chat wire format.
//!
//! Every message is one UTF-8 line terminated by a single `\n`. The decoder
//! accepts bytes in whatever chunks the transport hands over and yields each
//! complete line exactly once, keeping an unterminated tail until more bytes
//! arrive. Lines longer than the configured cap are a framing violation in
//! both directions, so a faulty peer cannot make the buffer grow without bound.

use crate::error::FramingError;

pub const TERMINATOR: u8 = b'\n';

/// Matches the relay's receive buffer ceiling.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 1024 * 1024;

/// What happens to an unterminated trailing fragment when the peer closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PartialLinePolicy {
    #[default]
    Discard,
    Flush,
}

/// Outbound half of the codec: validates and terminates a single line.
#[derive(Debug, Clone, Copy)]
pub struct LineEncoder {
    max_line_length: usize,
}

impl LineEncoder {
    pub fn new(max_line_length: usize) -> Self {
        Self { max_line_length }
    }

    pub fn encode(&self, text: &str) -> Result<Vec<u8>, FramingError> {
        if text.as_bytes().contains(&TERMINATOR) {
            return Err(FramingError::EmbeddedTerminator);
        }
        if text.len() > self.max_line_length {
            return Err(FramingError::LineTooLong {
                limit: self.max_line_length,
            });
        }

        let mut frame = Vec::with_capacity(text.len() + 1);
        frame.extend_from_slice(text.as_bytes());
        frame.push(TERMINATOR);
        Ok(frame)
    }
}

#[derive(Debug)]
pub struct LineCodec {
    buffer: Vec<u8>,
    // Start of the first undelivered byte.
    start: usize,
    // Bytes in `start..scanned` are known not to contain a terminator.
    scanned: usize,
    poisoned: bool,
    encoder: LineEncoder,
    policy: PartialLinePolicy,
}

impl LineCodec {
    pub fn new(max_line_length: usize, policy: PartialLinePolicy) -> Self {
        Self {
            buffer: Vec::new(),
            start: 0,
            scanned: 0,
            poisoned: false,
            encoder: LineEncoder::new(max_line_length),
            policy,
        }
    }

    pub fn max_line_length(&self) -> usize {
        self.encoder.max_line_length
    }

    pub fn encoder(&self) -> LineEncoder {
        self.encoder
    }

    pub fn encode(&self, text: &str) -> Result<Vec<u8>, FramingError> {
        self.encoder.encode(text)
    }

    /// Appends `chunk` and returns an iterator over the lines it completed.
    ///
    /// The iterator is lazy: lines that are not pulled stay buffered and come
    /// out of the next call. After the first error the codec yields nothing
    /// more, since the connection is going to be dropped anyway.
    pub fn feed(&mut self, chunk: &[u8]) -> Lines<'_> {
        if !self.poisoned {
            self.compact();
            self.buffer.extend_from_slice(chunk);
        }
        Lines { codec: self }
    }

    /// Pulls the next complete line out of the buffer, if there is one.
    pub fn next_line(&mut self) -> Result<Option<String>, FramingError> {
        if self.poisoned {
            return Ok(None);
        }

        let pending = &self.buffer[self.scanned..];
        let Some(offset) = pending.iter().position(|&b| b == TERMINATOR) else {
            self.scanned = self.buffer.len();
            if self.buffered_len() > self.max_line_length() {
                return Err(self.fail(FramingError::LineTooLong {
                    limit: self.max_line_length(),
                }));
            }
            return Ok(None);
        };

        let end = self.scanned + offset;
        if end - self.start > self.max_line_length() {
            return Err(self.fail(FramingError::LineTooLong {
                limit: self.max_line_length(),
            }));
        }

        let line = self.buffer[self.start..end].to_vec();
        self.start = end + 1;
        self.scanned = self.start;
        self.decode(line).map(Some)
    }

    /// Called once the transport reports EOF. Applies the partial-line policy
    /// to whatever unterminated bytes are left and resets the buffer.
    pub fn finish(&mut self) -> Result<Option<String>, FramingError> {
        if self.poisoned || self.buffered_len() == 0 {
            self.reset();
            return Ok(None);
        }

        let tail = self.buffer[self.start..].to_vec();
        self.reset();
        match self.policy {
            PartialLinePolicy::Discard => {
                tracing::debug!(bytes = tail.len(), "discarding unterminated partial line");
                Ok(None)
            }
            PartialLinePolicy::Flush => self.decode(tail).map(Some),
        }
    }

    /// Number of buffered bytes not yet handed out as a line.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len() - self.start
    }

    fn decode(&mut self, line: Vec<u8>) -> Result<String, FramingError> {
        String::from_utf8(line).map_err(|_| self.fail(FramingError::InvalidUtf8))
    }

    fn fail(&mut self, error: FramingError) -> FramingError {
        self.poisoned = true;
        self.reset();
        error
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.start = 0;
        self.scanned = 0;
    }

    fn compact(&mut self) {
        if self.start > 0 {
            self.buffer.drain(..self.start);
            self.scanned -= self.start;
            self.start = 0;
        }
    }
}

/// Lines completed by one [`LineCodec::feed`] call.
#[derive(Debug)]
pub struct Lines<'a> {
    codec: &'a mut LineCodec,
}

impl Iterator for Lines<'_> {
    type Item = Result<String, FramingError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.codec.next_line().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> LineCodec {
        LineCodec::new(DEFAULT_MAX_LINE_LENGTH, PartialLinePolicy::Discard)
    }

    fn collect(codec: &mut LineCodec, chunk: &[u8]) -> Vec<String> {
        codec
            .feed(chunk)
            .collect::<Result<Vec<_>, _>>()
            .expect("no framing errors")
    }

    #[test]
    fn partial_line_is_held_until_terminated() {
        let mut codec = codec();
        assert!(collect(&mut codec, b"ab").is_empty());
        assert_eq!(codec.buffered_len(), 2);
        assert_eq!(collect(&mut codec, b"cd\n"), vec!["abcd".to_string()]);
        assert_eq!(codec.buffered_len(), 0);
    }

    #[test]
    fn one_chunk_can_complete_several_lines() {
        let mut codec = codec();
        let lines = collect(&mut codec, b"one\ntwo\n\nthree");
        assert_eq!(lines, vec!["one", "two", ""]);
        assert_eq!(collect(&mut codec, b"\n"), vec!["three"]);
    }

    #[test]
    fn unpulled_lines_survive_into_the_next_feed() {
        let mut codec = codec();
        let first = codec.feed(b"a\nb\n").next();
        assert_eq!(first, Some(Ok("a".to_string())));
        assert_eq!(collect(&mut codec, b"c\n"), vec!["b", "c"]);
    }

    #[test]
    fn carriage_returns_are_part_of_the_line() {
        let mut codec = codec();
        assert_eq!(collect(&mut codec, b"hi\r\n"), vec!["hi\r"]);
    }

    #[test]
    fn encode_appends_terminator() {
        let codec = codec();
        assert_eq!(codec.encode("hello").expect("encode"), b"hello\n");
        assert_eq!(codec.encode("").expect("encode"), b"\n");
    }

    #[test]
    fn encode_rejects_embedded_terminator() {
        let codec = codec();
        assert_eq!(
            codec.encode("hello\nworld"),
            Err(FramingError::EmbeddedTerminator)
        );
    }

    #[test]
    fn encode_rejects_oversized_lines() {
        let codec = LineCodec::new(4, PartialLinePolicy::Discard);
        assert!(codec.encode("abcd").is_ok());
        assert_eq!(
            codec.encode("abcde"),
            Err(FramingError::LineTooLong { limit: 4 })
        );
    }

    #[test]
    fn oversized_terminated_line_is_a_framing_error() {
        let mut codec = LineCodec::new(4, PartialLinePolicy::Discard);
        let results: Vec<_> = codec.feed(b"ok\ntoolong\nafter\n").collect();
        assert_eq!(
            results,
            vec![
                Ok("ok".to_string()),
                Err(FramingError::LineTooLong { limit: 4 })
            ]
        );
        // Poisoned: nothing else comes out.
        assert_eq!(codec.feed(b"more\n").next(), None);
    }

    #[test]
    fn oversized_partial_line_fails_before_terminator_arrives() {
        let mut codec = LineCodec::new(4, PartialLinePolicy::Discard);
        assert!(collect(&mut codec, b"abcd").is_empty());
        let result = codec.feed(b"e").next();
        assert_eq!(result, Some(Err(FramingError::LineTooLong { limit: 4 })));
        assert_eq!(codec.buffered_len(), 0);
    }

    #[test]
    fn invalid_utf8_is_a_framing_error() {
        let mut codec = codec();
        let result = codec.feed(&[0xff, 0xfe, b'\n']).next();
        assert_eq!(result, Some(Err(FramingError::InvalidUtf8)));
    }

    #[test]
    fn finish_discards_tail_by_default() {
        let mut codec = codec();
        assert_eq!(collect(&mut codec, b"done\npartial"), vec!["done"]);
        assert_eq!(codec.finish(), Ok(None));
        assert_eq!(codec.buffered_len(), 0);
    }

    #[test]
    fn finish_flushes_tail_when_configured() {
        let mut codec = LineCodec::new(DEFAULT_MAX_LINE_LENGTH, PartialLinePolicy::Flush);
        assert_eq!(collect(&mut codec, b"done\npartial"), vec!["done"]);
        assert_eq!(codec.finish(), Ok(Some("partial".to_string())));
        assert_eq!(codec.finish(), Ok(None));
    }
}
