//! Incremental decoder for the `text/event-stream` body of a
//! streaming chat completion.
//!
//! Bytes go in as they arrive off the wire, text fragments come out
//! in order. The decoder buffers whatever it can't use yet: a
//! multi-byte UTF-8 sequence split across reads, and a line that
//! hasn't seen its newline. Because of that the fragments produced are
//! the same no matter how the body was chunked.
use serde::Deserialize;

const DATA_PREFIX: &str = "data: ";
const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
}

// Only the part of the chunk we render is modeled. Everything else
// (id, model, finish_reason, usage, etc.) is ignored.
#[derive(Debug, Deserialize)]
struct CompletionChunk {
    choices: Vec<CompletionChunkChoice>,
}

/// What a single line of the event stream turned out to be.
#[derive(Debug, PartialEq, Eq)]
pub enum Record {
    /// Blank lines, comments, `event:` lines and anything else that
    /// isn't a data record.
    Ignored,
    /// The `[DONE]` terminator. Produces nothing; the stream ends when
    /// the body does.
    Done,
    /// A data record whose payload wasn't a completion chunk.
    Malformed,
    /// A valid chunk that carried no text, e.g. the role preamble or
    /// the final chunk with only a `finish_reason`.
    Empty,
    Fragment(String),
}

impl Record {
    /// Classify one line of the stream, with or without its line
    /// terminator.
    pub fn parse(line: &str) -> Self {
        let line = line.strip_suffix('\n').unwrap_or(line);
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.trim().is_empty() {
            return Record::Ignored;
        }

        let Some(data) = line.strip_prefix(DATA_PREFIX) else {
            return Record::Ignored;
        };

        if data == DONE_SENTINEL {
            return Record::Done;
        }

        match serde_json::from_str::<CompletionChunk>(data) {
            Ok(chunk) => chunk
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.delta)
                .and_then(|delta| delta.content)
                .filter(|content| !content.is_empty())
                .map_or(Record::Empty, Record::Fragment),
            Err(e) => {
                tracing::warn!("Skipping malformed stream record {}\nError: {}", data, e);
                Record::Malformed
            }
        }
    }

    pub fn into_fragment(self) -> Option<String> {
        match self {
            Record::Fragment(text) => Some(text),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    // Trailing bytes of an incomplete UTF-8 sequence from the last read
    carry: Vec<u8>,
    // Decoded text after the last newline seen
    line: String,
    done: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a `[DONE]` record has been seen so far.
    pub fn saw_done(&self) -> bool {
        self.done
    }

    /// Feed the next read from the response body and return the
    /// fragments from every line it completed.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        let text = self.decode_utf8(bytes);
        self.line.push_str(&text);

        let mut fragments = Vec::new();
        while let Some(end) = self.line.find('\n') {
            let line: String = self.line.drain(..=end).collect();
            if let Some(fragment) = self.record(&line) {
                fragments.push(fragment);
            }
        }
        fragments
    }

    /// Flush the decoder at end of stream. A final line without a
    /// trailing newline is still parsed, and leftover bytes that never
    /// formed a valid character become U+FFFD.
    pub fn finish(&mut self) -> Vec<String> {
        let carry = std::mem::take(&mut self.carry);
        if !carry.is_empty() {
            self.line.push_str(&String::from_utf8_lossy(&carry));
        }
        let line = std::mem::take(&mut self.line);
        self.record(&line).into_iter().collect()
    }

    fn record(&mut self, line: &str) -> Option<String> {
        let record = Record::parse(line);
        if record == Record::Done {
            self.done = true;
        }
        record.into_fragment()
    }

    // Decode as much of `carry + bytes` as possible. Invalid sequences
    // are replaced with U+FFFD, an incomplete sequence at the very end
    // is held back for the next read.
    fn decode_utf8(&mut self, bytes: &[u8]) -> String {
        let mut buf = std::mem::take(&mut self.carry);
        buf.extend_from_slice(bytes);

        let mut out = String::with_capacity(buf.len());
        let mut rest = buf.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }
        self.carry = rest.to_vec();
        out
    }
}
