//! Reassembly of newline-terminated records from arbitrary transport chunks.
//!
//! Serial reads deliver whatever bytes happen to be in the UART buffer, so a
//! record may arrive split across reads, several records may arrive at once,
//! and reads may be empty. The framer carries the trailing partial record
//! between chunks and hands out only complete, trimmed, non-blank records.

use crate::error::{TelemetryError, TelemetryResult};

/// Stateful line framer.
#[derive(Debug, Default)]
pub struct LineFramer {
    /// Unconsumed text; everything before `cursor` has already been yielded
    buffer: String,
    cursor: usize,
    /// Maximum length of a partial record, if guarded
    max_record_len: Option<usize>,
}

impl LineFramer {
    /// Create a framer without a record length guard.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a framer that fails with `FramingOverflow` once a partial
    /// record grows past `limit` bytes.
    pub fn with_limit(limit: Option<usize>) -> Self {
        Self {
            max_record_len: limit,
            ..Self::default()
        }
    }

    /// Feed a chunk and iterate over the records it completes.
    ///
    /// The returned iterator is lazy; records it does not yield stay
    /// buffered and come out of the next call.
    pub fn push(&mut self, chunk: &str) -> TelemetryResult<Records<'_>> {
        self.compact();
        self.buffer.push_str(chunk);

        if let Some(limit) = self.max_record_len {
            let partial = match self.buffer.rfind('\n') {
                Some(idx) => self.buffer.len() - idx - 1,
                None => self.buffer.len(),
            };
            if partial > limit {
                let len = partial;
                self.clear();
                return Err(TelemetryError::FramingOverflow { len, limit });
            }
        }

        Ok(Records { framer: self })
    }

    /// Flush the trailing partial record at end of stream.
    pub fn finish(&mut self) -> Option<String> {
        let rest = self.buffer[self.cursor..].trim().to_string();
        self.clear();
        (!rest.is_empty()).then_some(rest)
    }

    /// Number of buffered bytes that have not formed a record yet.
    pub fn pending_len(&self) -> usize {
        self.buffer.len() - self.cursor
    }

    /// Drop any buffered partial record.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.cursor = 0;
    }

    fn compact(&mut self) {
        if self.cursor > 0 {
            self.buffer.drain(..self.cursor);
            self.cursor = 0;
        }
    }

    fn next_record(&mut self) -> Option<String> {
        loop {
            let rest = &self.buffer[self.cursor..];
            let idx = rest.find('\n')?;
            let record = rest[..idx].trim();
            let record = (!record.is_empty()).then(|| record.to_string());
            self.cursor += idx + 1;

            if record.is_some() {
                return record;
            }
        }
    }
}

/// Lazy iterator over the complete records currently buffered.
pub struct Records<'a> {
    framer: &'a mut LineFramer,
}

impl Iterator for Records<'_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.framer.next_record()
    }
}
