//! Line reassembly over arbitrarily split upstream chunks.

/// Default upper bound on one line, newline excluded.
pub const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;

/// Buffers bytes until a newline completes a line.
///
/// Lines are decoded only once complete, so a multi-byte UTF-8 character
/// split across two chunks comes out intact. Emitted lines are trimmed and
/// empty lines are dropped.
#[derive(Debug)]
pub struct LineAssembler {
    buf: Vec<u8>,
    max_line: usize,
}

impl Default for LineAssembler {
    fn default() -> Self {
        Self::with_max_line(DEFAULT_MAX_LINE_BYTES)
    }
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_line,
        }
    }

    /// Feed one chunk and return every line it completes, in order.
    ///
    /// Fails with the offending length once a line grows past the limit;
    /// the assembler is unusable afterwards.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>, usize> {
        let mut lines = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            self.buf.extend_from_slice(&rest[..pos]);
            rest = &rest[pos + 1..];
            if self.buf.len() > self.max_line {
                return Err(self.buf.len());
            }

            let line = String::from_utf8_lossy(&self.buf);
            let trimmed = line.trim();
            if !trimmed.is_empty() {
                lines.push(trimmed.to_string());
            }
            self.buf.clear();
        }

        self.buf.extend_from_slice(rest);
        if self.buf.len() > self.max_line {
            return Err(self.buf.len());
        }
        Ok(lines)
    }

    /// Bytes held back waiting for a newline.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Whether the held-back bytes would form a non-empty line.
    pub fn has_partial(&self) -> bool {
        !String::from_utf8_lossy(&self.buf).trim().is_empty()
    }

    /// End of input. Returns the number of discarded bytes if a non-blank
    /// partial line was still buffered.
    pub fn finish(&mut self) -> Result<(), usize> {
        let partial = self.has_partial();
        let discarded = self.buf.len();
        self.buf.clear();
        if partial {
            Err(discarded)
        } else {
            Ok(())
        }
    }
}
