//! Line-oriented block protocol of the event stream.
//!
//! A block is a run of `event: <name>` / `data: <text>` lines closed by a
//! blank line. Multiple `data:` lines are joined with `\n`; lines starting
//! with `:` are comments and other prefixes are ignored.

use bytes::BytesMut;

/// One completed block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBlock {
    pub event: Option<String>,
    pub data: String,
}

/// Splits an arbitrary chunked byte stream into lines
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: BytesMut,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; returns every line it completed (without the terminator)
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line = self.pending.split_to(pos + 1);
            let mut end = pos;
            if end > 0 && line[end - 1] == b'\r' {
                end -= 1;
            }
            lines.push(String::from_utf8_lossy(&line[..end]).into_owned());
        }
        lines
    }
}

/// Assembles lines into blocks
#[derive(Debug, Default)]
pub struct BlockParser {
    event: Option<String>,
    data: String,
    has_data: bool,
}

impl BlockParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line; a blank line closes the current block, which is
    /// returned if it carried any data
    pub fn push_line(&mut self, line: &str) -> Option<RawBlock> {
        if line.trim().is_empty() {
            let block = self.has_data.then(|| RawBlock {
                event: self.event.take(),
                data: std::mem::take(&mut self.data),
            });
            self.reset();
            return block;
        }

        if let Some(name) = line.strip_prefix("event:") {
            self.event = Some(name.trim().to_string());
        } else if let Some(part) = line.strip_prefix("data:") {
            if self.has_data {
                self.data.push('\n');
            }
            self.data.push_str(part.trim());
            self.has_data = true;
        }
        None
    }

    fn reset(&mut self) {
        self.event = None;
        self.data.clear();
        self.has_data = false;
    }
}
