use std::fs::File;
use std::io::{BufRead, BufReader, Cursor};
use std::path::{Path, PathBuf};

use log::warn;
use thiserror::Error;

/// One memory reference from a trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemOp {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemRef {
    pub op: MemOp,
    pub addr: u32,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TraceParseError {
    #[error("empty reference line")]
    Empty,
    #[error("unknown operation {0:?}, expected R or W")]
    UnknownOp(String),
    #[error("missing address")]
    MissingAddress,
    #[error("bad address {0:?}")]
    BadAddress(String),
}

/// Parses one `<OP> <ADDR>` trace line. OP is R or W, case-insensitive;
/// ADDR is decimal or 0x-prefixed hexadecimal.
pub fn parse_line(line: &str) -> Result<MemRef, TraceParseError> {
    let mut fields = line.split_whitespace();
    let op_field = fields.next().ok_or(TraceParseError::Empty)?;
    let op = match op_field {
        "R" | "r" => MemOp::Read,
        "W" | "w" => MemOp::Write,
        other => return Err(TraceParseError::UnknownOp(other.to_string())),
    };
    let addr_field = fields.next().ok_or(TraceParseError::MissingAddress)?;
    let addr = if let Some(hex) = addr_field
        .strip_prefix("0x")
        .or_else(|| addr_field.strip_prefix("0X"))
    {
        u32::from_str_radix(hex, 16)
    } else {
        addr_field.parse()
    }
    .map_err(|_| TraceParseError::BadAddress(addr_field.to_string()))?;
    Ok(MemRef { op, addr })
}

/// Path of core `core_id`'s trace under a common prefix.
pub fn trace_path(prefix: &str, core_id: usize) -> PathBuf {
    PathBuf::from(format!("{prefix}_proc{core_id}.trace"))
}

/// Streams one core's memory references off its trace file. Blank lines
/// and `#` comments are skipped; malformed lines are warned about and
/// skipped; a missing file yields an immediately exhausted stream.
pub struct TraceReader {
    core_id: usize,
    source: Option<Box<dyn BufRead>>,
    line_no: u64,
}

impl TraceReader {
    pub fn open(prefix: &str, core_id: usize) -> Self {
        let path = trace_path(prefix, core_id);
        Self::open_path(&path, core_id)
    }

    pub fn open_path(path: &Path, core_id: usize) -> Self {
        let source: Option<Box<dyn BufRead>> = match File::open(path) {
            Ok(file) => Some(Box::new(BufReader::new(file))),
            Err(err) => {
                warn!(
                    "core {core_id}: cannot open trace {}: {err}; core will stay quiescent",
                    path.display()
                );
                None
            }
        };
        Self {
            core_id,
            source,
            line_no: 0,
        }
    }

    /// Builds a reader over an in-memory trace.
    pub fn from_string(core_id: usize, text: &str) -> Self {
        Self {
            core_id,
            source: Some(Box::new(Cursor::new(text.to_string()))),
            line_no: 0,
        }
    }

    /// An already-exhausted stream, for cores with no trace at all.
    pub fn empty(core_id: usize) -> Self {
        Self {
            core_id,
            source: None,
            line_no: 0,
        }
    }

    /// True once the underlying stream has been consumed or was never
    /// there to begin with.
    pub fn is_exhausted(&self) -> bool {
        self.source.is_none()
    }

    /// Next well-formed reference, or None at end of trace.
    pub fn next_ref(&mut self) -> Option<MemRef> {
        let source = self.source.as_mut()?;
        let mut line = String::new();
        loop {
            line.clear();
            match source.read_line(&mut line) {
                Ok(0) => {
                    self.source = None;
                    return None;
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("core {}: trace read error: {err}", self.core_id);
                    self.source = None;
                    return None;
                }
            }
            self.line_no += 1;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            match parse_line(trimmed) {
                Ok(reference) => return Some(reference),
                Err(err) => {
                    warn!(
                        "core {}: skipping trace line {}: {err}",
                        self.core_id, self.line_no
                    );
                }
            }
        }
    }
}
