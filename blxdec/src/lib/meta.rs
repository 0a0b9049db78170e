//! The intermediate ".meta" format: one fixed-width text line per decoded
//! record.
//!
//! ```text
//! -------------------------------------------------------------------------
//! Timestamp | Op | Address | Size | Alloc type | Caller1 | Caller2
//! -------------------------------------------------------------------------
//! HH:MM:SS.nnnnnnnnn   -  2000010     100 1  1000001  1000002
//! ```
//!
//! `-` is an allocation, `+` a deallocation and `$` a heap init. Address
//! and callers are hex, size and allocation type decimal. Size and
//! allocation type are zero for anything but an allocation.
use std::io::{self, BufRead, BufWriter, Write};

use thiserror::Error;

use crate::record::{AllocKind, RecordKind, TraceRecord};
use crate::stamp::TimeOfDay;

pub const TYPE_INIT: char = '$';
pub const TYPE_ALLOCATE: char = '-';
pub const TYPE_DEALLOCATE: char = '+';

const TIME_LEN: usize = 18;
const MARKER_AT: usize = 20;
const ADDRESS_AT: usize = 22;
const SIZE_AT: usize = 30;
// Right-anchored part: "<type:2> <caller1:8> <caller2:8>".
const RIGHT_LEN: usize = 2 + 1 + 8 + 1 + 8;

#[derive(Error, Debug)]
#[error("{reason}: {content:?}")]
/// A line that is not in the intermediate format.
pub struct MalformedLine {
    pub reason:     &'static str,
    pub content:    String,
}

#[derive(Error, Debug)]
pub enum MetaError {
    #[error("line {line}: {source}")]
    Malformed {
        line:   usize,
        #[source]
        source: MalformedLine,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub fn op_marker(r: &TraceRecord) -> char {
    match r.kind {
        RecordKind::Init                => { TYPE_INIT },
        RecordKind::Allocate { .. }     => { TYPE_ALLOCATE },
        RecordKind::Deallocate { .. }   => { TYPE_DEALLOCATE },
    }
}

/// Renders one record, newline included.
pub fn format_line(r: &TraceRecord) -> String {
    let (caller1, caller2) = r.callers();
    let subtype = r.subtype().map_or(0, |k| k.code());

    format!("{:<19} {} {:>8x}{:>8}{:>2} {:>8x} {:>8x}\n",
        r.time.to_string(),
        op_marker(r),
        r.address(),
        r.size(),
        subtype,
        caller1,
        caller2,
    )
}

pub fn parse_line(line: &str) -> Result<TraceRecord, MalformedLine> {
    let bad = |reason: &'static str| MalformedLine { reason, content: line.to_string() };
    let line = line.trim_end_matches(['\n', '\r']);
    if !line.is_ascii() {
        return Err(bad("non-ASCII content"));
    }
    if line.len() < SIZE_AT + 1 + RIGHT_LEN {
        return Err(bad("line too short"));
    }
    let hex = |s: &str| u32::from_str_radix(s.trim(), 16);
    let dec = |s: &str| s.trim().parse::<u32>();

    let time = TimeOfDay::parse(&line[..TIME_LEN])
        .ok_or_else(|| bad("bad timestamp"))?;
    let marker = line.as_bytes()[MARKER_AT] as char;
    let address = hex(&line[ADDRESS_AT..SIZE_AT])
        .map_err(|_| bad("bad address"))?;
    let right = &line[line.len() - RIGHT_LEN..];
    let size = dec(&line[SIZE_AT..line.len() - RIGHT_LEN])
        .map_err(|_| bad("bad size"))?;
    let subtype = dec(&right[..2])
        .map_err(|_| bad("bad allocation type"))?;
    let caller1 = hex(&right[3..11])
        .map_err(|_| bad("bad caller1"))?;
    let caller2 = hex(&right[12..20])
        .map_err(|_| bad("bad caller2"))?;

    let kind = match marker {
        TYPE_INIT       => { RecordKind::Init },
        TYPE_ALLOCATE   => {
            let subtype = u8::try_from(subtype)
                .ok()
                .and_then(AllocKind::from_code)
                .ok_or_else(|| bad("unknown allocation type"))?;
            RecordKind::Allocate { address, size, subtype, caller1, caller2 }
        },
        TYPE_DEALLOCATE => { RecordKind::Deallocate { address, caller1, caller2 } },
        _               => { return Err(bad("unknown operation marker")); }
    };

    Ok(TraceRecord { time, kind })
}

/// Buffered writer of intermediate lines.
pub struct MetaWriter<W: Write> {
    inner:  BufWriter<W>,
    lines:  usize,
}

impl<W: Write> MetaWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner: BufWriter::new(inner), lines: 0 }
    }

    pub fn write_record(&mut self, r: &TraceRecord) -> io::Result<()> {
        self.inner.write_all(format_line(r).as_bytes())?;
        self.lines += 1;

        Ok(())
    }

    pub fn lines(&self) -> usize {
        self.lines
    }

    /// Flushes and hands back the underlying writer.
    pub fn finish(self) -> io::Result<W> {
        self.inner.into_inner().map_err(|e| e.into_error())
    }
}

/// Iterates over the records of an intermediate file.
pub struct MetaReader<R: BufRead> {
    inner:  R,
    line:   usize,
    buf:    String,
}

impl<R: BufRead> MetaReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, line: 0, buf: String::new() }
    }
}

impl<R: BufRead> Iterator for MetaReader<R> {
    type Item = Result<TraceRecord, MetaError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.buf.clear();
            match self.inner.read_line(&mut self.buf) {
                Ok(0)   => { return None; },
                Ok(_)   => {},
                Err(e)  => { return Some(Err(e.into())); }
            };
            self.line += 1;
            if self.buf.trim().is_empty() { continue; }

            return Some(parse_line(&self.buf)
                .map_err(|source| MetaError::Malformed { line: self.line, source }));
        }
    }
}
