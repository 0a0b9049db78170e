use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use crate::cursor::{ByteCursor, Mark};
use crate::record::*;
use crate::DecodeError;

/// Where the framed dialect's first frame starts by default. Everything
/// before it is capture-tool preamble.
pub const FRAMED_START_OFFSET: u64 = 0xbb4;

/// Outer frame header: media, receiver, sender, resource, length.
pub const FRAME_HEADER_LEN: usize = 6;
// Receiver object, sender object, transaction id.
pub(crate) const FRAME_BODY_PREFIX_LEN: usize = 3;

pub(crate) const MEDIA_TYPE_TCPIP: u8 = 0x1D;
pub(crate) const MEDIA_TYPE_USB: u8 = 0x1B;
pub(crate) const RECEIVER_DEVICE_PC: u8 = 0x10;
pub(crate) const SEND_DEVICE_TRACEBOX: u8 = 0x4C;
pub(crate) const RESOURCE_TRACEBOX: u8 = 0x7C;

/// The two capture layouts we know how to read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dialect {
    /// Heap records are found by scanning for the signature pair
    /// anywhere in the byte stream.
    Signature,
    /// Heap records sit inside length-prefixed trace-box frames. The
    /// frame's declared length decides where the next frame starts.
    Framed {
        start_offset:   u64,
    },
}

impl Dialect {
    pub fn framed() -> Self {
        Dialect::Framed { start_offset: FRAMED_START_OFFSET }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct FrameHeader {
    media:      u8,
    receiver:   u8,
    sender:     u8,
    resource:   u8,
    length:     u16,
}

impl FrameHeader {
    fn parse(b: &[u8]) -> Self {
        Self {
            media:      b[0],
            receiver:   b[1],
            sender:     b[2],
            resource:   b[3],
            length:     u16::from_be_bytes([b[4], b[5]]),
        }
    }

    fn is_trace_box(&self) -> bool {
        (self.media == MEDIA_TYPE_TCPIP || self.media == MEDIA_TYPE_USB) &&
        self.receiver == RECEIVER_DEVICE_PC &&
        self.sender == SEND_DEVICE_TRACEBOX &&
        self.resource == RESOURCE_TRACEBOX
    }
}

/// Counters kept while scanning one capture.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub records:        usize,
    /// Candidate headers that turned out not to be heap records.
    pub resyncs:        usize,
    /// Well-formed frames carrying something other than heap records.
    pub foreign_frames: usize,
}

// Outcome of reading one candidate heap record.
enum Candidate {
    Record(TraceRecord),
    Mismatch,
    Truncated,
}

/// Lazy, finite and non-restartable sequence of heap records found in one
/// capture. A partial record at end of stream ends the sequence quietly;
/// only I/O failures come out as errors, after which the stream is done.
pub struct RecordStream<R> {
    cursor:     ByteCursor<R>,
    dialect:    Dialect,
    started:    bool,
    done:       bool,
    stats:      ScanStats,
}

impl RecordStream<File> {
    pub fn open<P: AsRef<Path>>(path: P, dialect: Dialect) -> Result<Self, DecodeError> {
        let path = path.as_ref();
        let fd = File::open(path)
            .map_err(|source| DecodeError::Open { path: path.to_path_buf(), source })?;

        Ok(Self::new(fd, dialect))
    }
}

impl<R: Read> RecordStream<R> {
    pub fn new(inner: R, dialect: Dialect) -> Self {
        Self {
            cursor: ByteCursor::new(inner),
            dialect,
            started: false,
            done: false,
            stats: ScanStats::default(),
        }
    }

    pub fn stats(&self) -> ScanStats {
        self.stats
    }

    fn step(&mut self) -> io::Result<Option<TraceRecord>> {
        match self.dialect {
            Dialect::Signature                  => { self.next_signed() },
            Dialect::Framed { start_offset }    => {
                if !self.started {
                    self.started = true;
                    if !self.cursor.skip(start_offset)? { return Ok(None); }
                }
                self.next_framed()
            }
        }
    }

    fn next_signed(&mut self) -> io::Result<Option<TraceRecord>> {
        loop {
            self.cursor.release();
            match self.cursor.next_byte()? {
                None                            => { return Ok(None); },
                Some(SIGNATURE_MESSAGE_ID)      => {},
                Some(_)                         => { continue; },
            };
            // A mismatching second byte is left in place: it could be the
            // start of the real signature.
            match self.cursor.peek(1)? {
                None                            => { return Ok(None); },
                Some(b) if b[0] == SIGNATURE_MASTER => {},
                Some(_)                         => { continue; },
            };
            self.cursor.consume(1)?;
            let after_signature = self.cursor.mark();
            match self.heap_record()? {
                Candidate::Record(r)    => { return Ok(Some(r)); },
                Candidate::Truncated    => { return Ok(None); },
                Candidate::Mismatch     => {
                    // The header read was speculative; scan on from
                    // right behind the signature.
                    self.stats.resyncs += 1;
                    self.cursor.rewind(after_signature);
                }
            }
        }
    }

    fn next_framed(&mut self) -> io::Result<Option<TraceRecord>> {
        loop {
            self.cursor.release();
            let frame_start = self.cursor.mark();
            let header = match self.cursor.consume(FRAME_HEADER_LEN)? {
                Some(b) => FrameHeader::parse(b),
                None    => { return Ok(None); }
            };
            if !header.is_trace_box() {
                self.stats.resyncs += 1;
                self.cursor.rewind(frame_start.advanced(1));
                continue;
            }
            let next_frame = self.cursor.mark().advanced(header.length as u64);
            if self.cursor.consume(FRAME_BODY_PREFIX_LEN)?.is_none() {
                return Ok(None);
            }
            let is_heap = match self.cursor.consume(2)? {
                Some(sig)   => sig[0] == SIGNATURE_MESSAGE_ID && sig[1] == SIGNATURE_MASTER,
                None        => { return Ok(None); }
            };
            let candidate = if is_heap { self.heap_record()? } else { Candidate::Mismatch };
            match candidate {
                Candidate::Record(r)    => {
                    self.cursor.jump(next_frame)?;
                    return Ok(Some(r));
                },
                Candidate::Truncated    => { return Ok(None); },
                Candidate::Mismatch     => {
                    self.stats.foreign_frames += 1;
                    if !self.cursor.jump(next_frame)? { return Ok(None); }
                }
            }
        }
    }

    // Reads the common header and, if it describes a heap record we know,
    // its tail. Leaves the cursor wherever it stopped; callers rewind.
    fn heap_record(&mut self) -> io::Result<Candidate> {
        let header = match self.cursor.consume(HEAP_HEADER_LEN)? {
            Some(b) => HeapHeader::parse(b),
            None    => { return Ok(Candidate::Truncated); }
        };
        if header.trace_type != HEAP_TRACE_TYPE {
            return Ok(Candidate::Mismatch);
        }
        let id = match RecordId::from_byte(header.record_id) {
            Some(id)    => id,
            None        => { return Ok(Candidate::Mismatch); }
        };

        Ok(match self.cursor.consume(id.tail_len())? {
            Some(tail)  => Candidate::Record(TraceRecord::from_parts(id, &header, tail)),
            None        => Candidate::Truncated,
        })
    }

    /// Stream offset the scanner has reached.
    pub fn position(&self) -> Mark {
        self.cursor.mark()
    }
}

impl<R: Read> Iterator for RecordStream<R> {
    type Item = Result<TraceRecord, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done { return None; }
        match self.step() {
            Ok(Some(r)) => {
                self.stats.records += 1;
                Some(Ok(r))
            },
            Ok(None)    => {
                self.done = true;
                tracing::trace!(
                    records = self.stats.records,
                    resyncs = self.stats.resyncs,
                    foreign_frames = self.stats.foreign_frames,
                    "capture exhausted"
                );
                None
            },
            Err(source) => {
                self.done = true;
                Some(Err(DecodeError::Read { offset: self.cursor.offset(), source }))
            }
        }
    }
}
