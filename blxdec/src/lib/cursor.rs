use std::io::{self, ErrorKind, Read};

// Read granularity.
const CHUNK_LEN: usize = 8192;

/// An absolute stream position handed out by [`ByteCursor::mark`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Mark(u64);

impl Mark {
    /// The mark `n` bytes further down the stream.
    pub fn advanced(self, n: u64) -> Self {
        Mark(self.0.saturating_add(n))
    }

    pub fn offset(self) -> u64 {
        self.0
    }
}

/// Forward-reading cursor with bounded lookahead.
///
/// Capture files are not self-delimiting, so the decoders need to read a
/// candidate header, look at it, and possibly give the bytes back. The
/// cursor keeps everything read since the last [`release`](ByteCursor::release)
/// in memory, which makes [`rewind`](ByteCursor::rewind) to any mark taken
/// after that point a plain index update.
///
/// Nothing is ever retained beyond one record's worth of lookahead plus one
/// read chunk: callers `release` at the top of each scanning step.
pub struct ByteCursor<R> {
    inner:  R,
    buf:    Vec<u8>,
    // Stream offset of `buf[0]`.
    base:   u64,
    pos:    usize,
    eof:    bool,
}

impl<R: Read> ByteCursor<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf:    Vec::with_capacity(CHUNK_LEN),
            base:   0,
            pos:    0,
            eof:    false,
        }
    }

    /// Current stream offset.
    pub fn offset(&self) -> u64 {
        self.base + self.pos as u64
    }

    pub fn mark(&self) -> Mark {
        Mark(self.offset())
    }

    /// Makes sure `n` bytes past the current position are buffered.
    /// Returns `false` if the stream ends first.
    fn fill(&mut self, n: usize) -> io::Result<bool> {
        while self.buf.len() - self.pos < n {
            if self.eof { return Ok(false); }
            let old_len = self.buf.len();
            self.buf.resize(old_len + CHUNK_LEN.max(n), 0);
            let got = loop {
                match self.inner.read(&mut self.buf[old_len..]) {
                    Ok(got)     => break got,
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e)      => {
                        self.buf.truncate(old_len);
                        return Err(e);
                    }
                }
            };
            self.buf.truncate(old_len + got);
            if got == 0 { self.eof = true; }
        }

        Ok(true)
    }

    /// Looks at the next `n` bytes without consuming them.
    pub fn peek(&mut self, n: usize) -> io::Result<Option<&[u8]>> {
        if !self.fill(n)? { return Ok(None); }

        Ok(Some(&self.buf[self.pos..self.pos + n]))
    }

    /// Consumes the next `n` bytes. At end of stream nothing is consumed
    /// and `None` comes back.
    pub fn consume(&mut self, n: usize) -> io::Result<Option<&[u8]>> {
        if !self.fill(n)? { return Ok(None); }
        let start = self.pos;
        self.pos += n;

        Ok(Some(&self.buf[start..self.pos]))
    }

    pub fn next_byte(&mut self) -> io::Result<Option<u8>> {
        Ok(self.consume(1)?.map(|b| b[0]))
    }

    /// Moves back to a mark taken since the last release. Returns `false`
    /// (and leaves the cursor alone) if the mark is no longer buffered.
    pub fn rewind(&mut self, m: Mark) -> bool {
        if m.0 < self.base || m.0 > self.base + self.buf.len() as u64 {
            return false;
        }
        self.pos = (m.0 - self.base) as usize;

        true
    }

    /// Moves to an arbitrary mark, reading and dropping bytes if it lies
    /// past what is buffered. Returns `false` if the stream ends before
    /// the mark; the cursor is then parked at end of stream.
    pub fn jump(&mut self, m: Mark) -> io::Result<bool> {
        if self.rewind(m) { return Ok(true); }
        if m.0 < self.base { return Ok(false); }
        loop {
            self.pos = self.buf.len();
            self.release_all();
            let left = m.0 - self.base;
            if left == 0 { return Ok(true); }
            let want = left.min(CHUNK_LEN as u64) as usize;
            if !self.fill(want)? {
                self.pos = self.buf.len();
                return Ok(false);
            }
            if left <= self.buf.len() as u64 {
                self.pos = left as usize;
                return Ok(true);
            }
        }
    }

    /// Skips `n` bytes from the current position.
    pub fn skip(&mut self, n: u64) -> io::Result<bool> {
        self.jump(self.mark().advanced(n))
    }

    /// Forgets consumed bytes once enough of them piled up. Marks taken
    /// before a release may stop being valid rewind targets.
    pub fn release(&mut self) {
        if self.pos >= CHUNK_LEN { self.release_all(); }
    }

    fn release_all(&mut self) {
        self.buf.drain(..self.pos);
        self.base += self.pos as u64;
        self.pos = 0;
    }

    pub fn at_end(&mut self) -> io::Result<bool> {
        Ok(!self.fill(1)?)
    }
}
