//! Decoding of heap-hook trace records out of BLX capture files.
//!
//! A capture is an interleaved byte stream of many kinds of trace traffic.
//! Heap records are the ones that matter here: each one is introduced by
//! the signature pair `0x94 0x01`, followed by a fixed header (channel,
//! 8-byte clock stamp, trace type, record id, task, block pointer) and a
//! tail whose shape depends on the record id.
//!
//! Two capture dialects exist. In the [`Signature`](Dialect::Signature)
//! one we simply scan for the pair, byte by byte. In the
//! [`Framed`](Dialect::Framed) one every trace item sits inside an outer
//! trace-box frame whose declared length tells where the next one starts.
//!
//! Decoded records are usually spilled to an intermediate text file (see
//! [`meta`]) so that replaying them can be done later, and in order.
use std::io;
use std::path::PathBuf;

use thiserror::Error;

mod cursor;
mod record;
mod scan;
mod stamp;
pub mod meta;
pub mod synth;

pub use cursor::{ByteCursor, Mark};
pub use record::*;
pub use scan::*;
pub use stamp::*;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("cannot open {}: {source}", path.display())]
    Open {
        path:   PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("read failed near offset {offset:#x}: {source}")]
    Read {
        offset: u64,
        #[source]
        source: io::Error,
    },
}
