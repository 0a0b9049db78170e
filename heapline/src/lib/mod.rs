//! Welcome to `heapline`!
//!
//! Embedded targets log every heap call into BLX captures, often rotated
//! across several files. This crate puts those files back in order,
//! decodes them in parallel and replays the heap events one by one
//! against a running free-heap counter, producing a dated ledger:
//!
//! ```text
//! 03/03/2012 23:59:59.999999871, 07235046
//! ```
//!
//! Decoding is done by [`blxdec`]; parallelism comes from [`workpool`].

pub mod utils;
pub mod shard;
pub mod date;
pub mod ledger;
pub mod rebuild;
pub mod pipeline;

pub use shard::{discover, resolve, FileShard};
pub use date::{TraceDate, FALLBACK_DATE};
pub use ledger::AllocationLedger;
pub use rebuild::{Reconstructor, ReplayStats, TimelineEntry};
pub use pipeline::{
    decode_phase, ledger_phase, run,
    DecodeReport, LedgerReport, PipelineError, RunReport, ScanConfig, ShardFailure,
};
