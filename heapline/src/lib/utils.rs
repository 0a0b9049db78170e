pub use std::{
    fs::{self, File},
    hash::BuildHasherDefault,
    io::{self, BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
    time::{Duration, Instant},
};
pub use ahash::AHasher;
pub use indexmap::IndexMap;
pub use itertools::Itertools;
pub use thiserror::Error;

pub use blxdec::{Dialect, TimeOfDay, TraceRecord, RecordKind};

/// Hasher used by every map in this crate. Keys are either block
/// addresses or short path strings; neither needs DoS resistance.
pub type FastHash = BuildHasherDefault<AHasher>;

/// Hours in a trace day. The tracked hour reaching this value means the
/// capture crossed midnight.
pub const HOURS_PER_DAY: u8 = 24;
