use std::fmt;

/// Width of the raw timestamp embedded in every heap record.
pub const STAMP_LEN: usize = 8;

pub const NANOS_PER_SEC: u64 = 1_000_000_000;
pub const SECONDS_PER_DAY: u64 = 60 * 60 * 24;

const OVERRUN_NIBBLE: u64 = 0xF000_0000_0000_0000;
const BIT_59: u64 = 1 << 59;
const BIT_60: u64 = 1 << 60;

/// Assembles the 8 stamp bytes (most significant first) and applies the
/// overrun correction.
///
/// The device clock has no legitimate values in its earliest epoch, so any
/// activity in the top nibble is read as a counter overrun: the nibble is
/// cleared and, unless bit 59 is set, bit 60 is forced on.
pub fn stamp_nanos(bytes: [u8; STAMP_LEN]) -> u64 {
    let mut value = u64::from_be_bytes(bytes);
    if value & OVERRUN_NIBBLE != 0 {
        value &= !OVERRUN_NIBBLE;
        if value & BIT_59 == 0 {
            value |= BIT_60;
        }
    }

    value
}

/// A time of day with nanosecond precision. Records carry no date; that
/// is tracked by whoever replays them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay {
    hour:   u8,
    minute: u8,
    second: u8,
    nanos:  u32,
}

impl TimeOfDay {
    pub fn new(hour: u8, minute: u8, second: u8, nanos: u32) -> Option<Self> {
        if hour > 23 || minute > 59 || second > 59 || nanos as u64 >= NANOS_PER_SEC {
            return None;
        }

        Some(Self { hour, minute, second, nanos })
    }

    /// Folds a nanosecond count onto the day it falls in.
    pub fn from_nanos(nanos: u64) -> Self {
        let total_seconds = nanos / NANOS_PER_SEC;
        let of_day = total_seconds % SECONDS_PER_DAY;
        let minutes = of_day / 60;

        Self {
            hour:   (minutes / 60) as u8,
            minute: (minutes % 60) as u8,
            second: (of_day % 60) as u8,
            nanos:  (nanos % NANOS_PER_SEC) as u32,
        }
    }

    pub fn from_stamp(bytes: [u8; STAMP_LEN]) -> Self {
        Self::from_nanos(stamp_nanos(bytes))
    }

    /// Raw stamp bytes which decode back to this time of day.
    pub fn to_stamp(&self) -> [u8; STAMP_LEN] {
        self.nanos_of_day().to_be_bytes()
    }

    pub fn nanos_of_day(&self) -> u64 {
        let seconds = self.hour as u64 * 3600 + self.minute as u64 * 60 + self.second as u64;

        seconds * NANOS_PER_SEC + self.nanos as u64
    }

    pub fn hour(&self) -> u8 { self.hour }
    pub fn minute(&self) -> u8 { self.minute }
    pub fn second(&self) -> u8 { self.second }
    pub fn nanos(&self) -> u32 { self.nanos }

    /// Parses the `HH:MM:SS.nnnnnnnnn` rendering produced by `Display`.
    pub fn parse(s: &str) -> Option<Self> {
        let b = s.as_bytes();
        if !s.is_ascii() || b.len() != 18 || b[2] != b':' || b[5] != b':' || b[8] != b'.' {
            return None;
        }
        let field = |r: std::ops::Range<usize>| -> Option<u32> {
            let digits = &s[r];
            if !digits.bytes().all(|c| c.is_ascii_digit()) { return None; }
            digits.parse().ok()
        };

        Self::new(
            field(0..2)? as u8,
            field(3..5)? as u8,
            field(6..8)? as u8,
            field(9..18)?,
        )
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}:{:02}.{:09}", self.hour, self.minute, self.second, self.nanos)
    }
}
