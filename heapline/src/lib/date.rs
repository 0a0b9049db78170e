use std::fmt;
use std::str::FromStr;

use crate::utils::*;

/// A calendar day attached to trace events whose own timestamps only
/// carry the time of day.
///
/// Day arithmetic is deliberately simple: February always has 28 days,
/// leap years are not modelled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TraceDate {
    // Field order gives chronological `Ord`.
    year:   u16,
    month:  u8,
    day:    u8,
}

/// Used when the first capture's modification time cannot be read.
pub const FALLBACK_DATE: TraceDate = TraceDate { year: 2012, month: 3, day: 3 };

const DAYS_IN_MONTH: [u8; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

#[derive(Error, Debug, PartialEq, Eq)]
#[error("not a DD/MM/YYYY date: {0:?}")]
pub struct BadDate(pub String);

impl TraceDate {
    /// Accepts any real calendar day, 29 February included; it is only
    /// rolling forward that ignores leap years.
    pub fn new(day: u8, month: u8, year: u16) -> Option<Self> {
        if !(1..=12).contains(&month) || year == 0 {
            return None;
        }
        let max = if month == 2 { 29 } else { DAYS_IN_MONTH[month as usize - 1] };
        if day == 0 || day > max {
            return None;
        }

        Some(Self { year, month, day })
    }

    pub fn day(&self) -> u8 { self.day }
    pub fn month(&self) -> u8 { self.month }
    pub fn year(&self) -> u16 { self.year }

    /// The following day.
    pub fn next_day(self) -> Self {
        let mut res = self;
        if res.day < DAYS_IN_MONTH[res.month as usize - 1] {
            res.day += 1;
        } else if res.month < 12 {
            res.day = 1;
            res.month += 1;
        } else {
            res.day = 1;
            res.month = 1;
            res.year = res.year.saturating_add(1);
        }

        res
    }

    /// Local calendar day of a file's last modification. Falls back to UTC
    /// when the local offset cannot be determined.
    pub fn from_mtime<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let modified = fs::metadata(path.as_ref())?.modified()?;
        let utc = time::OffsetDateTime::from(modified);
        let dt = match time::UtcOffset::current_local_offset() {
            Ok(offset)  => utc.to_offset(offset),
            Err(_)      => utc,
        };

        u16::try_from(dt.year())
            .ok()
            .and_then(|y| Self::new(dt.day(), u8::from(dt.month()), y))
            .ok_or_else(|| io::Error::new(
                io::ErrorKind::InvalidData,
                format!("modification year {} out of range", dt.year()),
            ))
    }

    /// The replay seed: the first shard's modification day, else
    /// [`FALLBACK_DATE`].
    pub fn seed<P: AsRef<Path>>(first_shard: Option<P>) -> Self {
        let Some(p) = first_shard else {
            return FALLBACK_DATE;
        };
        match Self::from_mtime(p.as_ref()) {
            Ok(d)   => d,
            Err(e)  => {
                tracing::warn!(
                    path = %p.as_ref().display(),
                    "no usable modification time ({e}); starting at {FALLBACK_DATE}"
                );
                FALLBACK_DATE
            }
        }
    }
}

impl fmt::Display for TraceDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}/{:02}/{:04}", self.day, self.month, self.year)
    }
}

impl FromStr for TraceDate {
    type Err = BadDate;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || BadDate(s.to_string());
        let (d, m, y) = s.trim()
            .split('/')
            .collect_tuple()
            .ok_or_else(bad)?;

        Self::new(
            d.parse().map_err(|_| bad())?,
            m.parse().map_err(|_| bad())?,
            y.parse().map_err(|_| bad())?,
        ).ok_or_else(bad)
    }
}
