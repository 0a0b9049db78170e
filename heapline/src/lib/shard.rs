//! Restores replay order across the segments of rotated captures.
//!
//! A capture tool that rotates its output writes `dump.blx`, then
//! `dump_0.blx`, `dump_1.blx` and so on. All of them belong to one
//! logical stream (the *pattern* `dump`) and must be replayed by
//! ascending numeric index, the unnumbered file first.
use crate::utils::*;

/// One capture file and where it sits in its rotation group.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FileShard {
    pub raw_path:   PathBuf,
    /// Grouping key: the path with the `_<digits>` suffix (or, lacking
    /// one, the extension) removed from the file name.
    pub pattern:    String,
    pub index:      u64,
    /// Whether the name carried a `_<digits>` suffix at all. Unnumbered
    /// shards sort ahead of every numbered sibling.
    pub numbered:   bool,
}

impl FileShard {
    pub fn new<P: AsRef<Path>>(raw_path: P) -> Self {
        let raw_path = raw_path.as_ref().to_path_buf();
        let name = raw_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let (stem, index, numbered) = match numeric_suffix(&name) {
            Some((at, digits))  => {
                // Absurdly long digit runs are not an index we can use.
                (&name[..at], digits.parse().unwrap_or(0), true)
            },
            None                => {
                let stem = match name.rfind('.') {
                    Some(0) | None  => { name.as_str() },
                    Some(dot)       => { &name[..dot] }
                };
                (stem, 0, false)
            }
        };

        Self {
            pattern: raw_path.with_file_name(stem).to_string_lossy().into_owned(),
            raw_path,
            index,
            numbered,
        }
    }

    /// Position of a shard inside its group. Equal indices fall back to
    /// the path, never to input order, so any permutation of the inputs
    /// resolves to the same sequence.
    fn order_key(&self) -> (u64, bool, &Path) {
        (self.index, self.numbered, &self.raw_path)
    }

    pub fn file_name(&self) -> String {
        self.raw_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| String::from("capture"))
    }
}

// Byte offset of the last '_' and the digit run following it, up to the
// extension. `None` unless that run is non-empty and all digits.
fn numeric_suffix(name: &str) -> Option<(usize, &str)> {
    let at = name.rfind('_')?;
    let rest = &name[at + 1..];
    let digits = match rest.find('.') {
        Some(dot)   => &rest[..dot],
        None        => rest,
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    Some((at, digits))
}

/// Orders capture paths for sequential replay.
///
/// Shards are grouped by pattern; each group is sorted by index with the
/// unnumbered shard first. Groups are independent streams, so their
/// relative order carries no meaning; they come out sorted by pattern,
/// which makes the result independent of input order.
pub fn resolve<I, P>(paths: I) -> Vec<FileShard>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    let mut groups: IndexMap<String, Vec<FileShard>, FastHash> = IndexMap::default();
    for p in paths {
        let shard = FileShard::new(p);
        groups.entry(shard.pattern.clone())
            .or_default()
            .push(shard);
    }
    groups.sort_keys();

    groups
        .into_values()
        .flat_map(|group| group
            .into_iter()
            .sorted_by(|a, b| a.order_key().cmp(&b.order_key())))
        .inspect(|s| tracing::debug!(path = %s.raw_path.display(), index = s.index, "resolved shard"))
        .collect()
}

/// Collects every `*.blx` file below `root`, recursively. A plain file
/// is returned as-is, whatever its extension.
pub fn discover<P: AsRef<Path>>(root: P) -> io::Result<Vec<PathBuf>> {
    let root = root.as_ref();
    let mut res = vec![];
    if root.is_file() {
        res.push(root.to_path_buf());
        return Ok(res);
    }

    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else if path
                .extension()
                .is_some_and(|e| e.eq_ignore_ascii_case("blx"))
            {
                res.push(path);
            }
        }
    }
    res.sort();

    Ok(res)
}
