//! The two phases of a run.
//!
//! 1. **Decode**: shards are resolved, then decoded in parallel, each one
//!    into its own intermediate file under the work directory. The ordered
//!    list of those files and the seed date are written next to them.
//! 2. **Ledger**: the intermediate files are replayed strictly in listed
//!    order through one [`Reconstructor`] into the final ledger.
//!
//! Phase 2 only reads what phase 1 left in the work directory, so it can
//! be rerun with another starting capacity or gate setting without
//! decoding anything again.
use std::sync::mpsc::{self, Sender};

use blxdec::meta::{MetaError, MetaReader, MetaWriter};
use blxdec::{RecordStream, ScanStats};
use workpool::{PoolError, Task, WorkPool};

use crate::date::TraceDate;
use crate::rebuild::{Reconstructor, ReplayStats};
use crate::shard::{resolve, FileShard};
use crate::utils::*;

/// Ordered list of intermediate files, one name per line.
pub const META_FILE_LIST: &str = "meta_file_list";
/// Seed date of the run, as `DD/MM/YYYY`.
pub const DATE_FILE: &str = "file_date";
/// Default name of the final ledger inside the work directory.
pub const LEDGER_FILE: &str = "meta.csv";
pub const META_SUFFIX: &str = "meta";

/// Everything a run needs to know. No field has a default here; the
/// binary supplies them.
#[derive(Clone, Debug)]
pub struct ScanConfig {
    /// Free heap before the first event, in bytes.
    pub start_capacity: i64,
    pub gate_on_init:   bool,
    pub dialect:        Dialect,
    pub threads:        usize,
    pub work_dir:       PathBuf,
    pub ledger_path:    PathBuf,
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("cannot prepare work directory {}: {source}", path.display())]
    WorkDir {
        path:   PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot access {}: {source}", path.display())]
    Manifest {
        path:   PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{}: {source}", path.display())]
    BadDate {
        path:   PathBuf,
        #[source]
        source: crate::date::BadDate,
    },
    #[error("cannot write ledger {}: {source}", path.display())]
    Ledger {
        path:   PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// A shard that could not be processed. Sibling shards are unaffected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{}: {reason}", path.display())]
pub struct ShardFailure {
    pub path:   PathBuf,
    pub reason: String,
}

impl ShardFailure {
    fn new<P: AsRef<Path>, E: ToString>(path: P, reason: E) -> Self {
        Self { path: path.as_ref().to_path_buf(), reason: reason.to_string() }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ShardSummary {
    pub records:    usize,
    pub scan:       ScanStats,
}

#[derive(Debug)]
pub struct ShardOutcome {
    pub shard:      FileShard,
    pub meta_path:  PathBuf,
    pub result:     Result<ShardSummary, ShardFailure>,
}

#[derive(Debug)]
pub struct DecodeReport {
    /// In replay order.
    pub shards:     Vec<ShardOutcome>,
    pub date:       TraceDate,
    pub elapsed:    Duration,
}

impl DecodeReport {
    pub fn failures(&self) -> impl Iterator<Item = &ShardFailure> {
        self.shards.iter().filter_map(|o| o.result.as_ref().err())
    }

    pub fn decoded(&self) -> usize {
        self.shards.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn records(&self) -> usize {
        self.shards
            .iter()
            .filter_map(|o| o.result.as_ref().ok())
            .map(|s| s.records)
            .sum()
    }
}

#[derive(Debug)]
pub struct LedgerReport {
    pub entries:        usize,
    pub shards:         usize,
    pub failures:       Vec<ShardFailure>,
    /// Intermediate lines that could not be parsed and were skipped.
    pub skipped_lines:  usize,
    pub replay:         ReplayStats,
    pub free_heap:      i64,
    pub final_date:     TraceDate,
    /// Gating was requested but no heap init record was ever seen.
    pub missing_init:   bool,
    pub elapsed:        Duration,
}

#[derive(Debug)]
pub struct RunReport {
    pub decode: DecodeReport,
    pub ledger: LedgerReport,
}

impl RunReport {
    pub fn failures(&self) -> impl Iterator<Item = &ShardFailure> {
        self.decode.failures().chain(self.ledger.failures.iter())
    }
}

type Outcome = (usize, Result<ShardSummary, ShardFailure>);

// One shard's worth of decoding. Reports back through the channel since
// the pool has no way to.
struct DecodeJob {
    position:   usize,
    capture:    PathBuf,
    meta_path:  PathBuf,
    dialect:    Dialect,
    report:     Sender<Outcome>,
}

impl Task for DecodeJob {
    fn run(self) {
        let res = decode_shard(&self.capture, &self.meta_path, self.dialect);
        if let Ok(s) = &res {
            tracing::debug!(
                capture = %self.capture.display(),
                records = s.records,
                resyncs = s.scan.resyncs,
                "shard decoded"
            );
        }
        // The receiver outlives the pool.
        let _ = self.report.send((self.position, res));
    }
}

/// Decodes one capture into one intermediate file.
pub fn decode_shard(capture: &Path, meta_path: &Path, dialect: Dialect) -> Result<ShardSummary, ShardFailure> {
    let mut stream = RecordStream::open(capture, dialect)
        .map_err(|e| ShardFailure::new(capture, e))?;
    let out = File::create(meta_path)
        .map_err(|e| ShardFailure::new(capture, format!("cannot create {}: {e}", meta_path.display())))?;
    let mut w = MetaWriter::new(out);

    for r in &mut stream {
        let r = r.map_err(|e| ShardFailure::new(capture, e))?;
        w.write_record(&r)
            .map_err(|e| ShardFailure::new(capture, format!("cannot write {}: {e}", meta_path.display())))?;
    }
    let records = w.lines();
    w.finish()
        .map_err(|e| ShardFailure::new(capture, format!("cannot write {}: {e}", meta_path.display())))?;

    Ok(ShardSummary { records, scan: stream.stats() })
}

fn meta_file_name(shard: &FileShard, position: usize) -> String {
    format!("{}.{}.{}", shard.file_name(), position, META_SUFFIX)
}

/// Phase 1. Per-shard failures end up in the report and leave the shard
/// out of the manifest; only trouble with the work directory itself or
/// with starting the pool is an error.
pub fn decode_phase<I, P>(cfg: &ScanConfig, paths: I) -> Result<DecodeReport, PipelineError>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    let start = Instant::now();
    let dir_err = |source: io::Error| PipelineError::WorkDir { path: cfg.work_dir.clone(), source };
    fs::create_dir_all(&cfg.work_dir).map_err(dir_err)?;

    let shards = resolve(paths);
    let date = TraceDate::seed(shards.first().map(|s| &s.raw_path));
    tracing::info!(shards = shards.len(), threads = cfg.threads, start_date = %date, "decoding captures");

    let meta_paths = shards
        .iter()
        .enumerate()
        .map(|(pos, s)| cfg.work_dir.join(meta_file_name(s, pos)))
        .collect_vec();
    let mut results: Vec<Option<Result<ShardSummary, ShardFailure>>> = vec![None; shards.len()];

    if !shards.is_empty() {
        let (tx, rx) = mpsc::channel();
        let pool = WorkPool::new(cfg.threads.min(shards.len()))?;
        for (position, (shard, meta_path)) in shards.iter().zip(&meta_paths).enumerate() {
            let job = DecodeJob {
                position,
                capture: shard.raw_path.clone(),
                meta_path: meta_path.clone(),
                dialect: cfg.dialect,
                report: tx.clone(),
            };
            if !pool.dispatch(job) {
                results[position] = Some(Err(ShardFailure::new(&shard.raw_path, "not accepted by the worker pool")));
            }
        }
        drop(tx);
        pool.destroy();

        for (position, res) in rx {
            results[position] = Some(res);
        }
    }

    let shards = shards
        .into_iter()
        .zip(meta_paths)
        .zip(results)
        .map(|((shard, meta_path), res)| {
            let result = res.unwrap_or_else(|| Err(ShardFailure::new(&shard.raw_path, "decoder panicked")));
            ShardOutcome { shard, meta_path, result }
        })
        .collect_vec();

    let manifest = cfg.work_dir.join(META_FILE_LIST);
    let listed = shards
        .iter()
        .filter(|o| o.result.is_ok())
        .filter_map(|o| o.meta_path.file_name())
        .map(|n| format!("{}\n", n.to_string_lossy()))
        .join("");
    fs::write(&manifest, listed)
        .map_err(|source| PipelineError::Manifest { path: manifest.clone(), source })?;
    let date_path = cfg.work_dir.join(DATE_FILE);
    fs::write(&date_path, format!("{date}\n"))
        .map_err(|source| PipelineError::Manifest { path: date_path.clone(), source })?;

    let report = DecodeReport { shards, date, elapsed: start.elapsed() };
    for f in report.failures() {
        tracing::warn!("skipping shard: {f}");
    }
    tracing::info!(
        decoded = report.decoded(),
        failed = report.failures().count(),
        records = report.records(),
        "decode finished in {:.3}s",
        report.elapsed.as_secs_f64()
    );

    Ok(report)
}

/// Reads the manifest written by [`decode_phase`].
pub fn read_manifest(work_dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    let path = work_dir.join(META_FILE_LIST);
    let text = fs::read_to_string(&path)
        .map_err(|source| PipelineError::Manifest { path: path.clone(), source })?;

    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| work_dir.join(l))
        .collect())
}

/// Reads the seed date written by [`decode_phase`]. A missing file means
/// the fallback date.
pub fn read_start_date(work_dir: &Path) -> Result<TraceDate, PipelineError> {
    let path = work_dir.join(DATE_FILE);
    match fs::read_to_string(&path) {
        Ok(text)    => {
            text.parse().map_err(|source| PipelineError::BadDate { path, source })
        },
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::warn!("{} not found; starting at {}", path.display(), crate::date::FALLBACK_DATE);
            Ok(crate::date::FALLBACK_DATE)
        },
        Err(source) => Err(PipelineError::Manifest { path, source }),
    }
}

/// Phase 2. Replays every listed intermediate file, in order, into the
/// ledger file.
pub fn ledger_phase(cfg: &ScanConfig) -> Result<LedgerReport, PipelineError> {
    let start = Instant::now();
    let metas = read_manifest(&cfg.work_dir)?;
    let date = read_start_date(&cfg.work_dir)?;
    tracing::info!(
        shards = metas.len(),
        start_capacity = cfg.start_capacity,
        gate_on_init = cfg.gate_on_init,
        start_date = %date,
        "building ledger"
    );

    let ledger_err = |source: io::Error| PipelineError::Ledger { path: cfg.ledger_path.clone(), source };
    let mut out = BufWriter::new(File::create(&cfg.ledger_path).map_err(ledger_err)?);
    let mut rec = Reconstructor::new(cfg.start_capacity, cfg.gate_on_init, date);
    let mut failures = vec![];
    let mut skipped_lines = 0;

    for meta in &metas {
        let fd = match File::open(meta) {
            Ok(fd)  => fd,
            Err(e)  => {
                let f = ShardFailure::new(meta, e);
                tracing::warn!("skipping shard: {f}");
                failures.push(f);
                continue;
            }
        };
        for item in MetaReader::new(BufReader::new(fd)) {
            match item {
                Ok(r)                               => {
                    if let Some(entry) = rec.apply(&r) {
                        writeln!(out, "{entry}").map_err(ledger_err)?;
                    }
                },
                Err(e @ MetaError::Malformed { .. })    => {
                    tracing::warn!(meta = %meta.display(), "{e}");
                    skipped_lines += 1;
                },
                Err(MetaError::Io(e))               => {
                    let f = ShardFailure::new(meta, e);
                    tracing::warn!("abandoning shard: {f}");
                    failures.push(f);
                    break;
                }
            }
        }
    }
    out.flush().map_err(ledger_err)?;

    let replay = rec.stats();
    let missing_init = cfg.gate_on_init && !replay.saw_init;
    if missing_init {
        tracing::warn!("no heap_init record found; the ledger is empty");
    }
    if replay.unmatched_frees > 0 {
        tracing::warn!(count = replay.unmatched_frees, "frees of blocks allocated before the capture started");
    }

    let report = LedgerReport {
        entries: replay.emitted,
        shards: metas.len(),
        failures,
        skipped_lines,
        replay,
        free_heap: rec.free_heap(),
        final_date: rec.date(),
        missing_init,
        elapsed: start.elapsed(),
    };
    tracing::info!(
        entries = report.entries,
        free_heap = report.free_heap,
        live_blocks = rec.ledger().len(),
        "ledger written to {} in {:.3}s",
        cfg.ledger_path.display(),
        report.elapsed.as_secs_f64()
    );

    Ok(report)
}

/// Both phases back to back.
pub fn run<I, P>(cfg: &ScanConfig, paths: I) -> Result<RunReport, PipelineError>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    let decode = decode_phase(cfg, paths)?;
    let ledger = ledger_phase(cfg)?;

    Ok(RunReport { decode, ledger })
}
