use anyhow::{bail, Context, Result};
use clap::builder::TypedValueParser;
use clap::{Parser, Subcommand, ValueEnum};
use heapline::pipeline::LEDGER_FILE;
use heapline::utils::*;
use heapline::*;
use tracing_subscriber::EnvFilter;

/// 6.9 MiB, the heap size of the usual target.
const DEFAULT_HEAP: i64 = 7_235_174;
const DEFAULT_THREADS: usize = 7;

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum CaptureKind {
    /// Scan for heap records anywhere in the stream.
    Signature,
    /// Walk length-prefixed trace-box frames.
    Framed,
}

/// Rebuilds a dated free-heap timeline from BLX heap captures.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command:    Command,

    /// Free heap before the first event, in bytes
    #[arg(long, global = true, default_value_t = DEFAULT_HEAP)]
    heap:       i64,

    /// Do not wait for a heap init record before writing the ledger
    #[arg(long, global = true)]
    no_gate:    bool,

    /// Capture layout
    #[arg(long, global = true, value_enum, default_value_t = CaptureKind::Framed)]
    dialect:    CaptureKind,

    /// Bytes to skip before the first frame (framed captures only)
    #[arg(long, global = true, value_parser = parse_offset, default_value = "0xbb4")]
    skip:       u64,

    /// Decoding threads
    #[arg(
        short, long, global = true,
        default_value_t = DEFAULT_THREADS,
        value_parser = clap::value_parser!(u16).range(1..=workpool::MAX_THREADS_NUM as i64).map(usize::from),
    )]
    threads:    usize,

    /// Where intermediate files go
    #[arg(long, global = true, value_parser = clap::value_parser!(PathBuf), default_value = "./meta_tmp")]
    work_dir:   PathBuf,

    /// Ledger path [default: <WORK_DIR>/meta.csv]
    #[arg(short, long, global = true, value_parser = clap::value_parser!(PathBuf))]
    output:     Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decode captures into the work directory
    Decode {
        /// Capture files or directories to search [default: .]
        inputs: Vec<PathBuf>,
    },
    /// Replay a decoded work directory into the ledger
    Ledger,
    /// Decode, then replay
    Run {
        /// Capture files or directories to search [default: .]
        inputs: Vec<PathBuf>,
    },
}

fn parse_offset(s: &str) -> Result<u64, String> {
    let res = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex)   => u64::from_str_radix(hex, 16),
        None        => s.parse(),
    };

    res.map_err(|e| format!("{s:?}: {e}"))
}

fn gather(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let roots = if inputs.is_empty() { vec![PathBuf::from(".")] } else { inputs.to_vec() };
    let mut res = vec![];
    for root in &roots {
        res.extend(discover(root).with_context(|| format!("cannot search {}", root.display()))?);
    }

    Ok(res)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Args::parse();
    let cfg = ScanConfig {
        start_capacity: cli.heap,
        gate_on_init:   !cli.no_gate,
        dialect:        match cli.dialect {
            CaptureKind::Signature  => { Dialect::Signature },
            CaptureKind::Framed     => { Dialect::Framed { start_offset: cli.skip } }
        },
        threads:        cli.threads,
        ledger_path:    cli.output.clone().unwrap_or_else(|| cli.work_dir.join(LEDGER_FILE)),
        work_dir:       cli.work_dir,
    };

    let failures = match cli.command {
        Command::Decode { inputs }  => {
            let paths = gather(&inputs)?;
            if paths.is_empty() { bail!("no .blx captures found"); }
            let report = decode_phase(&cfg, paths).context("decode phase failed")?;
            report.failures().count()
        },
        Command::Ledger             => {
            let report = ledger_phase(&cfg).context("ledger phase failed")?;
            report.failures.len()
        },
        Command::Run { inputs }     => {
            let paths = gather(&inputs)?;
            if paths.is_empty() { bail!("no .blx captures found"); }
            let report = run(&cfg, paths).context("run failed")?;
            println!(
                "{} shards, {} records, {} ledger entries, final free heap {} bytes",
                report.decode.shards.len(),
                report.decode.records(),
                report.ledger.entries,
                report.ledger.free_heap,
            );
            report.failures().count()
        }
    };

    if failures > 0 {
        bail!("{failures} shard(s) could not be processed");
    }

    Ok(())
}
