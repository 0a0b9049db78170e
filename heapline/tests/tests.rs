use blxdec::synth::signature_record;
use blxdec::{AllocKind, Dialect, RecordKind, TimeOfDay, TraceRecord};
use heapline::pipeline::{DATE_FILE, META_FILE_LIST};
use heapline::*;
use proptest::prelude::*;
use rand::seq::SliceRandom;
use std::fs;
use std::path::{Path, PathBuf};

fn at(h: u8, m: u8, s: u8) -> TimeOfDay {
    TimeOfDay::new(h, m, s, 0).unwrap()
}

fn alloc(time: TimeOfDay, address: u32, size: u32) -> TraceRecord {
    TraceRecord {
        time,
        kind: RecordKind::Allocate { address, size, subtype: AllocKind::Plain, caller1: 1, caller2: 2 },
    }
}

fn free(time: TimeOfDay, address: u32) -> TraceRecord {
    TraceRecord { time, kind: RecordKind::Deallocate { address, caller1: 3, caller2: 4 } }
}

fn init(time: TimeOfDay) -> TraceRecord {
    TraceRecord { time, kind: RecordKind::Init }
}

fn date(d: u8, m: u8, y: u16) -> TraceDate {
    TraceDate::new(d, m, y).unwrap()
}

fn names(shards: &[FileShard]) -> Vec<String> {
    shards.iter().map(|s| s.file_name()).collect()
}

//-----RESOLVER---------------------

#[test]
fn rotated_dump_resolves_unnumbered_first() {
    let got = resolve(["dump_1.blx", "dump.blx", "dump_0.blx"]);
    assert_eq!(names(&got), ["dump.blx", "dump_0.blx", "dump_1.blx"]);
    assert!(got.iter().all(|s| s.pattern == "dump"));
    assert_eq!(got.iter().map(|s| s.index).collect::<Vec<_>>(), [0, 0, 1]);
}

#[test]
fn pattern_and_index_extraction() {
    let s = FileShard::new("logs/cap_12.blx");
    assert_eq!((s.pattern.as_str(), s.index, s.numbered), ("logs/cap", 12, true));
    let s = FileShard::new("my_dump.blx");
    assert_eq!((s.pattern.as_str(), s.index, s.numbered), ("my_dump", 0, false));
    let s = FileShard::new("x_007.blx");
    assert_eq!((s.pattern.as_str(), s.index), ("x", 7));
    let s = FileShard::new("noext_3");
    assert_eq!((s.pattern.as_str(), s.index), ("noext", 3));
    let s = FileShard::new("plain");
    assert_eq!((s.pattern.as_str(), s.index, s.numbered), ("plain", 0, false));
}

#[test]
fn numeric_order_not_lexicographic() {
    let got = resolve(["t_10.blx", "t_9.blx", "t_100.blx", "t_2.blx"]);
    assert_eq!(names(&got), ["t_2.blx", "t_9.blx", "t_10.blx", "t_100.blx"]);
}

#[test]
fn groups_are_kept_apart_and_shuffle_invariant() {
    let mut paths = vec![
        "a/dump_2.blx", "a/dump.blx", "a/dump_1.blx",
        "b/dump_0.blx", "b/dump_1.blx",
        "a/other_3.blx", "a/other_1.blx",
        "single.blx",
    ];
    let expected = resolve(&paths);
    // Members of one group stay contiguous.
    let pats: Vec<_> = expected.iter().map(|s| s.pattern.clone()).collect();
    let mut dedup = pats.clone();
    dedup.dedup();
    let mut uniq = dedup.clone();
    uniq.sort();
    uniq.dedup();
    assert_eq!(dedup.len(), uniq.len());

    let mut rng = rand::thread_rng();
    for _ in 0..20 {
        paths.shuffle(&mut rng);
        assert_eq!(resolve(&paths), expected);
    }
}

#[test]
fn duplicate_indices_and_empty_input_do_not_crash() {
    assert!(resolve(Vec::<PathBuf>::new()).is_empty());
    let got = resolve(["d_1.blx", "d_01.blx", "d_1.blx"]);
    assert_eq!(got.len(), 3);
    assert!(got.iter().all(|s| s.index == 1));
}

#[test]
fn tied_indices_order_by_path() {
    let fwd = resolve(["d_01.blx", "d_1.blx", "d_001.blx"]);
    let rev = resolve(["d_001.blx", "d_1.blx", "d_01.blx"]);
    assert_eq!(names(&fwd), ["d_001.blx", "d_01.blx", "d_1.blx"]);
    assert_eq!(fwd, rev);
}

proptest! {
    #[test]
    fn resolving_is_idempotent_and_order_free(
        picks in prop::collection::vec((0usize..3, prop::option::of(0u32..40)), 0..24),
        seed in any::<u64>(),
    ) {
        use rand::SeedableRng;
        let mut paths: Vec<String> = picks
            .iter()
            .map(|(g, idx)| match idx {
                Some(i) => format!("grp{g}_{i}.blx"),
                None    => format!("grp{g}.blx"),
            })
            .collect();
        let once = resolve(&paths);
        let twice = resolve(once.iter().map(|s| s.raw_path.clone()));
        prop_assert_eq!(&once, &twice);

        paths.shuffle(&mut rand::rngs::StdRng::seed_from_u64(seed));
        prop_assert_eq!(&resolve(&paths), &once);

        for w in once.windows(2) {
            if w[0].pattern == w[1].pattern {
                prop_assert!((w[0].index, w[0].numbered) <= (w[1].index, w[1].numbered));
            }
        }
    }
}

//-----DATES---------------------

#[test]
fn dates_roll_without_leap_years() {
    assert_eq!(date(3, 3, 2012).next_day(), date(4, 3, 2012));
    assert_eq!(date(28, 2, 2024).next_day(), date(1, 3, 2024));
    assert_eq!(date(29, 2, 2024).next_day(), date(1, 3, 2024));
    assert_eq!(date(30, 4, 2020).next_day(), date(1, 5, 2020));
    assert_eq!(date(31, 12, 2023).next_day(), date(1, 1, 2024));
    assert!(TraceDate::new(31, 4, 2020).is_none());
    assert!(TraceDate::new(1, 13, 2020).is_none());
}

#[test]
fn dates_render_and_parse() {
    assert_eq!(FALLBACK_DATE.to_string(), "03/03/2012");
    assert_eq!("03/03/2012\n".parse::<TraceDate>().unwrap(), FALLBACK_DATE);
    assert!("3/3".parse::<TraceDate>().is_err());
    assert!("aa/03/2012".parse::<TraceDate>().is_err());
    assert!("00/03/2012".parse::<TraceDate>().is_err());
}

#[test]
fn seed_date_falls_back() {
    assert_eq!(TraceDate::seed(None::<&Path>), FALLBACK_DATE);
    assert_eq!(TraceDate::seed(Some("/definitely/not/here.blx")), FALLBACK_DATE);
    let f = tempfile::NamedTempFile::new().unwrap();
    assert!(TraceDate::from_mtime(f.path()).is_ok());
}

//-----LEDGER & RECONSTRUCTION---------------------

#[test]
fn running_free_heap_scenario() {
    let mut rec = Reconstructor::new(1_000_000, false, FALLBACK_DATE);
    let got: Vec<i64> = [alloc(at(1, 0, 0), 0x10, 100), alloc(at(1, 0, 1), 0x20, 50), free(at(1, 0, 2), 0x10)]
        .iter()
        .filter_map(|r| rec.apply(r))
        .map(|e| e.free_heap)
        .collect();
    assert_eq!(got, [999_900, 999_850, 999_950]);
    assert_eq!(rec.ledger().get(0x20), Some(50));
    assert_eq!(rec.ledger().len(), 1);
}

#[test]
fn free_of_unknown_block_recovers_nothing() {
    let mut rec = Reconstructor::new(500, false, FALLBACK_DATE);
    let e = rec.apply(&free(at(2, 0, 0), 0xdead)).unwrap();
    assert_eq!(e.free_heap, 500);
    assert_eq!(rec.stats().unmatched_frees, 1);
}

#[test]
fn reused_address_keeps_only_latest_size() {
    let mut ledger = AllocationLedger::new();
    assert_eq!(ledger.insert(0x40, 10), None);
    assert_eq!(ledger.insert(0x40, 30), Some(10));
    assert_eq!(ledger.outstanding(), 30);
    assert_eq!(ledger.take(0x40), Some(30));
    assert_eq!(ledger.take(0x40), None);
    assert!(ledger.is_empty());

    let mut rec = Reconstructor::new(100, false, FALLBACK_DATE);
    rec.apply(&alloc(at(0, 0, 0), 0x40, 10));
    rec.apply(&alloc(at(0, 0, 0), 0x40, 30));
    let e = rec.apply(&free(at(0, 0, 0), 0x40)).unwrap();
    assert_eq!(e.free_heap, 90);
    assert_eq!(rec.stats().overwrites, 1);
}

proptest! {
    #[test]
    fn alloc_then_free_nets_to_zero(
        prefix in prop::collection::vec((0u32..64, 0u32..10_000), 0..32),
        addr in 64u32..128,
        size in 0u32..1_000_000,
    ) {
        let mut rec = Reconstructor::new(10_000_000, false, FALLBACK_DATE);
        for (a, s) in prefix {
            rec.apply(&alloc(at(5, 0, 0), a, s));
        }
        let before = rec.free_heap();
        rec.apply(&alloc(at(5, 0, 1), addr, size));
        prop_assert_eq!(rec.free_heap(), before - size as i64);
        let e = rec.apply(&free(at(5, 0, 2), addr)).unwrap();
        prop_assert_eq!(e.free_heap, before);
    }
}

#[test]
fn hour_23_then_0_rolls_the_date() {
    let mut rec = Reconstructor::new(0, false, date(31, 12, 2023));
    let a = rec.apply(&alloc(at(23, 59, 59), 1, 1)).unwrap();
    assert_eq!(a.date, date(31, 12, 2023));
    assert_eq!(rec.tracked_hour(), Some(23));
    let b = rec.apply(&free(at(0, 0, 1), 1)).unwrap();
    assert_eq!(b.date, date(1, 1, 2024));
    assert_eq!(rec.tracked_hour(), Some(0));
    assert_eq!(rec.stats().date_rollovers, 1);
}

#[test]
fn tracked_hour_moves_one_step_per_change() {
    let mut rec = Reconstructor::new(0, false, FALLBACK_DATE);
    rec.apply(&init(at(10, 0, 0)));
    assert_eq!(rec.tracked_hour(), Some(10));
    // A three-hour jump still advances the tracker by one.
    rec.apply(&alloc(at(13, 0, 0), 1, 1));
    assert_eq!(rec.tracked_hour(), Some(11));
    rec.apply(&alloc(at(13, 0, 1), 2, 1));
    assert_eq!(rec.tracked_hour(), Some(12));
    rec.apply(&alloc(at(12, 0, 1), 3, 1));
    assert_eq!(rec.tracked_hour(), Some(12));
    assert_eq!(rec.date(), FALLBACK_DATE);
}

#[test]
fn gate_suppresses_entries_before_init() {
    let mut rec = Reconstructor::new(1000, true, FALLBACK_DATE);
    assert!(rec.apply(&alloc(at(1, 0, 0), 0x10, 100)).is_none());
    assert!(rec.apply(&init(at(1, 0, 1))).is_none());
    // The suppressed allocation still counted.
    let e = rec.apply(&free(at(1, 0, 2), 0x10)).unwrap();
    assert_eq!(e.free_heap, 1000);
    let stats = rec.stats();
    assert!(stats.saw_init);
    assert_eq!((stats.suppressed, stats.emitted, stats.events), (1, 1, 3));
}

#[test]
fn timeline_entry_layout() {
    let e = TimelineEntry {
        date: FALLBACK_DATE,
        time: TimeOfDay::new(1, 2, 3, 4).unwrap(),
        free_heap: 100,
    };
    assert_eq!(e.to_string(), "03/03/2012 01:02:03.000000004, 00000100");
    let e = TimelineEntry { free_heap: -42, ..e };
    assert_eq!(e.to_string(), "03/03/2012 01:02:03.000000004, -0000042");
}

//-----PIPELINE---------------------

fn write_capture(path: &Path, records: &[TraceRecord]) {
    let mut bytes = vec![0x11, 0x22, 0x94];
    for r in records {
        bytes.extend(signature_record(r));
        bytes.extend([0x00, 0x94, 0x00]);
    }
    fs::write(path, bytes).unwrap();
}

fn config(root: &Path, start_capacity: i64, gate_on_init: bool) -> ScanConfig {
    let work_dir = root.join("meta_tmp");
    ScanConfig {
        start_capacity,
        gate_on_init,
        dialect: Dialect::Signature,
        threads: 3,
        ledger_path: work_dir.join("meta.csv"),
        work_dir,
    }
}

fn ledger_values(path: &Path) -> Vec<i64> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|l| l.rsplit(", ").next().unwrap().parse().unwrap())
        .collect()
}

#[test]
fn two_phase_run_over_rotated_captures() {
    let dir = tempfile::tempdir().unwrap();
    let caps = dir.path().join("caps");
    fs::create_dir_all(caps.join("nested")).unwrap();
    write_capture(&caps.join("dump.blx"), &[
        alloc(at(0, 59, 59), 0x30, 10),
        init(at(1, 0, 0)),
        alloc(at(1, 0, 1), 0x10, 100),
    ]);
    write_capture(&caps.join("nested").join("dump_0.blx"), &[]);
    write_capture(&caps.join("dump_0.blx"), &[
        alloc(at(1, 0, 2), 0x20, 50),
        free(at(1, 0, 3), 0x10),
    ]);
    fs::write(caps.join("notes.txt"), "not a capture").unwrap();

    let mut found = discover(&caps).unwrap();
    assert_eq!(found.len(), 3);
    found.retain(|p| !p.starts_with(caps.join("nested")));
    found.reverse();
    found.push(caps.join("ghost_1.blx"));

    let cfg = config(dir.path(), 1000, true);
    let report = run(&cfg, &found).unwrap();

    assert_eq!(report.decode.shards.len(), 3);
    assert_eq!(report.decode.decoded(), 2);
    assert_eq!(report.decode.records(), 5);
    let failed: Vec<_> = report.failures().collect();
    assert_eq!(failed.len(), 1);
    assert!(failed[0].path.ends_with("ghost_1.blx"));

    let manifest = fs::read_to_string(cfg.work_dir.join(META_FILE_LIST)).unwrap();
    assert_eq!(manifest, "dump.blx.0.meta\ndump_0.blx.1.meta\n");
    let seeded = fs::read_to_string(cfg.work_dir.join(DATE_FILE)).unwrap();
    assert_eq!(seeded.trim(), report.decode.date.to_string());

    assert_eq!(ledger_values(&cfg.ledger_path), [890, 840, 940]);
    assert_eq!(report.ledger.replay.suppressed, 1);
    assert!(!report.ledger.missing_init);
    let first = fs::read_to_string(&cfg.ledger_path).unwrap();
    assert!(first.starts_with(&format!("{} 01:00:01.000000000, ", report.decode.date)));

    // Replay again with other parameters, without decoding.
    let cfg = config(dir.path(), 2000, false);
    let again = ledger_phase(&cfg).unwrap();
    assert_eq!(again.entries, 4);
    assert_eq!(ledger_values(&cfg.ledger_path), [1990, 1890, 1840, 1940]);
}

#[test]
fn missing_init_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let cap = dir.path().join("solo.blx");
    write_capture(&cap, &[alloc(at(3, 0, 0), 0x10, 1), free(at(3, 0, 1), 0x10)]);

    let cfg = config(dir.path(), 10, true);
    let report = run(&cfg, [&cap]).unwrap();
    assert!(report.ledger.missing_init);
    assert_eq!(report.ledger.entries, 0);
    assert!(fs::read_to_string(&cfg.ledger_path).unwrap().is_empty());
}

#[test]
fn ledger_phase_needs_a_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path(), 10, false);
    fs::create_dir_all(&cfg.work_dir).unwrap();
    assert!(matches!(ledger_phase(&cfg), Err(PipelineError::Manifest { .. })));
}

#[test]
fn vanished_meta_file_is_a_shard_failure() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.blx");
    let b = dir.path().join("b.blx");
    write_capture(&a, &[alloc(at(4, 0, 0), 0x1, 5)]);
    write_capture(&b, &[alloc(at(4, 0, 1), 0x2, 7)]);

    let cfg = config(dir.path(), 100, false);
    let decoded = decode_phase(&cfg, [&a, &b]).unwrap();
    fs::remove_file(&decoded.shards[0].meta_path).unwrap();

    let report = ledger_phase(&cfg).unwrap();
    assert_eq!(report.failures.len(), 1);
    assert_eq!(ledger_values(&cfg.ledger_path), [93]);
}
