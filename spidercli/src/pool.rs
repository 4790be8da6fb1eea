//! Seed-pool building: parallel scans over seed ranges, difficulty
//! quantiles, and atomically checkpointed JSON/CSV outputs.

use std::collections::BTreeMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use serde::Serialize;
use serde_json::json;

use spiderbot::analysis::{analyze_seed, DifficultyBand};
use spiderbot::solver::{SearchLimits, SolveStatus};

/// One scanned seed, as persisted in the rows CSV.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeedRow {
    pub seed: u64,
    pub status: SolveStatus,
    pub score: Option<f64>,
    pub band: Option<DifficultyBand>,
    pub reason: Option<String>,
    pub elapsed_ms: f64,
    pub expanded_nodes: usize,
    pub unique_states: usize,
}

#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub suits: u8,
    pub start_seed: u64,
    pub count: u64,
    pub workers: usize,
    pub limits: SearchLimits,
    pub single_stage: bool,
    pub max_per_bucket: usize,
    pub progress_every: usize,
    pub save_interval_sec: u64,
    pub out: PathBuf,
    pub raw_jsonl: Option<PathBuf>,
    pub overwrite: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quantiles {
    pub q33: f64,
    pub q66: f64,
}

#[derive(Debug, Default)]
pub struct BucketSet {
    pub easy: Vec<SeedRow>,
    pub medium: Vec<SeedRow>,
    pub hard: Vec<SeedRow>,
}

/// Quantile with linear interpolation over an ascending-sorted slice.
#[must_use]
pub fn quantile(values: &[f64], q: f64) -> f64 {
    debug_assert!(!values.is_empty());
    let Some((&first, &last)) = values.first().zip(values.last()) else {
        return 0.0;
    };
    if q <= 0.0 {
        return first;
    }
    if q >= 1.0 {
        return last;
    }

    let pos = (values.len() - 1) as f64 * q;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    if lo == hi {
        values[lo]
    } else {
        let alpha = pos - lo as f64;
        values[lo] * (1.0 - alpha) + values[hi] * alpha
    }
}

/// Partition solved rows into Easy/Medium/Hard by score tertiles.
/// Assignment iterates in ascending (score, seed) order; a non-zero
/// `max_per_bucket` truncates each bucket from that dense end.
#[must_use]
pub fn bucket_solved_rows(rows: &[SeedRow], max_per_bucket: usize) -> (BucketSet, Quantiles) {
    let mut solved: Vec<&SeedRow> = rows
        .iter()
        .filter(|r| r.status == SolveStatus::Solved && r.score.is_some())
        .collect();
    if solved.is_empty() {
        return (BucketSet::default(), Quantiles { q33: 0.0, q66: 0.0 });
    }

    let mut scores: Vec<f64> = solved.iter().filter_map(|r| r.score).collect();
    scores.sort_by(f64::total_cmp);
    let q33 = quantile(&scores, 1.0 / 3.0);
    let q66 = quantile(&scores, 2.0 / 3.0);

    solved.sort_by(|a, b| {
        a.score
            .unwrap_or(0.0)
            .total_cmp(&b.score.unwrap_or(0.0))
            .then(a.seed.cmp(&b.seed))
    });

    let mut buckets = BucketSet::default();
    for row in solved {
        let score = row.score.unwrap_or(0.0);
        let bucket = if score <= q33 {
            &mut buckets.easy
        } else if score <= q66 {
            &mut buckets.medium
        } else {
            &mut buckets.hard
        };
        if max_per_bucket > 0 && bucket.len() >= max_per_bucket {
            continue;
        }
        bucket.push(row.clone());
    }

    (buckets, Quantiles { q33, q66 })
}

/// Upsert `incoming` over `existing` by seed (incoming wins), sorted by seed.
#[must_use]
pub fn merge_rows(existing: Vec<SeedRow>, incoming: Vec<SeedRow>) -> Vec<SeedRow> {
    let mut by_seed: BTreeMap<u64, SeedRow> = BTreeMap::new();
    for row in existing.into_iter().chain(incoming) {
        by_seed.insert(row.seed, row);
    }
    by_seed.into_values().collect()
}

pub const ROWS_CSV_HEADER: &str =
    "seed,status,score,bucket,reason,elapsed_ms,expanded_nodes,unique_states";

#[must_use]
pub fn rows_to_csv(rows: &[SeedRow]) -> String {
    let mut out = String::with_capacity(rows.len() * 48 + ROWS_CSV_HEADER.len() + 1);
    out.push_str(ROWS_CSV_HEADER);
    out.push('\n');
    for row in rows {
        let score = row.score.map(|s| s.to_string()).unwrap_or_default();
        let band = row.band.map(|b| b.as_str().to_string()).unwrap_or_default();
        let reason = row.reason.clone().unwrap_or_default();
        out.push_str(&format!(
            "{},{},{},{},{},{},{},{}\n",
            row.seed,
            row.status,
            score,
            band,
            reason,
            row.elapsed_ms,
            row.expanded_nodes,
            row.unique_states,
        ));
    }
    out
}

/// Parse rows previously written by `rows_to_csv`; malformed lines are
/// skipped so a damaged checkpoint degrades instead of aborting a merge.
#[must_use]
pub fn parse_rows_csv(text: &str) -> Vec<SeedRow> {
    let mut rows = Vec::new();
    for line in text.lines().skip(1) {
        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() != 8 {
            continue;
        }
        let (Ok(seed), Ok(status)) = (fields[0].parse(), fields[1].parse::<SolveStatus>()) else {
            continue;
        };
        let (Ok(elapsed_ms), Ok(expanded_nodes), Ok(unique_states)) =
            (fields[5].parse(), fields[6].parse(), fields[7].parse())
        else {
            continue;
        };
        rows.push(SeedRow {
            seed,
            status,
            score: fields[2].parse().ok(),
            band: fields[3].parse().ok(),
            reason: (!fields[4].is_empty()).then(|| fields[4].to_string()),
            elapsed_ms,
            expanded_nodes,
            unique_states,
        });
    }
    rows
}

#[must_use]
pub fn rows_csv_path(out: &Path) -> PathBuf {
    out.with_extension("rows.csv")
}

/// Write through a temp file and rename so readers only ever observe a
/// complete file.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, contents).with_context(|| format!("write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("rename into {}", path.display()))?;
    Ok(())
}

fn round_to(value: f64, digits: i32) -> f64 {
    let scale = 10f64.powi(digits);
    (value * scale).round() / scale
}

/// Reduce one analyzer run to its persisted row.
#[must_use]
pub fn analyze_row(seed: u64, suits: u8, limits: &SearchLimits, single_stage: bool) -> SeedRow {
    match analyze_seed(seed, suits, limits, !single_stage) {
        Ok(result) => SeedRow {
            seed,
            status: result.status,
            score: result.difficulty_score,
            band: result.difficulty_band,
            reason: result.metrics.reason.map(|r| r.as_str().to_string()),
            elapsed_ms: result.metrics.elapsed_ms,
            expanded_nodes: result.metrics.expanded_nodes,
            unique_states: result.metrics.unique_states,
        },
        Err(err) => {
            log::error!("seed {seed}: {err}");
            SeedRow {
                seed,
                status: SolveStatus::Unknown,
                score: None,
                band: None,
                reason: Some("invalid_config".to_string()),
                elapsed_ms: 0.0,
                expanded_nodes: 0,
                unique_states: 0,
            }
        }
    }
}

/// Assemble the JSON summary payload. Bucket values are seed integers; the
/// full rows live in the CSV referenced under `files`.
#[must_use]
pub fn build_payload(
    cfg: &BuildConfig,
    rows: &[SeedRow],
    existing_rows_loaded: usize,
    incoming_rows: usize,
    in_progress: bool,
    build_elapsed_ms: f64,
    rows_csv: &Path,
) -> serde_json::Value {
    let (buckets, quantiles) = bucket_solved_rows(rows, cfg.max_per_bucket);
    let solved = rows.iter().filter(|r| r.status == SolveStatus::Solved).count();
    let unknown_rows: Vec<u64> = rows
        .iter()
        .filter(|r| r.status == SolveStatus::Unknown)
        .map(|r| r.seed)
        .collect();
    let proven_unsolvable = rows
        .iter()
        .filter(|r| r.status == SolveStatus::ProvenUnsolvable)
        .count();

    let seeds = |rows: &[SeedRow]| rows.iter().map(|r| r.seed).collect::<Vec<_>>();

    json!({
        "generated_at": chrono::Utc::now().to_rfc3339(),
        "in_progress": in_progress,
        "suits": cfg.suits,
        "search": {
            "max_seconds": cfg.limits.max_seconds,
            "max_nodes": cfg.limits.max_nodes,
            "max_frontier": cfg.limits.max_frontier,
            "single_stage": cfg.single_stage,
            "workers": cfg.workers,
        },
        "source": {
            "start_seed": cfg.start_seed,
            "count": cfg.count,
            "merge_mode": if cfg.overwrite { "overwrite" } else { "merge" },
            "existing_rows_loaded": existing_rows_loaded,
            "incoming_rows": incoming_rows,
        },
        "stats": {
            "scanned": rows.len(),
            "solved": solved,
            "unknown": unknown_rows.len(),
            "proven_unsolvable": proven_unsolvable,
        },
        "quantiles": {
            "q33": round_to(quantiles.q33, 6),
            "q66": round_to(quantiles.q66, 6),
        },
        "buckets": {
            "Easy": seeds(&buckets.easy),
            "Medium": seeds(&buckets.medium),
            "Hard": seeds(&buckets.hard),
            "unknown": unknown_rows,
        },
        "files": {
            "rows_csv": rows_csv.display().to_string(),
        },
        "build_elapsed_ms": round_to(build_elapsed_ms, 3),
    })
}

fn persist(
    cfg: &BuildConfig,
    merged: &[SeedRow],
    existing_rows_loaded: usize,
    incoming_rows: usize,
    in_progress: bool,
    started: Instant,
    rows_csv: &Path,
) -> Result<()> {
    write_atomic(rows_csv, &rows_to_csv(merged))?;
    let payload = build_payload(
        cfg,
        merged,
        existing_rows_loaded,
        incoming_rows,
        in_progress,
        started.elapsed().as_secs_f64() * 1000.0,
        rows_csv,
    );
    write_atomic(&cfg.out, &serde_json::to_string_pretty(&payload)?)?;
    Ok(())
}

fn log_progress(done: usize, total: usize, every: usize, started: Instant) {
    if every > 0 && done % every == 0 {
        log::info!(
            "progress {done}/{total} elapsed_ms={:.1}",
            started.elapsed().as_secs_f64() * 1000.0
        );
    }
}

fn scan_serial(
    cfg: &BuildConfig,
    seeds: &[u64],
    interrupted: &AtomicBool,
    mut on_checkpoint: impl FnMut(&[SeedRow]),
    started: Instant,
) -> Vec<SeedRow> {
    let mut rows = Vec::with_capacity(seeds.len());
    let save_interval = Duration::from_secs(cfg.save_interval_sec);
    let mut last_save = Instant::now();

    for &seed in seeds {
        if interrupted.load(Ordering::Relaxed) {
            log::warn!("interrupted, stopping after {} seeds", rows.len());
            break;
        }
        rows.push(analyze_row(seed, cfg.suits, &cfg.limits, cfg.single_stage));
        log_progress(rows.len(), seeds.len(), cfg.progress_every, started);
        if cfg.save_interval_sec > 0 && last_save.elapsed() >= save_interval {
            on_checkpoint(&rows);
            last_save = Instant::now();
        }
    }
    rows
}

fn scan_parallel(
    cfg: &BuildConfig,
    seeds: &[u64],
    pool: &rayon::ThreadPool,
    interrupted: &Arc<AtomicBool>,
    mut on_checkpoint: impl FnMut(&[SeedRow]),
    started: Instant,
) -> Vec<SeedRow> {
    let (tx, rx) = mpsc::channel::<SeedRow>();
    let job_seeds: Vec<u64> = seeds.to_vec();
    let suits = cfg.suits;
    let limits = cfg.limits;
    let single_stage = cfg.single_stage;
    let stop = Arc::clone(interrupted);

    pool.spawn(move || {
        job_seeds.into_par_iter().for_each_with(tx, |tx, seed| {
            if stop.load(Ordering::Relaxed) {
                return;
            }
            let _ = tx.send(analyze_row(seed, suits, &limits, single_stage));
        });
    });

    let mut rows = Vec::with_capacity(seeds.len());
    let save_interval = Duration::from_secs(cfg.save_interval_sec);
    let mut last_save = Instant::now();
    let mut warned = false;

    loop {
        match rx.recv_timeout(Duration::from_millis(250)) {
            Ok(row) => {
                rows.push(row);
                log_progress(rows.len(), seeds.len(), cfg.progress_every, started);
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
        if interrupted.load(Ordering::Relaxed) && !warned {
            warned = true;
            log::warn!("interrupted, draining in-flight seeds before checkpointing");
        }
        if cfg.save_interval_sec > 0
            && !interrupted.load(Ordering::Relaxed)
            && last_save.elapsed() >= save_interval
        {
            on_checkpoint(&rows);
            last_save = Instant::now();
        }
    }
    rows
}

/// Run the full pipeline: scan, merge with prior rows, bucket, and persist.
pub fn run_build(cfg: &BuildConfig) -> Result<()> {
    let rows_csv = rows_csv_path(&cfg.out);
    let existing = if !cfg.overwrite && rows_csv.exists() {
        match fs::read_to_string(&rows_csv) {
            Ok(text) => parse_rows_csv(&text),
            Err(err) => {
                log::warn!("could not load prior rows from {}: {err}", rows_csv.display());
                Vec::new()
            }
        }
    } else {
        Vec::new()
    };
    let existing_loaded = existing.len();
    if existing_loaded > 0 {
        log::info!("loaded {existing_loaded} prior rows from {}", rows_csv.display());
    }

    let interrupted = Arc::new(AtomicBool::new(false));
    if let Err(err) = signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&interrupted)) {
        log::warn!("could not register SIGINT handler: {err}");
    }

    let seeds: Vec<u64> = (cfg.start_seed..cfg.start_seed + cfg.count).collect();
    let started = Instant::now();

    let checkpoint = |rows: &[SeedRow]| {
        let mut sorted = rows.to_vec();
        sorted.sort_by_key(|r| r.seed);
        let merged = merge_rows(existing.clone(), sorted);
        if let Err(err) = persist(cfg, &merged, existing_loaded, rows.len(), true, started, &rows_csv) {
            log::warn!("checkpoint write failed, retrying at next interval: {err:#}");
        }
    };

    let mut rows = if cfg.workers <= 1 {
        scan_serial(cfg, &seeds, &interrupted, checkpoint, started)
    } else {
        match rayon::ThreadPoolBuilder::new().num_threads(cfg.workers).build() {
            Ok(pool) => scan_parallel(cfg, &seeds, &pool, &interrupted, checkpoint, started),
            Err(err) => {
                log::warn!("worker pool unavailable ({err}); falling back to serial scan");
                scan_serial(cfg, &seeds, &interrupted, checkpoint, started)
            }
        }
    };
    rows.sort_by_key(|r| r.seed);
    let incoming = rows.len();

    if let Some(raw_path) = &cfg.raw_jsonl {
        if let Some(parent) = raw_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = fs::File::create(raw_path)
            .with_context(|| format!("create {}", raw_path.display()))?;
        let mut writer = BufWriter::new(file);
        for row in &rows {
            serde_json::to_writer(&mut writer, row)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
    }

    let merged = merge_rows(existing, rows);
    let in_progress = interrupted.load(Ordering::Relaxed);
    persist(cfg, &merged, existing_loaded, incoming, in_progress, started, &rows_csv)?;

    let (_, quantiles) = bucket_solved_rows(&merged, cfg.max_per_bucket);
    let solved = merged.iter().filter(|r| r.status == SolveStatus::Solved).count();
    let unknown = merged.iter().filter(|r| r.status == SolveStatus::Unknown).count();
    let proven = merged
        .iter()
        .filter(|r| r.status == SolveStatus::ProvenUnsolvable)
        .count();
    println!(
        "done out={} scanned={} solved={} unknown={} proven_unsolvable={} q33={} q66={}",
        cfg.out.display(),
        merged.len(),
        solved,
        unknown,
        proven,
        round_to(quantiles.q33, 6),
        round_to(quantiles.q66, 6),
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solved_row(seed: u64, score: f64) -> SeedRow {
        SeedRow {
            seed,
            status: SolveStatus::Solved,
            score: Some(score),
            band: Some(DifficultyBand::Easy),
            reason: None,
            elapsed_ms: 1.0,
            expanded_nodes: 1,
            unique_states: 1,
        }
    }

    fn unknown_row(seed: u64) -> SeedRow {
        SeedRow {
            seed,
            status: SolveStatus::Unknown,
            score: None,
            band: None,
            reason: Some("limits_reached".to_string()),
            elapsed_ms: 1.0,
            expanded_nodes: 1,
            unique_states: 1,
        }
    }

    #[test]
    fn test_quantile_interpolates() {
        let values = [10.0, 20.0, 30.0, 40.0];
        assert!((quantile(&values, 1.0 / 3.0) - 20.0).abs() < 1e-9);
        assert!((quantile(&values, 2.0 / 3.0) - 30.0).abs() < 1e-9);
        assert!((quantile(&values, 0.0) - 10.0).abs() < 1e-9);
        assert!((quantile(&values, 1.0) - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_bucket_solved_rows_tertiles() {
        let rows: Vec<SeedRow> = (1..=5).map(|i| solved_row(i, i as f64 * 10.0)).collect();
        let (buckets, quantiles) = bucket_solved_rows(&rows, 0);

        assert!((quantiles.q33 - 70.0 / 3.0).abs() < 1e-9);
        assert!((quantiles.q66 - 110.0 / 3.0).abs() < 1e-9);
        let seeds = |rows: &[SeedRow]| rows.iter().map(|r| r.seed).collect::<Vec<_>>();
        assert_eq!(seeds(&buckets.easy), vec![1, 2]);
        assert_eq!(seeds(&buckets.medium), vec![3]);
        assert_eq!(seeds(&buckets.hard), vec![4, 5]);
        // Every solved row lands in exactly one bucket.
        assert_eq!(
            buckets.easy.len() + buckets.medium.len() + buckets.hard.len(),
            rows.len()
        );
    }

    #[test]
    fn test_bucket_ignores_unsolved_and_caps() {
        let mut rows: Vec<SeedRow> = (1..=6).map(|i| solved_row(i, i as f64)).collect();
        rows.push(unknown_row(7));
        let (buckets, _) = bucket_solved_rows(&rows, 1);
        assert_eq!(buckets.easy.len(), 1);
        assert_eq!(buckets.medium.len(), 1);
        assert_eq!(buckets.hard.len(), 1);
        // Truncation keeps the dense (low-score) end of each bucket.
        assert_eq!(buckets.easy[0].seed, 1);
    }

    #[test]
    fn test_merge_rows_prefers_incoming() {
        let existing = vec![unknown_row(100), solved_row(101, 20.0)];
        let incoming = vec![solved_row(100, 25.0), unknown_row(102)];
        let merged = merge_rows(existing, incoming);
        assert_eq!(merged.iter().map(|r| r.seed).collect::<Vec<_>>(), vec![100, 101, 102]);
        assert_eq!(merged[0].status, SolveStatus::Solved);
        assert_eq!(merged[0].score, Some(25.0));
        assert_eq!(merged[1].status, SolveStatus::Solved);
        assert_eq!(merged[2].status, SolveStatus::Unknown);
    }

    #[test]
    fn test_rows_csv_round_trip() {
        let rows = vec![
            solved_row(3, 1234.5),
            unknown_row(4),
            SeedRow {
                seed: 5,
                status: SolveStatus::ProvenUnsolvable,
                score: Some(100.0),
                band: Some(DifficultyBand::Unsolvable),
                reason: Some("search_space_exhausted".to_string()),
                elapsed_ms: 2.5,
                expanded_nodes: 17,
                unique_states: 9,
            },
        ];
        let text = rows_to_csv(&rows);
        assert!(text.starts_with(ROWS_CSV_HEADER));
        assert_eq!(parse_rows_csv(&text), rows);
    }

    fn test_config() -> BuildConfig {
        BuildConfig {
            suits: 4,
            start_seed: 1,
            count: 3,
            workers: 1,
            limits: SearchLimits::default(),
            single_stage: false,
            max_per_bucket: 0,
            progress_every: 0,
            save_interval_sec: 60,
            out: PathBuf::from("data/seed_pool_4s.json"),
            raw_jsonl: None,
            overwrite: false,
        }
    }

    #[test]
    fn test_payload_layout() {
        let rows = vec![solved_row(1, 10.0), unknown_row(2), unknown_row(3)];
        let payload = build_payload(
            &test_config(),
            &rows,
            0,
            3,
            false,
            12.3456,
            Path::new("data/seed_pool_4s.rows.csv"),
        );

        assert_eq!(payload["stats"]["scanned"], 3);
        assert_eq!(payload["stats"]["solved"], 1);
        assert_eq!(payload["stats"]["unknown"], 2);
        assert_eq!(payload["buckets"]["unknown"], json!([2, 3]));
        assert_eq!(payload["buckets"]["Easy"], json!([1]));
        assert_eq!(payload["source"]["merge_mode"], "merge");
        assert_eq!(payload["in_progress"], false);
        assert_eq!(
            payload["files"]["rows_csv"],
            "data/seed_pool_4s.rows.csv"
        );
        assert!(payload.get("bucket_entries").is_none());
        assert!(payload.get("all_rows").is_none());
    }

    #[test]
    fn test_rows_csv_path() {
        assert_eq!(
            rows_csv_path(Path::new("data/seed_pool_2s.json")),
            PathBuf::from("data/seed_pool_2s.rows.csv")
        );
    }
}
