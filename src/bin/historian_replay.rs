//! Historian replay tool (SPEC_FULL §6): feeds a historian CSV export
//! through the same pipeline the live poller uses, without a TCP
//! historian connection. Useful for reproducing a production incident
//! offline or smoke-testing a profile/threshold change against recorded
//! data.
//!
//! Usage:
//!   historian-replay --file readings.csv --machine-id extruder-1
//!   historian-replay --file readings.csv --machine-id extruder-1 --speed 0

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;

use extruder_monitor::baseline::BaselineLearner;
use extruder_monitor::config::{self, MonitorConfig, ThresholdSet};
use extruder_monitor::historian::MockHistorian;
use extruder_monitor::ml_client::DisabledAnomalyScorer;
use extruder_monitor::poller::Poller;
use extruder_monitor::profiles::ProfileRegistry;
use extruder_monitor::sink::{ChannelEventSink, SinkEvent};
use extruder_monitor::storage::Store;
use extruder_monitor::types::Reading;

#[derive(Parser, Debug)]
#[command(name = "historian-replay")]
#[command(about = "Replay a historian CSV export through the monitoring pipeline")]
struct CliArgs {
    /// CSV file to replay.
    #[arg(long)]
    file: PathBuf,

    /// Machine id to attribute every row to (overrides a `machine_id`
    /// column if the CSV carries one, since a historian export is
    /// usually scoped to a single machine already).
    #[arg(long)]
    machine_id: String,

    /// Rows printed as progress every N rows. 0 disables progress output.
    #[arg(long, default_value_t = 500)]
    progress_every: usize,

    /// Milliseconds to sleep between rows, to approximate real-time replay.
    /// 0 (the default) replays as fast as possible.
    #[arg(long, default_value_t = 0)]
    speed_ms: u64,
}

/// Split a CSV line respecting quoted fields.
fn csv_split(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' => {
                if in_quotes && chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = !in_quotes;
                }
            }
            ',' if !in_quotes => {
                fields.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    fields.push(current.trim().to_string());
    fields
}

/// Maps expected column names to their position in the header row.
/// Column order is not fixed; only the names matter.
struct ColumnMap {
    timestamp: usize,
    material_id: Option<usize>,
    screw_rpm: Option<usize>,
    pressure: Option<usize>,
    temp_zone_1: Option<usize>,
    temp_zone_2: Option<usize>,
    temp_zone_3: Option<usize>,
    temp_zone_4: Option<usize>,
    motor_load: Option<usize>,
    throughput: Option<usize>,
}

impl ColumnMap {
    fn from_header(header: &str) -> Result<Self> {
        let columns = csv_split(header);
        let find = |name: &str| columns.iter().position(|c| c.eq_ignore_ascii_case(name));

        let timestamp = find("timestamp").context("CSV header is missing a `timestamp` column")?;
        Ok(Self {
            timestamp,
            material_id: find("material_id"),
            screw_rpm: find("screw_rpm"),
            pressure: find("pressure"),
            temp_zone_1: find("temp_zone_1"),
            temp_zone_2: find("temp_zone_2"),
            temp_zone_3: find("temp_zone_3"),
            temp_zone_4: find("temp_zone_4"),
            motor_load: find("motor_load"),
            throughput: find("throughput"),
        })
    }
}

/// Parses an optional numeric field: a present-but-empty cell is treated
/// the same as an absent column, both mapping to `None` so the rest of
/// the pipeline sees a genuinely silent sensor rather than a zero.
fn field(fields: &[String], idx: Option<usize>) -> Option<f64> {
    let idx = idx?;
    let raw = fields.get(idx)?.trim();
    if raw.is_empty() {
        return None;
    }
    raw.parse::<f64>().ok()
}

fn parse_row(fields: &[String], map: &ColumnMap, machine_id: &str) -> Result<Reading> {
    let timestamp_raw = fields
        .get(map.timestamp)
        .context("row is shorter than the header")?;
    let timestamp: DateTime<Utc> = timestamp_raw
        .parse()
        .with_context(|| format!("unparseable timestamp {timestamp_raw:?}"))?;

    Ok(Reading {
        machine_id: machine_id.to_string(),
        material_id: map
            .material_id
            .and_then(|idx| fields.get(idx))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
        timestamp,
        screw_rpm: field(fields, map.screw_rpm),
        pressure: field(fields, map.pressure),
        temp_zone_1: field(fields, map.temp_zone_1),
        temp_zone_2: field(fields, map.temp_zone_2),
        temp_zone_3: field(fields, map.temp_zone_3),
        temp_zone_4: field(fields, map.temp_zone_4),
        motor_load: field(fields, map.motor_load),
        throughput: field(fields, map.throughput),
    })
}

fn load_rows(path: &PathBuf, machine_id: &str) -> Result<Vec<Reading>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut lines = BufReader::new(file).lines();

    let header = lines
        .next()
        .context("CSV file is empty")?
        .context("failed to read header line")?;
    let map = ColumnMap::from_header(&header)?;

    let mut rows = Vec::new();
    for (lineno, line) in lines.enumerate() {
        let line = line.with_context(|| format!("failed to read line {}", lineno + 2))?;
        if line.trim().is_empty() {
            continue;
        }
        let fields = csv_split(&line);
        match parse_row(&fields, &map, machine_id) {
            Ok(reading) => rows.push(reading),
            Err(err) => eprintln!("  skipping line {}: {err:#}", lineno + 2),
        }
    }
    if rows.is_empty() {
        bail!("no usable rows parsed from {}", path.display());
    }
    rows.sort_by_key(|r| r.timestamp);
    Ok(rows)
}

#[derive(Default)]
struct ReplayStats {
    state_transitions: u64,
    material_changes: u64,
    evaluations: u64,
    red_evaluations: u64,
    orange_evaluations: u64,
    ml_warnings: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    if !config::is_initialized() {
        config::init(MonitorConfig::default());
    }

    println!("historian-replay: loading {}", args.file.display());
    let rows = load_rows(&args.file, &args.machine_id)?;
    let Some(first_timestamp) = rows.first().map(|r| r.timestamp) else {
        bail!("no rows parsed from {}", args.file.display());
    };
    let last_timestamp = rows.last().map(|r| r.timestamp).unwrap_or(first_timestamp);
    println!("  {} rows, {} .. {}", rows.len(), first_timestamp, last_timestamp);

    let store = Arc::new(Store::open_temporary().context("failed to open in-memory store")?);
    let profiles = Arc::new(ProfileRegistry::new(store.clone()));
    let min_samples = config::get().baseline.min_samples_for_finalize;
    let baseline = Arc::new(BaselineLearner::new(store, profiles.clone(), min_samples));
    let historian = Arc::new(MockHistorian::new(Vec::new()));
    let scorer = Arc::new(DisabledAnomalyScorer);
    let (sink, mut receiver) = ChannelEventSink::new(1024);
    let sink = Arc::new(sink);

    let watermark = first_timestamp - chrono::Duration::seconds(1);
    let mut poller = Poller::new(
        args.machine_id.clone(),
        historian,
        profiles,
        baseline,
        sink,
        scorer,
        watermark,
    );

    let thresholds = ThresholdSet::default();
    let window_minutes = config::get().poll.window_minutes;
    let total = rows.len();
    let mut stats = ReplayStats::default();

    println!("  replaying through the pipeline...");
    for (i, row) in rows.into_iter().enumerate() {
        poller.process_batch(vec![row], &thresholds, window_minutes).await;

        while let Ok(event) = receiver.try_recv() {
            match event {
                SinkEvent::StateTransition(_) => stats.state_transitions += 1,
                SinkEvent::MaterialChange(_) => stats.material_changes += 1,
                SinkEvent::Evaluation(eval) => {
                    stats.evaluations += 1;
                    match eval.process_status {
                        extruder_monitor::Severity::Red => stats.red_evaluations += 1,
                        extruder_monitor::Severity::Orange => stats.orange_evaluations += 1,
                        _ => {}
                    }
                    if eval.ml_warning_flag {
                        stats.ml_warnings += 1;
                    }
                }
            }
        }

        if args.progress_every > 0 && (i + 1) % args.progress_every == 0 {
            let pct = (i + 1) as f64 / total as f64 * 100.0;
            println!(
                "  [{pct:5.1}%] row {}/{total} | state: {:?} | evaluations: {}",
                i + 1,
                poller.current_state(),
                stats.evaluations,
            );
        }

        if args.speed_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(args.speed_ms)).await;
        }
    }

    let poller_stats = poller.stats();
    println!();
    println!("replay complete for {}", poller.machine_id());
    println!(
        "  readings accepted:   {}",
        poller_stats
            .readings_accepted
            .load(std::sync::atomic::Ordering::Relaxed)
    );
    println!(
        "  readings rejected:   {}",
        poller_stats
            .readings_rejected
            .load(std::sync::atomic::Ordering::Relaxed)
    );
    println!("  state transitions:   {}", stats.state_transitions);
    println!("  material changes:    {}", stats.material_changes);
    println!("  evaluations:         {}", stats.evaluations);
    println!("    red:               {}", stats.red_evaluations);
    println!("    orange:            {}", stats.orange_evaluations);
    println!("  ml warnings:         {}", stats.ml_warnings);
    println!("  final state:         {:?}", poller.current_state());

    Ok(())
}
