//! Replay recorded data into the orchestrator loop
//!
//! Supported inputs:
//! - `*.csv` / `*.csv.zst`: one base bar per row
//!   (`instrument,ts,open,high,low,close,volume`), rows sharing a timestamp
//!   become one feed message with `ltp = close`
//! - `*.jsonl` / `*.jsonl.zst`: one raw feed message per line

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::trading_core::bars::{parse_timestamp, Bar};
use crate::trading_core::feed::{FeedMessage, FeedUpdate};

#[derive(Debug, Deserialize)]
struct CsvRow {
    instrument: String,
    ts: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Csv,
    Jsonl,
}

fn detect_format(path: &Path) -> Result<(Format, bool)> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let (stem, compressed) = match name.strip_suffix(".zst") {
        Some(stem) => (stem.to_string(), true),
        None => (name.clone(), false),
    };
    if stem.ends_with(".csv") {
        Ok((Format::Csv, compressed))
    } else if stem.ends_with(".jsonl") || stem.ends_with(".ndjson") {
        Ok((Format::Jsonl, compressed))
    } else {
        bail!("Unsupported replay input {:?} (expected .csv, .jsonl, optionally .zst)", path)
    }
}

/// Group CSV bar rows into feed messages, one per distinct timestamp
pub fn read_csv<R: Read>(reader: R) -> Result<Vec<FeedMessage>> {
    let mut csv_reader = csv::Reader::from_reader(reader);
    let mut messages: Vec<FeedMessage> = Vec::new();
    let mut current_ts = None;
    let mut skipped = 0u64;

    for (line, result) in csv_reader.deserialize::<CsvRow>().enumerate() {
        let row = match result {
            Ok(row) => row,
            Err(e) => {
                warn!("Skipping CSV row {}: {}", line + 2, e);
                skipped += 1;
                continue;
            }
        };
        let Some(timestamp) = parse_timestamp(&row.ts) else {
            warn!("Skipping CSV row {}: bad timestamp {:?}", line + 2, row.ts);
            skipped += 1;
            continue;
        };

        let bar = Bar::new(&row.instrument, timestamp, row.open, row.high, row.low, row.close, row.volume);
        let update = FeedUpdate {
            instrument: row.instrument,
            ltp: row.close,
            bar: Some(bar),
        };

        match messages.last_mut() {
            Some(msg) if current_ts == Some(timestamp) => msg.updates.push(update),
            _ => {
                current_ts = Some(timestamp);
                messages.push(FeedMessage { updates: vec![update] });
            }
        }
    }

    if skipped > 0 {
        debug!("Skipped {} malformed CSV rows", skipped);
    }
    Ok(messages)
}

/// Parse one feed message per non-empty line
pub fn read_jsonl<R: BufRead>(reader: R) -> Result<Vec<FeedMessage>> {
    let mut messages = Vec::new();
    for (n, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read line {}", n + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        match FeedMessage::from_json_str(&line) {
            Ok(msg) if !msg.is_empty() => messages.push(msg),
            Ok(_) => debug!("Line {} carries no updates", n + 1),
            Err(e) => warn!("Skipping line {}: {}", n + 1, e),
        }
    }
    Ok(messages)
}

/// Load every message from a replay file
pub fn load_messages(path: &Path) -> Result<Vec<FeedMessage>> {
    let (format, compressed) = detect_format(path)?;
    let file = File::open(path).with_context(|| format!("Failed to open file: {:?}", path))?;

    let reader: Box<dyn Read> = if compressed {
        Box::new(
            zstd::stream::Decoder::new(file)
                .with_context(|| format!("Failed to create zstd decoder for: {:?}", path))?,
        )
    } else {
        Box::new(file)
    };
    let reader = BufReader::new(reader);

    match format {
        Format::Csv => read_csv(reader),
        Format::Jsonl => read_jsonl(reader),
    }
}

/// Read `path` and send its messages in order. Returns the number sent;
/// stops early if the receiver is dropped.
pub async fn run_replay_stream(path: PathBuf, tx: mpsc::Sender<FeedMessage>) -> Result<usize> {
    let load_path = path.clone();
    let messages = tokio::task::spawn_blocking(move || load_messages(&load_path))
        .await
        .context("Replay loader task failed")??;
    info!("Replaying {} messages from {:?}", messages.len(), path);

    let mut sent = 0;
    for msg in messages {
        if tx.send(msg).await.is_err() {
            warn!("Replay receiver closed after {} messages", sent);
            break;
        }
        sent += 1;
    }
    Ok(sent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const CSV: &str = "instrument,ts,open,high,low,close,volume\n\
        A,2025-01-02T09:15:00,10.0,10.5,9.8,10.2,1000\n\
        B,2025-01-02T09:15:00,20.0,20.5,19.8,20.2,2000\n\
        A,2025-01-02T09:20:00,10.2,10.6,10.1,10.4,1100\n\
        A,not-a-time,10.4,10.6,10.1,10.4,1100\n";

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("mtf-replay-{}-{}", std::process::id(), name))
    }

    #[test]
    fn test_csv_rows_grouped_by_timestamp() {
        let messages = read_csv(CSV.as_bytes()).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].updates.len(), 2);
        assert_eq!(messages[0].updates[1].instrument, "B");
        assert_eq!(messages[0].updates[1].ltp, 20.2);
        assert_eq!(messages[1].updates[0].bar.as_ref().unwrap().volume, 1100.0);
    }

    #[test]
    fn test_jsonl_skips_bad_lines() {
        let input = "{\"feeds\": {\"A\": {\"ltp\": 10.0}}}\n\nnot json\n{\"feeds\": {}}\n";
        let messages = read_jsonl(input.as_bytes()).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].updates[0].ltp, 10.0);
    }

    #[test]
    fn test_unknown_extension_rejected() {
        assert!(load_messages(Path::new("bars.parquet")).is_err());
    }

    #[tokio::test]
    async fn test_replay_compressed_csv() {
        let path = temp_path("bars.csv.zst");
        let compressed = zstd::encode_all(CSV.as_bytes(), 3).unwrap();
        std::fs::File::create(&path).unwrap().write_all(&compressed).unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let sent = run_replay_stream(path.clone(), tx).await.unwrap();
        assert_eq!(sent, 2);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.updates.len(), 2);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.updates[0].ltp, 10.4);
        assert!(rx.recv().await.is_none());

        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn test_replay_stops_when_receiver_dropped() {
        let path = temp_path("feed.jsonl");
        let mut file = std::fs::File::create(&path).unwrap();
        for i in 0..5 {
            writeln!(file, "{{\"feeds\": {{\"A\": {{\"ltp\": {}}}}}}}", 10 + i).unwrap();
        }
        drop(file);

        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sent = run_replay_stream(path.clone(), tx).await.unwrap();
        assert_eq!(sent, 0);

        std::fs::remove_file(&path).ok();
    }
}
