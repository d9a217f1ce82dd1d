//! TCP line-protocol historian client.
//!
//! The historian source is deployment-specific (spec §6: "concrete binding
//! is deployment-specific"). This client speaks a simple text protocol over
//! TCP — one request line, then CSV rows until a blank line — in the same
//! hand-rolled-parsing idiom the rest of this lineage uses (no `csv` crate
//! dependency). A single attempt per call; the poller is responsible for
//! backoff between retries (spec §4.A: the client is stateless between
//! calls).

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::config::HistorianConfig;
use crate::types::Reading;

use super::{HistorianClient, HistorianError};

pub struct TcpHistorianClient {
    host: String,
    port: u16,
    table: String,
    fetch_deadline: std::time::Duration,
}

impl TcpHistorianClient {
    pub fn new(config: &HistorianConfig, fetch_deadline: std::time::Duration) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            table: config.table.clone(),
            fetch_deadline,
        }
    }

    async fn fetch_inner(
        &self,
        machine_id: &str,
        watermark: DateTime<Utc>,
        cap: usize,
    ) -> Result<Vec<Reading>, HistorianError> {
        let addr = format!("{}:{}", self.host, self.port);
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|e| HistorianError::ConnectionFailed(format!("{addr}: {e}")))?;

        let (read_half, mut write_half) = stream.into_split();
        let request = format!(
            "FETCH {} {} {} {}\n",
            self.table,
            machine_id,
            watermark.to_rfc3339(),
            cap
        );
        write_half
            .write_all(request.as_bytes())
            .await
            .map_err(|e| HistorianError::ConnectionFailed(e.to_string()))?;

        let mut reader = BufReader::new(read_half);
        let mut readings = Vec::new();
        loop {
            let mut line = String::new();
            let n = reader
                .read_line(&mut line)
                .await
                .map_err(|e| HistorianError::Protocol(e.to_string()))?;
            if n == 0 || line.trim().is_empty() {
                break;
            }
            match parse_row(line.trim_end(), machine_id) {
                Some(reading) => readings.push(reading),
                None => {
                    tracing::warn!(row = %line.trim_end(), "dropping malformed historian row");
                }
            }
            if readings.len() >= cap {
                break;
            }
        }
        Ok(readings)
    }
}

#[async_trait]
impl HistorianClient for TcpHistorianClient {
    async fn fetch_since(
        &self,
        machine_id: &str,
        watermark: DateTime<Utc>,
        cap: usize,
    ) -> Result<Vec<Reading>, HistorianError> {
        timeout(self.fetch_deadline, self.fetch_inner(machine_id, watermark, cap))
            .await
            .map_err(|_| HistorianError::Timeout(self.fetch_deadline))?
    }

    fn source_name(&self) -> &str {
        "tcp-line-historian"
    }
}

/// Columns: `timestamp,screw_rpm,pressure,temp_zone_1,temp_zone_2,temp_zone_3,
/// temp_zone_4,motor_load,throughput,material_id`. Trailing columns may be
/// omitted; empty fields are null, never zero (spec §9 null-vs-zero).
fn parse_row(line: &str, machine_id: &str) -> Option<Reading> {
    let fields = csv_split(line);
    if fields.len() < 7 {
        return None;
    }

    let timestamp = parse_timestamp(&fields[0])?;
    Some(Reading {
        machine_id: machine_id.to_string(),
        material_id: fields.get(9).and_then(|s| non_empty(s)),
        timestamp,
        screw_rpm: parse_opt_f64(&fields[1]),
        pressure: parse_opt_f64(&fields[2]),
        temp_zone_1: parse_opt_f64(&fields[3]),
        temp_zone_2: parse_opt_f64(&fields[4]),
        temp_zone_3: parse_opt_f64(&fields[5]),
        temp_zone_4: parse_opt_f64(&fields[6]),
        motor_load: fields.get(7).and_then(|s| parse_opt_f64(s)),
        throughput: fields.get(8).and_then(|s| parse_opt_f64(s)),
    })
}

fn parse_timestamp(field: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(field) {
        return Some(dt.with_timezone(&Utc));
    }
    field
        .parse::<i64>()
        .ok()
        .and_then(|nanos| Utc.timestamp_nanos(nanos).into())
}

fn parse_opt_f64(field: &str) -> Option<f64> {
    let trimmed = field.trim();
    if trimmed.is_empty() {
        None
    } else {
        trimmed.parse::<f64>().ok()
    }
}

fn non_empty(field: &str) -> Option<String> {
    let trimmed = field.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Hand-rolled CSV split — no quoting support, which matches the simple
/// numeric-only row shape this protocol emits.
fn csv_split(line: &str) -> Vec<String> {
    line.split(',').map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_well_formed_row() {
        let line = "2026-01-01T00:00:00Z,20.0,8.0,200,200,200,200,30,5,PP-H";
        let reading = parse_row(line, "M1").unwrap();
        assert_eq!(reading.screw_rpm, Some(20.0));
        assert_eq!(reading.material_id.as_deref(), Some("PP-H"));
    }

    #[test]
    fn empty_fields_become_none_not_zero() {
        let line = "2026-01-01T00:00:00Z,,8.0,200,200,200,200";
        let reading = parse_row(line, "M1").unwrap();
        assert_eq!(reading.screw_rpm, None);
        assert_eq!(reading.pressure, Some(8.0));
    }

    #[test]
    fn too_few_columns_is_malformed() {
        assert!(parse_row("2026-01-01T00:00:00Z,20.0", "M1").is_none());
    }

    #[test]
    fn unparsable_timestamp_is_malformed() {
        assert!(parse_row("not-a-time,20.0,8.0,200,200,200,200", "M1").is_none());
    }
}
