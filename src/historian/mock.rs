//! Test double for `HistorianClient`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Mutex;

use crate::types::Reading;

use super::{HistorianClient, HistorianError};

/// Replays a fixed, pre-loaded set of readings, honoring the watermark
/// contract (only rows strictly after it, capped, ascending).
pub struct MockHistorian {
    rows: Mutex<Vec<Reading>>,
    fail_next: Mutex<bool>,
}

impl MockHistorian {
    pub fn new(mut rows: Vec<Reading>) -> Self {
        rows.sort_by_key(|r| r.timestamp);
        Self {
            rows: Mutex::new(rows),
            fail_next: Mutex::new(false),
        }
    }

    /// Make the next `fetch_since` call return a connection error, to
    /// exercise backoff behavior in poller tests.
    pub fn fail_next_call(&self) {
        *self.fail_next.lock().expect("mock historian mutex poisoned") = true;
    }
}

#[async_trait]
impl HistorianClient for MockHistorian {
    async fn fetch_since(
        &self,
        machine_id: &str,
        watermark: DateTime<Utc>,
        cap: usize,
    ) -> Result<Vec<Reading>, HistorianError> {
        {
            let mut fail_next = self.fail_next.lock().expect("mock historian mutex poisoned");
            if *fail_next {
                *fail_next = false;
                return Err(HistorianError::ConnectionFailed("mock failure".to_string()));
            }
        }

        let rows = self.rows.lock().expect("mock historian mutex poisoned");
        Ok(rows
            .iter()
            .filter(|r| r.machine_id == machine_id && r.timestamp > watermark)
            .take(cap)
            .cloned()
            .collect())
    }

    fn source_name(&self) -> &str {
        "mock-historian"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn reading(machine_id: &str, ts: DateTime<Utc>) -> Reading {
        Reading {
            machine_id: machine_id.to_string(),
            material_id: None,
            timestamp: ts,
            screw_rpm: Some(20.0),
            pressure: Some(8.0),
            temp_zone_1: Some(200.0),
            temp_zone_2: Some(200.0),
            temp_zone_3: Some(200.0),
            temp_zone_4: Some(200.0),
            motor_load: None,
            throughput: None,
        }
    }

    #[tokio::test]
    async fn returns_only_rows_strictly_after_watermark() {
        let now = Utc::now();
        let mock = MockHistorian::new(vec![
            reading("M1", now - Duration::seconds(2)),
            reading("M1", now - Duration::seconds(1)),
            reading("M1", now),
        ]);
        let result = mock
            .fetch_since("M1", now - Duration::seconds(1), 10)
            .await
            .unwrap();
        assert_eq!(result.len(), 1);
    }

    #[tokio::test]
    async fn fail_next_call_returns_error_once() {
        let mock = MockHistorian::new(vec![reading("M1", Utc::now())]);
        mock.fail_next_call();
        assert!(mock.fetch_since("M1", Utc::now(), 10).await.is_err());
        assert!(mock.fetch_since("M1", Utc::now() - Duration::days(1), 10).await.is_ok());
    }
}
