//! Event sink: fire-and-forget publication of state transitions,
//! material-change events, and evaluation snapshots (spec §4.H).
//!
//! The core must never block on sink unavailability (spec §5 "Sink
//! publication has a short deadline... and drops the event on timeout"),
//! so every trait method returns nothing and never panics; failures are
//! only counted, following the historian client's separation of "what the
//! poller can retry" from "what it just has to shrug off" in spec §7.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::warn;

use crate::config::defaults::poll::SINK_PUBLISH_DEADLINE;
use crate::types::{MaterialChangeEvent, ProcessEvaluation, StateTransitionEvent};

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish_state_transition(&self, event: StateTransitionEvent);
    async fn publish_material_change(&self, event: MaterialChangeEvent);
    async fn publish_evaluation(&self, evaluation: ProcessEvaluation);

    /// Count of publish attempts dropped to a timeout or channel failure,
    /// exposed for observability (spec §7).
    fn dropped_count(&self) -> u64;
}

/// Publishes every event at `tracing::info!`. The default sink when no
/// external subscriber is configured.
#[derive(Debug, Default)]
pub struct LoggingEventSink {
    dropped: AtomicU64,
}

impl LoggingEventSink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn publish_state_transition(&self, event: StateTransitionEvent) {
        tracing::info!(
            machine_id = %event.machine_id,
            from = %event.from_state,
            to = %event.to_state,
            confidence = event.confidence,
            "state transition"
        );
    }

    async fn publish_material_change(&self, event: MaterialChangeEvent) {
        tracing::info!(
            machine_id = %event.machine_id,
            previous = ?event.previous_material,
            new_material = %event.new_material,
            "material change"
        );
    }

    async fn publish_evaluation(&self, evaluation: ProcessEvaluation) {
        tracing::debug!(
            machine_id = %evaluation.machine_id,
            process_status = %evaluation.process_status,
            ml_warning = evaluation.ml_warning_flag,
            "process evaluation"
        );
    }

    fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// One event queued to a channel-backed sink (spec §4.H).
#[derive(Debug, Clone)]
pub enum SinkEvent {
    StateTransition(StateTransitionEvent),
    MaterialChange(MaterialChangeEvent),
    Evaluation(ProcessEvaluation),
}

/// Hands events to an unbounded channel whose consumer runs independently
/// of the poller — publication never waits on whatever's downstream of the
/// channel. A bounded `send` with a deadline is used instead of
/// `try_send` so a momentarily full consumer doesn't drop bursts, while
/// still respecting `SINK_PUBLISH_DEADLINE` so a stalled consumer can't
/// stall the poller either.
pub struct ChannelEventSink {
    sender: mpsc::Sender<SinkEvent>,
    dropped: AtomicU64,
}

impl ChannelEventSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<SinkEvent>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (
            Self {
                sender,
                dropped: AtomicU64::new(0),
            },
            receiver,
        )
    }

    async fn send(&self, event: SinkEvent) {
        match timeout(SINK_PUBLISH_DEADLINE, self.sender.send(event)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("event sink channel closed, dropping event");
            }
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("event sink publish timed out, dropping event");
            }
        }
    }
}

#[async_trait]
impl EventSink for ChannelEventSink {
    async fn publish_state_transition(&self, event: StateTransitionEvent) {
        self.send(SinkEvent::StateTransition(event)).await;
    }

    async fn publish_material_change(&self, event: MaterialChangeEvent) {
        self.send(SinkEvent::MaterialChange(event)).await;
    }

    async fn publish_evaluation(&self, evaluation: ProcessEvaluation) {
        self.send(SinkEvent::Evaluation(evaluation)).await;
    }

    fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::types::MachineState;

    #[tokio::test]
    async fn logging_sink_never_reports_drops() {
        let sink = LoggingEventSink::new();
        sink.publish_state_transition(StateTransitionEvent {
            machine_id: "M1".to_string(),
            from_state: MachineState::Idle,
            to_state: MachineState::Production,
            at: Utc::now(),
            confidence: 0.9,
        })
        .await;
        assert_eq!(sink.dropped_count(), 0);
    }

    #[tokio::test]
    async fn channel_sink_delivers_to_receiver() {
        let (sink, mut receiver) = ChannelEventSink::new(8);
        sink.publish_material_change(MaterialChangeEvent {
            machine_id: "M1".to_string(),
            previous_material: None,
            new_material: "PP-H".to_string(),
            at: Utc::now(),
        })
        .await;
        let received = receiver.recv().await.unwrap();
        assert!(matches!(received, SinkEvent::MaterialChange(_)));
        assert_eq!(sink.dropped_count(), 0);
    }

    #[tokio::test]
    async fn channel_sink_counts_drops_when_receiver_is_gone() {
        let (sink, receiver) = ChannelEventSink::new(1);
        drop(receiver);
        sink.publish_state_transition(StateTransitionEvent {
            machine_id: "M1".to_string(),
            from_state: MachineState::Idle,
            to_state: MachineState::Production,
            at: Utc::now(),
            confidence: 0.9,
        })
        .await;
        assert_eq!(sink.dropped_count(), 1);
    }
}
