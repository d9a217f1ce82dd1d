//! Extruder condition-monitoring core.
//!
//! Classifies a plastics extruder's operating state from historian
//! readings, learns per-material baselines during production, and
//! evaluates live readings against those baselines to flag process drift
//! before it produces scrap.
//!
//! ## Pipeline
//!
//! One [`poller::Poller`] task runs per machine: it pulls rows from a
//! [`historian::HistorianClient`], feeds them through the
//! [`buffer::RingBuffer`] and [`metrics::MetricEngine`], classifies
//! operating state with [`state_machine::StateDetector`], resolves a
//! [`profiles::ProfileRegistry`] entry, ingests samples into the
//! [`baseline::BaselineLearner`] while in production, and publishes a
//! [`types::ProcessEvaluation`] from [`evaluator::Evaluator`] through an
//! [`sink::EventSink`].

pub mod config;
pub mod types;

pub mod statistics;
pub mod storage;

pub mod buffer;
pub mod metrics;
pub mod state_machine;

pub mod historian;
pub mod ml_client;

pub mod profiles;
pub mod baseline;
pub mod evaluator;
pub mod sink;

pub mod poller;

pub use config::MonitorConfig;

pub use types::{
    ArchivedBaseline, BaselineSample, BaselineStats, DerivedMetrics, GreenBand,
    MachineState, MachineStateInfo, MaterialChangeEvent, MetricEvaluation, ProcessEvaluation,
    Profile, Reading, Severity, Stability, StateTransitionEvent,
};

pub use baseline::{BaselineError, BaselineLearner};
pub use evaluator::Evaluator;
pub use historian::{HistorianClient, HistorianError, MockHistorian, TcpHistorianClient};
pub use ml_client::{AnomalyScorer, MlClientError};
pub use profiles::{ProfileError, ProfileRegistry};
pub use sink::{ChannelEventSink, EventSink, LoggingEventSink};
pub use storage::{Store, StorageError};

pub use poller::{Poller, PollerStats};
