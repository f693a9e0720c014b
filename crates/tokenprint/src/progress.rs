//! Progress events for pipeline runs.
//!
//! The pipeline emits `ProgressEvent`s through a `tokio::sync::broadcast`
//! channel so a CLI spinner, a log sink, or a test can follow the run.
//! With no subscriber the events are dropped.

use serde::{Deserialize, Serialize};

/// A progress event emitted during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// The run this event belongs to.
    pub run_id: String,
    /// Monotonically increasing sequence number.
    pub seq: u64,
    pub event: ProgressEventKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ProgressEventKind {
    StageStarted { stage: Stage, message: String },
    StageCompleted {
        stage: Stage,
        message: String,
        duration_ms: u64,
    },
    /// A page reached a terminal state.
    PageAnalyzed {
        page_id: String,
        status: String,
        signals: u32,
    },
    /// A new aggregation generation was produced.
    GenerationProduced {
        number: u32,
        canonical: u32,
        low_confidence: u32,
        findings: u32,
    },
    RunAborted { reason: String },
    RunComplete {
        pages: u32,
        canonical: u32,
        findings: u32,
        elapsed_ms: u64,
    },
    /// A non-fatal warning occurred.
    Warning { message: String },
}

/// Pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    Analyze,
    Cluster,
    Weigh,
    Observe,
    Aggregate,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Analyze => write!(f, "Analyze"),
            Self::Cluster => write!(f, "Cluster"),
            Self::Weigh => write!(f, "Weigh"),
            Self::Observe => write!(f, "Observe"),
            Self::Aggregate => write!(f, "Aggregate"),
        }
    }
}

pub type ProgressSender = tokio::sync::broadcast::Sender<ProgressEvent>;

pub type ProgressReceiver = tokio::sync::broadcast::Receiver<ProgressEvent>;

/// Create a progress broadcast channel. 256 events covers a stage pair per
/// stage, one event per page for typical samples, and a few generations.
pub fn channel() -> (ProgressSender, ProgressReceiver) {
    tokio::sync::broadcast::channel(256)
}

/// Emit a progress event, ignoring send errors (no receivers listening).
pub fn emit(tx: &Option<ProgressSender>, run_id: &str, seq: &mut u64, event: ProgressEventKind) {
    if let Some(ref sender) = tx {
        *seq += 1;
        let _ = sender.send(ProgressEvent {
            run_id: run_id.to_string(),
            seq: *seq,
            event,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_event_serialization() {
        let event = ProgressEvent {
            run_id: "run-1".to_string(),
            seq: 1,
            event: ProgressEventKind::StageStarted {
                stage: Stage::Cluster,
                message: "Clustering 12 pages".to_string(),
            },
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("Cluster"));
        assert!(json.contains("StageStarted"));

        let parsed: ProgressEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.run_id, "run-1");
        assert_eq!(parsed.seq, 1);
    }

    #[test]
    fn test_channel_no_receivers() {
        let (tx, rx) = channel();
        drop(rx);
        emit(
            &Some(tx),
            "run",
            &mut 0,
            ProgressEventKind::Warning {
                message: "test".to_string(),
            },
        );
    }

    #[test]
    fn test_emit_none_sender() {
        let mut seq = 0;
        emit(
            &None,
            "run",
            &mut seq,
            ProgressEventKind::Warning {
                message: "test".to_string(),
            },
        );
        assert_eq!(seq, 0);
    }

    #[test]
    fn test_emit_increments_sequence() {
        let (tx, mut rx) = channel();
        let tx = Some(tx);
        let mut seq = 0;
        for _ in 0..2 {
            emit(&tx, "run", &mut seq, ProgressEventKind::Warning { message: "w".into() });
        }
        assert_eq!(rx.try_recv().unwrap().seq, 1);
        assert_eq!(rx.try_recv().unwrap().seq, 2);
    }
}
