use crate::domain::payment::TransactionId;
use crate::domain::ports::ReconciliationObserver;
use crate::domain::reconciliation::{Outcome, ReconciliationState, format_countdown};
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

/// One row of the event log.
#[derive(Debug, Serialize, PartialEq)]
pub struct EventRecord {
    pub transaction_id: String,
    pub state: &'static str,
    pub attempts: Option<u32>,
    pub remaining_seconds: Option<u64>,
    pub countdown: Option<String>,
    pub status: Option<String>,
    pub outcome: Option<String>,
}

impl From<&ReconciliationState> for EventRecord {
    fn from(state: &ReconciliationState) -> Self {
        let tracking = state.tracking();
        let snapshot = tracking.and_then(|t| t.last_snapshot.as_ref());
        Self {
            transaction_id: snapshot
                .map(|s| s.transaction_id.to_string())
                .unwrap_or_default(),
            state: state.name(),
            attempts: tracking.map(|t| t.attempts),
            remaining_seconds: tracking.map(|t| t.remaining_seconds()),
            countdown: tracking.map(|t| format_countdown(t.remaining_seconds())),
            status: snapshot.map(|s| s.status.to_string()),
            outcome: state.outcome().map(|o| o.to_string()),
        }
    }
}

/// Writes every state change as a CSV row.
///
/// As an observer, a failed write is logged and never reaches the engine.
pub struct EventWriter<W: Write> {
    writer: csv::Writer<W>,
    /// Id of the tracked transaction, once known. Fills rows whose state
    /// carries no snapshot.
    transaction_id: Option<String>,
}

impl<W: Write> EventWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::WriterBuilder::new().from_writer(sink),
            transaction_id: None,
        }
    }

    pub fn with_transaction_id(mut self, transaction_id: impl Into<String>) -> Self {
        self.transaction_id = Some(transaction_id.into());
        self
    }

    pub fn write_state(&mut self, state: &ReconciliationState) -> Result<()> {
        let mut record = EventRecord::from(state);
        if record.transaction_id.is_empty() {
            record.transaction_id = self.transaction_id.clone().unwrap_or_default();
        } else {
            self.transaction_id = Some(record.transaction_id.clone());
        }
        self.writer.serialize(record)?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> std::result::Result<W, csv::IntoInnerError<csv::Writer<W>>> {
        self.writer.into_inner()
    }
}

impl<W: Write + Send> ReconciliationObserver for EventWriter<W> {
    fn on_tracking_started(&mut self, transaction_id: &TransactionId) {
        self.transaction_id = Some(transaction_id.to_string());
    }

    fn on_state_change(&mut self, state: &ReconciliationState) {
        if let Err(error) = self.write_state(state) {
            tracing::warn!(%error, "could not write state event");
        }
    }

    fn on_resolved(&mut self, outcome: Outcome) {
        tracing::debug!(%outcome, "event log complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::payment::{PaymentSnapshot, PaymentStatus};
    use crate::domain::reconciliation::Tracking;
    use std::time::Duration;

    #[test]
    fn test_writes_header_and_rows() {
        let mut writer = EventWriter::new(Vec::new());
        let snapshot = PaymentSnapshot::with_status(
            TransactionId::new("PAY-7").unwrap(),
            PaymentStatus::Pending,
        );
        writer
            .write_state(&ReconciliationState::Tracking(Tracking {
                attempts: 3,
                remaining: Duration::from_millis(117_000),
                last_snapshot: Some(snapshot),
            }))
            .unwrap();
        writer
            .write_state(&ReconciliationState::Resolved(Outcome::TimedOut))
            .unwrap();

        let output = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(
            lines,
            vec![
                "transaction_id,state,attempts,remaining_seconds,countdown,status,outcome",
                "PAY-7,tracking,3,117,1:57,pending,",
                "PAY-7,resolved,,,,,timed_out",
            ]
        );
    }

    #[test]
    fn test_rows_without_snapshot_use_started_transaction() {
        let mut writer = EventWriter::new(Vec::new());
        writer.on_state_change(&ReconciliationState::AwaitingCreation);
        writer.on_tracking_started(&TransactionId::new("PAY-3").unwrap());
        writer.on_state_change(&ReconciliationState::Tracking(Tracking {
            attempts: 0,
            remaining: Duration::from_secs(5),
            last_snapshot: None,
        }));
        writer.on_state_change(&ReconciliationState::Resolved(Outcome::TimedOut));

        let output = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        let lines: Vec<&str> = output.lines().skip(1).collect();
        assert_eq!(
            lines,
            vec![
                ",awaiting_creation,,,,,",
                "PAY-3,tracking,0,5,0:05,,",
                "PAY-3,resolved,,,,,timed_out",
            ]
        );
    }

    #[test]
    fn test_preset_transaction_id() {
        let mut writer = EventWriter::new(Vec::new()).with_transaction_id("PAY-9");
        writer.write_state(&ReconciliationState::Idle).unwrap();

        let output = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        assert_eq!(output.lines().nth(1), Some("PAY-9,idle,,,,,"));
    }
}
