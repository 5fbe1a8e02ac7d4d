//! Partial-result aggregation.
//!
//! Scanners finish in any order and status polls may repeat data that was
//! already delivered. Every poll answer is turned into a [`StatusSnapshot`]
//! and folded into one [`Report`] with [`merge`]:
//!
//! - a scanner's `arrived` flag never goes back to `false`;
//! - a scanner's payload is only ever replaced by a newer present payload,
//!   never cleared;
//! - `is_partial` stays `true` until a snapshot reports completion, and stays
//!   `false` afterwards;
//! - a failed report accepts no further merges.
//!
//! Merging the same snapshot twice yields the same report as merging it once.

use authscan_platform::{RemoteScanStatus, ScanStatusResponse, ScannerId};
use log::debug;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Terminal marker of a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Terminal {
    None,
    Completed,
    Failed,
}

/// One poll result.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    pub phase: String,
    /// Percentage, 0 to 100
    pub progress: u8,
    pub message: String,
    pub arrived: BTreeSet<ScannerId>,
    /// Present payloads only; a scanner missing here delivered nothing new
    pub payloads: BTreeMap<ScannerId, Value>,
    pub terminal: Terminal,
    /// Failure reason reported alongside `Terminal::Failed`
    pub error: Option<String>,
}

impl StatusSnapshot {
    /// A non-terminal snapshot with no scanner data.
    pub fn running(phase: impl Into<String>, progress: u8) -> Self {
        Self {
            phase: phase.into(),
            progress: progress.min(100),
            message: String::new(),
            arrived: BTreeSet::new(),
            payloads: BTreeMap::new(),
            terminal: Terminal::None,
            error: None,
        }
    }

    /// Mark `id` as arrived with `payload`.
    #[must_use]
    pub fn with_payload(mut self, id: ScannerId, payload: Value) -> Self {
        self.arrived.insert(id);
        self.payloads.insert(id, payload);
        self
    }

    /// Mark `id` as arrived without a payload.
    #[must_use]
    pub fn with_arrived(mut self, id: ScannerId) -> Self {
        self.arrived.insert(id);
        self
    }

    #[must_use]
    pub fn with_terminal(mut self, terminal: Terminal) -> Self {
        self.terminal = terminal;
        self
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

impl From<ScanStatusResponse> for StatusSnapshot {
    fn from(response: ScanStatusResponse) -> Self {
        let mut arrived = BTreeSet::new();
        for name in &response.arrived {
            match name.parse::<ScannerId>() {
                Ok(id) => {
                    arrived.insert(id);
                }
                Err(e) => debug!("Ignoring arrival flag: {e}"),
            }
        }

        let mut payloads = BTreeMap::new();
        for (name, payload) in response.results {
            let Some(payload) = payload else {
                continue;
            };
            match name.parse::<ScannerId>() {
                Ok(id) => {
                    arrived.insert(id);
                    payloads.insert(id, payload);
                }
                Err(e) => debug!("Ignoring scanner payload: {e}"),
            }
        }

        let terminal = match response.status {
            RemoteScanStatus::Queued | RemoteScanStatus::Running => Terminal::None,
            RemoteScanStatus::Completed => Terminal::Completed,
            RemoteScanStatus::Failed => Terminal::Failed,
        };

        Self {
            phase: response.phase,
            progress: response.progress.clamp(0, 100) as u8,
            message: response.message,
            arrived,
            payloads,
            terminal,
            error: response.error,
        }
    }
}

/// Aggregated state of one scanner.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScannerSlot {
    pub arrived: bool,
    pub payload: Option<Value>,
}

/// The cumulative view of all scanner results for one scan.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub scan_id: String,
    scanners: BTreeMap<ScannerId, ScannerSlot>,
    pub is_partial: bool,
    pub failure: Option<String>,
    pub phase: String,
    pub progress: u8,
    pub message: String,
}

impl Report {
    /// An empty report with a slot for every known scanner.
    pub fn new(scan_id: impl Into<String>) -> Self {
        Self {
            scan_id: scan_id.into(),
            scanners: ScannerId::ALL
                .into_iter()
                .map(|id| (id, ScannerSlot::default()))
                .collect(),
            is_partial: true,
            failure: None,
            phase: String::new(),
            progress: 0,
            message: String::new(),
        }
    }

    /// Every scanner slot, in report order.
    #[must_use]
    pub fn scanners(&self) -> &BTreeMap<ScannerId, ScannerSlot> {
        &self.scanners
    }

    #[must_use]
    pub fn slot(&self, id: ScannerId) -> Option<&ScannerSlot> {
        self.scanners.get(&id)
    }

    #[must_use]
    pub fn has_arrived(&self, id: ScannerId) -> bool {
        self.slot(id).is_some_and(|slot| slot.arrived)
    }

    #[must_use]
    pub fn payload(&self, id: ScannerId) -> Option<&Value> {
        self.slot(id).and_then(|slot| slot.payload.as_ref())
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.is_partial && !self.is_failed()
    }

    /// Scanners whose results have arrived, in report order.
    #[must_use]
    pub fn arrived(&self) -> Vec<ScannerId> {
        self.scanners
            .iter()
            .filter(|(_, slot)| slot.arrived)
            .map(|(id, _)| *id)
            .collect()
    }
}

fn merge_in_place(report: &mut Report, snapshot: &StatusSnapshot) {
    if report.is_failed() {
        return;
    }

    for id in &snapshot.arrived {
        report.scanners.entry(*id).or_default().arrived = true;
    }
    for (id, payload) in &snapshot.payloads {
        report.scanners.entry(*id).or_default().payload = Some(payload.clone());
    }

    report.phase.clone_from(&snapshot.phase);
    report.progress = snapshot.progress;
    report.message.clone_from(&snapshot.message);

    match snapshot.terminal {
        Terminal::Completed => report.is_partial = false,
        Terminal::Failed if report.is_partial => {
            let reason = snapshot
                .error
                .clone()
                .filter(|e| !e.is_empty())
                .or_else(|| Some(snapshot.message.clone()).filter(|m| !m.is_empty()))
                .unwrap_or_else(|| "scan failed".to_string());
            report.failure = Some(reason);
        }
        Terminal::Failed | Terminal::None => {}
    }
}

/// Fold `snapshot` into `report`.
#[must_use]
pub fn merge(mut report: Report, snapshot: &StatusSnapshot) -> Report {
    merge_in_place(&mut report, snapshot);
    report
}

/// What a merge changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Report updated; lists scanners that arrived with this snapshot
    Updated { newly_arrived: Vec<ScannerId> },
    /// Snapshot reported completion; the report is final
    Completed,
    /// Snapshot reported failure; no further merges are accepted
    Failed(String),
    /// Report had already failed; snapshot dropped
    Ignored,
}

/// Owns the report of one scan and applies snapshots to it.
#[derive(Debug, Clone)]
pub struct ResultAggregator {
    report: Report,
}

impl ResultAggregator {
    pub fn new(scan_id: impl Into<String>) -> Self {
        Self {
            report: Report::new(scan_id),
        }
    }

    #[must_use]
    pub fn report(&self) -> &Report {
        &self.report
    }

    #[must_use]
    pub fn into_report(self) -> Report {
        self.report
    }

    /// Merge one snapshot and describe the change.
    pub fn apply(&mut self, snapshot: &StatusSnapshot) -> MergeOutcome {
        if self.report.is_failed() {
            debug!(
                "Scan {} already failed, dropping snapshot",
                self.report.scan_id
            );
            return MergeOutcome::Ignored;
        }

        let before = self.report.arrived();
        let was_partial = self.report.is_partial;
        merge_in_place(&mut self.report, snapshot);

        if let Some(reason) = &self.report.failure {
            return MergeOutcome::Failed(reason.clone());
        }
        if was_partial && !self.report.is_partial {
            return MergeOutcome::Completed;
        }

        let newly_arrived = self
            .report
            .arrived()
            .into_iter()
            .filter(|id| !before.contains(id))
            .collect();
        MergeOutcome::Updated { newly_arrived }
    }
}
