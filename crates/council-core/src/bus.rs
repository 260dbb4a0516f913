//! Per-investigation evidence bus.
//!
//! Maps `(round_index, worker_id)` to the worker's [`Finding`], with one
//! critique slot and one result slot per round. The bus is owned by a single
//! investigation run (`&mut` access only), so it needs no locking:
//!
//! - each dispatched worker has exactly one reserved key per round, written once;
//! - [`EvidenceBus::seal_round`] is the barrier: it succeeds only when every
//!   reserved key is filled, and after it no more findings are accepted;
//! - readers get an owned [`RoundSnapshot`], and only for sealed rounds.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::domain::{BusError, CouncilResult, CritiqueReport, Finding, WorkerId};

/// Immutable view of one completed round.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundSnapshot {
    pub round_index: u32,
    /// Findings in dispatch order, one per dispatched worker.
    pub findings: Vec<Finding>,
}

impl RoundSnapshot {
    pub fn usable(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| f.is_usable())
    }

    pub fn usable_count(&self) -> usize {
        self.usable().count()
    }

    pub fn worker_ids(&self) -> Vec<WorkerId> {
        self.findings.iter().map(|f| f.worker_id().clone()).collect()
    }
}

#[derive(Debug)]
struct RoundEntry {
    /// Reserved keys in dispatch order.
    reserved: Vec<WorkerId>,
    findings: BTreeMap<WorkerId, Finding>,
    sealed: bool,
    /// Round finished without a committed result (synthesis failed).
    closed: bool,
    critique: Option<CritiqueReport>,
    result: Option<CouncilResult>,
}

impl RoundEntry {
    fn is_settled(&self) -> bool {
        self.sealed && (self.result.is_some() || self.closed)
    }
}

/// Key/value store of findings, critiques and results for one investigation.
#[derive(Debug, Default)]
pub struct EvidenceBus {
    rounds: BTreeMap<u32, RoundEntry>,
}

impl EvidenceBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve one key per dispatched worker for `round`.
    ///
    /// Rounds open in order starting at 1, and round N+1 cannot open until
    /// round N is sealed and has a committed result (or was closed).
    pub fn open_round(&mut self, round: u32, workers: &[WorkerId]) -> Result<(), BusError> {
        if self.rounds.contains_key(&round) {
            return Err(BusError::RoundAlreadyOpen { round });
        }
        let expected = self.rounds.keys().next_back().map_or(1, |last| last + 1);
        if round != expected {
            return Err(BusError::RoundOutOfOrder { round, expected });
        }
        if let Some((prev, entry)) = self.rounds.iter().next_back() {
            if !entry.is_settled() {
                return Err(BusError::PreviousRoundInProgress { round: *prev });
            }
        }
        self.rounds.insert(
            round,
            RoundEntry {
                reserved: workers.to_vec(),
                findings: BTreeMap::new(),
                sealed: false,
                closed: false,
                critique: None,
                result: None,
            },
        );
        Ok(())
    }

    /// Write a finding under its worker's reserved key. Write-once.
    pub fn write_finding(&mut self, finding: Finding) -> Result<(), BusError> {
        let round = finding.round_index();
        let entry = self
            .rounds
            .get_mut(&round)
            .ok_or(BusError::RoundNotOpen { round })?;
        if entry.sealed {
            return Err(BusError::RoundSealed { round });
        }
        let worker = finding.worker_id().clone();
        if !entry.reserved.contains(&worker) {
            return Err(BusError::UnreservedKey { round, worker });
        }
        if entry.findings.contains_key(&worker) {
            return Err(BusError::DuplicateWrite { round, worker });
        }
        entry.findings.insert(worker, finding);
        Ok(())
    }

    /// Barrier: seal `round` once every reserved key has been written.
    pub fn seal_round(&mut self, round: u32) -> Result<RoundSnapshot, BusError> {
        let entry = self
            .rounds
            .get_mut(&round)
            .ok_or(BusError::RoundNotOpen { round })?;
        let missing: Vec<WorkerId> = entry
            .reserved
            .iter()
            .filter(|w| !entry.findings.contains_key(*w))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(BusError::IncompleteRound { round, missing });
        }
        entry.sealed = true;
        self.snapshot(round)
    }

    /// Owned snapshot of a sealed round.
    pub fn snapshot(&self, round: u32) -> Result<RoundSnapshot, BusError> {
        let entry = self
            .rounds
            .get(&round)
            .ok_or(BusError::RoundNotOpen { round })?;
        if !entry.sealed {
            return Err(BusError::RoundNotSealed { round });
        }
        let findings = entry
            .reserved
            .iter()
            .filter_map(|w| entry.findings.get(w).cloned())
            .collect();
        Ok(RoundSnapshot {
            round_index: round,
            findings,
        })
    }

    /// Store the critic's review of a round. Write-once.
    pub fn write_critique(&mut self, critique: CritiqueReport) -> Result<(), BusError> {
        let round = critique.round_index;
        let entry = self
            .rounds
            .get_mut(&round)
            .ok_or(BusError::RoundNotOpen { round })?;
        if entry.critique.is_some() {
            return Err(BusError::SlotTaken {
                round,
                slot: "critique",
            });
        }
        entry.critique = Some(critique);
        Ok(())
    }

    /// Commit the synthesized result for a sealed `round`. Write-once.
    pub fn write_result(&mut self, round: u32, result: CouncilResult) -> Result<(), BusError> {
        let entry = self
            .rounds
            .get_mut(&round)
            .ok_or(BusError::RoundNotOpen { round })?;
        if !entry.sealed {
            return Err(BusError::RoundNotSealed { round });
        }
        if entry.result.is_some() || entry.closed {
            return Err(BusError::SlotTaken {
                round,
                slot: "result",
            });
        }
        entry.result = Some(result);
        Ok(())
    }

    /// Mark a sealed round as finished without a result so the next round may open.
    pub fn close_round(&mut self, round: u32) -> Result<(), BusError> {
        let entry = self
            .rounds
            .get_mut(&round)
            .ok_or(BusError::RoundNotOpen { round })?;
        if !entry.sealed {
            return Err(BusError::RoundNotSealed { round });
        }
        entry.closed = true;
        Ok(())
    }

    pub fn critique(&self, round: u32) -> Option<&CritiqueReport> {
        self.rounds.get(&round).and_then(|e| e.critique.as_ref())
    }

    pub fn result(&self, round: u32) -> Option<&CouncilResult> {
        self.rounds.get(&round).and_then(|e| e.result.as_ref())
    }

    /// Most recent committed result across all rounds.
    pub fn latest_result(&self) -> Option<&CouncilResult> {
        self.rounds.values().rev().find_map(|e| e.result.as_ref())
    }

    /// Most recent sealed round.
    pub fn latest_snapshot(&self) -> Option<RoundSnapshot> {
        let round = self
            .rounds
            .iter()
            .rev()
            .find(|(_, e)| e.sealed)
            .map(|(r, _)| *r)?;
        self.snapshot(round).ok()
    }

    /// Number of rounds opened so far.
    pub fn round_count(&self) -> u32 {
        self.rounds.len() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CouncilStatus, FailureKind, InvestigationMode, Stance};
    use uuid::Uuid;

    fn ids() -> Vec<WorkerId> {
        vec![WorkerId::new("logs"), WorkerId::new("metrics")]
    }

    fn finding(worker: &str, round: u32) -> Finding {
        Finding::new(WorkerId::new(worker), round, "ok", 0.7, Stance::Healthy, vec![])
    }

    fn result() -> CouncilResult {
        CouncilResult::new(
            Uuid::new_v4(),
            InvestigationMode::Standard,
            "n",
            0.5,
            vec![],
            1,
            CouncilStatus::Success,
        )
    }

    #[test]
    fn seal_requires_every_reserved_key() {
        let mut bus = EvidenceBus::new();
        bus.open_round(1, &ids()).unwrap();
        bus.write_finding(finding("logs", 1)).unwrap();

        let err = bus.seal_round(1).unwrap_err();
        assert_eq!(
            err,
            BusError::IncompleteRound {
                round: 1,
                missing: vec![WorkerId::new("metrics")]
            }
        );
        assert_eq!(bus.snapshot(1).unwrap_err(), BusError::RoundNotSealed { round: 1 });

        bus.write_finding(finding("metrics", 1)).unwrap();
        let snap = bus.seal_round(1).unwrap();
        assert_eq!(snap.findings.len(), 2);
        assert_eq!(snap.findings[0].worker_id().as_str(), "logs");
    }

    #[test]
    fn findings_are_write_once_and_key_scoped() {
        let mut bus = EvidenceBus::new();
        bus.open_round(1, &ids()).unwrap();
        bus.write_finding(finding("logs", 1)).unwrap();
        assert!(matches!(
            bus.write_finding(finding("logs", 1)),
            Err(BusError::DuplicateWrite { .. })
        ));
        assert!(matches!(
            bus.write_finding(finding("trace", 1)),
            Err(BusError::UnreservedKey { .. })
        ));
    }

    #[test]
    fn sealed_round_rejects_late_writes() {
        let mut bus = EvidenceBus::new();
        bus.open_round(1, &[WorkerId::new("logs")]).unwrap();
        bus.write_finding(finding("logs", 1)).unwrap();
        bus.seal_round(1).unwrap();
        let late = Finding::failed_with(WorkerId::new("logs"), 1, FailureKind::Timeout, "late");
        assert_eq!(bus.write_finding(late), Err(BusError::RoundSealed { round: 1 }));
    }

    #[test]
    fn next_round_waits_for_committed_result() {
        let mut bus = EvidenceBus::new();
        bus.open_round(1, &[WorkerId::new("logs")]).unwrap();
        assert_eq!(
            bus.open_round(2, &[WorkerId::new("logs")]),
            Err(BusError::PreviousRoundInProgress { round: 1 })
        );
        bus.write_finding(finding("logs", 1)).unwrap();
        bus.seal_round(1).unwrap();
        assert!(bus.open_round(2, &[WorkerId::new("logs")]).is_err());
        bus.write_result(1, result()).unwrap();
        bus.open_round(2, &[WorkerId::new("logs")]).unwrap();
        assert_eq!(bus.round_count(), 2);
    }

    #[test]
    fn rounds_open_in_order() {
        let mut bus = EvidenceBus::new();
        assert_eq!(
            bus.open_round(2, &ids()),
            Err(BusError::RoundOutOfOrder {
                round: 2,
                expected: 1
            })
        );
    }

    #[test]
    fn closed_round_unblocks_next_round() {
        let mut bus = EvidenceBus::new();
        bus.open_round(1, &[WorkerId::new("logs")]).unwrap();
        bus.write_finding(finding("logs", 1)).unwrap();
        bus.seal_round(1).unwrap();
        bus.close_round(1).unwrap();
        bus.open_round(2, &[WorkerId::new("logs")]).unwrap();
        assert!(bus.latest_result().is_none());
        assert_eq!(bus.latest_snapshot().unwrap().round_index, 1);
    }

    #[test]
    fn latest_result_tracks_newest_round() {
        let mut bus = EvidenceBus::new();
        bus.open_round(1, &[WorkerId::new("logs")]).unwrap();
        bus.write_finding(finding("logs", 1)).unwrap();
        bus.seal_round(1).unwrap();
        bus.write_result(1, result().with_round_count(1)).unwrap();
        assert!(bus.write_result(1, result()).is_err());
        assert_eq!(bus.latest_result().unwrap().round_count, 1);
    }
}
