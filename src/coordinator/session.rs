//! Upload session state machine
//!
//! Tracks one upload from initialize to completion. Owned by the caller and
//! mutated only by the coordinator.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use super::api::UploadGrant;
use crate::error::{Result, UploadError};
use crate::metrics::PhaseTimings;
use crate::plan::PartPlan;
use crate::storage::{Destination, PartResult, WorkUnit};

/// Session phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionPhase {
    /// Waiting for the service to grant destinations
    Initializing,
    /// Parts in flight
    Transferring,
    /// Submitting part metadata
    Completing,
    /// Upload finished
    Done,
    /// Aborted; the session cannot be resumed
    Failed,
}

impl SessionPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionPhase::Done | SessionPhase::Failed)
    }

    /// Legal transitions: forward one step, or to Failed from any non-terminal phase
    pub fn can_transition_to(self, next: SessionPhase) -> bool {
        use SessionPhase::*;
        match (self, next) {
            (Initializing, Transferring) | (Transferring, Completing) | (Completing, Done) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// State of one upload
#[derive(Debug)]
pub struct UploadSession {
    upload_id: Option<String>,
    plan: PartPlan,
    destinations: BTreeMap<u32, Destination>,
    results: Vec<PartResult>,
    phase: SessionPhase,
    history: Vec<SessionPhase>,
    failure: Option<String>,
    pub(crate) timings: PhaseTimings,
}

impl UploadSession {
    /// Create a session for `plan`, in the Initializing phase
    pub fn new(plan: PartPlan) -> Self {
        Self {
            upload_id: None,
            plan,
            destinations: BTreeMap::new(),
            results: Vec::new(),
            phase: SessionPhase::Initializing,
            history: vec![SessionPhase::Initializing],
            failure: None,
            timings: PhaseTimings::default(),
        }
    }

    pub fn upload_id(&self) -> Option<&str> {
        self.upload_id.as_deref()
    }

    pub fn plan(&self) -> &PartPlan {
        &self.plan
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Every phase the session has been in, oldest first
    pub fn history(&self) -> &[SessionPhase] {
        &self.history
    }

    /// Results collected so far, in completion order
    pub fn results(&self) -> &[PartResult] {
        &self.results
    }

    pub fn destination(&self, part_number: u32) -> Option<&Destination> {
        self.destinations.get(&part_number)
    }

    /// Message of the error that failed the session
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub fn timings(&self) -> &PhaseTimings {
        &self.timings
    }

    pub fn transferred_bytes(&self) -> u64 {
        self.results.iter().map(|r| r.size).sum()
    }

    /// Move to `next`, rejecting illegal transitions
    pub fn advance(&mut self, next: SessionPhase) -> Result<()> {
        if !self.phase.can_transition_to(next) {
            return Err(UploadError::Internal {
                message: format!("illegal session transition {:?} -> {:?}", self.phase, next),
            });
        }
        debug!("Session {:?}: {:?} -> {:?}", self.upload_id, self.phase, next);
        self.phase = next;
        self.history.push(next);
        Ok(())
    }

    pub(crate) fn expect_phase(&self, expected: SessionPhase) -> Result<()> {
        if self.phase != expected {
            return Err(UploadError::Internal {
                message: format!("session is {:?}, expected {:?}", self.phase, expected),
            });
        }
        Ok(())
    }

    /// Mark the session failed; no-op once terminal
    pub fn fail(&mut self, err: &UploadError) {
        if self.phase.is_terminal() {
            return;
        }
        warn!("Session {:?} failed during {:?}: {}", self.upload_id, self.phase, err);
        self.failure = Some(err.to_string());
        self.phase = SessionPhase::Failed;
        self.history.push(SessionPhase::Failed);
    }

    /// Adopt the service's grant.
    ///
    /// A layout differing from the local plan is accepted if it is itself a
    /// valid plan of the same object.
    pub fn accept_grant(&mut self, grant: UploadGrant) -> Result<()> {
        let sizes: Vec<(u32, u64)> = grant.parts.iter().map(|p| (p.part_number, p.size)).collect();
        let granted = PartPlan::from_sizes(self.plan.total_size(), &sizes).map_err(|e| {
            UploadError::service("initialize", Some(200), format!("unusable part layout: {}", e))
        })?;

        if !granted.same_layout(&self.plan) {
            warn!(
                "Service planned {} parts of {} bytes, local plan had {} parts of {} bytes; using the service layout",
                granted.len(),
                granted.part_size(),
                self.plan.len(),
                self.plan.part_size()
            );
            self.plan = granted;
        }

        self.destinations = grant
            .parts
            .into_iter()
            .map(|p| (p.part_number, p.destination))
            .collect();
        self.upload_id = Some(grant.upload_id);
        Ok(())
    }

    /// One work unit per planned part
    pub fn work_units(&self) -> Result<Vec<WorkUnit>> {
        self.plan
            .iter()
            .map(|part| {
                let destination = self.destinations.get(&part.number).cloned().ok_or_else(|| {
                    UploadError::service(
                        "initialize",
                        None,
                        format!("no destination granted for part {}", part.number),
                    )
                })?;
                Ok(WorkUnit::new(*part, destination))
            })
            .collect()
    }

    pub(crate) fn record_results(&mut self, results: Vec<PartResult>) {
        self.results.extend(results);
    }

    /// Results ordered by part number, as the completion call expects
    pub fn sorted_results(&self) -> Vec<PartResult> {
        let mut sorted = self.results.clone();
        sorted.sort_by_key(|r| r.part_number);
        sorted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::api::GrantedPart;
    use crate::plan::{plan_parts, PartLimits};

    fn grant(sizes: &[u64]) -> UploadGrant {
        UploadGrant {
            upload_id: "upload-1".into(),
            parts: sizes
                .iter()
                .enumerate()
                .map(|(idx, size)| GrantedPart {
                    part_number: idx as u32 + 1,
                    size: *size,
                    destination: Destination::Presigned {
                        url: format!("http://store/part/{}", idx + 1),
                    },
                })
                .collect(),
        }
    }

    fn session(total: u64, part: u64) -> UploadSession {
        UploadSession::new(plan_parts(total, part, &PartLimits::default()).unwrap())
    }

    #[test]
    fn test_transitions() {
        use SessionPhase::*;
        assert!(Initializing.can_transition_to(Transferring));
        assert!(Transferring.can_transition_to(Failed));
        assert!(!Initializing.can_transition_to(Completing));
        assert!(!Done.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Transferring));
    }

    #[test]
    fn test_illegal_advance_rejected() {
        let mut s = session(100, 10);
        assert!(s.advance(SessionPhase::Done).is_err());
        assert_eq!(s.phase(), SessionPhase::Initializing);
    }

    #[test]
    fn test_fail_is_sticky() {
        let mut s = session(100, 10);
        s.fail(&UploadError::configuration("x"));
        s.fail(&UploadError::configuration("y"));
        assert_eq!(s.phase(), SessionPhase::Failed);
        assert_eq!(s.failure(), Some("Invalid configuration: x"));
        assert_eq!(s.history(), &[SessionPhase::Initializing, SessionPhase::Failed]);
    }

    #[test]
    fn test_grant_matching_plan() {
        let mut s = session(25, 10);
        s.accept_grant(grant(&[10, 10, 5])).unwrap();
        assert_eq!(s.upload_id(), Some("upload-1"));
        let units = s.work_units().unwrap();
        assert_eq!(units.len(), 3);
        assert_eq!(units[2].part.offset, 20);
    }

    #[test]
    fn test_grant_with_other_layout_is_adopted() {
        let mut s = session(25, 10);
        s.accept_grant(grant(&[20, 5])).unwrap();
        assert_eq!(s.plan().len(), 2);
        assert_eq!(s.plan().part_size(), 20);
    }

    #[test]
    fn test_grant_with_bad_total_rejected() {
        let mut s = session(25, 10);
        let err = s.accept_grant(grant(&[10, 10])).unwrap_err();
        assert!(matches!(err, UploadError::Service { .. }));
    }

    #[test]
    fn test_sorted_results() {
        let mut s = session(30, 10);
        s.record_results(vec![
            PartResult::new(3, 10, "c"),
            PartResult::new(1, 10, "a"),
            PartResult::new(2, 10, "b"),
        ]);
        let numbers: Vec<u32> = s.sorted_results().iter().map(|r| r.part_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(s.transferred_bytes(), 30);
    }
}
