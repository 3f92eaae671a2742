use crate::model::{AnalysisError, AnalysisStage};
use chrono::{DateTime, Utc};
use tracing::debug;

/// Tracks one analysis request through its stages and rejects out-of-order moves.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    stage: AnalysisStage,
    history: Vec<(AnalysisStage, DateTime<Utc>)>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            stage: AnalysisStage::Idle,
            history: vec![(AnalysisStage::Idle, Utc::now())],
        }
    }

    pub fn stage(&self) -> AnalysisStage {
        self.stage
    }

    /// Every stage entered so far, oldest first.
    pub fn history(&self) -> &[(AnalysisStage, DateTime<Utc>)] {
        &self.history
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.stage, AnalysisStage::Done | AnalysisStage::Failed)
    }

    /// Idle -> Computing is allowed for callers that already hold their inputs.
    /// Computing -> Merged is the oracle-skipped path.
    pub fn is_legal(from: AnalysisStage, to: AnalysisStage) -> bool {
        use AnalysisStage::*;
        matches!(
            (from, to),
            (Idle, Fetching)
                | (Idle, Computing)
                | (Fetching, Computing)
                | (Fetching, Failed)
                | (Computing, AwaitingOracle)
                | (Computing, Merged)
                | (Computing, Failed)
                | (AwaitingOracle, Merged)
                | (AwaitingOracle, Failed)
                | (Merged, Done)
        )
    }

    pub fn advance(&mut self, to: AnalysisStage) -> Result<(), AnalysisError> {
        if !Self::is_legal(self.stage, to) {
            return Err(AnalysisError::IllegalTransition {
                from: self.stage,
                to,
            });
        }
        debug!(from = ?self.stage, to = ?to, "stage transition");
        self.stage = to;
        self.history.push((to, Utc::now()));
        Ok(())
    }

    /// Moves to Failed and hands back `err` so callers can `return Err(lc.fail(e))`.
    /// If the current stage cannot fail, the illegal transition is reported instead.
    pub fn fail(&mut self, err: AnalysisError) -> AnalysisError {
        match self.advance(AnalysisStage::Failed) {
            Ok(()) => err,
            Err(illegal) => illegal,
        }
    }
}
