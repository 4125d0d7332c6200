use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::domain::Accession;
use crate::error::AmrError;
use crate::journal::Journal;

/// Processing stage of one accession.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessionState {
    New,
    Fetching,
    Fetched,
    Calling,
    Called,
    FeatureReady,
    CleanedUp,
    Failed,
}

impl AccessionState {
    pub fn can_transition_to(self, next: AccessionState) -> bool {
        use AccessionState::*;
        matches!(
            (self, next),
            (New, Fetching)
                | (New, Fetched)
                | (New, FeatureReady)
                | (Fetching, Fetched)
                | (Fetching, Failed)
                | (Fetched, Calling)
                | (Calling, Called)
                | (Calling, Failed)
                | (Called, FeatureReady)
                | (Called, CleanedUp)
                | (FeatureReady, CleanedUp)
        )
    }
}

impl fmt::Display for AccessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AccessionState::New => "new",
            AccessionState::Fetching => "fetching",
            AccessionState::Fetched => "fetched",
            AccessionState::Calling => "calling",
            AccessionState::Called => "called",
            AccessionState::FeatureReady => "feature_ready",
            AccessionState::CleanedUp => "cleaned_up",
            AccessionState::Failed => "failed",
        };
        write!(f, "{name}")
    }
}

/// The single owner of per-accession state during a batch.
///
/// Every change goes through [`StateLedger::advance`], which validates the
/// transition under one lock and appends it to the run journal.
pub struct StateLedger {
    states: Mutex<HashMap<Accession, AccessionState>>,
    journal: Arc<Journal>,
}

impl StateLedger {
    pub fn new(journal: Arc<Journal>) -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
            journal,
        }
    }

    pub fn register(&self, accession: &Accession) {
        let mut guard = self.lock();
        guard.entry(accession.clone()).or_insert(AccessionState::New);
    }

    pub fn state(&self, accession: &Accession) -> AccessionState {
        self.lock()
            .get(accession)
            .copied()
            .unwrap_or(AccessionState::New)
    }

    pub fn advance(&self, accession: &Accession, next: AccessionState) -> Result<(), AmrError> {
        let from = {
            let mut guard = self.lock();
            let current = guard.entry(accession.clone()).or_insert(AccessionState::New);
            if !current.can_transition_to(next) {
                return Err(AmrError::InvalidTransition {
                    accession: accession.to_string(),
                    from: current.to_string(),
                    to: next.to_string(),
                });
            }
            let from = *current;
            *current = next;
            from
        };
        tracing::debug!(accession = %accession, %from, to = %next, "state change");
        self.journal
            .append(&format!("{accession}\t{from} -> {next}"));
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Accession, AccessionState>> {
        // a poisoned map still holds consistent per-key states
        self.states.lock().unwrap_or_else(|err| err.into_inner())
    }
}
