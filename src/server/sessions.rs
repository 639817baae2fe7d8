use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};

use crate::domain::DiscoveryOutcome;
use crate::selection::Selection;

#[derive(Debug)]
pub struct DiscoverySession {
    pub taxon_name: String,
    pub gene_name: String,
    pub outcome: DiscoveryOutcome,
    pub discovered_at: DateTime<Utc>,
}

impl DiscoverySession {
    pub fn new(taxon_name: &str, gene_name: &str, outcome: DiscoveryOutcome) -> Self {
        Self {
            taxon_name: taxon_name.trim().to_string(),
            gene_name: gene_name.trim().to_string(),
            outcome,
            discovered_at: Utc::now(),
        }
    }

    fn is_for(&self, taxon_name: &str, gene_name: &str) -> bool {
        self.taxon_name.eq_ignore_ascii_case(taxon_name.trim())
            && self.gene_name.eq_ignore_ascii_case(gene_name.trim())
    }

    fn found_all(&self, submitted: &Selection) -> bool {
        submitted
            .values()
            .flatten()
            .all(|identifier| self.outcome.contains(identifier))
    }
}

#[derive(Debug)]
pub struct SessionRegistry {
    sessions: Mutex<VecDeque<Arc<DiscoverySession>>>,
    capacity: usize,
}

impl SessionRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            sessions: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&self, session: DiscoverySession) -> Arc<DiscoverySession> {
        let session = Arc::new(session);
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        sessions.retain(|existing| !existing.is_for(&session.taxon_name, &session.gene_name));
        sessions.push_front(Arc::clone(&session));
        while sessions.len() > self.capacity {
            if let Some(evicted) = sessions.pop_back() {
                tracing::debug!(
                    taxon = evicted.taxon_name,
                    gene = evicted.gene_name,
                    "evicting discovery session"
                );
            }
        }
        session
    }

    pub fn find(
        &self,
        taxon_name: Option<&str>,
        gene_name: Option<&str>,
        submitted: &Selection,
    ) -> Option<Arc<DiscoverySession>> {
        let sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        sessions
            .iter()
            .filter(|session| match (taxon_name, gene_name) {
                (Some(taxon), Some(gene)) => session.is_for(taxon, gene),
                (Some(taxon), None) => session.taxon_name.eq_ignore_ascii_case(taxon.trim()),
                (None, Some(gene)) => session.gene_name.eq_ignore_ascii_case(gene.trim()),
                (None, None) => true,
            })
            .find(|session| session.found_all(submitted))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
