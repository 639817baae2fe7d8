use std::collections::HashMap;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::client::RateLimitedClient;
use crate::domain::{Identifier, RetrievalOutcome, RetrievalStatus};
use crate::error::KiraError;
use crate::ncbi::NcbiClient;

pub struct BulkRetriever<N: NcbiClient + 'static> {
    client: RateLimitedClient<N>,
}

impl<N: NcbiClient + 'static> Clone for BulkRetriever<N> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
        }
    }
}

impl<N: NcbiClient + 'static> BulkRetriever<N> {
    pub fn new(client: RateLimitedClient<N>) -> Self {
        Self { client }
    }

    /// Outcomes are returned in the order of `identifiers`. A failed fetch
    /// becomes a [`RetrievalStatus::Failed`] entry and never aborts siblings.
    pub async fn retrieve(&self, identifiers: &[Identifier]) -> Vec<RetrievalOutcome> {
        let mut tasks = JoinSet::new();
        let mut slots: HashMap<tokio::task::Id, usize> = HashMap::with_capacity(identifiers.len());
        for (position, identifier) in identifiers.iter().enumerate() {
            let client = self.client.clone();
            let identifier = identifier.clone();
            let handle = tasks.spawn(async move { client.fetch(&identifier).await });
            slots.insert(handle.id(), position);
        }

        let mut statuses: Vec<Option<RetrievalStatus>> = vec![None; identifiers.len()];
        while let Some(joined) = tasks.join_next_with_id().await {
            let (task_id, status) = match joined {
                Ok((task_id, Ok(payload))) => (task_id, RetrievalStatus::Fetched(payload)),
                Ok((task_id, Err(err))) => (
                    task_id,
                    RetrievalStatus::Failed {
                        reason: err.to_string(),
                    },
                ),
                Err(err) => (
                    err.id(),
                    RetrievalStatus::Failed {
                        reason: format!("fetch task failed: {err}"),
                    },
                ),
            };
            if let Some(position) = slots.get(&task_id) {
                statuses[*position] = Some(status);
            }
        }

        let outcomes = identifiers
            .iter()
            .zip(statuses)
            .map(|(identifier, status)| RetrievalOutcome {
                identifier: identifier.clone(),
                status: status.unwrap_or_else(|| RetrievalStatus::Failed {
                    reason: "fetch task vanished".to_string(),
                }),
            })
            .collect::<Vec<_>>();

        let failed = outcomes
            .iter()
            .filter(|outcome| outcome.failure().is_some())
            .count();
        for outcome in outcomes.iter().filter(|outcome| outcome.failure().is_some()) {
            tracing::warn!(
                identifier = %outcome.identifier,
                reason = outcome.failure().unwrap_or_default(),
                "sequence not retrieved"
            );
        }
        tracing::info!(
            requested = identifiers.len(),
            fetched = identifiers.len() - failed,
            failed,
            "retrieval finished"
        );
        outcomes
    }

    pub async fn retrieve_with_cancel(
        &self,
        identifiers: &[Identifier],
        cancel: &CancellationToken,
    ) -> Result<Vec<RetrievalOutcome>, KiraError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(KiraError::Cancelled),
            outcomes = self.retrieve(identifiers) => Ok(outcomes),
        }
    }
}
