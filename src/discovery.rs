use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::client::RateLimitedClient;
use crate::domain::{DiscoveryOutcome, ProbeResult, SpeciesIndex, SpeciesResult, TaxonId, TaxonRecord};
use crate::error::KiraError;
use crate::ncbi::NcbiClient;

pub struct TaxonomyDiscoverer<N: NcbiClient + 'static> {
    client: RateLimitedClient<N>,
    session_timeout: Option<Duration>,
}

impl<N: NcbiClient + 'static> Clone for TaxonomyDiscoverer<N> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            session_timeout: self.session_timeout,
        }
    }
}

impl<N: NcbiClient + 'static> TaxonomyDiscoverer<N> {
    pub fn new(client: RateLimitedClient<N>, session_timeout: Option<Duration>) -> Self {
        Self {
            client,
            session_timeout,
        }
    }

    pub async fn discover(
        &self,
        taxon_name: &str,
        gene_name: &str,
    ) -> Result<DiscoveryOutcome, KiraError> {
        self.discover_with_cancel(taxon_name, gene_name, &CancellationToken::new())
            .await
    }

    pub async fn discover_with_cancel(
        &self,
        taxon_name: &str,
        gene_name: &str,
        cancel: &CancellationToken,
    ) -> Result<DiscoveryOutcome, KiraError> {
        let taxon_name = validate_query("taxon name", taxon_name)?;
        let gene_name = validate_query("gene name", gene_name)?;

        let session = async {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(KiraError::Cancelled),
                result = self.run(taxon_name, gene_name) => result,
            }
        };
        match self.session_timeout {
            Some(limit) => tokio::time::timeout(limit, session)
                .await
                .map_err(|_| KiraError::SessionTimeout(limit.as_secs()))?,
            None => session.await,
        }
    }

    async fn run(&self, taxon_name: &str, gene_name: &str) -> Result<DiscoveryOutcome, KiraError> {
        let root = match literal_taxon_id(taxon_name) {
            Some(root) => root,
            None => self.client.resolve_taxon(taxon_name).await?,
        };
        let descendants = self.client.list_descendant_species(root).await?;
        tracing::info!(
            taxon = taxon_name,
            %root,
            gene = gene_name,
            species = descendants.len(),
            "probing descendant species"
        );

        let index = Arc::new(SpeciesIndex::new());
        let gene: Arc<str> = Arc::from(gene_name);
        let mut tasks = JoinSet::new();
        let mut pending: HashMap<tokio::task::Id, TaxonRecord> = HashMap::new();
        for record in descendants {
            let client = self.client.clone();
            let index = Arc::clone(&index);
            let gene = Arc::clone(&gene);
            let probed = record.clone();
            let handle = tasks.spawn(async move {
                let result = client.probe(probed.taxon_id, &gene).await;
                if matches!(result, Ok(ProbeResult::Hit(_))) {
                    index.insert_if_absent(probed.taxon_id, &probed.scientific_name);
                }
                result
            });
            pending.insert(handle.id(), record);
        }

        let mut outcome = DiscoveryOutcome::empty(root);
        while let Some(joined) = tasks.join_next_with_id().await {
            let (task_id, result) = match joined {
                Ok((task_id, result)) => (task_id, result),
                Err(err) => (err.id(), Err(KiraError::NcbiDecode(format!("probe task failed: {err}")))),
            };
            let Some(record) = pending.remove(&task_id) else {
                continue;
            };
            record_probe(&mut outcome, &index, record, result);
        }

        outcome.index = Arc::try_unwrap(index).unwrap_or_else(|shared| (*shared).clone());
        tracing::info!(
            %root,
            hits = outcome.species.len(),
            no_hits = outcome.no_hits.len(),
            errors = outcome.errors.len(),
            "discovery finished"
        );
        Ok(outcome)
    }
}

fn record_probe(
    outcome: &mut DiscoveryOutcome,
    index: &SpeciesIndex,
    record: TaxonRecord,
    result: Result<ProbeResult, KiraError>,
) {
    let taxon_id = record.taxon_id;
    match result {
        Ok(ProbeResult::Hit(hit)) => {
            let display_name = index
                .name(taxon_id)
                .unwrap_or_else(|| index.insert_if_absent(taxon_id, &record.scientific_name));
            let species = outcome
                .species
                .entry(taxon_id)
                .or_insert_with(|| SpeciesResult::new(taxon_id, display_name));
            for identifier in hit.identifiers {
                if let Err(err) = species.push(identifier) {
                    tracing::warn!(%taxon_id, error = %err, "dropping misfiled identifier");
                }
            }
        }
        Ok(ProbeResult::NoHit) => {
            outcome.no_hits.insert(taxon_id);
        }
        Err(err) => {
            tracing::warn!(
                %taxon_id,
                species = record.scientific_name,
                error = %err,
                "probe failed"
            );
            outcome.errors.insert(taxon_id, err.to_string());
        }
    }
}

fn validate_query<'a>(what: &str, value: &'a str) -> Result<&'a str, KiraError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(KiraError::InvalidQuery(format!("{what} is empty")));
    }
    Ok(trimmed)
}

fn literal_taxon_id(taxon_name: &str) -> Option<TaxonId> {
    let digits = taxon_name.strip_prefix("txid").unwrap_or(taxon_name);
    if digits.is_empty() || !digits.chars().all(|ch| ch.is_ascii_digit()) {
        return None;
    }
    taxon_name.parse().ok()
}
