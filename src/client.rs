use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ThrottleSettings;
use crate::domain::{
    GeneHit, Identifier, ProbeResult, SequenceFormat, SequencePayload, TaxonId, TaxonRecord,
};
use crate::error::KiraError;
use crate::ncbi::NcbiClient;
use crate::rate_limit::Throttle;

pub const BATCH_SIZE: usize = 200;

const MAX_BACKOFF: Duration = Duration::from_secs(30);

pub struct RateLimitedClient<N: NcbiClient> {
    inner: Arc<N>,
    throttle: Arc<Throttle>,
    settings: ThrottleSettings,
}

impl<N: NcbiClient> Clone for RateLimitedClient<N> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            throttle: Arc::clone(&self.throttle),
            settings: self.settings,
        }
    }
}

impl<N: NcbiClient> RateLimitedClient<N> {
    pub fn new(inner: N, settings: ThrottleSettings) -> Self {
        Self {
            inner: Arc::new(inner),
            throttle: Arc::new(Throttle::new(&settings)),
            settings,
        }
    }

    pub async fn resolve_taxon(&self, name: &str) -> Result<TaxonId, KiraError> {
        self.call("resolve_taxon", || self.inner.resolve_taxon(name))
            .await?
            .ok_or_else(|| KiraError::UnknownTaxon(name.to_string()))
    }

    pub async fn list_descendant_species(
        &self,
        root: TaxonId,
    ) -> Result<Vec<TaxonRecord>, KiraError> {
        let mut ids = self.list_all_descendants(root).await?;
        ids.sort();
        ids.dedup();

        let mut records = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(BATCH_SIZE) {
            let named = match self
                .call("summarize_taxa", || self.inner.summarize_taxa(chunk))
                .await
            {
                Ok(named) => named,
                Err(KiraError::Cancelled) => return Err(KiraError::Cancelled),
                Err(err) => {
                    tracing::warn!(%root, batch = chunk.len(), error = %err, "taxonomy summary failed, using placeholder names");
                    Vec::new()
                }
            };
            for taxon_id in chunk {
                let scientific_name = named
                    .iter()
                    .find(|record| record.taxon_id == *taxon_id)
                    .map(|record| record.scientific_name.clone())
                    .unwrap_or_else(|| format!("txid{taxon_id}"));
                records.push(TaxonRecord {
                    taxon_id: *taxon_id,
                    scientific_name,
                });
            }
        }
        Ok(records)
    }

    async fn list_all_descendants(&self, root: TaxonId) -> Result<Vec<TaxonId>, KiraError> {
        let mut ids: Vec<TaxonId> = Vec::new();
        loop {
            let start = ids.len();
            let page = self
                .call("list_descendants", || self.inner.list_descendant_species(root, start))
                .await?;
            if page.ids.is_empty() && ids.len() < page.total {
                return Err(KiraError::NcbiDecode(format!(
                    "descendant listing for txid{root} stopped at {} of {}",
                    ids.len(),
                    page.total
                )));
            }
            ids.extend(page.ids);
            if ids.len() >= page.total {
                return Ok(ids);
            }
            tracing::debug!(%root, listed = ids.len(), total = page.total, "fetching next listing page");
        }
    }

    pub async fn probe(&self, taxon_id: TaxonId, gene_name: &str) -> Result<ProbeResult, KiraError> {
        let gene_ids = self
            .call("search_genes", || self.inner.search_genes(taxon_id, gene_name))
            .await?;
        if gene_ids.is_empty() {
            return Ok(ProbeResult::NoHit);
        }

        let mut identifiers = Vec::new();
        for chunk in gene_ids.chunks(BATCH_SIZE) {
            let records = self
                .call("fetch_gene_records", || self.inner.fetch_gene_records(chunk))
                .await?;
            for record in records {
                if let Some(taxon) = record.taxon_id {
                    if taxon != taxon_id {
                        tracing::debug!(%taxon, probed = %taxon_id, gene = %record.gene_id, "gene record filed under another taxon");
                    }
                }
                let Some(product) = record.preferred_product() else {
                    continue;
                };
                let identifier = Identifier::new(taxon_id, record.gene_id.clone(), product.clone());
                if !identifiers.contains(&identifier) {
                    identifiers.push(identifier);
                }
            }
        }

        if identifiers.is_empty() {
            return Ok(ProbeResult::NoHit);
        }
        Ok(ProbeResult::Hit(GeneHit { identifiers }))
    }

    pub async fn fetch(&self, identifier: &Identifier) -> Result<SequencePayload, KiraError> {
        let id = &identifier.sequence_id;
        match self
            .call("fetch_sequence", || {
                self.inner.fetch_sequence(id, SequenceFormat::FastaCds)
            })
            .await
        {
            Ok(bytes) => Ok(SequencePayload {
                bytes,
                format: SequenceFormat::FastaCds,
            }),
            Err(KiraError::NcbiDecode(reason)) => {
                tracing::debug!(%identifier, %reason, "no CDS, fetching full record");
                let bytes = self
                    .call("fetch_sequence", || {
                        self.inner.fetch_sequence(id, SequenceFormat::Fasta)
                    })
                    .await?;
                Ok(SequencePayload {
                    bytes,
                    format: SequenceFormat::Fasta,
                })
            }
            Err(err) => Err(err),
        }
    }

    async fn call<T, F, Fut>(&self, operation: &'static str, mut make_call: F) -> Result<T, KiraError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, KiraError>>,
    {
        let max_attempts = self.settings.max_attempts.max(1);
        let call_timeout = self.settings.call_timeout;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = {
                let _permit = self.throttle.admit().await?;
                match tokio::time::timeout(call_timeout, make_call()).await {
                    Ok(result) => result,
                    Err(_) => Err(KiraError::CallTimeout(call_timeout.as_millis() as u64)),
                }
            };

            match result {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    let delay = backoff(self.settings.base_delay, attempt);
                    tracing::debug!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying NCBI call"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) if err.is_transient() => {
                    tracing::warn!(operation, attempts = attempt, error = %err, "NCBI call exhausted retries");
                    return Err(KiraError::TransientFetch {
                        attempts: attempt,
                        message: err.to_string(),
                    });
                }
                Err(err) => return Err(err),
            }
        }
    }
}

pub fn backoff(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    base.saturating_mul(factor).min(MAX_BACKOFF)
}
