use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::archive::{Archive, ArchiveBuilder};
use crate::client::RateLimitedClient;
use crate::config::ResolvedConfig;
use crate::discovery::TaxonomyDiscoverer;
use crate::domain::{DiscoveryOutcome, Identifier};
use crate::error::KiraError;
use crate::ncbi::NcbiClient;
use crate::retrieval::BulkRetriever;
use crate::selection::Selection;

#[derive(Debug, Clone, Serialize)]
pub struct DownloadSummary {
    pub archive: String,
    pub requested: usize,
    pub fetched: usize,
    pub species: Vec<String>,
    pub failed_species: Vec<String>,
}

impl DownloadSummary {
    pub fn new(archive: &Archive, path: impl Into<String>) -> Self {
        let manifest = &archive.manifest;
        Self {
            archive: path.into(),
            requested: manifest.requested,
            fetched: manifest.requested - manifest.failed_identifiers.len(),
            species: manifest
                .species
                .iter()
                .map(|entry| entry.name.clone())
                .collect(),
            failed_species: manifest.failed_species.clone(),
        }
    }
}

pub struct App<N: NcbiClient + 'static> {
    discoverer: TaxonomyDiscoverer<N>,
    retriever: BulkRetriever<N>,
    archive: ArchiveBuilder,
}

impl<N: NcbiClient + 'static> App<N> {
    pub fn new(ncbi: N, config: &ResolvedConfig) -> Self {
        let client = RateLimitedClient::new(ncbi, config.throttle);
        Self {
            discoverer: TaxonomyDiscoverer::new(client.clone(), config.session_timeout),
            retriever: BulkRetriever::new(client),
            archive: ArchiveBuilder::new().with_combined_fasta(config.combined_fasta),
        }
    }

    pub fn with_archive_builder(mut self, archive: ArchiveBuilder) -> Self {
        self.archive = archive;
        self
    }

    pub async fn discover(
        &self,
        taxon_name: &str,
        gene_name: &str,
        cancel: &CancellationToken,
    ) -> Result<DiscoveryOutcome, KiraError> {
        self.discoverer
            .discover_with_cancel(taxon_name, gene_name, cancel)
            .await
    }

    /// Retrieves every identifier in `selection` and packages the successes.
    /// Per-identifier failures end up in the archive manifest, not in `Err`.
    pub async fn download(
        &self,
        selection: &Selection,
        taxon_name: &str,
        gene_name: &str,
        cancel: &CancellationToken,
    ) -> Result<Archive, KiraError> {
        if selection.values().all(Vec::is_empty) {
            return Err(KiraError::InvalidQuery("nothing selected".to_string()));
        }
        let mut identifiers: Vec<Identifier> = selection.values().flatten().cloned().collect();
        identifiers.sort();
        identifiers.dedup();

        let outcomes = self
            .retriever
            .retrieve_with_cancel(&identifiers, cancel)
            .await?;
        let archive = self
            .archive
            .build(selection, &outcomes, taxon_name.trim(), gene_name.trim())?;
        if let Some(partial) = archive.partial_failure() {
            tracing::warn!(
                failed_species = ?archive.manifest.failed_species,
                "{partial}"
            );
        }
        Ok(archive)
    }
}
