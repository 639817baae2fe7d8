#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use kira_clade::config::{Config, ConfigLoader, EnvOverrides, ResolvedConfig, ThrottleSettings};
use kira_clade::domain::{GeneId, SequenceFormat, SequenceId, TaxonId, TaxonRecord};
use kira_clade::error::KiraError;
use kira_clade::ncbi::{GeneRecord, IdPage, NcbiClient};

pub fn txid(value: u64) -> TaxonId {
    TaxonId::new(value).unwrap()
}

/// In-memory stand-in for Entrez.
#[derive(Default)]
pub struct MockNcbi {
    roots: HashMap<String, TaxonId>,
    descendants: HashMap<TaxonId, Vec<TaxonId>>,
    names: HashMap<TaxonId, String>,
    genes: HashMap<TaxonId, Vec<(Option<String>, GeneRecord)>>,
    sequences: HashMap<String, Vec<u8>>,
    hanging: HashSet<String>,
    failing_taxa: HashSet<TaxonId>,
    throttled_calls: Option<(u32, u32)>,
    listing_page: Option<usize>,
    stats: Arc<CallStats>,
}

/// Request counters, shared so tests can read them after the mock was moved
/// into a client.
#[derive(Default)]
pub struct CallStats {
    pub calls: AtomicU32,
    pub throttled: AtomicU32,
    pub in_flight: AtomicUsize,
    pub peak_in_flight: AtomicUsize,
    pub fetched: Mutex<Vec<String>>,
}

impl MockNcbi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> Arc<CallStats> {
        Arc::clone(&self.stats)
    }

    pub fn with_taxon(mut self, name: &str, root: TaxonId, species: &[(TaxonId, &str)]) -> Self {
        self.roots.insert(name.to_lowercase(), root);
        self.descendants
            .entry(root)
            .or_default()
            .extend(species.iter().map(|(id, _)| *id));
        for (id, species_name) in species {
            self.names.insert(*id, species_name.to_string());
        }
        self
    }

    /// A descendant the taxonomy summary does not name.
    pub fn with_unnamed_species(mut self, root: TaxonId, species: TaxonId) -> Self {
        self.descendants.entry(root).or_default().push(species);
        self
    }

    /// A gene record found by every gene search for `taxon_id`.
    pub fn with_gene(self, taxon_id: TaxonId, gene_id: &str, products: &[&str]) -> Self {
        self.push_gene(None, taxon_id, gene_id, products)
    }

    /// A gene record found only when searching for `gene_name`.
    pub fn with_named_gene(
        self,
        taxon_id: TaxonId,
        gene_name: &str,
        gene_id: &str,
        products: &[&str],
    ) -> Self {
        self.push_gene(Some(gene_name.to_lowercase()), taxon_id, gene_id, products)
    }

    fn push_gene(
        mut self,
        gene_name: Option<String>,
        taxon_id: TaxonId,
        gene_id: &str,
        products: &[&str],
    ) -> Self {
        let record = GeneRecord {
            gene_id: gene_id.parse().unwrap(),
            taxon_id: Some(taxon_id),
            products: products.iter().map(|p| p.parse().unwrap()).collect(),
        };
        self.genes.entry(taxon_id).or_default().push((gene_name, record));
        self
    }

    pub fn with_sequence(mut self, accession: &str, fasta: &str) -> Self {
        self.sequences
            .insert(accession.to_string(), fasta.as_bytes().to_vec());
        self
    }

    /// Fetches of `accession` never answer.
    pub fn with_hanging_sequence(mut self, accession: &str) -> Self {
        self.hanging.insert(accession.to_string());
        self
    }

    /// Gene searches for `taxon_id` fail with a non-retryable error.
    pub fn with_failing_taxon(mut self, taxon_id: TaxonId) -> Self {
        self.failing_taxa.insert(taxon_id);
        self
    }

    /// After the first `calls` requests, the next `burst` are answered with 429.
    pub fn throttling_after(mut self, calls: u32, burst: u32) -> Self {
        self.throttled_calls = Some((calls, burst));
        self
    }

    /// Descendant listings are served `size` ids per page.
    pub fn with_listing_page(mut self, size: usize) -> Self {
        self.listing_page = Some(size);
        self
    }

    fn enter(&self) -> Result<InFlight<'_>, KiraError> {
        let stats = &self.stats;
        let call = stats.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((after, burst)) = self.throttled_calls {
            if call > after && call <= after + burst {
                stats.throttled.fetch_add(1, Ordering::SeqCst);
                return Err(KiraError::NcbiStatus {
                    status: 429,
                    message: "API rate limit exceeded".to_string(),
                });
            }
        }
        let now = stats.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        stats.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        Ok(InFlight(&stats.in_flight))
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl NcbiClient for MockNcbi {
    async fn resolve_taxon(&self, name: &str) -> Result<Option<TaxonId>, KiraError> {
        let _guard = self.enter()?;
        Ok(self.roots.get(&name.to_lowercase()).copied())
    }

    async fn list_descendant_species(
        &self,
        root: TaxonId,
        start: usize,
    ) -> Result<IdPage<TaxonId>, KiraError> {
        let _guard = self.enter()?;
        let all = self.descendants.get(&root).cloned().unwrap_or_default();
        let size = self.listing_page.unwrap_or(all.len().max(1));
        Ok(IdPage {
            total: all.len(),
            ids: all.into_iter().skip(start).take(size).collect(),
        })
    }

    async fn summarize_taxa(&self, ids: &[TaxonId]) -> Result<Vec<TaxonRecord>, KiraError> {
        let _guard = self.enter()?;
        Ok(ids
            .iter()
            .filter_map(|id| {
                self.names.get(id).map(|name| TaxonRecord {
                    taxon_id: *id,
                    scientific_name: name.clone(),
                })
            })
            .collect())
    }

    async fn search_genes(
        &self,
        taxon_id: TaxonId,
        gene_name: &str,
    ) -> Result<Vec<GeneId>, KiraError> {
        let _guard = self.enter()?;
        tokio::time::sleep(Duration::from_millis(5)).await;
        if self.failing_taxa.contains(&taxon_id) {
            return Err(KiraError::NcbiStatus {
                status: 400,
                message: "malformed term".to_string(),
            });
        }
        let wanted = gene_name.trim().to_lowercase();
        Ok(self
            .genes
            .get(&taxon_id)
            .map(|records| {
                records
                    .iter()
                    .filter(|(name, _)| name.as_ref().is_none_or(|name| *name == wanted))
                    .map(|(_, record)| record.gene_id.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn fetch_gene_records(&self, ids: &[GeneId]) -> Result<Vec<GeneRecord>, KiraError> {
        let _guard = self.enter()?;
        Ok(self
            .genes
            .values()
            .flatten()
            .map(|(_, record)| record)
            .filter(|record| ids.contains(&record.gene_id))
            .cloned()
            .collect())
    }

    async fn fetch_sequence(
        &self,
        id: &SequenceId,
        format: SequenceFormat,
    ) -> Result<Vec<u8>, KiraError> {
        let _guard = self.enter()?;
        if self.hanging.contains(id.as_str()) {
            std::future::pending::<()>().await;
        }
        self.stats.fetched.lock().unwrap().push(id.to_string());
        match (self.sequences.get(id.as_str()), format) {
            (Some(bytes), _) => Ok(bytes.clone()),
            (None, SequenceFormat::FastaCds) => {
                Err(KiraError::NcbiDecode(format!("no {format} sequence for {id}")))
            }
            (None, SequenceFormat::Fasta) => Err(KiraError::NcbiStatus {
                status: 400,
                message: format!("unknown accession {id}"),
            }),
        }
    }
}

pub fn fast_throttle() -> ThrottleSettings {
    ThrottleSettings {
        requests_per_window: 50,
        window: Duration::from_secs(1),
        max_in_flight: 4,
        max_attempts: 4,
        base_delay: Duration::from_millis(100),
        call_timeout: Duration::from_secs(2),
    }
}

pub fn test_config() -> ResolvedConfig {
    let mut config = ConfigLoader::resolve_config(Config::default(), &EnvOverrides::default())
        .unwrap();
    config.throttle = fast_throttle();
    config
}

/// Felidae with one TP53 carrier, one species without it, and one whose
/// gene search fails.
pub fn felidae() -> MockNcbi {
    MockNcbi::new()
        .with_taxon(
            "Felidae",
            txid(9681),
            &[
                (txid(9685), "Felis catus"),
                (txid(9689), "Panthera leo"),
                (txid(9694), "Panthera tigris"),
            ],
        )
        .with_gene(txid(9685), "GFELC1", &["NM_001"])
        .with_sequence("NM_001", ">NM_001.1 Felis catus TP53 CDS\nATGGAGGAGTCGCAG\n")
        .with_failing_taxon(txid(9694))
}
