use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize, Serializer};

use crate::error::KiraError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaxonId(u64);

impl TaxonId {
    pub fn new(value: u64) -> Result<Self, KiraError> {
        if value == 0 {
            return Err(KiraError::InvalidIdentifier("taxon id 0".to_string()));
        }
        Ok(Self(value))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaxonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaxonId {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let trimmed = trimmed.strip_prefix("txid").unwrap_or(trimmed);
        let parsed = trimmed
            .parse::<u64>()
            .map_err(|_| KiraError::InvalidIdentifier(format!("taxon id {value:?}")))?;
        Self::new(parsed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GeneId(String);

impl GeneId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GeneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for GeneId {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        let is_valid = !normalized.is_empty()
            && normalized
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.'));
        if !is_valid {
            return Err(KiraError::InvalidIdentifier(format!("gene id {value:?}")));
        }
        Ok(Self(normalized.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SequenceId(String);

impl SequenceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_curated_transcript(&self) -> bool {
        self.0.starts_with("NM_")
    }
}

impl fmt::Display for SequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SequenceId {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        let mut parts = normalized.splitn(2, '.');
        let accession = parts.next().unwrap_or_default();
        let version_ok = parts
            .next()
            .map(|version| !version.is_empty() && version.chars().all(|ch| ch.is_ascii_digit()))
            .unwrap_or(true);
        let is_valid = !accession.is_empty()
            && accession
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
            && accession.chars().any(|ch| ch.is_ascii_digit())
            && version_ok;
        if !is_valid {
            return Err(KiraError::InvalidIdentifier(format!(
                "sequence id {value:?}"
            )));
        }
        Ok(Self(normalized.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Identifier {
    pub taxon_id: TaxonId,
    pub gene_id: GeneId,
    pub sequence_id: SequenceId,
}

impl Identifier {
    pub fn new(taxon_id: TaxonId, gene_id: GeneId, sequence_id: SequenceId) -> Self {
        Self {
            taxon_id,
            gene_id,
            sequence_id,
        }
    }

    pub fn parse(taxon_id: &str, gene_id: &str, sequence_id: &str) -> Result<Self, KiraError> {
        Ok(Self::new(
            taxon_id.parse()?,
            gene_id.parse()?,
            sequence_id.parse()?,
        ))
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "txid{}:{}:{}",
            self.taxon_id, self.gene_id, self.sequence_id
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpeciesResult {
    pub display_name: String,
    taxon_id: TaxonId,
    identifiers: Vec<Identifier>,
}

impl SpeciesResult {
    pub fn new(taxon_id: TaxonId, display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            taxon_id,
            identifiers: Vec::new(),
        }
    }

    pub fn taxon_id(&self) -> TaxonId {
        self.taxon_id
    }

    pub fn identifiers(&self) -> &[Identifier] {
        &self.identifiers
    }

    pub fn push(&mut self, identifier: Identifier) -> Result<(), KiraError> {
        if identifier.taxon_id != self.taxon_id {
            return Err(KiraError::InvalidIdentifier(format!(
                "{identifier} does not belong to txid{}",
                self.taxon_id
            )));
        }
        if !self.identifiers.contains(&identifier) {
            self.identifiers.push(identifier);
        }
        Ok(())
    }
}

/// Taxon id to display name, first writer wins.
#[derive(Debug, Default)]
pub struct SpeciesIndex {
    names: RwLock<BTreeMap<TaxonId, String>>,
}

impl SpeciesIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_if_absent(&self, taxon_id: TaxonId, name: &str) -> String {
        let mut names = self.names.write().unwrap_or_else(PoisonError::into_inner);
        names
            .entry(taxon_id)
            .or_insert_with(|| name.to_string())
            .clone()
    }

    pub fn name(&self, taxon_id: TaxonId) -> Option<String> {
        let names = self.names.read().unwrap_or_else(PoisonError::into_inner);
        names.get(&taxon_id).cloned()
    }

    pub fn taxa_named(&self, display_name: &str) -> Vec<TaxonId> {
        let names = self.names.read().unwrap_or_else(PoisonError::into_inner);
        names
            .iter()
            .filter(|(_, name)| name.as_str() == display_name)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.names
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> BTreeMap<TaxonId, String> {
        self.names
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Clone for SpeciesIndex {
    fn clone(&self) -> Self {
        Self {
            names: RwLock::new(self.snapshot()),
        }
    }
}

impl Serialize for SpeciesIndex {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.snapshot().serialize(serializer)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxonRecord {
    pub taxon_id: TaxonId,
    pub scientific_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneHit {
    pub identifiers: Vec<Identifier>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeResult {
    Hit(GeneHit),
    NoHit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveryOutcome {
    pub root: TaxonId,
    pub species: BTreeMap<TaxonId, SpeciesResult>,
    pub no_hits: BTreeSet<TaxonId>,
    pub errors: BTreeMap<TaxonId, String>,
    #[serde(skip)]
    pub index: SpeciesIndex,
}

impl PartialEq for SpeciesIndex {
    fn eq(&self, other: &Self) -> bool {
        self.snapshot() == other.snapshot()
    }
}

impl Eq for SpeciesIndex {}

impl DiscoveryOutcome {
    pub fn empty(root: TaxonId) -> Self {
        Self {
            root,
            species: BTreeMap::new(),
            no_hits: BTreeSet::new(),
            errors: BTreeMap::new(),
            index: SpeciesIndex::new(),
        }
    }

    pub fn probed(&self) -> usize {
        self.species.len() + self.no_hits.len() + self.errors.len()
    }

    pub fn is_hit(&self, taxon_id: TaxonId) -> bool {
        self.species.contains_key(&taxon_id)
    }

    pub fn contains(&self, identifier: &Identifier) -> bool {
        self.species
            .get(&identifier.taxon_id)
            .is_some_and(|species| species.identifiers().contains(identifier))
    }

    pub fn by_display_name(&self) -> BTreeMap<String, Vec<Identifier>> {
        let mut grouped: BTreeMap<String, Vec<Identifier>> = BTreeMap::new();
        for result in self.species.values() {
            grouped
                .entry(result.display_name.clone())
                .or_default()
                .extend(result.identifiers().iter().cloned());
        }
        grouped
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceFormat {
    FastaCds,
    Fasta,
}

impl SequenceFormat {
    pub fn rettype(self) -> &'static str {
        match self {
            SequenceFormat::FastaCds => "fasta_cds_na",
            SequenceFormat::Fasta => "fasta",
        }
    }
}

impl fmt::Display for SequenceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.rettype())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequencePayload {
    pub bytes: Vec<u8>,
    pub format: SequenceFormat,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetrievalStatus {
    Fetched(SequencePayload),
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalOutcome {
    pub identifier: Identifier,
    pub status: RetrievalStatus,
}

impl RetrievalOutcome {
    pub fn payload(&self) -> Option<&SequencePayload> {
        match &self.status {
            RetrievalStatus::Fetched(payload) => Some(payload),
            RetrievalStatus::Failed { .. } => None,
        }
    }

    pub fn failure(&self) -> Option<&str> {
        match &self.status {
            RetrievalStatus::Fetched(_) => None,
            RetrievalStatus::Failed { reason } => Some(reason),
        }
    }
}
