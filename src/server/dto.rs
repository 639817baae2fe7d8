use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::domain::{DiscoveryOutcome, Identifier};
use crate::error::KiraError;

#[derive(Debug, Clone, Deserialize)]
pub struct GetSpeciesRequest {
    #[serde(rename = "taxonName")]
    pub taxon_name: String,
    #[serde(rename = "geneName")]
    pub gene_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifierDto {
    #[serde(deserialize_with = "string_or_number")]
    pub txid: String,
    #[serde(deserialize_with = "string_or_number")]
    pub gene_id: String,
    pub nuc_id: String,
}

impl From<&Identifier> for IdentifierDto {
    fn from(identifier: &Identifier) -> Self {
        Self {
            txid: identifier.taxon_id.to_string(),
            gene_id: identifier.gene_id.to_string(),
            nuc_id: identifier.sequence_id.to_string(),
        }
    }
}

impl TryFrom<&IdentifierDto> for Identifier {
    type Error = KiraError;

    fn try_from(dto: &IdentifierDto) -> Result<Self, Self::Error> {
        Identifier::parse(&dto.txid, &dto.gene_id, &dto.nuc_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetSpeciesResponse {
    pub status: String,
    pub species_ids: BTreeMap<String, Vec<IdentifierDto>>,
    #[serde(default)]
    pub no_hit: Vec<String>,
    #[serde(default)]
    pub errors: BTreeMap<String, String>,
}

impl From<&DiscoveryOutcome> for GetSpeciesResponse {
    fn from(outcome: &DiscoveryOutcome) -> Self {
        let species_ids = outcome
            .by_display_name()
            .into_iter()
            .map(|(name, identifiers)| {
                (name, identifiers.iter().map(IdentifierDto::from).collect())
            })
            .collect();
        Self {
            status: "success".to_string(),
            species_ids,
            no_hit: outcome.no_hits.iter().map(ToString::to_string).collect(),
            errors: outcome
                .errors
                .iter()
                .map(|(taxon_id, reason)| (taxon_id.to_string(), reason.clone()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DownloadRequest {
    pub species_data: BTreeMap<String, Vec<IdentifierDto>>,
    #[serde(default, rename = "taxonName")]
    pub taxon_name: Option<String>,
    #[serde(default, rename = "geneName")]
    pub gene_name: Option<String>,
}

impl DownloadRequest {
    pub fn identifiers(&self) -> Result<BTreeMap<String, Vec<Identifier>>, KiraError> {
        self.species_data
            .iter()
            .map(|(name, dtos)| {
                let identifiers = dtos
                    .iter()
                    .map(Identifier::try_from)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok((name.clone(), identifiers))
            })
            .collect()
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(value) => value,
        Raw::Number(value) => value.to_string(),
    })
}
