use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use serde_json::Value;

use crate::config::NcbiSettings;
use crate::domain::{GeneId, SequenceFormat, SequenceId, TaxonId, TaxonRecord};
use crate::error::KiraError;

pub const MAX_LISTING: usize = 100_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdPage<T> {
    pub ids: Vec<T>,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneRecord {
    pub gene_id: GeneId,
    pub taxon_id: Option<TaxonId>,
    pub products: Vec<SequenceId>,
}

impl GeneRecord {
    pub fn preferred_product(&self) -> Option<&SequenceId> {
        self.products
            .iter()
            .find(|id| id.is_curated_transcript())
            .or_else(|| self.products.first())
    }
}

#[async_trait]
pub trait NcbiClient: Send + Sync {
    async fn resolve_taxon(&self, name: &str) -> Result<Option<TaxonId>, KiraError>;
    async fn list_descendant_species(
        &self,
        root: TaxonId,
        start: usize,
    ) -> Result<IdPage<TaxonId>, KiraError>;
    async fn summarize_taxa(&self, ids: &[TaxonId]) -> Result<Vec<TaxonRecord>, KiraError>;
    async fn search_genes(
        &self,
        taxon_id: TaxonId,
        gene_name: &str,
    ) -> Result<Vec<GeneId>, KiraError>;
    async fn fetch_gene_records(&self, ids: &[GeneId]) -> Result<Vec<GeneRecord>, KiraError>;
    async fn fetch_sequence(
        &self,
        id: &SequenceId,
        format: SequenceFormat,
    ) -> Result<Vec<u8>, KiraError>;
}

#[derive(Clone)]
pub struct NcbiHttpClient {
    client: Client,
    base_url: String,
    params: Vec<(&'static str, String)>,
}

impl NcbiHttpClient {
    pub fn new(settings: &NcbiSettings) -> Result<Self, KiraError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kira-clade/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| KiraError::NcbiHttp(err.to_string()))?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| KiraError::NcbiHttp(err.to_string()))?;

        let mut params = vec![("tool", settings.tool.clone())];
        if let Some(email) = &settings.email {
            params.push(("email", email.clone()));
        }
        if let Some(api_key) = &settings.api_key {
            params.push(("api_key", api_key.clone()));
        }

        Ok(Self {
            client,
            base_url: settings.base_url.clone(),
            params,
        })
    }

    async fn get_text(&self, utility: &str, query: &[(&str, String)]) -> Result<String, KiraError> {
        let url = format!("{}/{utility}.fcgi", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&self.params)
            .query(query)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(map_reqwest_error)?;
        if !(200..300).contains(&status) {
            return Err(KiraError::NcbiStatus {
                status,
                message: truncate(&body),
            });
        }
        check_rate_limit_body(&body)?;
        Ok(body)
    }

    async fn esearch_page(
        &self,
        db: &str,
        term: String,
        start: usize,
    ) -> Result<EsearchPage, KiraError> {
        let body = self
            .get_text(
                "esearch",
                &[
                    ("db", db.to_string()),
                    ("term", term),
                    ("retstart", start.to_string()),
                    ("retmax", MAX_LISTING.to_string()),
                    ("retmode", "json".to_string()),
                ],
            )
            .await?;
        parse_esearch_page(&body)
    }

    async fn esearch(&self, db: &str, term: String) -> Result<Vec<String>, KiraError> {
        self.esearch_page(db, term, 0).await?.complete()
    }
}

#[async_trait]
impl NcbiClient for NcbiHttpClient {
    async fn resolve_taxon(&self, name: &str) -> Result<Option<TaxonId>, KiraError> {
        let ids = self.esearch("taxonomy", name.to_string()).await?;
        ids.first().map(|id| id.parse()).transpose()
    }

    async fn list_descendant_species(
        &self,
        root: TaxonId,
        start: usize,
    ) -> Result<IdPage<TaxonId>, KiraError> {
        let page = self
            .esearch_page(
                "taxonomy",
                format!("txid{root}[Subtree] AND species[Rank]"),
                start,
            )
            .await?;
        Ok(IdPage {
            ids: page
                .ids
                .iter()
                .map(|id| id.parse())
                .collect::<Result<Vec<TaxonId>, KiraError>>()?,
            total: page.count,
        })
    }

    async fn summarize_taxa(&self, ids: &[TaxonId]) -> Result<Vec<TaxonRecord>, KiraError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let body = self
            .get_text(
                "esummary",
                &[
                    ("db", "taxonomy".to_string()),
                    ("id", join_ids(ids)),
                    ("retmode", "json".to_string()),
                ],
            )
            .await?;
        parse_taxonomy_summary(&body)
    }

    async fn search_genes(
        &self,
        taxon_id: TaxonId,
        gene_name: &str,
    ) -> Result<Vec<GeneId>, KiraError> {
        let ids = self
            .esearch("gene", gene_term(taxon_id, gene_name))
            .await?;
        ids.iter().map(|id| id.parse()).collect()
    }

    async fn fetch_gene_records(&self, ids: &[GeneId]) -> Result<Vec<GeneRecord>, KiraError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let body = self
            .get_text(
                "efetch",
                &[
                    ("db", "gene".to_string()),
                    ("id", join_ids(ids)),
                    ("retmode", "xml".to_string()),
                ],
            )
            .await?;
        parse_gene_records(&body)
    }

    async fn fetch_sequence(
        &self,
        id: &SequenceId,
        format: SequenceFormat,
    ) -> Result<Vec<u8>, KiraError> {
        let body = self
            .get_text(
                "efetch",
                &[
                    ("db", "nuccore".to_string()),
                    ("id", id.to_string()),
                    ("rettype", format.rettype().to_string()),
                    ("retmode", "text".to_string()),
                ],
            )
            .await?;
        if !body.trim_start().starts_with('>') {
            return Err(KiraError::NcbiDecode(format!(
                "no {format} sequence for {id}"
            )));
        }
        Ok(body.into_bytes())
    }
}

pub fn gene_term(taxon_id: TaxonId, gene_name: &str) -> String {
    format!("{}[Gene Name] AND txid{taxon_id}[Organism:noexp]", gene_name.trim())
}

fn join_ids<T: std::fmt::Display>(ids: &[T]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn truncate(body: &str) -> String {
    body.chars().take(200).collect()
}

fn map_reqwest_error(err: reqwest::Error) -> KiraError {
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
        KiraError::NcbiHttp(err.to_string())
    } else {
        KiraError::NcbiDecode(err.to_string())
    }
}

/// NCBI sometimes reports throttling inside a successful response body.
pub fn check_rate_limit_body(body: &str) -> Result<(), KiraError> {
    if body.len() < 512 && body.contains("API rate limit exceeded") {
        return Err(KiraError::NcbiStatus {
            status: 429,
            message: truncate(body),
        });
    }
    Ok(())
}

#[derive(Deserialize)]
struct EsearchEnvelope {
    esearchresult: Option<EsearchResult>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct EsearchResult {
    count: Option<String>,
    #[serde(default)]
    idlist: Vec<String>,
    #[serde(rename = "ERROR")]
    error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EsearchPage {
    pub ids: Vec<String>,
    pub count: usize,
}

impl EsearchPage {
    pub fn complete(self) -> Result<Vec<String>, KiraError> {
        if self.count > self.ids.len() {
            return Err(KiraError::NcbiDecode(format!(
                "esearch listed {} of {} ids",
                self.ids.len(),
                self.count
            )));
        }
        Ok(self.ids)
    }
}

pub fn parse_esearch_ids(body: &str) -> Result<Vec<String>, KiraError> {
    parse_esearch_page(body)?.complete()
}

pub fn parse_esearch_page(body: &str) -> Result<EsearchPage, KiraError> {
    let envelope: EsearchEnvelope =
        serde_json::from_str(body).map_err(|err| KiraError::NcbiDecode(err.to_string()))?;
    if let Some(error) = envelope.error {
        return Err(KiraError::NcbiDecode(error));
    }
    let result = envelope
        .esearchresult
        .ok_or_else(|| KiraError::NcbiDecode("missing esearchresult".to_string()))?;
    if let Some(error) = result.error {
        return Err(KiraError::NcbiDecode(error));
    }
    let count = match result.count {
        Some(count) => count
            .trim()
            .parse()
            .map_err(|_| KiraError::NcbiDecode(format!("invalid esearch count {count:?}")))?,
        None => result.idlist.len(),
    };
    Ok(EsearchPage {
        ids: result.idlist,
        count,
    })
}

pub fn parse_taxonomy_summary(body: &str) -> Result<Vec<TaxonRecord>, KiraError> {
    let raw: Value =
        serde_json::from_str(body).map_err(|err| KiraError::NcbiDecode(err.to_string()))?;
    let result = raw
        .get("result")
        .ok_or_else(|| KiraError::NcbiDecode("missing esummary result".to_string()))?;
    let uids = result
        .get("uids")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();

    let mut records = Vec::with_capacity(uids.len());
    for uid in uids.iter().filter_map(|v| v.as_str()) {
        let Some(entry) = result.get(uid) else {
            continue;
        };
        let name = entry
            .get("scientificname")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|name| !name.is_empty());
        let Some(name) = name else {
            tracing::debug!(uid, "taxonomy summary without a scientific name");
            continue;
        };
        records.push(TaxonRecord {
            taxon_id: uid.parse()?,
            scientific_name: name.to_string(),
        });
    }
    Ok(records)
}

static GENE_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<Gene-track_geneid>(\d+)</Gene-track_geneid>").expect("valid regex")
});

static TAXON_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"<Dbtag_db>taxon</Dbtag_db>\s*<Dbtag_tag>\s*<Object-id>\s*<Object-id_id>(\d+)</Object-id_id>",
    )
    .expect("valid regex")
});

static ACCESSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<Gene-commentary_accession>((?:NM|XM|NR|XR)_\d+)</Gene-commentary_accession>")
        .expect("valid regex")
});

pub fn parse_gene_records(body: &str) -> Result<Vec<GeneRecord>, KiraError> {
    let mut records = Vec::new();
    for block in body.split("<Entrezgene>").skip(1) {
        let Some(gene_id) = GENE_ID_RE.captures(block).map(|caps| caps[1].to_string()) else {
            return Err(KiraError::NcbiDecode(
                "gene record without Gene-track_geneid".to_string(),
            ));
        };
        let taxon_id = TAXON_RE
            .captures(block)
            .and_then(|caps| caps[1].parse::<TaxonId>().ok());

        let locus = block
            .find("<Entrezgene_locus>")
            .map(|start| {
                let rest = &block[start..];
                let end = rest.find("</Entrezgene_locus>").unwrap_or(rest.len());
                &rest[..end]
            })
            .unwrap_or("");
        let mut products: Vec<SequenceId> = Vec::new();
        for caps in ACCESSION_RE.captures_iter(locus) {
            let accession: SequenceId = caps[1].parse()?;
            if !products.contains(&accession) {
                products.push(accession);
            }
        }

        records.push(GeneRecord {
            gene_id: gene_id.parse()?,
            taxon_id,
            products,
        });
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn esearch_ids() {
        let body = r#"{"header":{},"esearchresult":{"count":"2","idlist":["9685","9689"]}}"#;
        assert_eq!(parse_esearch_ids(body).unwrap(), vec!["9685", "9689"]);
    }

    #[test]
    fn esearch_error_is_decode_error() {
        let body = r#"{"esearchresult":{"ERROR":"Invalid query"}}"#;
        assert_matches!(parse_esearch_ids(body), Err(KiraError::NcbiDecode(_)));
    }

    #[test]
    fn rate_limit_in_body() {
        let body = r#"{"error":"API rate limit exceeded","api-key":"1.2.3.4","count":"11","limit":"10"}"#;
        let err = check_rate_limit_body(body).unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn gene_term_uses_exact_organism() {
        let txid: TaxonId = "9685".parse().unwrap();
        assert_eq!(
            gene_term(txid, " TP53 "),
            "TP53[Gene Name] AND txid9685[Organism:noexp]"
        );
    }
}
