use std::collections::{BTreeSet, HashMap};
use std::io::{Cursor, Write};

use serde::Serialize;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

use crate::domain::{Identifier, RetrievalOutcome, SequencePayload};
use crate::error::KiraError;
use crate::selection::Selection;

#[derive(Debug, Clone)]
pub struct Archive {
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub manifest: ArchiveManifest,
}

impl Archive {
    pub fn partial_failure(&self) -> Option<KiraError> {
        let failed = self.manifest.failed_identifiers.len();
        if failed == 0 {
            return None;
        }
        Some(KiraError::PartialRetrievalFailure {
            failed,
            requested: self.manifest.requested,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveManifest {
    pub taxon: String,
    pub gene: String,
    pub requested: usize,
    pub species: Vec<SpeciesEntry>,
    pub failed_species: Vec<String>,
    pub failed_identifiers: Vec<FailedIdentifier>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpeciesEntry {
    pub name: String,
    pub file: String,
    pub sequences: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedIdentifier {
    pub species: String,
    pub txid: String,
    pub gene_id: String,
    pub nuc_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ArchiveBuilder {
    combined_fasta: bool,
}

impl ArchiveBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_combined_fasta(mut self, combined_fasta: bool) -> Self {
        self.combined_fasta = combined_fasta;
        self
    }

    pub fn build(
        &self,
        selection: &Selection,
        outcomes: &[RetrievalOutcome],
        taxon_name: &str,
        gene_name: &str,
    ) -> Result<Archive, KiraError> {
        let by_identifier: HashMap<&Identifier, &RetrievalOutcome> = outcomes
            .iter()
            .map(|outcome| (&outcome.identifier, outcome))
            .collect();

        let stem = archive_stem(taxon_name, gene_name);
        let gene_part = sanitize(gene_name);
        let mut used_names = BTreeSet::new();
        let mut files: Vec<(String, Vec<u8>)> = Vec::new();
        let mut combined = Vec::new();
        let mut manifest = ArchiveManifest {
            taxon: taxon_name.to_string(),
            gene: gene_name.to_string(),
            requested: selection.values().map(Vec::len).sum(),
            species: Vec::new(),
            failed_species: Vec::new(),
            failed_identifiers: Vec::new(),
        };

        // Selection is a BTreeMap, so species come out in name order.
        for (species, identifiers) in selection {
            let mut fasta = Vec::new();
            let mut sequences = 0usize;
            for identifier in identifiers {
                let outcome = by_identifier.get(identifier);
                match outcome.and_then(|outcome| outcome.payload()) {
                    Some(payload) => {
                        append_payload(&mut fasta, payload);
                        sequences += 1;
                    }
                    None => {
                        let reason = outcome
                            .and_then(|outcome| outcome.failure())
                            .unwrap_or("not retrieved")
                            .to_string();
                        manifest.failed_identifiers.push(FailedIdentifier {
                            species: species.clone(),
                            txid: identifier.taxon_id.to_string(),
                            gene_id: identifier.gene_id.to_string(),
                            nuc_id: identifier.sequence_id.to_string(),
                            reason,
                        });
                    }
                }
            }

            if sequences == 0 {
                manifest.failed_species.push(species.clone());
                continue;
            }

            let file = unique_name(
                &mut used_names,
                &format!("{}_{gene_part}", sanitize(species)),
            );
            let path = format!("{stem}/{file}.fasta");
            manifest.species.push(SpeciesEntry {
                name: species.clone(),
                file: path.clone(),
                sequences,
            });
            if self.combined_fasta {
                combined.extend_from_slice(&fasta);
            }
            files.push((path, fasta));
        }

        if self.combined_fasta && !combined.is_empty() {
            files.push((format!("{stem}/{stem}_all.fasta"), combined));
        }
        let manifest_json = serde_json::to_vec_pretty(&manifest)
            .map_err(|err| KiraError::Archive(err.to_string()))?;
        files.push((format!("{stem}/manifest.json"), manifest_json));

        let bytes = write_zip(&files)?;
        tracing::debug!(
            file = %stem,
            species = manifest.species.len(),
            failed_species = manifest.failed_species.len(),
            bytes = bytes.len(),
            "archive built"
        );

        Ok(Archive {
            file_name: format!("{stem}.zip"),
            bytes,
            manifest,
        })
    }
}

fn write_zip(files: &[(String, Vec<u8>)]) -> Result<Vec<u8>, KiraError> {
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default())
        .unix_permissions(0o644);
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in files {
        writer
            .start_file(name.as_str(), options)
            .map_err(|err| KiraError::Archive(err.to_string()))?;
        writer
            .write_all(content)
            .map_err(|err| KiraError::Archive(err.to_string()))?;
    }
    let cursor = writer
        .finish()
        .map_err(|err| KiraError::Archive(err.to_string()))?;
    Ok(cursor.into_inner())
}

fn append_payload(buffer: &mut Vec<u8>, payload: &SequencePayload) {
    let bytes = payload.bytes.trim_ascii();
    if bytes.is_empty() {
        return;
    }
    buffer.extend_from_slice(bytes);
    buffer.push(b'\n');
}

fn unique_name(used: &mut BTreeSet<String>, base: &str) -> String {
    let mut candidate = base.to_string();
    let mut counter = 2;
    while !used.insert(candidate.clone()) {
        candidate = format!("{base}_{counter}");
        counter += 1;
    }
    candidate
}

pub fn archive_stem(taxon_name: &str, gene_name: &str) -> String {
    format!("{}_{}", sanitize(taxon_name), sanitize(gene_name))
}

pub fn sanitize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.trim().chars() {
        if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '.') {
            out.push(ch);
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    let trimmed = out.trim_matches(|ch| ch == '_' || ch == '.');
    if trimmed.is_empty() {
        return "unnamed".to_string();
    }
    trimmed.to_string()
}
