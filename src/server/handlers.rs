use std::fmt::Write as _;

use axum::Json;
use axum::extract::State;
use axum::http::{HeaderName, HeaderValue, header};
use axum::response::{IntoResponse, Response};

use crate::domain::DiscoveryOutcome;
use crate::error::KiraError;
use crate::ncbi::NcbiClient;
use crate::selection::{self, Selection};

use super::AppState;
use super::dto::{DownloadRequest, GetSpeciesRequest, GetSpeciesResponse};
use super::error::HttpError;
use super::sessions::DiscoverySession;

pub const FAILED_SPECIES_HEADER: HeaderName = HeaderName::from_static("x-kira-failed-species");

pub async fn health() -> &'static str {
    "OK"
}

pub async fn get_species<N: NcbiClient + 'static>(
    State(state): State<AppState<N>>,
    Json(req): Json<GetSpeciesRequest>,
) -> Result<Json<GetSpeciesResponse>, HttpError> {
    let cancel = state.shutdown.child_token();
    let outcome: DiscoveryOutcome = state
        .app
        .discover(&req.taxon_name, &req.gene_name, &cancel)
        .await?;
    let response = GetSpeciesResponse::from(&outcome);
    state
        .sessions
        .record(DiscoverySession::new(&req.taxon_name, &req.gene_name, outcome));
    Ok(Json(response))
}

pub async fn download<N: NcbiClient + 'static>(
    State(state): State<AppState<N>>,
    Json(req): Json<DownloadRequest>,
) -> Result<Response, HttpError> {
    let submitted = req.identifiers()?;
    if submitted.values().all(Vec::is_empty) {
        return Err(KiraError::InvalidQuery("species_data is empty".to_string()).into());
    }
    let taxa = selection::taxa_of(&submitted);
    let session = state
        .sessions
        .find(req.taxon_name.as_deref(), req.gene_name.as_deref(), &submitted)
        .ok_or_else(|| {
            let listed = taxa
                .iter()
                .map(|taxon_id| format!("txid{taxon_id}"))
                .collect::<Vec<_>>()
                .join(", ");
            KiraError::SelectionNotFound(listed)
        })?;
    tracing::debug!(
        taxon = session.taxon_name,
        gene = session.gene_name,
        discovered_at = %session.discovered_at,
        "download matched discovery session"
    );
    let chosen: Selection = selection::resolve_submitted(&submitted, &session.outcome)?;

    let cancel = state.shutdown.child_token();
    let archive = state
        .app
        .download(&chosen, &session.taxon_name, &session.gene_name, &cancel)
        .await?;

    let disposition = format!("attachment; filename=\"{}\"", archive.file_name);
    let failed = failed_species_header(&archive.manifest.failed_species)?;
    let mut response = archive.bytes.into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/zip"),
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&disposition).map_err(|err| HttpError::Internal(err.to_string()))?,
    );
    headers.insert(FAILED_SPECIES_HEADER, failed);
    Ok(response)
}

fn failed_species_header(names: &[String]) -> Result<HeaderValue, HttpError> {
    let json = serde_json::to_string(names).map_err(|err| HttpError::Internal(err.to_string()))?;
    let mut escaped = String::with_capacity(json.len());
    for ch in json.chars() {
        if ch.is_ascii() && !ch.is_ascii_control() {
            escaped.push(ch);
            continue;
        }
        let mut units = [0u16; 2];
        for unit in ch.encode_utf16(&mut units) {
            let _ = write!(escaped, "\\u{unit:04x}");
        }
    }
    HeaderValue::from_str(&escaped).map_err(|err| HttpError::Internal(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_species_header_is_ascii_json() {
        let value =
            failed_species_header(&["Felis catus".to_string(), "Lynx lynx é".to_string()]).unwrap();
        let text = value.to_str().unwrap();
        assert_eq!(text, r#"["Felis catus","Lynx lynx \u00e9"]"#);
        let decoded: Vec<String> = serde_json::from_str(text).unwrap();
        assert_eq!(decoded[1], "Lynx lynx é");
    }

    #[test]
    fn empty_failure_list() {
        let value = failed_species_header(&[]).unwrap();
        assert_eq!(value.to_str().unwrap(), "[]");
    }
}
