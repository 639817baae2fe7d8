//! Route-level tests against an in-memory NCBI.

mod common;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use common::{MockNcbi, felidae, test_config, txid};
use kira_clade::app::App;
use kira_clade::server::{AppState, create_router};

fn router(ncbi: MockNcbi) -> Router {
    let config = test_config();
    let state = AppState::new(App::new(ncbi, &config), config.max_sessions, CancellationToken::new());
    create_router(state)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn health_endpoint_returns_ok() {
    let response = router(MockNcbi::new())
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"OK");
}

#[tokio::test(start_paused = true)]
async fn get_species_lists_hits_no_hits_and_errors() {
    let response = router(felidae())
        .oneshot(post_json(
            "/api/get_species",
            json!({"taxonName": "Felidae", "geneName": "TP53"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "success");
    assert_eq!(
        body["species_ids"]["Felis catus"],
        json!([{"txid": "9685", "gene_id": "GFELC1", "nuc_id": "NM_001"}])
    );
    assert_eq!(body["no_hit"], json!(["9689"]));
    assert!(body["errors"]["9694"].as_str().unwrap().contains("400"));
}

#[tokio::test(start_paused = true)]
async fn unknown_taxon_is_404() {
    let response = router(felidae())
        .oneshot(post_json(
            "/api/get_species",
            json!({"taxonName": "Nonexistidae", "geneName": "TP53"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["status"], 404);
}

#[tokio::test(start_paused = true)]
async fn blank_gene_is_400() {
    let response = router(felidae())
        .oneshot(post_json(
            "/api/get_species",
            json!({"taxonName": "Felidae", "geneName": ""}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test(start_paused = true)]
async fn download_after_discovery_returns_zip() {
    let app = router(felidae());

    let discovered = app
        .clone()
        .oneshot(post_json(
            "/api/get_species",
            json!({"taxonName": "Felidae", "geneName": "TP53"}),
        ))
        .await
        .unwrap();
    let discovered = body_json(discovered).await;

    let response = app
        .oneshot(post_json(
            "/api/download",
            json!({"species_data": {"Felis catus": discovered["species_ids"]["Felis catus"]}}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers[header::CONTENT_TYPE], "application/zip");
    assert_eq!(
        headers[header::CONTENT_DISPOSITION],
        "attachment; filename=\"Felidae_TP53.zip\""
    );
    assert_eq!(headers["x-kira-failed-species"], "[]");
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..2], b"PK");
}

#[tokio::test(start_paused = true)]
async fn download_accepts_numeric_txid() {
    let app = router(felidae());
    app.clone()
        .oneshot(post_json(
            "/api/get_species",
            json!({"taxonName": "Felidae", "geneName": "TP53"}),
        ))
        .await
        .unwrap();

    let response = app
        .oneshot(post_json(
            "/api/download",
            json!({
                "species_data": {"Felis catus": [{"txid": 9685, "gene_id": "GFELC1", "nuc_id": "NM_001"}]},
                "taxonName": "Felidae",
                "geneName": "TP53"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test(start_paused = true)]
async fn download_without_discovery_is_404() {
    let response = router(felidae())
        .oneshot(post_json(
            "/api/download",
            json!({"species_data": {"Felis catus": [{"txid": "9685", "gene_id": "GFELC1", "nuc_id": "NM_001"}]}}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test(start_paused = true)]
async fn forged_identifier_is_rejected() {
    let app = router(felidae());
    app.clone()
        .oneshot(post_json(
            "/api/get_species",
            json!({"taxonName": "Felidae", "geneName": "TP53"}),
        ))
        .await
        .unwrap();

    let response = app
        .oneshot(post_json(
            "/api/download",
            json!({"species_data": {"Felis catus": [{"txid": "9685", "gene_id": "GFELC1", "nuc_id": "NM_999"}]}}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test(start_paused = true)]
async fn malformed_identifier_is_400() {
    let response = router(felidae())
        .oneshot(post_json(
            "/api/download",
            json!({"species_data": {"Felis catus": [{"txid": "felis", "gene_id": "GFELC1", "nuc_id": "NM_001"}]}}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test(start_paused = true)]
async fn failed_species_are_reported_in_header() {
    let ncbi = MockNcbi::new()
        .with_taxon(
            "Panthera",
            txid(9688),
            &[(txid(9689), "Panthera leo"), (txid(9694), "Panthera tigris")],
        )
        .with_gene(txid(9689), "100", &["NM_X"])
        .with_gene(txid(9694), "200", &["NM_Y"])
        .with_hanging_sequence("NM_X")
        .with_sequence("NM_Y", ">NM_Y tiger\nATGC\n");
    let app = router(ncbi);
    let discovered = app
        .clone()
        .oneshot(post_json(
            "/api/get_species",
            json!({"taxonName": "Panthera", "geneName": "TP53"}),
        ))
        .await
        .unwrap();
    let discovered = body_json(discovered).await;

    let response = app
        .oneshot(post_json(
            "/api/download",
            json!({"species_data": discovered["species_ids"]}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-kira-failed-species"], "[\"Panthera leo\"]");
}

#[tokio::test(start_paused = true)]
async fn download_without_names_matches_the_discovery_that_found_it() {
    let ncbi = MockNcbi::new()
        .with_taxon("Felidae", txid(9681), &[(txid(9685), "Felis catus")])
        .with_named_gene(txid(9685), "TP53", "493847", &["NM_001009294"])
        .with_named_gene(txid(9685), "BRCA1", "493921", &["XM_023250001"])
        .with_sequence("NM_001009294", ">NM_001009294.1 Felis catus TP53\nATGC\n");
    let app = router(ncbi);

    let tp53 = app
        .clone()
        .oneshot(post_json(
            "/api/get_species",
            json!({"taxonName": "Felidae", "geneName": "TP53"}),
        ))
        .await
        .unwrap();
    let tp53 = body_json(tp53).await;
    let brca1 = app
        .clone()
        .oneshot(post_json(
            "/api/get_species",
            json!({"taxonName": "Felidae", "geneName": "BRCA1"}),
        ))
        .await
        .unwrap();
    assert_eq!(
        body_json(brca1).await["species_ids"]["Felis catus"][0]["nuc_id"],
        "XM_023250001"
    );

    let response = app
        .oneshot(post_json(
            "/api/download",
            json!({"species_data": tp53["species_ids"]}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"Felidae_TP53.zip\""
    );
}
