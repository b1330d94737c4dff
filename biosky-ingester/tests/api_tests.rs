//! HTTP API integration tests

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use biosky_common::db::Database;
use biosky_common::events::{DomainEvent, RecordAction, RecordKind};
use biosky_common::taxonomy::{
    ConsensusPolicy, TaxonAncestor, TaxonLineage, TaxonRank, TaxonomicHierarchy,
};
use biosky_ingester::handlers::HandlerRegistry;
use biosky_ingester::stats::shared_stats;
use biosky_ingester::{build_router, AppState, FirehoseOptions, FirehoseSubscription};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

const OCCURRENCE_URI: &str = "at://did:plc:alice/org.rwell.test.occurrence/3kocc1";

async fn test_app_state(dir: &TempDir) -> AppState {
    let db = Database::open(&dir.path().join("biosky.db")).await.unwrap();
    let options = FirehoseOptions {
        cursor: Some(42),
        ..Default::default()
    };

    AppState {
        subscription: Arc::new(FirehoseSubscription::new(options, HandlerRegistry::new())),
        stats: shared_stats(),
        db,
        hierarchy: Arc::new(TaxonomicHierarchy::default()),
        consensus: ConsensusPolicy::default(),
    }
}

fn create_event(kind: RecordKind, uri: &str, seq: i64, record: Value) -> DomainEvent {
    DomainEvent {
        kind,
        action: RecordAction::Create,
        did: "did:plc:alice".to_string(),
        uri: uri.to_string(),
        cid: Some("bafyreitest".to_string()),
        record: Some(record),
        seq,
        time: "2024-01-15T10:05:01.000Z".to_string(),
    }
}

async fn seed_occurrence(db: &Database, name: &str) {
    let event = create_event(
        RecordKind::Occurrence,
        OCCURRENCE_URI,
        1,
        json!({ "scientificName": name, "createdAt": "2024-01-15T10:00:00Z" }),
    );
    assert!(db.apply_event(&event).await.unwrap());
}

async fn seed_identification(db: &Database, rkey: &str, name: &str, created_at: &str) {
    let event = create_event(
        RecordKind::Identification,
        &format!("at://did:plc:bob/org.rwell.test.identification/{}", rkey),
        2,
        json!({
            "subject": { "uri": OCCURRENCE_URI },
            "taxonName": name,
            "taxonRank": "species",
            "createdAt": created_at,
        }),
    );
    assert!(db.apply_event(&event).await.unwrap());
}

fn fagaceae(name: &str, genus: &str) -> TaxonLineage {
    TaxonLineage::new(
        name,
        TaxonRank::Species,
        vec![
            TaxonAncestor::new("Plantae", TaxonRank::Kingdom),
            TaxonAncestor::new("Fagaceae", TaxonRank::Family),
            TaxonAncestor::new(genus, TaxonRank::Genus),
        ],
    )
}

async fn get_text(state: AppState, uri: &str) -> (StatusCode, Option<String>, String) {
    let response = build_router(state)
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, content_type, String::from_utf8(body.to_vec()).unwrap())
}

async fn get_json(state: AppState, uri: &str) -> (StatusCode, Value) {
    let response = build_router(state)
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_health_reports_cursor_and_connection() {
    let dir = TempDir::new().unwrap();
    let state = test_app_state(&dir).await;

    let (status, body) = get_json(state, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["connected"], false);
    assert_eq!(body["cursor"], 42);
}

#[tokio::test]
async fn test_stats_shape() {
    let dir = TempDir::new().unwrap();
    let state = test_app_state(&dir).await;

    {
        let mut stats = state.stats.write().await;
        stats.record_event(&create_event(
            RecordKind::Occurrence,
            OCCURRENCE_URI,
            7,
            json!({ "scientificName": "Quercus alba" }),
        ));
        stats.record_error();
    }
    // One undecodable frame
    state.subscription.process_message(&[0xff]);

    let (status, body) = get_json(state, "/api/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["connected"], false);
    assert_eq!(body["state"], "disconnected");
    assert_eq!(body["cursor"], 42);
    assert_eq!(body["stats"]["occurrences"], 1);
    assert_eq!(body["stats"]["identifications"], 0);
    assert_eq!(body["stats"]["errors"], 2);
    assert_eq!(body["firehose"]["decode_errors"], 1);
    assert_eq!(body["recent_events"][0]["type"], "occurrence");
    assert_eq!(body["recent_events"][0]["seq"], 7);
    assert!(body["last_processed"].is_null());
    assert!(body["uptime_secs"].as_i64().unwrap() >= 0);
}

#[tokio::test]
async fn test_community_id_consensus() {
    let dir = TempDir::new().unwrap();
    let state = test_app_state(&dir).await;
    seed_occurrence(&state.db, "Quercus rubra").await;
    seed_identification(&state.db, "a", "Quercus alba", "2024-01-16T08:00:00Z").await;
    seed_identification(&state.db, "b", "Quercus alba", "2024-01-16T09:00:00Z").await;
    seed_identification(&state.db, "c", "Quercus rubra", "2024-01-16T10:00:00Z").await;

    let (status, body) = get_json(
        state,
        &format!("/api/occurrences/community-id?uri={}", OCCURRENCE_URI),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["uri"], OCCURRENCE_URI);
    assert_eq!(body["identificationCount"], 3);
    assert_eq!(body["scientificName"], "Quercus alba");
    assert_eq!(body["source"], "community");
    assert_eq!(body["communityId"]["taxonRank"], "species");
    assert_eq!(body["communityId"]["agreementCount"], 2);
}

#[tokio::test]
async fn test_community_id_falls_back_to_observer_name() {
    let dir = TempDir::new().unwrap();
    let state = test_app_state(&dir).await;
    seed_occurrence(&state.db, "Quercus rubra").await;
    seed_identification(&state.db, "a", "Quercus alba", "2024-01-16T08:00:00Z").await;
    seed_identification(&state.db, "b", "Canis lupus", "2024-01-16T09:00:00Z").await;

    let (status, body) = get_json(
        state,
        &format!("/api/occurrences/community-id?uri={}", OCCURRENCE_URI),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["communityId"].is_null());
    assert_eq!(body["scientificName"], "Quercus rubra");
    assert_eq!(body["source"], "observer");
}

#[tokio::test]
async fn test_community_id_unknown_occurrence() {
    let dir = TempDir::new().unwrap();
    let state = test_app_state(&dir).await;

    let (status, body) = get_json(
        state,
        "/api/occurrences/community-id?uri=at://did:plc:nobody/org.rwell.test.occurrence/x",
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("Unknown occurrence"));
}

#[tokio::test]
async fn test_community_id_requires_uri() {
    let dir = TempDir::new().unwrap();
    let state = test_app_state(&dir).await;

    let (status, _) = get_json(state, "/api/occurrences/community-id?uri=").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_community_id_uses_shared_hierarchy() {
    let dir = TempDir::new().unwrap();
    let mut state = test_app_state(&dir).await;
    seed_occurrence(&state.db, "Quercus rubra").await;
    seed_identification(&state.db, "a", "Quercus alba", "2024-01-16T08:00:00Z").await;
    seed_identification(&state.db, "b", "Fagus sylvatica", "2024-01-16T09:00:00Z").await;
    let uri = format!("/api/occurrences/community-id?uri={}", OCCURRENCE_URI);

    // Without lineages the two genera never meet
    let (_, body) = get_json(state.clone(), &uri).await;
    assert!(body["communityId"].is_null());

    state.hierarchy = Arc::new(TaxonomicHierarchy::from_lineages(vec![
        fagaceae("Quercus alba", "Quercus"),
        fagaceae("Fagus sylvatica", "Fagus"),
    ]));
    let (status, body) = get_json(state, &uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["source"], "community");
    assert_eq!(body["scientificName"], "Fagaceae");
    assert_eq!(body["communityId"]["taxonRank"], "family");
    assert_eq!(body["communityId"]["agreementCount"], 2);
}

#[tokio::test]
async fn test_dashboard_page() {
    let dir = TempDir::new().unwrap();
    let state = test_app_state(&dir).await;
    state.stats.write().await.record_event(&create_event(
        RecordKind::Occurrence,
        "at://did:plc:alice/org.rwell.test.occurrence/<b>",
        7,
        json!({ "scientificName": "Quercus alba" }),
    ));

    let (status, content_type, body) = get_text(state, "/").await;
    assert_eq!(status, StatusCode::OK);
    assert!(content_type.unwrap().starts_with("text/html"));
    assert!(body.contains("<title>BioSky Ingester</title>"));
    assert!(body.contains("Disconnected"));
    assert!(body.contains("<td>42</td>"));
    assert!(body.contains("<tr><td>Occurrences</td><td>1</td></tr>"));
    assert!(body.contains("org.rwell.test.occurrence/&lt;b&gt;"));
    assert!(!body.contains("occurrence/<b>"));
}
