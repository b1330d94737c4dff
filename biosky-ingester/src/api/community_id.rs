//! Community ID lookup for a stored occurrence
//!
//! Returns the consensus taxon when one exists, and otherwise falls back to the
//! observer's own scientific name, reporting which source was used.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use biosky_common::db::occurrences;
use biosky_common::taxonomy::{CommunityIdCalculator, CommunityIdResult, IdentificationStore};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CommunityIdQuery {
    /// AT URI of the occurrence
    pub uri: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NameSource {
    /// Consensus of identifications
    Community,
    /// No consensus; the occurrence's own name
    Observer,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunityIdResponse {
    pub uri: String,
    pub identification_count: usize,
    pub community_id: Option<CommunityIdResult>,
    pub scientific_name: Option<String>,
    pub source: Option<NameSource>,
}

#[derive(Debug)]
pub enum CommunityIdError {
    EmptyUri,
    NotFound(String),
    Storage(String),
}

impl IntoResponse for CommunityIdError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            CommunityIdError::EmptyUri => {
                (StatusCode::BAD_REQUEST, "Missing occurrence uri".to_string())
            }
            CommunityIdError::NotFound(uri) => {
                (StatusCode::NOT_FOUND, format!("Unknown occurrence: {}", uri))
            }
            CommunityIdError::Storage(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, format!("Database error: {}", msg))
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// GET /api/occurrences/community-id?uri=at://...
pub async fn get_community_id(
    State(state): State<AppState>,
    Query(query): Query<CommunityIdQuery>,
) -> Result<Json<CommunityIdResponse>, CommunityIdError> {
    let uri = query.uri.trim();
    if uri.is_empty() {
        return Err(CommunityIdError::EmptyUri);
    }

    let identifications = state
        .db
        .get_identifications_for_occurrence(uri)
        .await
        .map_err(|e| CommunityIdError::Storage(e.to_string()))?;
    let occurrence = occurrences::get_occurrence(state.db.pool(), uri)
        .await
        .map_err(|e| CommunityIdError::Storage(e.to_string()))?;

    if occurrence.is_none() && identifications.is_empty() {
        return Err(CommunityIdError::NotFound(uri.to_string()));
    }

    let calculator = CommunityIdCalculator::with_policy(state.hierarchy.clone(), state.consensus);
    let community_id = calculator.calculate(&identifications);

    let (scientific_name, source) = match &community_id {
        Some(result) => (Some(result.scientific_name.clone()), Some(NameSource::Community)),
        None => match occurrence.and_then(|o| o.scientific_name) {
            Some(name) => (Some(name), Some(NameSource::Observer)),
            None => (None, None),
        },
    };

    Ok(Json(CommunityIdResponse {
        uri: uri.to_string(),
        identification_count: identifications.len(),
        community_id,
        scientific_name,
        source,
    }))
}

pub fn community_id_routes() -> Router<AppState> {
    Router::new().route("/api/occurrences/community-id", get(get_community_id))
}
