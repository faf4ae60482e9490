use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use base64::Engine as _;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use crate::{
    app_state::AppState,
    error::AnalysisError,
    knowledge_tree::{self, PATH_SEPARATOR},
    models::ProblemImage,
    pipeline,
};

// --- Payloads de la API ---

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzePayload {
    image_base64: String,
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    subject: Option<String>,
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/analyze", post(analyze_handler))
        .route("/api/knowledge-points", get(knowledge_points_handler))
        .route("/api/status", get(status_handler))
        .route("/api/shutdown", post(shutdown_handler))
        .with_state(app_state)
}

// --- Handlers ---

#[axum::debug_handler]
async fn analyze_handler(
    State(state): State<AppState>,
    Json(payload): Json<AnalyzePayload>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    if payload.image_base64.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"success": false, "error": "Falta el campo imageBase64."})),
        ));
    }

    // Validamos que el base64 decodifica antes de gastar una llamada de visión.
    if base64::engine::general_purpose::STANDARD
        .decode(&payload.image_base64)
        .is_err()
    {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"success": false, "error": "imageBase64 no es base64 válido."})),
        ));
    }

    let image = ProblemImage {
        base64: payload.image_base64,
        mime_type: payload
            .mime_type
            .unwrap_or_else(|| "image/png".to_string()),
    };

    let backend = state.backend();
    match pipeline::analyze(&backend, &image, payload.subject.as_deref()).await {
        Ok(result) => Ok(Json(json!({ "success": true, "data": result }))),
        Err(e) => {
            error!("Análisis fallido: {e}");
            Err(error_response(&e))
        }
    }
}

/// Traduce la taxonomía de errores del pipeline a respuestas diferenciadas,
/// para que la UI pueda distinguir "servicio caído" de "no se entendió la
/// imagen" o "no hay ejercicios parecidos".
fn error_response(error: &AnalysisError) -> (StatusCode, Json<serde_json::Value>) {
    let status = match error {
        AnalysisError::TaxonomyFetch(_) | AnalysisError::QuestionBankFetch(_) => {
            StatusCode::BAD_GATEWAY
        }
        AnalysisError::Extraction(_) | AnalysisError::Classification => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        AnalysisError::EmptyCandidates => StatusCode::NOT_FOUND,
        AnalysisError::EmptyChoiceSet | AnalysisError::LookupInconsistency(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (
        status,
        Json(json!({ "success": false, "error": error.to_string() })),
    )
}

#[axum::debug_handler]
async fn knowledge_points_handler(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let tree = knowledge_tree::fetch_tree(&state.http, &state.config)
        .await
        .map_err(|e| {
            error!("Error consultando la taxonomía: {e}");
            error_response(&e)
        })?;

    let (choices, _) = knowledge_tree::flatten(&tree);
    let knowledge_points: Vec<_> = choices
        .iter()
        .enumerate()
        .map(|(index, path)| {
            json!({
                "id": format!("kp_{index}"),
                "path": path,
                "title": path.rsplit(PATH_SEPARATOR).next().unwrap_or_default(),
                "isLeaf": true,
            })
        })
        .collect();

    Ok(Json(json!({ "success": true, "data": knowledge_points })))
}

#[axum::debug_handler]
async fn status_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "provider": format!("{:?}", state.config.llm_provider),
        "visionModel": state.config.llm_vision_model,
        "embeddingModel": state.config.llm_embedding_model,
    }))
}

#[axum::debug_handler]
async fn shutdown_handler(State(state): State<AppState>) -> impl IntoResponse {
    info!("Petición de apagado recibida.");
    if let Some(sender) = state.shutdown_sender.lock().unwrap().take() {
        let _ = sender.send(());
    }
    StatusCode::OK
}
