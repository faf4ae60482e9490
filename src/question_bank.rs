//! Recuperación de candidatos del banco de preguntas.
//!
//! Una única petición paginada (primera página, tamaño fijo) filtrada por
//! el id externo del punto de conocimiento. Aquí no se ordena ni se filtra
//! nada: se devuelve el conjunto crudo hasta el tamaño de página.

use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use crate::config::AppConfig;
use crate::error::AnalysisError;
use crate::models::ProblemCandidate;

#[derive(Debug, Deserialize)]
struct QuestionQueryResponse {
    #[serde(default)]
    data: QuestionQueryData,
}

#[derive(Debug, Default, Deserialize)]
struct QuestionQueryData {
    #[serde(default)]
    list: Vec<ProblemCandidate>,
}

/// Consulta la primera página de candidatos para un punto de conocimiento.
///
/// Un fallo de red o un código de error es fatal para la ejecución; la
/// lista vacía la decide el orquestador, no esta capa.
pub async fn query_candidates(
    http: &reqwest::Client,
    cfg: &AppConfig,
    knowledge_point_id: &str,
) -> Result<Vec<ProblemCandidate>, AnalysisError> {
    let payload = build_query_payload(cfg, knowledge_point_id);

    let mut request = http
        .post(&cfg.question_bank_url)
        .timeout(Duration::from_secs(cfg.question_bank_timeout_secs))
        .json(&payload);
    if !cfg.question_bank_token.is_empty() {
        request = request.header("token", &cfg.question_bank_token);
    }

    let response = request
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| AnalysisError::QuestionBankFetch(e.into()))?;

    let body: QuestionQueryResponse = response
        .json()
        .await
        .map_err(|e| AnalysisError::QuestionBankFetch(e.into()))?;

    info!(
        "El banco de preguntas devolvió {} candidatos para el punto '{}'",
        body.data.list.len(),
        knowledge_point_id
    );
    Ok(body.data.list)
}

/// Cuerpo de la búsqueda. Los campos de filtro vacíos forman parte del
/// contrato del servicio y se envían siempre.
fn build_query_payload(cfg: &AppConfig, knowledge_point_id: &str) -> serde_json::Value {
    serde_json::json!({
        "pageNum": 1,
        "pageSize": cfg.page_size,
        "params": {
            "studyPhaseCode": cfg.study_phase_code,
            "subjectCode": cfg.subject_code,
            "searchType": 2,
            "sort": 0,
            "yearCode": "",
            "gradeCode": "",
            "provinceCode": "",
            "cityCode": "",
            "areaCode": "",
            "organizationCode": "",
            "termCode": "",
            "keyWord": "",
            "filterQuestionFlag": false,
            "searchScope": 0,
            "treeIds": [knowledge_point_id]
        }
    })
}
