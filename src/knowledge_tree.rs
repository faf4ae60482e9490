//! Índice del árbol de conocimiento.
//!
//! API pública:
//!   - `fetch_tree(&Client, &AppConfig)`: descarga la taxonomía completa.
//!   - `flatten(&[KnowledgeTreeNode])`: la aplana en una lista enumerable
//!     de rutas más un índice ruta→id externo.
//!
//! El árbol se construye de cero en cada ejecución del pipeline y se
//! descarta al terminar; no hay caché entre ejecuciones.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use crate::config::AppConfig;
use crate::error::AnalysisError;
use crate::models::KnowledgeTreeNode;

/// Separador de títulos dentro de una ruta completa.
pub const PATH_SEPARATOR: &str = " -> ";

#[derive(Debug, Deserialize)]
struct KnowledgeTreeResponse {
    #[serde(default)]
    data: Vec<KnowledgeTreeNode>,
}

/// Descarga el árbol de conocimiento del servicio de taxonomía.
///
/// Un fallo (no-2xx, timeout, JSON malformado) se devuelve tal cual: la
/// política de reintentos pertenece al orquestador, no a esta capa.
pub async fn fetch_tree(
    http: &reqwest::Client,
    cfg: &AppConfig,
) -> Result<Vec<KnowledgeTreeNode>, AnalysisError> {
    let payload = serde_json::json!({
        "studyPhaseCode": cfg.study_phase_code,
        "subjectCode": cfg.subject_code,
    });

    let mut request = http
        .post(&cfg.taxonomy_url)
        .timeout(Duration::from_secs(cfg.taxonomy_timeout_secs))
        .json(&payload);
    if !cfg.question_bank_token.is_empty() {
        request = request.header("token", &cfg.question_bank_token);
    }

    let response = request
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| AnalysisError::TaxonomyFetch(e.into()))?;

    let body: KnowledgeTreeResponse = response
        .json()
        .await
        .map_err(|e| AnalysisError::TaxonomyFetch(e.into()))?;

    info!(
        "Árbol de conocimiento recibido con {} nodos raíz",
        body.data.len()
    );
    Ok(body.data)
}

/// Aplana el árbol en profundidad acumulando la ruta de títulos.
///
/// Cada nodo con `is_leaf == true` emite un par (ruta, id) aunque también
/// tenga hijos: así se comporta el servicio upstream y se conserva tal
/// cual. Si dos hojas producen la misma ruta completa, la última pisa a la
/// primera en el índice (comportamiento documentado, ver DESIGN.md).
pub fn flatten(nodes: &[KnowledgeTreeNode]) -> (Vec<String>, HashMap<String, String>) {
    let mut choices = Vec::new();
    let mut lookup = HashMap::new();
    let mut path = Vec::new();
    flatten_recursive(nodes, &mut path, &mut choices, &mut lookup);
    (choices, lookup)
}

fn flatten_recursive(
    nodes: &[KnowledgeTreeNode],
    path: &mut Vec<String>,
    choices: &mut Vec<String>,
    lookup: &mut HashMap<String, String>,
) {
    for node in nodes {
        // Un nodo sin título no aporta ruta; se descarta junto con sus hijos.
        if node.title.is_empty() {
            continue;
        }

        if node.is_leaf {
            let full_path = path
                .iter()
                .map(String::as_str)
                .chain(std::iter::once(node.title.as_str()))
                .collect::<Vec<_>>()
                .join(PATH_SEPARATOR);
            choices.push(full_path.clone());
            lookup.insert(full_path, node.id.clone());
        }

        if !node.children.is_empty() {
            path.push(node.title.clone());
            flatten_recursive(&node.children, path, choices, lookup);
            path.pop();
        }
    }
}
