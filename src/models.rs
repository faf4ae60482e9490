//! Modelos de dominio del pipeline de análisis (árbol de conocimiento,
//! candidatos del banco de preguntas y resultado final).

use base64::Engine as _;
use serde::{Deserialize, Serialize};

/// Nodo del árbol de conocimiento tal y como lo devuelve el servicio de
/// taxonomía. Sólo los nodos con `isLeaf == true` son clasificables; el
/// resto existe únicamente para construir prefijos de ruta.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeTreeNode {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub is_leaf: bool,
    #[serde(default)]
    pub children: Vec<KnowledgeTreeNode>,
}

/// Candidato devuelto por la búsqueda del banco de preguntas.
/// `question_article` llega como HTML con marcado matemático embebido.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProblemCandidate {
    pub question_id: String,
    #[serde(default)]
    pub question_article: String,
}

/// Paso de la solución generada. `step` es 1-based y contiguo en el
/// resultado final; el parser repara numeraciones con huecos.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolutionStep {
    pub step: u32,
    pub title: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
}

/// Candidato ya puntuado y preparado para la UI.
///
/// `difficulty` y `estimated_time` son marcadores de posición para el
/// frontend: no provienen de ninguna inferencia real.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedProblem {
    pub id: String,
    pub title: String,
    pub content: String,
    pub difficulty: String,
    pub tags: Vec<String>,
    pub similarity: i32,
    pub estimated_time: u32,
    pub source: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    Completed,
    Failed,
}

/// Agregado raíz de una ejecución del pipeline. Inmutable tras su
/// construcción; la capa de persistencia (externa) puede guardar una copia.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub knowledge_point: String,
    pub solution: Vec<SolutionStep>,
    pub problems: Vec<RankedProblem>,
    pub analysis_id: String,
    pub status: AnalysisStatus,
    /// `true` si el ranking por embeddings falló y se degradó al orden
    /// de recuperación con similitud por defecto.
    pub ranking_degraded: bool,
    pub created_at: String,
}

/// Imagen del problema lista para enviar al proveedor de visión.
#[derive(Debug, Clone)]
pub struct ProblemImage {
    pub base64: String,
    pub mime_type: String,
}

impl ProblemImage {
    pub fn from_bytes(bytes: &[u8], mime_type: &str) -> Self {
        Self {
            base64: base64::engine::general_purpose::STANDARD.encode(bytes),
            mime_type: mime_type.to_string(),
        }
    }

    /// URL `data:` inline para el mensaje multimodal.
    pub fn as_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64)
    }
}
