//! Abstracción sobre Rig para trabajar con distintos proveedores de LLM.
//! De momento se implementa OpenAI; Gemini/Ollama quedan preparados para el futuro.
//!
//! Tres formas de llamada contra el mismo proveedor:
//!   1. Visión+texto (extracción de enunciado y solución) — va directa al
//!      endpoint `chat/completions` porque la entrada de imagen no pasa por
//!      la capa de Rig que usamos para el resto.
//!   2. Extracción restringida (clasificador de punto de conocimiento).
//!   3. Embeddings en lote (ranking por similitud).

use std::time::Duration;

use anyhow::{anyhow, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::{AppConfig, LlmProvider};
use crate::error::AnalysisError;
use crate::models::ProblemImage;
use crate::solution::{self, ParsedSections, SOLUTION_MARKER, TEXT_MARKER};

/// Selección del clasificador; el esquema fuerza al modelo a responder con
/// una única ruta mediante llamada de herramienta.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct KnowledgePointSelection {
    /// Ruta completa del punto de conocimiento, copiada literalmente de la
    /// lista de opciones.
    pub knowledge_point_path: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

/// Gestor de LLMs y embeddings.
#[derive(Debug, Clone)]
pub struct LlmManager {
    pub provider: LlmProvider,
    pub api_base: String,
    pub vision_model: String,
    pub chat_model: String,
    pub embedding_model: String,
    pub call_timeout: Duration,
}

impl LlmManager {
    /// Construye el manager a partir de la configuración.
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        Ok(Self {
            provider: cfg.llm_provider.clone(),
            api_base: cfg.llm_api_base.clone(),
            vision_model: cfg.llm_vision_model.clone(),
            chat_model: cfg.llm_chat_model.clone(),
            embedding_model: cfg.llm_embedding_model.clone(),
            call_timeout: Duration::from_secs(cfg.llm_timeout_secs),
        })
    }

    // ---------------------------------------------------------------------
    // VISIÓN: ENUNCIADO + SOLUCIÓN EN UNA SOLA LLAMADA
    // ---------------------------------------------------------------------

    /// Envía la imagen del problema y obtiene transcripción + pasos de
    /// solución de una única respuesta de texto libre.
    ///
    /// Un fallo de la llamada (red, cuota, credenciales, timeout) o una
    /// respuesta vacía es fatal para el pipeline completo.
    pub async fn extract_text_and_solution(
        &self,
        http: &reqwest::Client,
        image: &ProblemImage,
        subject: Option<&str>,
    ) -> Result<ParsedSections, AnalysisError> {
        match self.provider {
            LlmProvider::OpenAI => self.extract_with_openai(http, image, subject).await,
            ref other => Err(AnalysisError::Extraction(anyhow!(
                "Proveedor LLM {:?} aún no implementado para visión",
                other
            ))),
        }
    }

    async fn extract_with_openai(
        &self,
        http: &reqwest::Client,
        image: &ProblemImage,
        subject: Option<&str>,
    ) -> Result<ParsedSections, AnalysisError> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            AnalysisError::Extraction(anyhow!("Falta OPENAI_API_KEY en el entorno"))
        })?;

        let prompt = vision_prompt(subject);
        let body = serde_json::json!({
            "model": self.vision_model,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "image_url", "image_url": { "url": image.as_data_url() } },
                    { "type": "text", "text": prompt },
                ]
            }],
        });

        let url = format!("{}/chat/completions", self.api_base.trim_end_matches('/'));
        let request = http.post(&url).bearer_auth(api_key).json(&body).send();

        let response = tokio::time::timeout(self.call_timeout, request)
            .await
            .map_err(|_| {
                AnalysisError::Extraction(anyhow!(
                    "Tiempo de espera agotado en la llamada de visión"
                ))
            })?
            .and_then(|r| r.error_for_status())
            .map_err(|e| AnalysisError::Extraction(e.into()))?;

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| AnalysisError::Extraction(e.into()))?;

        let content = parsed
            .choices
            .first()
            .map(|c| c.message.content.trim())
            .unwrap_or_default();
        if content.is_empty() {
            return Err(AnalysisError::Extraction(anyhow!(
                "El modelo de visión devolvió una respuesta vacía"
            )));
        }

        Ok(solution::parse_vision_reply(content))
    }

    // ---------------------------------------------------------------------
    // CLASIFICACIÓN RESTRINGIDA
    // ---------------------------------------------------------------------

    /// Pide al modelo que elija exactamente una ruta del conjunto enumerado.
    ///
    /// Devuelve `None` si la llamada falla, la extracción viene malformada o
    /// la ruta no pertenece al conjunto: la pertenencia se re-valida aquí
    /// aunque el proveedor prometa respetar el esquema. El orquestador trata
    /// ese `None` como fallo fatal de clasificación.
    pub async fn classify_knowledge_point(
        &self,
        problem_text: &str,
        choices: &[String],
        subject: Option<&str>,
    ) -> Result<Option<String>, AnalysisError> {
        match self.provider {
            LlmProvider::OpenAI => Ok(self
                .classify_with_openai(problem_text, choices, subject)
                .await),
            ref other => Err(AnalysisError::Extraction(anyhow!(
                "Proveedor LLM {:?} aún no implementado para clasificación",
                other
            ))),
        }
    }

    async fn classify_with_openai(
        &self,
        problem_text: &str,
        choices: &[String],
        subject: Option<&str>,
    ) -> Option<String> {
        use rig::client::CompletionClient as _;
        use rig::providers::openai;

        let client = openai::Client::from_env();
        let model_name = if self.chat_model.is_empty() {
            "gpt-4o-mini"
        } else {
            self.chat_model.as_str()
        };

        let preamble = format!(
            "{}\nElige el punto de conocimiento que mejor cubre el problema del \
             alumno. Debes responder con exactamente una ruta de la lista \
             siguiente, copiada literalmente:\n{}",
            subject_guidance(subject),
            choices.join("\n")
        );

        let extractor = client
            .extractor::<KnowledgePointSelection>(model_name)
            .preamble(&preamble)
            .build();

        let extraction = tokio::time::timeout(self.call_timeout, extractor.extract(problem_text)).await;
        let selection = match extraction {
            Ok(Ok(selection)) => selection,
            Ok(Err(e)) => {
                warn!("La extracción del clasificador falló: {e}");
                return None;
            }
            Err(_) => {
                warn!("Tiempo de espera agotado en la llamada de clasificación");
                return None;
            }
        };

        let path = selection.knowledge_point_path;
        if choices.iter().any(|c| c == &path) {
            Some(path)
        } else {
            warn!("El modelo devolvió una ruta fuera de la enumeración: '{path}'");
            None
        }
    }

    // ---------------------------------------------------------------------
    // EMBEDDINGS
    // ---------------------------------------------------------------------

    /// Calcula embeddings para una lista de textos en una única llamada.
    ///
    /// Devuelve un vector por texto, en el mismo orden. El fallo no es fatal
    /// para el pipeline: el ranking degrada al orden de recuperación.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f64>>> {
        match self.provider {
            LlmProvider::OpenAI => self.embed_with_openai(texts).await,
            ref other => Err(anyhow!(
                "Proveedor LLM {:?} aún no implementado para embeddings",
                other
            )),
        }
    }

    async fn embed_with_openai(&self, texts: &[String]) -> Result<Vec<Vec<f64>>> {
        use rig::client::EmbeddingsClient as _;
        use rig::embeddings::EmbeddingModel as _;
        use rig::providers::openai::{self, TEXT_EMBEDDING_3_SMALL};

        let client = openai::Client::from_env();

        let model_name = if self.embedding_model.is_empty() {
            TEXT_EMBEDDING_3_SMALL
        } else {
            self.embedding_model.as_str()
        };
        let embedding_model = client.embedding_model(model_name);

        let embeddings = tokio::time::timeout(
            self.call_timeout,
            embedding_model.embed_texts(texts.to_vec()),
        )
        .await
        .map_err(|_| anyhow!("Tiempo de espera agotado en la llamada de embeddings"))??;

        if embeddings.len() != texts.len() {
            return Err(anyhow!(
                "Número de embeddings ({}) distinto al número de textos ({})",
                embeddings.len(),
                texts.len()
            ));
        }

        Ok(embeddings.into_iter().map(|e| e.vec).collect())
    }
}

/// Instrucción completa para la llamada de visión, con los marcadores de
/// sección que el parser de `solution` sabe trocear.
fn vision_prompt(subject: Option<&str>) -> String {
    format!(
        "{}\nTranscribe el enunciado del problema de la imagen de forma literal \
         y después resuélvelo paso a paso. Responde EXACTAMENTE con este formato:\n\n\
         {TEXT_MARKER}\n(transcripción literal del enunciado)\n\
         {SOLUTION_MARKER}\n\
         PASO 1: título corto del paso\n\
         explicación del paso\n\
         FORMULA: expresión matemática del paso, si la hay\n\
         PASO 2: ...\n\n\
         Produce entre 3 y 6 pasos. Cada paso admite como mucho una línea FORMULA:.",
        subject_guidance(subject)
    )
}

/// Frase de orientación por asignatura que se antepone a las instrucciones.
/// Tabla estática; una asignatura desconocida cae en la frase genérica.
pub fn subject_guidance(subject: Option<&str>) -> &'static str {
    let normalized = subject.map(|s| s.trim().to_lowercase());
    match normalized.as_deref() {
        Some("matematicas" | "matemáticas" | "mates") => {
            "La imagen contiene un problema de matemáticas; presta atención a \
             expresiones algebraicas, figuras y datos numéricos."
        }
        Some("fisica" | "física") => {
            "La imagen contiene un problema de física; identifica magnitudes, \
             unidades y el fenómeno implicado."
        }
        Some("quimica" | "química") => {
            "La imagen contiene un problema de química; fíjate en fórmulas, \
             reacciones y cantidades de sustancia."
        }
        Some("lengua" | "literatura") => {
            "La imagen contiene un ejercicio de lengua o literatura; atiende al \
             texto, su género y lo que se pregunta sobre él."
        }
        Some("ingles" | "inglés") => {
            "La imagen contiene un ejercicio de inglés; conserva el idioma \
             original del enunciado al transcribir."
        }
        _ => "La imagen contiene un problema escolar.",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn la_orientacion_por_asignatura_cae_en_la_generica() {
        assert_eq!(
            subject_guidance(None),
            "La imagen contiene un problema escolar."
        );
        assert_eq!(
            subject_guidance(Some("numismática")),
            "La imagen contiene un problema escolar."
        );
        assert_ne!(
            subject_guidance(Some("Matemáticas")),
            subject_guidance(None)
        );
    }

    #[test]
    fn el_prompt_de_vision_incluye_los_marcadores_del_parser() {
        let prompt = vision_prompt(Some("física"));
        assert!(prompt.contains(TEXT_MARKER));
        assert!(prompt.contains(SOLUTION_MARKER));
        assert!(prompt.contains("PASO 1:"));
        assert!(prompt.contains("FORMULA:"));
    }

    #[test]
    fn se_deserializa_una_respuesta_de_chat_completions() {
        let raw = r#"{
            "choices": [
                { "message": { "role": "assistant", "content": "===TEXTO===\nhola" } }
            ]
        }"#;
        let parsed: ChatCompletionResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.choices.len(), 1);
        assert!(parsed.choices[0].message.content.starts_with(TEXT_MARKER));
    }
}
