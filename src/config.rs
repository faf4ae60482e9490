//! Carga y gestión de configuración de la aplicación (servicios externos + LLM).

use std::env;
use anyhow::{anyhow, Result};
use url::Url;

#[derive(Clone, Debug)]
pub enum LlmProvider {
    OpenAI,
    Gemini,
    Ollama,
}

impl LlmProvider {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "gemini" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            other => Err(anyhow!("Proveedor LLM no soportado: {other}")),
        }
    }
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_addr: String,

    /// Servicio de taxonomía (árbol de puntos de conocimiento).
    pub taxonomy_url: String,
    /// Servicio de búsqueda del banco de preguntas.
    pub question_bank_url: String,
    /// Token que ambos servicios esperan en la cabecera `token`. Vacío si
    /// el despliegue no lo requiere.
    pub question_bank_token: String,

    /// Códigos de enumeración externos; opacos para nosotros.
    pub study_phase_code: String,
    pub subject_code: String,
    /// Tamaño de la única página de candidatos que se recupera.
    pub page_size: u32,

    pub llm_provider: LlmProvider,
    pub llm_api_base: String,
    pub llm_vision_model: String,
    pub llm_chat_model: String,
    pub llm_embedding_model: String,

    /// Timeouts por llamada, en segundos.
    pub taxonomy_timeout_secs: u64,
    pub question_bank_timeout_secs: u64,
    pub llm_timeout_secs: u64,

    /// Proxy de salida opcional, aplicado una sola vez al cliente HTTP
    /// compartido en el arranque.
    pub outbound_proxy: Option<String>,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        let taxonomy_url = required_url("TAXONOMY_API_URL")?;
        let question_bank_url = required_url("QUESTION_BANK_API_URL")?;
        let question_bank_token =
            env::var("QUESTION_BANK_TOKEN").unwrap_or_default();

        let server_addr =
            env::var("SERVER_ADDR").unwrap_or_else(|_| "127.0.0.1:3344".to_string());

        let study_phase_code =
            env::var("STUDY_PHASE_CODE").unwrap_or_else(|_| "300".to_string());
        let subject_code = env::var("SUBJECT_CODE").unwrap_or_else(|_| "2".to_string());
        let page_size = numeric_var("QUESTION_PAGE_SIZE", 10)?;

        let llm_provider_str =
            env::var("LLM_PROVIDER").unwrap_or_else(|_| "openai".to_string());
        let llm_provider = LlmProvider::from_str(&llm_provider_str)?;

        let llm_api_base = env::var("LLM_API_BASE")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        Url::parse(&llm_api_base)
            .map_err(|e| anyhow!("LLM_API_BASE no es una URL válida: {e}"))?;

        let llm_vision_model =
            env::var("LLM_VISION_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        let llm_chat_model =
            env::var("LLM_CHAT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        let llm_embedding_model = env::var("LLM_EMBEDDING_MODEL")
            .unwrap_or_else(|_| "text-embedding-3-small".to_string());

        let taxonomy_timeout_secs = numeric_var("TAXONOMY_TIMEOUT_SECS", 15)?;
        let question_bank_timeout_secs = numeric_var("QUESTION_BANK_TIMEOUT_SECS", 10)?;
        let llm_timeout_secs = numeric_var("LLM_TIMEOUT_SECS", 60)?;

        let outbound_proxy = env::var("OUTBOUND_PROXY").ok().filter(|s| !s.is_empty());

        Ok(Self {
            server_addr,
            taxonomy_url,
            question_bank_url,
            question_bank_token,
            study_phase_code,
            subject_code,
            page_size,
            llm_provider,
            llm_api_base,
            llm_vision_model,
            llm_chat_model,
            llm_embedding_model,
            taxonomy_timeout_secs,
            question_bank_timeout_secs,
            llm_timeout_secs,
            outbound_proxy,
        })
    }
}

fn required_url(name: &str) -> Result<String> {
    let value = env::var(name).map_err(|_| anyhow!("Falta {name} en el entorno"))?;
    Url::parse(&value).map_err(|e| anyhow!("{name} no es una URL válida: {e}"))?;
    Ok(value)
}

fn numeric_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| anyhow!("{name} debe ser numérico, se recibió '{raw}'")),
        Err(_) => Ok(default),
    }
}
