use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use crate::{config::AppConfig, llm::LlmManager, pipeline::LiveBackend};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub http: reqwest::Client,
    pub llm_manager: LlmManager,
    pub shutdown_sender: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

impl AppState {
    /// Backend real del pipeline con los colaboradores ya cableados.
    pub fn backend(&self) -> LiveBackend {
        LiveBackend {
            config: self.config.clone(),
            http: self.http.clone(),
            llm: self.llm_manager.clone(),
        }
    }
}
