//! Orquestador del pipeline de análisis.
//!
//! Secuencia completa de una ejecución:
//!   1. Descarga del árbol de conocimiento y extracción de la imagen, en
//!      paralelo (no dependen entre sí).
//!   2. Clasificación del punto de conocimiento sobre el conjunto aplanado.
//!   3. Recuperación de candidatos del banco de preguntas.
//!   4. Ranking por embeddings, con degradación al orden de recuperación.
//!   5. Ensamblado del resultado final.
//!
//! Toda etapa fatal aborta la ejecución con un `AnalysisError`; la única
//! etapa no fatal es el ranking. El orquestador no persiste ni renderiza
//! nada: el resultado pasa en propiedad al llamador.

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::AnalysisError;
use crate::knowledge_tree::{self, PATH_SEPARATOR};
use crate::llm::LlmManager;
use crate::models::{
    AnalysisResult, AnalysisStatus, KnowledgeTreeNode, ProblemCandidate, ProblemImage,
    RankedProblem,
};
use crate::question_bank;
use crate::ranking::{self, DEFAULT_SIMILARITY, TOP_PROBLEM_COUNT};
use crate::solution::ParsedSections;

/// Longitud máxima del título presentado en las tarjetas de la UI.
const TITLE_MAX_CHARS: usize = 50;

/// Colaboradores externos del pipeline, inyectados para que el orquestador
/// sea testeable con dobles sin red ni proveedor de LLM.
#[allow(async_fn_in_trait)]
pub trait AnalysisBackend: Send + Sync {
    async fn fetch_tree(&self) -> Result<Vec<KnowledgeTreeNode>, AnalysisError>;

    async fn extract_problem(
        &self,
        image: &ProblemImage,
        subject: Option<&str>,
    ) -> Result<ParsedSections, AnalysisError>;

    async fn classify(
        &self,
        problem_text: &str,
        choices: &[String],
        subject: Option<&str>,
    ) -> Result<Option<String>, AnalysisError>;

    async fn query_candidates(
        &self,
        knowledge_point_id: &str,
    ) -> Result<Vec<ProblemCandidate>, AnalysisError>;

    async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f64>>>;
}

/// Implementación real: servicios HTTP + proveedor LLM, cableados una sola
/// vez en el arranque (el proxy de salida ya viene aplicado al cliente).
#[derive(Clone)]
pub struct LiveBackend {
    pub config: AppConfig,
    pub http: reqwest::Client,
    pub llm: LlmManager,
}

impl AnalysisBackend for LiveBackend {
    async fn fetch_tree(&self) -> Result<Vec<KnowledgeTreeNode>, AnalysisError> {
        knowledge_tree::fetch_tree(&self.http, &self.config).await
    }

    async fn extract_problem(
        &self,
        image: &ProblemImage,
        subject: Option<&str>,
    ) -> Result<ParsedSections, AnalysisError> {
        self.llm
            .extract_text_and_solution(&self.http, image, subject)
            .await
    }

    async fn classify(
        &self,
        problem_text: &str,
        choices: &[String],
        subject: Option<&str>,
    ) -> Result<Option<String>, AnalysisError> {
        self.llm
            .classify_knowledge_point(problem_text, choices, subject)
            .await
    }

    async fn query_candidates(
        &self,
        knowledge_point_id: &str,
    ) -> Result<Vec<ProblemCandidate>, AnalysisError> {
        question_bank::query_candidates(&self.http, &self.config, knowledge_point_id).await
    }

    async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f64>>> {
        self.llm.embed_batch(texts).await
    }
}

/// Punto de entrada del pipeline: de la imagen al resultado ensamblado.
pub async fn analyze<B: AnalysisBackend>(
    backend: &B,
    image: &ProblemImage,
    subject: Option<&str>,
) -> Result<AnalysisResult, AnalysisError> {
    let analysis_id = format!("analysis_{}", Uuid::new_v4());
    info!("[{analysis_id}] Iniciando análisis");

    // Árbol y extracción no dependen entre sí.
    let (tree, extracted) = futures::try_join!(
        backend.fetch_tree(),
        backend.extract_problem(image, subject)
    )?;

    let (choices, lookup) = knowledge_tree::flatten(&tree);
    if choices.is_empty() {
        return Err(AnalysisError::EmptyChoiceSet);
    }
    info!(
        "[{analysis_id}] {} puntos de conocimiento clasificables; enunciado de {} caracteres",
        choices.len(),
        extracted.problem_text.chars().count()
    );

    let selected_path = backend
        .classify(&extracted.problem_text, &choices, subject)
        .await?
        .ok_or(AnalysisError::Classification)?;
    info!("[{analysis_id}] Punto de conocimiento elegido: '{selected_path}'");

    let knowledge_point_id = lookup
        .get(&selected_path)
        .ok_or_else(|| AnalysisError::LookupInconsistency(selected_path.clone()))?;

    let candidates = backend.query_candidates(knowledge_point_id).await?;
    if candidates.is_empty() {
        return Err(AnalysisError::EmptyCandidates);
    }

    let (ranked, ranking_degraded) =
        rank_candidates(backend, &extracted.problem_text, candidates).await;

    let problems = ranked
        .iter()
        .map(|(candidate, similarity)| build_problem(candidate, *similarity, &selected_path))
        .collect();

    info!("[{analysis_id}] Análisis completado (ranking degradado: {ranking_degraded})");
    Ok(AnalysisResult {
        knowledge_point: selected_path,
        solution: extracted.steps,
        problems,
        analysis_id,
        status: AnalysisStatus::Completed,
        ranking_degraded,
        created_at: Utc::now().to_rfc3339(),
    })
}

/// Política de ranking:
/// - Con menos de `TOP_PROBLEM_COUNT` candidatos no hay nada que rankear:
///   se devuelven todos, en orden de recuperación, con similitud fija.
/// - Si la llamada de embeddings falla, se degrada a los primeros
///   `TOP_PROBLEM_COUNT` por orden de recuperación y se marca la ejecución.
async fn rank_candidates<B: AnalysisBackend>(
    backend: &B,
    problem_text: &str,
    candidates: Vec<ProblemCandidate>,
) -> (Vec<(ProblemCandidate, i32)>, bool) {
    if candidates.len() < TOP_PROBLEM_COUNT {
        info!(
            "Sólo {} candidatos: se omite el ranking por similitud",
            candidates.len()
        );
        let ranked = candidates
            .into_iter()
            .map(|c| (c, DEFAULT_SIMILARITY))
            .collect();
        return (ranked, false);
    }

    let mut texts = Vec::with_capacity(candidates.len() + 1);
    texts.push(problem_text.to_string());
    texts.extend(
        candidates
            .iter()
            .map(|c| ranking::clean_article(&c.question_article)),
    );

    match backend.embed_batch(&texts).await {
        Ok(vectors) => {
            let ranked = ranking::rank_by_embedding(&vectors[0], &vectors[1..], &candidates);
            (ranked, false)
        }
        Err(e) => {
            warn!("Falló el cálculo de embeddings, se degrada al orden de recuperación: {e}");
            let ranked = candidates
                .into_iter()
                .take(TOP_PROBLEM_COUNT)
                .map(|c| (c, DEFAULT_SIMILARITY))
                .collect();
            (ranked, true)
        }
    }
}

fn build_problem(
    candidate: &ProblemCandidate,
    similarity: i32,
    knowledge_path: &str,
) -> RankedProblem {
    let content = ranking::extract_problem_content(&candidate.question_article);
    let tag = knowledge_path
        .rsplit(PATH_SEPARATOR)
        .next()
        .unwrap_or_default()
        .to_string();

    RankedProblem {
        id: candidate.question_id.clone(),
        title: ranking::content_title(&content, TITLE_MAX_CHARS),
        estimated_time: estimated_minutes(&content),
        content,
        // Marcadores de posición para la UI; no hay inferencia detrás.
        difficulty: "medium".to_string(),
        tags: vec![tag],
        similarity,
        source: "banco de preguntas".to_string(),
    }
}

/// Estimación orientativa en minutos a partir de la longitud del enunciado.
fn estimated_minutes(content: &str) -> u32 {
    (10 + content.chars().count() / 200).min(20) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SolutionStep;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakeBackend {
        tree: Vec<KnowledgeTreeNode>,
        extraction: ParsedSections,
        classification: Option<String>,
        candidates: Vec<ProblemCandidate>,
        embedding_vectors: Vec<Vec<f64>>,
        embeddings_fail: bool,
        candidates_queried: AtomicBool,
        embeddings_requested: AtomicBool,
    }

    impl AnalysisBackend for FakeBackend {
        async fn fetch_tree(&self) -> Result<Vec<KnowledgeTreeNode>, AnalysisError> {
            Ok(self.tree.clone())
        }

        async fn extract_problem(
            &self,
            _image: &ProblemImage,
            _subject: Option<&str>,
        ) -> Result<ParsedSections, AnalysisError> {
            Ok(self.extraction.clone())
        }

        async fn classify(
            &self,
            _problem_text: &str,
            _choices: &[String],
            _subject: Option<&str>,
        ) -> Result<Option<String>, AnalysisError> {
            Ok(self.classification.clone())
        }

        async fn query_candidates(
            &self,
            _knowledge_point_id: &str,
        ) -> Result<Vec<ProblemCandidate>, AnalysisError> {
            self.candidates_queried.store(true, Ordering::SeqCst);
            Ok(self.candidates.clone())
        }

        async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f64>>> {
            self.embeddings_requested.store(true, Ordering::SeqCst);
            if self.embeddings_fail {
                anyhow::bail!("proveedor de embeddings caído");
            }
            assert_eq!(texts.len(), self.embedding_vectors.len());
            Ok(self.embedding_vectors.clone())
        }
    }

    fn leaf_tree() -> Vec<KnowledgeTreeNode> {
        vec![KnowledgeTreeNode {
            id: "raiz".into(),
            title: "Álgebra".into(),
            is_leaf: false,
            children: vec![KnowledgeTreeNode {
                id: "kp-1".into(),
                title: "Cuadráticas".into(),
                is_leaf: true,
                children: vec![],
            }],
        }]
    }

    fn two_step_extraction() -> ParsedSections {
        ParsedSections {
            problem_text: "Resuelve x^2 - 5x + 6 = 0".into(),
            steps: vec![
                SolutionStep {
                    step: 1,
                    title: "Factorizar".into(),
                    content: "(x-2)(x-3) = 0".into(),
                    formula: Some("$x^2-5x+6=(x-2)(x-3)$".into()),
                },
                SolutionStep {
                    step: 2,
                    title: "Resolver".into(),
                    content: "x = 2 o x = 3".into(),
                    formula: None,
                },
            ],
        }
    }

    fn candidates(n: usize) -> Vec<ProblemCandidate> {
        (1..=n)
            .map(|i| ProblemCandidate {
                question_id: format!("q{i}"),
                question_article: format!("{i}. Enunciado del ejercicio {i}"),
            })
            .collect()
    }

    /// Vectores unitarios cuyo coseno con el problema [1, 0] es el pedido.
    fn vectors_with_cosines(cosines: &[f64]) -> Vec<Vec<f64>> {
        let mut vectors = vec![vec![1.0, 0.0]];
        vectors.extend(
            cosines
                .iter()
                .map(|c| vec![*c, (1.0 - c * c).sqrt()]),
        );
        vectors
    }

    fn happy_backend() -> FakeBackend {
        FakeBackend {
            tree: leaf_tree(),
            extraction: two_step_extraction(),
            classification: Some("Álgebra -> Cuadráticas".into()),
            candidates: candidates(4),
            embedding_vectors: vectors_with_cosines(&[0.9, 0.7, 0.5, 0.3]),
            embeddings_fail: false,
            candidates_queried: AtomicBool::new(false),
            embeddings_requested: AtomicBool::new(false),
        }
    }

    fn image() -> ProblemImage {
        ProblemImage::from_bytes(b"png-falso", "image/png")
    }

    #[tokio::test]
    async fn escenario_a_camino_feliz() {
        let backend = happy_backend();

        let result = analyze(&backend, &image(), Some("matemáticas")).await.unwrap();

        assert_eq!(result.knowledge_point, "Álgebra -> Cuadráticas");
        assert_eq!(result.status, AnalysisStatus::Completed);
        assert!(!result.ranking_degraded);
        assert_eq!(result.solution.len(), 2);

        assert_eq!(result.problems.len(), 3);
        let ids: Vec<_> = result.problems.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["q1", "q2", "q3"]);
        let sims: Vec<_> = result.problems.iter().map(|p| p.similarity).collect();
        assert_eq!(sims, vec![90, 70, 50]);
        assert_eq!(result.problems[0].tags, vec!["Cuadráticas".to_string()]);
        assert!(result.analysis_id.starts_with("analysis_"));
    }

    #[tokio::test]
    async fn escenario_b_ranking_degradado_sigue_completando() {
        let mut backend = happy_backend();
        backend.embeddings_fail = true;

        let result = analyze(&backend, &image(), None).await.unwrap();

        assert_eq!(result.status, AnalysisStatus::Completed);
        assert!(result.ranking_degraded);
        assert_eq!(result.problems.len(), 3);
        let ids: Vec<_> = result.problems.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["q1", "q2", "q3"]);
        for problem in &result.problems {
            assert_eq!(problem.similarity, DEFAULT_SIMILARITY);
        }
    }

    #[tokio::test]
    async fn escenario_c_sin_clasificacion_no_se_consulta_el_banco() {
        let mut backend = happy_backend();
        backend.classification = None;

        let error = analyze(&backend, &image(), None).await.unwrap_err();

        assert!(matches!(error, AnalysisError::Classification));
        assert!(!backend.candidates_queried.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn escenario_d_con_dos_candidatos_se_omite_el_ranking() {
        let mut backend = happy_backend();
        backend.candidates = candidates(2);

        let result = analyze(&backend, &image(), None).await.unwrap();

        assert_eq!(result.problems.len(), 2);
        assert!(!result.ranking_degraded);
        for problem in &result.problems {
            assert_eq!(problem.similarity, DEFAULT_SIMILARITY);
        }
        assert!(!backend.embeddings_requested.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn la_lista_vacia_de_candidatos_es_fatal() {
        let mut backend = happy_backend();
        backend.candidates = Vec::new();

        let error = analyze(&backend, &image(), None).await.unwrap_err();
        assert!(matches!(error, AnalysisError::EmptyCandidates));
    }

    #[tokio::test]
    async fn un_arbol_sin_hojas_es_fatal() {
        let mut backend = happy_backend();
        backend.tree = vec![KnowledgeTreeNode {
            id: "solo-rama".into(),
            title: "Sin hojas".into(),
            is_leaf: false,
            children: vec![],
        }];

        let error = analyze(&backend, &image(), None).await.unwrap_err();
        assert!(matches!(error, AnalysisError::EmptyChoiceSet));
    }

    #[tokio::test]
    async fn una_ruta_sin_id_en_el_indice_es_fatal() {
        let mut backend = happy_backend();
        backend.classification = Some("Álgebra -> Inventada".into());

        let error = analyze(&backend, &image(), None).await.unwrap_err();
        assert!(matches!(error, AnalysisError::LookupInconsistency(path) if path == "Álgebra -> Inventada"));
    }

    #[test]
    fn los_problemas_se_construyen_con_contenido_limpio() {
        let candidate = ProblemCandidate {
            question_id: "q9".into(),
            question_article: "3. ¿Cuánto&nbsp;es 2+2?".into(),
        };

        let problem = build_problem(&candidate, 85, "Aritmética -> Sumas");

        assert_eq!(problem.content, "¿Cuánto es 2+2?");
        assert_eq!(problem.title, "¿Cuánto es 2+2?");
        assert_eq!(problem.tags, vec!["Sumas".to_string()]);
        assert_eq!(problem.similarity, 85);
        assert!((10..=20).contains(&problem.estimated_time));
    }
}
