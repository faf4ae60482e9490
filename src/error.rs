//! Taxonomía de errores del pipeline de análisis.
//!
//! Todas las variantes salvo la degradación del ranking (que no es un
//! error, ver `pipeline`) abortan la ejecución completa y llegan al
//! llamador como un único fallo tipado.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalysisError {
    /// El servicio de taxonomía no respondió, respondió con un código de
    /// error o devolvió un JSON que no se pudo interpretar.
    #[error("Error al consultar el servicio de taxonomía: {0}")]
    TaxonomyFetch(anyhow::Error),

    /// El banco de preguntas no respondió o respondió con error.
    #[error("Error al consultar el banco de preguntas: {0}")]
    QuestionBankFetch(anyhow::Error),

    /// El árbol se recuperó pero no aplanó a ningún punto clasificable.
    #[error("El árbol de conocimiento no contiene ningún punto clasificable")]
    EmptyChoiceSet,

    /// La llamada de visión falló o no devolvió texto utilizable.
    #[error("No se pudo extraer el enunciado de la imagen: {0}")]
    Extraction(anyhow::Error),

    /// El modelo no seleccionó ninguna ruta válida del conjunto enumerado.
    /// No se sustituye por ningún punto de conocimiento por defecto.
    #[error("El modelo no identificó un punto de conocimiento válido para el problema")]
    Classification,

    /// La ruta clasificada no aparece en el índice ruta→id. Sólo puede
    /// ocurrir si el aplanado pisó claves duplicadas o el modelo devolvió
    /// una ruta fuera de la enumeración.
    #[error("La ruta clasificada '{0}' no tiene ID asociado en el índice")]
    LookupInconsistency(String),

    /// La búsqueda funcionó pero devolvió cero candidatos.
    #[error("El banco de preguntas no devolvió ejercicios para ese punto de conocimiento")]
    EmptyCandidates,
}
