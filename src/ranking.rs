//! Ranking de candidatos por similitud semántica y limpieza del marcado
//! con el que llegan del banco de preguntas.

use std::sync::LazyLock;

use regex::Regex;

use crate::models::ProblemCandidate;

/// Similitud que se asigna cuando el ranking no aplica o se degrada.
pub const DEFAULT_SIMILARITY: i32 = 80;
/// Número de problemas que se seleccionan para el resultado final.
pub const TOP_PROBLEM_COUNT: usize = 3;

/// Similitud coseno entre dos vectores. Con un vector nulo (o longitudes
/// distintas) devuelve 0.0 en lugar de dividir por cero.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Reescala el coseno [-1, 1] a porcentaje presentable. Las similitudes
/// negativas se recortan a 0: un porcentaje negativo no significa nada
/// para el alumno (decisión registrada en DESIGN.md).
pub fn similarity_percent(cosine: f64) -> i32 {
    ((cosine * 100.0).round() as i32).clamp(0, 100)
}

/// Ordena los candidatos por similitud con el vector del problema y se
/// queda con los `TOP_PROBLEM_COUNT` mejores.
///
/// Precondición: `candidate_vectors` y `candidates` van en el mismo orden.
pub fn rank_by_embedding(
    problem_vector: &[f64],
    candidate_vectors: &[Vec<f64>],
    candidates: &[ProblemCandidate],
) -> Vec<(ProblemCandidate, i32)> {
    let mut scored: Vec<(usize, f64)> = candidate_vectors
        .iter()
        .enumerate()
        .map(|(idx, vector)| (idx, cosine_similarity(problem_vector, vector)))
        .collect();

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    scored
        .into_iter()
        .take(TOP_PROBLEM_COUNT)
        .map(|(idx, cosine)| (candidates[idx].clone(), similarity_percent(cosine)))
        .collect()
}

/// Decodifica las entidades HTML habituales del artículo sin tocar el
/// marcado en sí (el frontend lo renderiza tal cual).
pub fn clean_article(raw: &str) -> String {
    raw.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
        .trim()
        .to_string()
}

static LEADING_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+[.)、．]\s*").expect("regex de numeración"));
static TRAILING_OPTIONS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)[A-D][.)、．]\s*[^A-D]*$").expect("regex de opciones"));

/// Limpia el artículo para presentarlo como enunciado: quita la numeración
/// inicial ("5." / "5)") y las opciones finales de tipo test (A./B./C./D.).
pub fn extract_problem_content(html_content: &str) -> String {
    if html_content.is_empty() {
        return String::new();
    }
    let content = LEADING_NUMBER.replace(html_content, "");
    let content = TRAILING_OPTIONS.replace_all(&content, "");
    clean_article(&content)
}

/// Título corto para las tarjetas de la UI: prefijo del enunciado limpio.
pub fn content_title(content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        return content.to_string();
    }
    let prefix: String = content.chars().take(max_chars).collect();
    format!("{prefix}...")
}
