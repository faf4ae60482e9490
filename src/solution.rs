//! Parser de la respuesta libre del modelo de visión.
//!
//! El contrato con el modelo es un mini-lenguaje orientado a líneas con dos
//! marcadores de sección (`===TEXTO===` / `===SOLUCION===`) y dos marcadores
//! por línea (`PASO n:` y `FORMULA:`). Todo lo frágil del formato queda
//! aislado detrás de `parse_vision_reply`, con ramas explícitas de
//! degradación para "sin marcadores" y "sin pasos".

use crate::models::SolutionStep;

/// Marcador que abre la transcripción del enunciado.
pub const TEXT_MARKER: &str = "===TEXTO===";
/// Marcador que abre el desarrollo de la solución.
pub const SOLUTION_MARKER: &str = "===SOLUCION===";

const STEP_PREFIX: &str = "PASO ";
const FORMULA_PREFIX: &str = "FORMULA:";

const UNSTRUCTURED_TITLE: &str = "Desarrollo sin estructurar";

/// Resultado de trocear la respuesta del modelo.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSections {
    pub problem_text: String,
    pub steps: Vec<SolutionStep>,
}

/// Divide la respuesta en enunciado + pasos de solución.
///
/// Si falta cualquiera de los dos marcadores de sección, la respuesta
/// completa se toma a la vez como enunciado y como único paso de solución:
/// degradar es preferible a fallar por un modelo que ignoró el formato.
pub fn parse_vision_reply(raw: &str) -> ParsedSections {
    let text_pos = raw.find(TEXT_MARKER);
    let solution_pos = raw.find(SOLUTION_MARKER);

    let (Some(text_at), Some(solution_at)) = (text_pos, solution_pos) else {
        let whole = raw.trim().to_string();
        return ParsedSections {
            problem_text: whole.clone(),
            steps: vec![SolutionStep {
                step: 1,
                title: UNSTRUCTURED_TITLE.to_string(),
                content: whole,
                formula: None,
            }],
        };
    };

    // Con los marcadores invertidos no hay forma fiable de separar secciones.
    if solution_at < text_at {
        let whole = raw.trim().to_string();
        return ParsedSections {
            problem_text: whole.clone(),
            steps: vec![SolutionStep {
                step: 1,
                title: UNSTRUCTURED_TITLE.to_string(),
                content: whole,
                formula: None,
            }],
        };
    }

    let problem_text = raw[text_at + TEXT_MARKER.len()..solution_at]
        .trim()
        .to_string();
    let solution_text = raw[solution_at + SOLUTION_MARKER.len()..].trim();

    let mut steps = parse_steps(solution_text);
    if steps.is_empty() && !solution_text.is_empty() {
        steps.push(SolutionStep {
            step: 1,
            title: UNSTRUCTURED_TITLE.to_string(),
            content: solution_text.to_string(),
            formula: None,
        });
    }

    ParsedSections {
        problem_text,
        steps,
    }
}

/// Extrae los pasos de la sección de solución.
///
/// Tolera numeraciones con huecos o desordenadas: los pasos se renumeran de
/// forma contigua desde 1 en orden de aparición. Las líneas posteriores a un
/// `FORMULA:` dentro del mismo paso no acumulan contenido; varias líneas
/// `FORMULA:` en un paso se quedan con la última.
pub fn parse_steps(text: &str) -> Vec<SolutionStep> {
    struct PendingStep {
        title: String,
        content_lines: Vec<String>,
        formula: Option<String>,
        accepting_content: bool,
    }

    let mut pending: Vec<PendingStep> = Vec::new();

    for line in text.lines() {
        let trimmed = line.trim();

        if let Some(title) = parse_step_marker(trimmed) {
            pending.push(PendingStep {
                title,
                content_lines: Vec::new(),
                formula: None,
                accepting_content: true,
            });
            continue;
        }

        if let Some(expr) = trimmed.strip_prefix(FORMULA_PREFIX) {
            if let Some(step) = pending.last_mut() {
                step.formula = Some(expr.trim().to_string());
                step.accepting_content = false;
            }
            // Una fórmula antes del primer paso no tiene dónde colgarse.
            continue;
        }

        if let Some(step) = pending.last_mut() {
            if step.accepting_content && !trimmed.is_empty() {
                step.content_lines.push(trimmed.to_string());
            }
        }
    }

    pending
        .into_iter()
        .enumerate()
        .map(|(idx, step)| SolutionStep {
            step: idx as u32 + 1,
            title: step.title,
            content: step.content_lines.join("\n"),
            formula: step.formula,
        })
        .collect()
}

/// Reconoce una línea `PASO <n>: <título>` y devuelve el título.
fn parse_step_marker(line: &str) -> Option<String> {
    let rest = line.strip_prefix(STEP_PREFIX)?;
    let (number, title) = rest.split_once(':')?;
    number.trim().parse::<u32>().ok()?;
    Some(title.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn una_respuesta_bien_formada_produce_ambas_secciones() {
        let raw = "===TEXTO===\nResuelve x^2 - 5x + 6 = 0\n===SOLUCION===\n\
                   PASO 1: Identificar coeficientes\nEs una ecuación cuadrática.\n\
                   FORMULA: $ax^2+bx+c=0$\n\
                   PASO 2: Factorizar\nBuscamos dos números que sumen -5.\n";

        let parsed = parse_vision_reply(raw);

        assert_eq!(parsed.problem_text, "Resuelve x^2 - 5x + 6 = 0");
        assert_eq!(parsed.steps.len(), 2);
        assert_eq!(parsed.steps[0].step, 1);
        assert_eq!(parsed.steps[0].title, "Identificar coeficientes");
        assert_eq!(parsed.steps[0].content, "Es una ecuación cuadrática.");
        assert_eq!(parsed.steps[0].formula.as_deref(), Some("$ax^2+bx+c=0$"));
        assert_eq!(parsed.steps[1].step, 2);
        assert_eq!(parsed.steps[1].formula, None);
    }

    #[test]
    fn sin_marcadores_todo_es_enunciado_y_un_unico_paso() {
        let raw = "El modelo ignoró el formato y contestó en prosa.";
        let parsed = parse_vision_reply(raw);

        assert_eq!(parsed.problem_text, raw);
        assert_eq!(parsed.steps.len(), 1);
        assert_eq!(parsed.steps[0].step, 1);
        assert_eq!(parsed.steps[0].content, raw);
    }

    #[test]
    fn marcadores_invertidos_degradan_igual_que_ausentes() {
        let raw = "===SOLUCION===\nalgo\n===TEXTO===\notra cosa";
        let parsed = parse_vision_reply(raw);

        assert_eq!(parsed.steps.len(), 1);
        assert_eq!(parsed.problem_text, raw.trim());
    }

    #[test]
    fn una_solucion_sin_pasos_reconocibles_sintetiza_uno() {
        let raw = "===TEXTO===\nEnunciado\n===SOLUCION===\nDesarrollo en prosa sin pasos.";
        let parsed = parse_vision_reply(raw);

        assert_eq!(parsed.problem_text, "Enunciado");
        assert_eq!(parsed.steps.len(), 1);
        assert_eq!(parsed.steps[0].title, "Desarrollo sin estructurar");
        assert_eq!(parsed.steps[0].content, "Desarrollo en prosa sin pasos.");
    }

    #[test]
    fn parse_steps_devuelve_cero_pasos_para_texto_vacio() {
        assert!(parse_steps("").is_empty());
    }

    #[test]
    fn la_numeracion_con_huecos_se_repara() {
        let text = "PASO 2: Primero\ncontenido a\nPASO 7: Segundo\ncontenido b\nPASO 1: Tercero\n";
        let steps = parse_steps(text);

        assert_eq!(steps.len(), 3);
        assert_eq!(
            steps.iter().map(|s| s.step).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(steps[0].title, "Primero");
        assert_eq!(steps[2].title, "Tercero");
    }

    #[test]
    fn con_varias_formulas_en_un_paso_gana_la_ultima() {
        let text = "PASO 1: Único\ncontenido\nFORMULA: a\nFORMULA: b\n";
        let steps = parse_steps(text);

        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].formula.as_deref(), Some("b"));
    }

    #[test]
    fn las_lineas_tras_la_formula_no_acumulan_contenido() {
        let text = "PASO 1: Único\ncontenido real\nFORMULA: x\nesto ya no entra\n";
        let steps = parse_steps(text);

        assert_eq!(steps[0].content, "contenido real");
    }

    #[test]
    fn una_linea_paso_malformada_cuenta_como_contenido() {
        let text = "PASO 1: Bueno\nPASO sin número: esto es contenido\nmás contenido\n";
        let steps = parse_steps(text);

        assert_eq!(steps.len(), 1);
        assert_eq!(
            steps[0].content,
            "PASO sin número: esto es contenido\nmás contenido"
        );
    }
}
