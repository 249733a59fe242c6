//! Text rendering of results and recommendations.

use stylemate_core::recommendation::{self, Recommendation};
use stylemate_core::{Evaluation, ModelId};
use stylemate_session::PublishedResult;

/// Probability as a percentage with one decimal place.
pub fn percent(probability: f32) -> String {
    format!("{:.1}%", probability * 100.0)
}

pub fn result_lines(model: ModelId, evaluation: &Evaluation) -> Vec<String> {
    let mut lines = vec![format!("{} Results:", model.display_name())];
    match evaluation {
        Evaluation::NoFaceDetected => lines.push("  No face detected.".to_string()),
        Evaluation::FaceTooSmall { width, height } => lines.push(format!(
            "  Face too small ({width:.0}x{height:.0} px). Move closer to the camera."
        )),
        Evaluation::Classified { scores } => {
            for score in scores {
                lines.push(format!("  {}: {}", score.label, percent(score.probability)));
            }
        }
    }
    lines
}

pub fn print_result(result: &PublishedResult) {
    for line in result_lines(result.model, &result.evaluation) {
        println!("{line}");
    }
}

pub fn print_recommendation(rec: &Recommendation) {
    println!("{}", rec.title);
    println!("  {}", rec.guidance);
    for asset in &rec.assets {
        println!("  see: {asset}");
    }
    if let Some(overlay) = &rec.overlay {
        println!("  try on: stylemate try-on {overlay}");
    }
}

/// Print guidance for the top class of a classified result.
pub fn print_top_recommendation(evaluation: &Evaluation) {
    let Some(top) = evaluation.top() else {
        return;
    };
    match recommendation::lookup(&top.label) {
        Some(rec) => {
            println!();
            print_recommendation(rec);
        }
        None => tracing::debug!(label = %top.label, "no recommendation for label"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stylemate_core::ClassScore;

    #[test]
    fn test_percent_one_decimal() {
        assert_eq!(percent(0.6), "60.0%");
        assert_eq!(percent(0.123456), "12.3%");
        assert_eq!(percent(1.0), "100.0%");
        assert_eq!(percent(0.0), "0.0%");
    }

    #[test]
    fn test_classified_lines_keep_model_order() {
        let evaluation = Evaluation::Classified {
            scores: vec![ClassScore::new("Oval", 0.25), ClassScore::new("Round", 0.75)],
        };
        let lines = result_lines(ModelId::FaceShape, &evaluation);
        assert_eq!(
            lines,
            vec![
                "Face Type Analysis Results:",
                "  Oval: 25.0%",
                "  Round: 75.0%",
            ]
        );
    }

    #[test]
    fn test_gate_rejections_render() {
        let lines = result_lines(ModelId::PersonalTone, &Evaluation::NoFaceDetected);
        assert_eq!(lines[0], "Personal Tone Analysis Results:");
        assert_eq!(lines[1], "  No face detected.");

        let lines = result_lines(
            ModelId::FaceShape,
            &Evaluation::FaceTooSmall {
                width: 32.0,
                height: 40.0,
            },
        );
        assert!(lines[1].contains("32x40"));
    }
}
