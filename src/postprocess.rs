use clap::ValueEnum;
use ndarray::Array1;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::error::ModelError;
use crate::mapping::LabelTable;

/// How raw model scores are turned into reported confidences.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum ScoreTransform {
    /// Report scores exactly as the model emits them.
    #[default]
    Raw,
    /// Apply softmax first, for models whose last layer emits logits.
    Softmax,
}

/// Applies softmax to a 1D array and returns a new Array1<f32>.
pub fn softmax(slice: &Array1<f32>) -> Array1<f32> {
    let max_val = slice.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exp_vals: Array1<f32> = slice.mapv(|x| (x - max_val).exp());
    let sum_exp: f32 = exp_vals.sum();
    exp_vals.mapv(|v| v / sum_exp)
}

/// Index and value of the largest score. Ties go to the lowest index.
///
/// The reported value is always one of the scores, starting from the first.
pub fn argmax_and_max(scores: &Array1<f32>) -> (usize, f32) {
    let first = scores.first().copied().unwrap_or(f32::NEG_INFINITY);
    scores
        .iter()
        .enumerate()
        .skip(1)
        .fold((0, first), |(max_idx, max_val), (i, &val)| {
            if val > max_val { (i, val) } else { (max_idx, max_val) }
        })
}

/// Label to score, serialized as a JSON object in label table order.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassScores(Vec<(String, f32)>);

impl ClassScores {
    pub fn get(&self, label: &str) -> Option<f32> {
        self.0.iter().find(|(l, _)| l == label).map(|(_, s)| *s)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for ClassScores {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (label, score) in &self.0 {
            map.serialize_entry(label, score)?;
        }
        map.end()
    }
}

/// Successful `/predict` body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub predicted_stage: String,
    pub confidence: f32,
    pub all_probabilities: ClassScores,
}

/// Map one score vector onto the label table.
pub fn build_response(
    scores: &[f32],
    labels: &LabelTable,
    transform: ScoreTransform,
) -> Result<Prediction, ModelError> {
    if scores.len() != labels.len() || labels.is_empty() {
        return Err(ModelError::Configuration(format!(
            "model produced {} scores for {} labels",
            scores.len(),
            labels.len()
        )));
    }

    if let Some(index) = scores.iter().position(|s| !s.is_finite()) {
        return Err(ModelError::Inference(format!(
            "model produced non-finite score {} for class {index}",
            scores[index]
        )));
    }

    let scores = Array1::from(scores.to_vec());
    let scores = match transform {
        ScoreTransform::Raw => scores,
        ScoreTransform::Softmax => softmax(&scores),
    };
    let (index, confidence) = argmax_and_max(&scores);
    let predicted_stage = labels
        .get(index)
        .ok_or_else(|| ModelError::Configuration(format!("no label for class {index}")))?
        .to_string();

    let all_probabilities = ClassScores(
        labels
            .iter()
            .zip(scores.iter())
            .map(|(label, &score)| (label.to_string(), score))
            .collect(),
    );

    Ok(Prediction {
        predicted_stage,
        confidence,
        all_probabilities,
    })
}
