use crate::labels::LabelTable;
use serde::{ser::SerializeMap, Serialize, Serializer};
use thiserror::Error;

pub const DEFAULT_TOP_K: usize = 5;
const ERROR_LABEL: &str = "Error";

#[derive(Error, Debug, PartialEq)]
pub enum RankError {
    #[error("Probability vector has {probabilities} entries but the label table has {labels}")]
    BadInput { probabilities: usize, labels: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankedClass {
    pub label: String,
    pub probability: f32,
}

/// Highest-probability classes in rank order. Serialized as a JSON object
/// whose keys keep that order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TopK(Vec<RankedClass>);

impl TopK {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RankedClass> {
        self.0.iter()
    }

    pub fn first(&self) -> Option<&RankedClass> {
        self.0.first()
    }

    pub fn get(&self, label: &str) -> Option<f32> {
        self.0
            .iter()
            .find(|ranked| ranked.label == label)
            .map(|ranked| ranked.probability)
    }
}

impl Serialize for TopK {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for ranked in &self.0 {
            map.serialize_entry(&ranked.label, &ranked.probability)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionRecord {
    success: bool,
    label: String,
    confidence: f32,
    top_k: TopK,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl PredictionRecord {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            label: ERROR_LABEL.to_string(),
            confidence: 0.0,
            top_k: TopK::default(),
            error: Some(error.into()),
        }
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn top_k(&self) -> &TopK {
        &self.top_k
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

/// Class indices ordered by descending probability. The sort is stable, so
/// equal probabilities keep ascending index order.
pub fn ranked_indices(probabilities: &[f32]) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..probabilities.len()).collect();
    indices.sort_by(|&a, &b| probabilities[b].total_cmp(&probabilities[a]));
    indices
}

pub fn rank(
    probabilities: &[f32],
    labels: &LabelTable,
    k: usize,
) -> Result<PredictionRecord, RankError> {
    if probabilities.len() != labels.len() || probabilities.is_empty() {
        return Err(RankError::BadInput {
            probabilities: probabilities.len(),
            labels: labels.len(),
        });
    }

    let order = ranked_indices(probabilities);
    let best = order[0];

    let label_at = |index: usize| labels.get(index).unwrap_or_default().to_string();

    let top_k = order
        .iter()
        .take(k.min(probabilities.len()))
        .map(|&index| RankedClass {
            label: label_at(index),
            probability: probabilities[index],
        })
        .collect();

    Ok(PredictionRecord {
        success: true,
        label: label_at(best),
        confidence: probabilities[best],
        top_k: TopK(top_k),
        error: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::skin_labels;

    fn table(names: &[&str]) -> LabelTable {
        LabelTable::new(names.iter().map(|n| n.to_string()).collect()).unwrap()
    }

    fn skin_cancer_vector() -> Vec<f32> {
        let mut probabilities = vec![0.1 / 21.0; 22];
        probabilities[14] = 0.9;
        probabilities
    }

    #[test]
    fn test_rank_skin_cancer() {
        let record = rank(&skin_cancer_vector(), &skin_labels(), DEFAULT_TOP_K).unwrap();

        assert!(record.success());
        assert_eq!(record.label(), "Skin Cancer");
        assert!((record.confidence() - 0.9).abs() < 1e-6);
        assert_eq!(record.top_k().len(), 5);
        let first = record.top_k().first().unwrap();
        assert_eq!(first.label, "Skin Cancer");
        assert!((first.probability - 0.9).abs() < 1e-6);
        assert!(record.error().is_none());
    }

    #[test]
    fn test_top_k_is_non_increasing() {
        let labels = table(&["a", "b", "c", "d", "e", "f", "g"]);
        let probabilities = [0.05, 0.3, 0.1, 0.2, 0.15, 0.12, 0.08];

        let record = rank(&probabilities, &labels, 5).unwrap();

        let ordered: Vec<&str> = record.top_k().iter().map(|r| r.label.as_str()).collect();
        assert_eq!(ordered, vec!["b", "d", "e", "f", "c"]);
        let probs: Vec<f32> = record.top_k().iter().map(|r| r.probability).collect();
        assert!(probs.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn test_ties_resolve_to_lowest_index() {
        let labels = table(&["a", "b", "c", "d"]);
        let probabilities = [0.1, 0.4, 0.1, 0.4];

        let record = rank(&probabilities, &labels, 4).unwrap();

        assert_eq!(record.label(), "b");
        let ordered: Vec<&str> = record.top_k().iter().map(|r| r.label.as_str()).collect();
        assert_eq!(ordered, vec!["b", "d", "a", "c"]);
    }

    #[test]
    fn test_k_is_clipped_to_class_count() {
        let labels = table(&["a", "b", "c"]);

        let record = rank(&[0.2, 0.5, 0.3], &labels, 5).unwrap();

        assert_eq!(record.top_k().len(), 3);
        assert_eq!(record.label(), "b");
    }

    #[test]
    fn test_length_mismatch_is_bad_input() {
        let labels = table(&["a", "b", "c"]);

        let result = rank(&[0.5, 0.5], &labels, 5);

        assert_eq!(
            result,
            Err(RankError::BadInput {
                probabilities: 2,
                labels: 3
            })
        );
    }

    #[test]
    fn test_serialized_shape_keeps_rank_order() {
        let labels = table(&["Acne", "Eczema", "Moles"]);
        let record = rank(&[0.25, 0.5, 0.25], &labels, 3).unwrap();

        let json = serde_json::to_string(&record).unwrap();

        assert_eq!(
            json,
            r#"{"success":true,"label":"Eczema","confidence":0.5,"top_k":{"Eczema":0.5,"Acne":0.25,"Moles":0.25}}"#
        );
    }

    #[test]
    fn test_failure_record_shape() {
        let record = PredictionRecord::failure("Model not loaded");

        let value = serde_json::to_value(&record).unwrap();

        assert_eq!(value["success"], false);
        assert_eq!(value["label"], "Error");
        assert_eq!(value["confidence"], 0.0);
        assert_eq!(value["error"], "Model not loaded");
        assert!(value["top_k"].as_object().unwrap().is_empty());
    }
}
