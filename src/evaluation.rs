//! Offline accuracy evaluation over a labelled test set.
//!
//! The test set is laid out as one directory per class, each holding that
//! class's images. Directory names are matched against the label table
//! ignoring case, with `_` and `-` read as spaces.

use crate::{
    inference_service::{InferenceService, PredictionError},
    labels::LabelTable,
    model_service::ModelService,
    normalizer::RawImage,
    ranking::{ranked_indices, RankError},
};
use serde::Serialize;
use std::{
    collections::HashMap,
    fmt, fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "gif", "tif", "tiff", "webp"];
const LOSS_EPSILON: f32 = 1e-7;

#[derive(Error, Debug)]
pub enum EvaluationError {
    #[error("Failed to read dataset: {0}")]
    Io(#[from] io::Error),
    #[error("Dataset directory {0:?} contains no images")]
    EmptyDataset(PathBuf),
    #[error("Class directory {0:?} does not match any label")]
    UnknownClass(String),
    #[error("Model not loaded")]
    ModelNotLoaded,
    #[error(transparent)]
    Rank(#[from] RankError),
    #[error(transparent)]
    Prediction(#[from] PredictionError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LabeledImage {
    pub path: PathBuf,
    pub class_index: usize,
}

#[derive(Debug)]
pub struct EvaluationDataset {
    samples: Vec<LabeledImage>,
}

impl EvaluationDataset {
    pub fn from_dir(
        root: &Path,
        labels: &LabelTable,
        per_class_limit: Option<usize>,
    ) -> Result<Self, EvaluationError> {
        let label_index: HashMap<String, usize> = labels
            .iter()
            .enumerate()
            .map(|(index, label)| (canonical_name(label), index))
            .collect();

        let mut class_dirs = sorted_entries(root)?
            .into_iter()
            .filter(|path| path.is_dir())
            .collect::<Vec<_>>();
        class_dirs.retain(|path| !is_hidden(path));

        let mut samples = Vec::new();
        for class_dir in class_dirs {
            let name = class_dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let class_index = *label_index
                .get(&canonical_name(&name))
                .ok_or_else(|| EvaluationError::UnknownClass(name.clone()))?;

            let images = sorted_entries(&class_dir)?
                .into_iter()
                .filter(|path| path.is_file() && !is_hidden(path) && has_image_extension(path))
                .take(per_class_limit.unwrap_or(usize::MAX));

            samples.extend(images.map(|path| LabeledImage { path, class_index }));
        }

        if samples.is_empty() {
            return Err(EvaluationError::EmptyDataset(root.to_path_buf()));
        }

        Ok(Self { samples })
    }

    pub fn samples(&self) -> &[LabeledImage] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

fn sorted_entries(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<io::Result<Vec<_>>>()?;
    entries.sort();
    Ok(entries)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'))
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

fn canonical_name(name: &str) -> String {
    name.to_lowercase()
        .replace(['_', '-'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Rows are true classes, columns predicted classes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ConfusionMatrix {
    counts: Vec<Vec<usize>>,
}

impl ConfusionMatrix {
    pub fn new(num_classes: usize) -> Self {
        Self {
            counts: vec![vec![0; num_classes]; num_classes],
        }
    }

    pub fn record(&mut self, actual: usize, predicted: usize) {
        self.counts[actual][predicted] += 1;
    }

    pub fn get(&self, actual: usize, predicted: usize) -> usize {
        self.counts[actual][predicted]
    }

    pub fn num_classes(&self) -> usize {
        self.counts.len()
    }

    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }

    pub fn correct(&self) -> usize {
        (0..self.num_classes()).map(|i| self.counts[i][i]).sum()
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.correct(), self.total())
    }

    fn support(&self, class: usize) -> usize {
        self.counts[class].iter().sum()
    }

    fn predicted(&self, class: usize) -> usize {
        self.counts.iter().map(|row| row[class]).sum()
    }

    /// Per-class scores over every class that occurs as a true or
    /// predicted label. Undefined precision or recall counts as zero.
    pub fn report(&self, labels: &LabelTable) -> ClassificationReport {
        let classes: Vec<ClassMetrics> = (0..self.num_classes())
            .filter(|&class| self.support(class) > 0 || self.predicted(class) > 0)
            .map(|class| {
                let true_positives = self.counts[class][class];
                let precision = ratio(true_positives, self.predicted(class));
                let recall = ratio(true_positives, self.support(class));
                let f1_score = if precision + recall > 0.0 {
                    2.0 * precision * recall / (precision + recall)
                } else {
                    0.0
                };
                ClassMetrics {
                    label: labels.get(class).unwrap_or("?").to_string(),
                    precision,
                    recall,
                    f1_score,
                    support: self.support(class),
                }
            })
            .collect();

        let total = self.total();
        let macro_avg = Averages::over(&classes, |_| 1.0);
        let weighted_avg = Averages::over(&classes, |c| c.support as f64);

        ClassificationReport {
            classes,
            accuracy: self.accuracy(),
            macro_avg,
            weighted_avg,
            support: total,
        }
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .counts
            .iter()
            .flatten()
            .max()
            .map_or(1, |max| max.to_string().len());
        for row in &self.counts {
            let cells: Vec<String> = row.iter().map(|c| format!("{:>width$}", c)).collect();
            writeln!(f, "[{}]", cells.join(" "))?;
        }
        Ok(())
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassMetrics {
    pub label: String,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub support: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Averages {
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
}

impl Averages {
    fn over(classes: &[ClassMetrics], weight: impl Fn(&ClassMetrics) -> f64) -> Self {
        let total_weight: f64 = classes.iter().map(&weight).sum();
        if total_weight == 0.0 {
            return Self {
                precision: 0.0,
                recall: 0.0,
                f1_score: 0.0,
            };
        }
        let mean = |score: fn(&ClassMetrics) -> f64| {
            classes.iter().map(|c| score(c) * weight(c)).sum::<f64>() / total_weight
        };
        Self {
            precision: mean(|c| c.precision),
            recall: mean(|c| c.recall),
            f1_score: mean(|c| c.f1_score),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationReport {
    pub classes: Vec<ClassMetrics>,
    pub accuracy: f64,
    pub macro_avg: Averages,
    pub weighted_avg: Averages,
    pub support: usize,
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .classes
            .iter()
            .map(|c| c.label.len())
            .chain(["weighted avg".len()])
            .max()
            .unwrap_or(0);

        writeln!(
            f,
            "{:>width$} {:>9} {:>9} {:>9} {:>9}\n",
            "", "precision", "recall", "f1-score", "support"
        )?;
        for class in &self.classes {
            writeln!(
                f,
                "{:>width$} {:>9.2} {:>9.2} {:>9.2} {:>9}",
                class.label, class.precision, class.recall, class.f1_score, class.support
            )?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "{:>width$} {:>9} {:>9} {:>9.2} {:>9}",
            "accuracy", "", "", self.accuracy, self.support
        )?;
        for (name, avg) in [("macro avg", &self.macro_avg), ("weighted avg", &self.weighted_avg)] {
            writeln!(
                f,
                "{:>width$} {:>9.2} {:>9.2} {:>9.2} {:>9}",
                name, avg.precision, avg.recall, avg.f1_score, self.support
            )?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationSummary {
    pub evaluated: usize,
    pub skipped: usize,
    pub accuracy: f64,
    /// Mean categorical cross-entropy of the true class.
    pub loss: f64,
    pub confusion_matrix: ConfusionMatrix,
    pub report: ClassificationReport,
}

pub fn evaluate<M: ModelService>(
    inference_service: &InferenceService<M>,
    dataset: &EvaluationDataset,
) -> Result<EvaluationSummary, EvaluationError> {
    if !inference_service.is_model_loaded() {
        return Err(EvaluationError::ModelNotLoaded);
    }

    let labels = inference_service.labels();
    let mut confusion_matrix = ConfusionMatrix::new(labels.len());
    let mut loss_sum = 0.0f64;
    let mut skipped = 0;

    for (i, sample) in dataset.samples().iter().enumerate() {
        let raw = match fs::read(&sample.path) {
            Ok(data) => RawImage::from(data),
            Err(e) => {
                tracing::warn!("Skipping {:?}: {}", sample.path, e);
                skipped += 1;
                continue;
            }
        };

        let probabilities = match inference_service.probabilities(raw) {
            Ok(probabilities) => probabilities,
            Err(PredictionError::Decode(e)) => {
                tracing::warn!("Skipping {:?}: {}", sample.path, e);
                skipped += 1;
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        if probabilities.len() != labels.len() {
            return Err(RankError::BadInput {
                probabilities: probabilities.len(),
                labels: labels.len(),
            }
            .into());
        }

        let predicted = ranked_indices(&probabilities)[0];
        confusion_matrix.record(sample.class_index, predicted);

        let p_true = probabilities[sample.class_index].clamp(LOSS_EPSILON, 1.0 - LOSS_EPSILON);
        loss_sum -= f64::from(p_true).ln();

        if (i + 1) % 100 == 0 {
            tracing::info!("Evaluated {}/{} images", i + 1, dataset.len());
        }
    }

    let evaluated = confusion_matrix.total();
    let loss = if evaluated == 0 {
        0.0
    } else {
        loss_sum / evaluated as f64
    };

    Ok(EvaluationSummary {
        evaluated,
        skipped,
        accuracy: confusion_matrix.accuracy(),
        loss,
        report: confusion_matrix.report(labels),
        confusion_matrix,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::PredictionConfig, labels::skin_labels, model_service::mock::MockModelService,
        normalizer::ImageNormalizer,
    };
    use image::{ImageBuffer, Rgb};

    fn table(names: &[&str]) -> LabelTable {
        LabelTable::new(names.iter().map(|n| n.to_string()).collect()).unwrap()
    }

    fn write_png(path: &Path) {
        ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(8, 8, Rgb([10, 20, 30]))
            .save_with_format(path, image::ImageFormat::Png)
            .unwrap();
    }

    #[test]
    fn test_accuracy_and_report() {
        let labels = table(&["a", "b", "c"]);
        let mut matrix = ConfusionMatrix::new(3);
        // a: 2 right, 1 predicted as b. b: 1 right. c: never seen, predicted once.
        matrix.record(0, 0);
        matrix.record(0, 0);
        matrix.record(0, 1);
        matrix.record(1, 1);
        matrix.record(1, 2);

        assert_eq!(matrix.total(), 5);
        assert_eq!(matrix.correct(), 3);
        assert!((matrix.accuracy() - 0.6).abs() < 1e-9);

        let report = matrix.report(&labels);
        assert_eq!(report.classes.len(), 3);

        let a = &report.classes[0];
        assert_eq!(a.support, 3);
        assert!((a.precision - 1.0).abs() < 1e-9);
        assert!((a.recall - 2.0 / 3.0).abs() < 1e-9);
        assert!((a.f1_score - 0.8).abs() < 1e-9);

        let b = &report.classes[1];
        assert!((b.precision - 0.5).abs() < 1e-9);
        assert!((b.recall - 0.5).abs() < 1e-9);

        let c = &report.classes[2];
        assert_eq!(c.support, 0);
        assert_eq!(c.precision, 0.0);
        assert_eq!(c.f1_score, 0.0);

        let macro_recall = (2.0 / 3.0 + 0.5 + 0.0) / 3.0;
        assert!((report.macro_avg.recall - macro_recall).abs() < 1e-9);
        let weighted_recall = (2.0 / 3.0 * 3.0 + 0.5 * 2.0) / 5.0;
        assert!((report.weighted_avg.recall - weighted_recall).abs() < 1e-9);
    }

    #[test]
    fn test_report_skips_absent_classes() {
        let labels = table(&["a", "b", "c"]);
        let mut matrix = ConfusionMatrix::new(3);
        matrix.record(2, 2);

        let report = matrix.report(&labels);

        assert_eq!(report.classes.len(), 1);
        assert_eq!(report.classes[0].label, "c");
        assert!(report.to_string().contains("weighted avg"));
    }

    #[test]
    fn test_canonical_name() {
        assert_eq!(canonical_name("Actinic_Keratosis"), "actinic keratosis");
        assert_eq!(canonical_name("skin-cancer"), "skin cancer");
        assert_eq!(canonical_name("Sun  Damage"), "sun damage");
    }

    #[test]
    fn test_dataset_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        let labels = skin_labels();
        fs::create_dir(dir.path().join("skin_cancer")).unwrap();
        fs::create_dir(dir.path().join("Acne")).unwrap();
        write_png(&dir.path().join("skin_cancer/1.png"));
        write_png(&dir.path().join("skin_cancer/2.PNG"));
        write_png(&dir.path().join("Acne/1.png"));
        fs::write(dir.path().join("Acne/notes.txt"), "not an image").unwrap();

        let dataset = EvaluationDataset::from_dir(dir.path(), &labels, None).unwrap();

        assert_eq!(dataset.len(), 3);
        assert_eq!(dataset.samples()[0].class_index, 0);
        assert_eq!(dataset.samples()[1].class_index, 14);

        let limited = EvaluationDataset::from_dir(dir.path(), &labels, Some(1)).unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[test]
    fn test_unknown_class_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("Sunburn")).unwrap();

        let result = EvaluationDataset::from_dir(dir.path(), &skin_labels(), None);

        assert!(matches!(result, Err(EvaluationError::UnknownClass(name)) if name == "Sunburn"));
    }

    #[test]
    fn test_empty_dataset() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("Acne")).unwrap();

        let result = EvaluationDataset::from_dir(dir.path(), &skin_labels(), None);

        assert!(matches!(result, Err(EvaluationError::EmptyDataset(_))));
    }

    #[test]
    fn test_evaluate_with_stub_model() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("Skin Cancer")).unwrap();
        fs::create_dir(dir.path().join("Acne")).unwrap();
        write_png(&dir.path().join("Skin Cancer/1.png"));
        write_png(&dir.path().join("Skin Cancer/2.png"));
        write_png(&dir.path().join("Acne/1.png"));
        fs::write(dir.path().join("Acne/broken.jpg"), b"garbage").unwrap();

        let inference_service = InferenceService::new(
            Some(MockModelService::skin_cancer()),
            skin_labels(),
            ImageNormalizer::new(16),
            &PredictionConfig::default(),
        )
        .unwrap();
        let dataset =
            EvaluationDataset::from_dir(dir.path(), inference_service.labels(), None).unwrap();

        let summary = evaluate(&inference_service, &dataset).unwrap();

        assert_eq!(summary.evaluated, 3);
        assert_eq!(summary.skipped, 1);
        assert!((summary.accuracy - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(summary.confusion_matrix.get(14, 14), 2);
        assert_eq!(summary.confusion_matrix.get(0, 14), 1);

        let expected_loss = (-(0.9f64.ln()) * 2.0 - (0.1f64 / 21.0).ln()) / 3.0;
        assert!((summary.loss - expected_loss).abs() < 1e-4);
    }

    #[test]
    fn test_evaluate_requires_model() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("Acne")).unwrap();
        write_png(&dir.path().join("Acne/1.png"));

        let inference_service: InferenceService<MockModelService> = InferenceService::new(
            None,
            skin_labels(),
            ImageNormalizer::new(16),
            &PredictionConfig::default(),
        )
        .unwrap();
        let dataset =
            EvaluationDataset::from_dir(dir.path(), inference_service.labels(), None).unwrap();

        let result = evaluate(&inference_service, &dataset);

        assert!(matches!(result, Err(EvaluationError::ModelNotLoaded)));
    }
}
