use std::{
    collections::HashSet,
    fs::File,
    io::{self, BufRead},
    path::Path,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LabelError {
    #[error("Failed to read labels: {0}")]
    Io(#[from] io::Error),
    #[error("Label table is empty")]
    Empty,
    #[error("Duplicate label: {0}")]
    Duplicate(String),
    #[error("Label table has {labels} entries but the model outputs {outputs} classes")]
    WidthMismatch { labels: usize, outputs: usize },
}

/// Ordered class-index to disease-name mapping, fixed per trained artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelTable {
    labels: Vec<String>,
}

impl LabelTable {
    pub fn new(labels: Vec<String>) -> Result<Self, LabelError> {
        if labels.is_empty() {
            return Err(LabelError::Empty);
        }

        let mut seen = HashSet::new();
        for label in &labels {
            if !seen.insert(label.as_str()) {
                return Err(LabelError::Duplicate(label.clone()));
            }
        }

        Ok(Self { labels })
    }

    /// One label per line. Blank lines and `#` comments are skipped.
    pub fn from_file(filepath: &Path) -> Result<Self, LabelError> {
        let file = File::open(filepath)?;
        Self::from_reader(io::BufReader::new(file))
    }

    pub fn from_reader(reader: impl BufRead) -> Result<Self, LabelError> {
        let mut labels = Vec::new();
        for line_result in reader.lines() {
            let line = line_result?;
            let label = line.trim();
            if label.is_empty() || label.starts_with('#') {
                continue;
            }
            labels.push(label.to_string());
        }

        Self::new(labels)
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.labels
    }

    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.labels.iter().position(|l| l == label)
    }

    pub fn validate_output_width(&self, outputs: usize) -> Result<(), LabelError> {
        if self.labels.len() != outputs {
            return Err(LabelError::WidthMismatch {
                labels: self.labels.len(),
                outputs,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn skin_labels() -> LabelTable {
    LabelTable::from_reader(io::Cursor::new(include_str!(
        "../configuration/skin_labels.txt"
    )))
    .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_shipped_table() {
        let labels = skin_labels();

        assert_eq!(labels.len(), 22);
        assert_eq!(labels.get(0), Some("Acne"));
        assert_eq!(labels.get(14), Some("Skin Cancer"));
        assert_eq!(labels.get(21), Some("Warts"));
        assert_eq!(labels.get(22), None);
    }

    #[test]
    fn test_comments_and_blank_lines_are_skipped() {
        let labels =
            LabelTable::from_reader(Cursor::new("# header\nAcne\n\n  Eczema  \nMoles\n")).unwrap();

        assert_eq!(labels.as_slice(), &["Acne", "Eczema", "Moles"]);
        assert_eq!(labels.index_of("Eczema"), Some(1));
        assert_eq!(labels.index_of("Warts"), None);
    }

    #[test]
    fn test_duplicates_are_rejected() {
        let result = LabelTable::from_reader(Cursor::new("Acne\nMoles\nAcne\n"));

        assert!(matches!(result, Err(LabelError::Duplicate(label)) if label == "Acne"));
    }

    #[test]
    fn test_empty_table_is_rejected() {
        let result = LabelTable::from_reader(Cursor::new("# nothing here\n\n"));

        assert!(matches!(result, Err(LabelError::Empty)));
    }

    #[test]
    fn test_output_width_validation() {
        let labels = skin_labels();

        assert!(labels.validate_output_width(22).is_ok());
        assert!(matches!(
            labels.validate_output_width(23),
            Err(LabelError::WidthMismatch {
                labels: 22,
                outputs: 23
            })
        ));
    }

    #[test]
    fn test_missing_file() {
        let result = LabelTable::from_file(Path::new("./does_not_exist/labels.txt"));

        assert!(matches!(result, Err(LabelError::Io(_))));
    }
}
