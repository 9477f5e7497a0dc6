use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(deserialize_with = "deserialize_log_level")]
    pub log_level: LogLevel,
    pub model: ModelConfig,
    pub labels: LabelsConfig,
    #[serde(default)]
    pub prediction: PredictionConfig,
}

fn deserialize_log_level<'de, D>(deserializer: D) -> Result<LogLevel, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.try_into().map_err(serde::de::Error::custom)
}

pub trait Validatable {
    fn get_path(&self) -> PathBuf;

    fn validate(&self) -> Result<(), String> {
        let path = self.get_path();
        if !path.exists() {
            return Err(format!("File not found: {:?}", path));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
    /// Zero disables the timeout.
    #[serde(default)]
    pub prediction_timeout_ms: u64,
}

fn default_max_upload_bytes() -> usize {
    16 * 1024 * 1024
}

impl ServerConfig {
    pub fn get_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    pub model_dir: PathBuf,
    pub onnx_file: String,
    #[serde(default = "default_input_size")]
    pub input_size: u32,
    #[serde(default = "default_model_instances")]
    pub num_instances: usize,
}

fn default_input_size() -> u32 {
    224
}

fn default_model_instances() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
}

impl Validatable for ModelConfig {
    fn get_path(&self) -> PathBuf {
        self.model_dir.join(&self.onnx_file)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LabelsConfig {
    pub labels_dir: PathBuf,
    pub labels_file: String,
}

impl Validatable for LabelsConfig {
    fn get_path(&self) -> PathBuf {
        self.labels_dir.join(&self.labels_file)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PredictionConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

fn default_top_k() -> usize {
    5
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `local` or `production`.",
                other
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(s: String) -> Result<Self, <LogLevel as TryFrom<String>>::Error> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(format!(
                "{} is not a supported minimum log level. Use one of `debug`, `info`, `warn` or `error`.",
                other
            )),
        }
    }
}

pub fn get_configuration() -> Result<Config, config::ConfigError> {
    let base_path = std::env::current_dir()
        .map_err(|e| config::ConfigError::Message(format!("no current directory: {}", e)))?;
    let configuration_directory = base_path.join("configuration");

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(config::ConfigError::Message)?;

    load_configuration(&configuration_directory, &environment)
}

pub fn load_configuration(
    configuration_directory: &Path,
    environment: &Environment,
) -> Result<Config, config::ConfigError> {
    let config = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join("base.yaml"),
        ))
        .add_source(config::File::from(
            configuration_directory.join(format!("{}.yaml", environment.as_str())),
        ))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    let config: Config = config.try_deserialize::<Config>()?;

    if config.prediction.top_k == 0 {
        return Err(config::ConfigError::Message(
            "prediction.top_k must be greater than 0".into(),
        ));
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const BASE: &str = r#"
server:
  host: 0.0.0.0
  port: 5000
log_level: info
model:
  model_dir: models
  onnx_file: final_skin_disease_model.onnx
  num_instances: 2
labels:
  labels_dir: configuration
  labels_file: skin_labels.txt
"#;

    fn write_configuration(dir: &Path, local: &str) {
        fs::write(dir.join("base.yaml"), BASE).unwrap();
        fs::write(dir.join("local.yaml"), local).unwrap();
    }

    #[test]
    fn test_layered_configuration() {
        let dir = tempfile::tempdir().unwrap();
        write_configuration(
            dir.path(),
            "server:\n  host: 127.0.0.1\nlog_level: debug\nprediction:\n  top_k: 3\n",
        );

        let config = load_configuration(dir.path(), &Environment::Local).unwrap();

        assert_eq!(config.server.get_address(), "127.0.0.1:5000");
        assert_eq!(config.server.max_upload_bytes, 16 * 1024 * 1024);
        assert_eq!(config.server.prediction_timeout_ms, 0);
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.model.input_size, 224);
        assert_eq!(config.model.num_instances, 2);
        assert_eq!(
            config.model.get_path(),
            PathBuf::from("models/final_skin_disease_model.onnx")
        );
        assert_eq!(
            config.labels.get_path(),
            PathBuf::from("configuration/skin_labels.txt")
        );
        assert_eq!(config.prediction.top_k, 3);
    }

    #[test]
    fn test_top_k_defaults_to_five() {
        let dir = tempfile::tempdir().unwrap();
        write_configuration(dir.path(), "{}\n");

        let config = load_configuration(dir.path(), &Environment::Local).unwrap();

        assert_eq!(config.prediction.top_k, 5);
    }

    #[test]
    fn test_zero_top_k_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_configuration(dir.path(), "prediction:\n  top_k: 0\n");

        assert!(load_configuration(dir.path(), &Environment::Local).is_err());
    }

    #[test]
    fn test_unknown_log_level_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_configuration(dir.path(), "log_level: verbose\n");

        assert!(load_configuration(dir.path(), &Environment::Local).is_err());
    }

    #[test]
    fn test_environment_parsing() {
        assert!(matches!(
            Environment::try_from("PRODUCTION".to_string()),
            Ok(Environment::Production)
        ));
        assert!(Environment::try_from("staging".to_string()).is_err());
    }

    #[test]
    fn test_validate_reports_missing_file() {
        let labels = LabelsConfig {
            labels_dir: PathBuf::from("./does_not_exist"),
            labels_file: "labels.txt".to_string(),
        };

        assert!(labels.validate().is_err());
    }
}
