use likeness_core::decision::{DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_MAX_FACES};
use likeness_core::MatchPolicy;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("reading config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Daemon configuration: optional TOML file (`LIKENESS_CONFIG`), then environment overrides.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP listen address.
    pub bind_addr: String,
    /// Root of `<identity>/<image>` reference faces.
    pub reference_dir: PathBuf,
    /// Directory containing the SCRFD and ArcFace ONNX files.
    pub model_dir: PathBuf,
    /// Distance cutoff for an accepted match.
    pub confidence_threshold: f32,
    /// Images with more faces than this are skipped.
    pub max_faces: usize,
    /// ONNX Runtime intra-op threads per session.
    pub intra_threads: usize,
    /// Pending requests the engine thread will queue.
    pub queue_depth: usize,
    /// Largest accepted upload, in bytes.
    pub max_upload_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5000".to_string(),
            reference_dir: PathBuf::from("reference-faces"),
            model_dir: PathBuf::from("models"),
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            max_faces: DEFAULT_MAX_FACES,
            intra_threads: 2,
            queue_depth: 16,
            max_upload_bytes: 10 * 1024 * 1024,
        }
    }
}

impl Config {
    /// Load from `LIKENESS_CONFIG` (if set) and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let base = match std::env::var_os("LIKENESS_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        let config = base.with_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Apply overrides from `lookup` (the environment in production).
    ///
    /// Unparseable values are ignored with a warning.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(v) = lookup("LIKENESS_BIND_ADDR") {
            self.bind_addr = v;
        }
        if let Some(port) = lookup("PORT") {
            self.bind_addr = with_port(&self.bind_addr, &port);
        }
        if let Some(v) = lookup("LIKENESS_REFERENCE_DIR") {
            self.reference_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("LIKENESS_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        parse_into(&lookup, "FACE_CONFIDENCE_THRESHOLD", &mut self.confidence_threshold);
        parse_into(&lookup, "MAX_FACES_TO_PROCESS", &mut self.max_faces);
        parse_into(&lookup, "LIKENESS_INTRA_THREADS", &mut self.intra_threads);
        parse_into(&lookup, "LIKENESS_QUEUE_DEPTH", &mut self.queue_depth);
        parse_into(&lookup, "LIKENESS_MAX_UPLOAD_BYTES", &mut self.max_upload_bytes);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.confidence_threshold.is_finite() || self.confidence_threshold <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "confidence_threshold must be a positive number, got {}",
                self.confidence_threshold
            )));
        }
        if self.max_faces == 0 {
            return Err(ConfigError::Invalid("max_faces must be at least 1".into()));
        }
        if self.queue_depth == 0 {
            return Err(ConfigError::Invalid("queue_depth must be at least 1".into()));
        }
        if self.intra_threads == 0 {
            return Err(ConfigError::Invalid("intra_threads must be at least 1".into()));
        }
        Ok(())
    }

    pub fn policy(&self) -> MatchPolicy {
        MatchPolicy {
            confidence_threshold: self.confidence_threshold,
            max_faces: self.max_faces,
        }
    }
}

fn parse_into<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) {
    if let Some(raw) = lookup(key) {
        match raw.trim().parse() {
            Ok(v) => *slot = v,
            Err(_) => tracing::warn!(key, value = %raw, "ignoring unparseable config value"),
        }
    }
}

/// Replace the port of `host:port`, keeping the host.
fn with_port(addr: &str, port: &str) -> String {
    let host = addr.rsplit_once(':').map_or(addr, |(host, _)| host);
    format!("{host}:{}", port.trim())
}
