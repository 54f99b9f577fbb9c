use anyhow::{Context, Result};
use faceswap_core::detector::{DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_DET_SIZE, DEFAULT_NMS_THRESHOLD};
use faceswap_core::DetectorOptions;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Runtime configuration: defaults, then an optional TOML file, then
/// `FACESWAP_*` environment variables. CLI flags are applied on top by `main`.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Square SCRFD input size; must be a multiple of 32.
    pub det_size: usize,
    /// Minimum SCRFD confidence for a detection to be kept.
    pub det_threshold: f32,
    /// ONNX Runtime intra-op threads per session.
    pub intra_threads: usize,
    /// Native scale of the Real-ESRGAN model.
    pub upsampler_scale: u32,
}

/// On-disk form of [`Config`]; every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub model_dir: Option<PathBuf>,
    pub det_size: Option<usize>,
    pub det_threshold: Option<f32>,
    pub intra_threads: Option<usize>,
    pub upsampler_scale: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_dir: faceswap_core::default_model_dir(),
            det_size: DEFAULT_DET_SIZE,
            det_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            intra_threads: 2,
            upsampler_scale: 2,
        }
    }
}

impl Config {
    /// Load configuration from `FACESWAP_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    /// Defaults, then `path` (if given), then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::from_env());
        };

        let src = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let file: FileConfig = toml::from_str(&src)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        tracing::debug!(path = %path.display(), ?file, "loaded config file");

        let mut config = Self::default();
        config.apply_file(file);
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn apply_file(&mut self, file: FileConfig) {
        if let Some(dir) = file.model_dir {
            self.model_dir = dir;
        }
        self.det_size = file.det_size.unwrap_or(self.det_size);
        self.det_threshold = file.det_threshold.unwrap_or(self.det_threshold);
        self.intra_threads = file.intra_threads.unwrap_or(self.intra_threads);
        self.upsampler_scale = file.upsampler_scale.unwrap_or(self.upsampler_scale);
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup("FACESWAP_MODEL_DIR") {
            self.model_dir = PathBuf::from(dir);
        }
        self.det_size = env_parse(&lookup, "FACESWAP_DET_SIZE", self.det_size);
        self.det_threshold = env_parse(&lookup, "FACESWAP_DET_THRESHOLD", self.det_threshold);
        self.intra_threads = env_parse(&lookup, "FACESWAP_INTRA_THREADS", self.intra_threads);
    }

    pub fn detector_options(&self) -> DetectorOptions {
        DetectorOptions {
            input_size: self.det_size,
            confidence_threshold: self.det_threshold,
            nms_threshold: DEFAULT_NMS_THRESHOLD,
            intra_threads: self.intra_threads,
        }
    }

    /// Path to the SCRFD detection model.
    pub fn detector_model_path(&self) -> String {
        self.model_path("det_10g.onnx")
    }

    /// Path to the ArcFace recognition model.
    pub fn recognizer_model_path(&self) -> String {
        self.model_path("w600k_r50.onnx")
    }

    /// Path to the InSwapper model.
    pub fn swapper_model_path(&self) -> String {
        self.model_path("inswapper_128.onnx")
    }

    /// Path to the InSwapper embedding map (raw little-endian f32, 512×512).
    pub fn emap_path(&self) -> String {
        self.model_path("inswapper_emap.bin")
    }

    pub fn codeformer_model_path(&self) -> String {
        self.model_path("codeformer.onnx")
    }

    pub fn upsampler_model_path(&self) -> String {
        self.model_path(&format!("realesrgan_x{}plus.onnx", self.upsampler_scale))
    }

    fn model_path(&self, file: &str) -> String {
        self.model_dir.join(file).to_string_lossy().into_owned()
    }
}

/// Parse `key` from the environment, keeping `default` when unset or malformed.
fn env_parse<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "ignoring unparseable environment variable");
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.det_size, 320);
        assert_eq!(config.det_threshold, 0.5);
        assert!(config.model_dir.ends_with("faceswap/models"));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env(lookup(&[
            ("FACESWAP_MODEL_DIR", "/opt/models"),
            ("FACESWAP_DET_SIZE", "640"),
            ("FACESWAP_INTRA_THREADS", " 4 "),
        ]));
        assert_eq!(config.model_dir, PathBuf::from("/opt/models"));
        assert_eq!(config.det_size, 640);
        assert_eq!(config.intra_threads, 4);
        assert_eq!(config.det_threshold, 0.5);
    }

    #[test]
    fn test_env_malformed_keeps_default() {
        let mut config = Config::default();
        config.apply_env(lookup(&[("FACESWAP_DET_THRESHOLD", "high")]));
        assert_eq!(config.det_threshold, 0.5);
    }

    #[test]
    fn test_file_then_env() {
        let file: FileConfig = toml::from_str(
            r#"
            model_dir = "/srv/faceswap"
            det_size = 480
            det_threshold = 0.6
            "#,
        )
        .unwrap();

        let mut config = Config::default();
        config.apply_file(file);
        config.apply_env(lookup(&[("FACESWAP_DET_SIZE", "640")]));

        assert_eq!(config.model_dir, PathBuf::from("/srv/faceswap"));
        assert_eq!(config.det_size, 640);
        assert_eq!(config.det_threshold, 0.6);
    }

    #[test]
    fn test_file_rejects_unknown_keys() {
        assert!(toml::from_str::<FileConfig>("det_sise = 320").is_err());
    }

    #[test]
    fn test_model_paths() {
        let config = Config {
            model_dir: PathBuf::from("/m"),
            upsampler_scale: 4,
            ..Config::default()
        };
        assert_eq!(config.detector_model_path(), "/m/det_10g.onnx");
        assert_eq!(config.recognizer_model_path(), "/m/w600k_r50.onnx");
        assert_eq!(config.swapper_model_path(), "/m/inswapper_128.onnx");
        assert_eq!(config.emap_path(), "/m/inswapper_emap.bin");
        assert_eq!(config.upsampler_model_path(), "/m/realesrgan_x4plus.onnx");
    }

    #[test]
    fn test_detector_options() {
        let config = Config { det_size: 640, intra_threads: 8, ..Config::default() };
        let options = config.detector_options();
        assert_eq!(options.input_size, 640);
        assert_eq!(options.intra_threads, 8);
        assert_eq!(options.nms_threshold, DEFAULT_NMS_THRESHOLD);
    }
}
