use log::{info, warn};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const CONFIG_FILE_NAME: &str = "contract_sign.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for {key}: '{value}'")]
    InvalidOverride { key: &'static str, value: String },
    #[error("{key} must be {expected}, got {value}")]
    OutOfRange {
        key: &'static str,
        expected: &'static str,
        value: String,
    },
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Root for the artifact directories and the record database.
    pub data_dir: PathBuf,
    /// Prefix for sign links and document URLs handed back to callers.
    pub public_base_url: String,
    pub render: RenderConfig,
    pub placement: PlacementConfig,
    pub converter: ConverterConfig,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct RenderConfig {
    pub font_path: Option<PathBuf>,
    pub font_size: f32,
    pub canvas_width: u32,
    pub canvas_height: u32,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct PlacementConfig {
    /// Signature width as a fraction of the page width when no size is given.
    pub default_width_ratio: f64,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ConverterConfig {
    pub binary: PathBuf,
    pub timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data_dir: PathBuf::from("data"),
            public_base_url: "http://localhost:8000".to_string(),
            render: RenderConfig::default(),
            placement: PlacementConfig::default(),
            converter: ConverterConfig::default(),
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        RenderConfig {
            font_path: None,
            font_size: 48.0,
            canvas_width: 800,
            canvas_height: 200,
        }
    }
}

impl Default for PlacementConfig {
    fn default() -> Self {
        PlacementConfig {
            default_width_ratio: 0.30,
        }
    }
}

impl Default for ConverterConfig {
    fn default() -> Self {
        ConverterConfig {
            binary: PathBuf::from("libreoffice"),
            timeout_secs: 120,
        }
    }
}

impl ConverterConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` (or `contract_sign.toml`), falling back to defaults when the
    /// file does not exist, then applies `SIGN_*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.unwrap_or_else(|| Path::new(CONFIG_FILE_NAME));
        let mut config = match fs::read_to_string(path) {
            Ok(content) => {
                info!("Loaded config from {}", path.display());
                Self::from_toml_str(&content)?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(
                    "Config file '{}' not found. Using defaults and environment.",
                    path.display()
                );
                Config::default()
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("SIGN_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(url) = lookup("SIGN_PUBLIC_BASE_URL") {
            self.public_base_url = url;
        }
        if let Some(font) = lookup("SIGN_FONT_PATH") {
            self.render.font_path = Some(PathBuf::from(font));
        }
        if let Some(size) = lookup("SIGN_FONT_SIZE") {
            self.render.font_size = parse_override("SIGN_FONT_SIZE", &size)?;
        }
        if let Some(bin) = lookup("SIGN_CONVERTER_BIN") {
            self.converter.binary = PathBuf::from(bin);
        }
        if let Some(secs) = lookup("SIGN_CONVERTER_TIMEOUT_SECS") {
            self.converter.timeout_secs = parse_override("SIGN_CONVERTER_TIMEOUT_SECS", &secs)?;
        }
        if let Some(ratio) = lookup("SIGN_DEFAULT_WIDTH_RATIO") {
            self.placement.default_width_ratio = parse_override("SIGN_DEFAULT_WIDTH_RATIO", &ratio)?;
        }
        self.validate()
    }

    /// Rejects values that would otherwise only fail once a contract is signed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ratio = self.placement.default_width_ratio;
        if !(ratio.is_finite() && ratio > 0.0 && ratio <= 1.0) {
            return Err(ConfigError::OutOfRange {
                key: "placement.default_width_ratio",
                expected: "in (0, 1]",
                value: ratio.to_string(),
            });
        }
        Ok(())
    }
}

fn parse_override<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidOverride {
            key,
            value: value.to_string(),
        })
}
