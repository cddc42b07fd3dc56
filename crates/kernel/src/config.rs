//! Конфигурация kernel и её загрузка.
//!
//! Порядок слияния в `ConfigLoader::load`: preset → файл (TOML или JSON) →
//! переменные окружения с префиксом `IOC_KERNEL_` → валидация.

use anyhow::{anyhow, Context, Result};
use common::LoggingConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::errors::{KernelError, KernelResult};
use crate::lifestyle::PoolExhaustion;
use crate::registry::RegistryConfig;

pub const DEFAULT_ENV_PREFIX: &str = "IOC_KERNEL";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolutionConfig {
    /// Предельная глубина графа создания
    pub max_depth: usize,
    /// Inline аргументы видны не только корневому компоненту
    pub propagate_inline_arguments: bool,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            max_depth: 64,
            propagate_inline_arguments: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Политика для пулов, не задавших свою
    pub exhaustion: PoolExhaustion,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    pub registry: RegistryConfig,
    pub resolution: ResolutionConfig,
    pub pool: PoolConfig,
    pub logging: LoggingConfig,
    /// Значения для `ConfigurationValueResolver`
    pub parameters: HashMap<String, Value>,
}

/// Результат проверки конфигурации
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

impl KernelConfig {
    pub fn production() -> Self {
        Self {
            registry: RegistryConfig::production(),
            resolution: ResolutionConfig {
                max_depth: 128,
                propagate_inline_arguments: false,
            },
            pool: PoolConfig {
                exhaustion: PoolExhaustion::Block { timeout_ms: 5_000 },
            },
            logging: LoggingConfig::production(),
            parameters: HashMap::new(),
        }
    }

    pub fn development() -> Self {
        Self {
            registry: RegistryConfig::development(),
            resolution: ResolutionConfig::default(),
            pool: PoolConfig::default(),
            logging: LoggingConfig::development(),
            parameters: HashMap::new(),
        }
    }

    /// Для тестов и встраивания: маленькие лимиты, без блокировок
    pub fn minimal() -> Self {
        Self {
            registry: RegistryConfig::minimal(),
            resolution: ResolutionConfig {
                max_depth: 16,
                propagate_inline_arguments: false,
            },
            pool: PoolConfig::default(),
            logging: LoggingConfig::default(),
            parameters: HashMap::new(),
        }
    }

    pub fn from_preset(name: &str) -> Result<Self> {
        match name.to_lowercase().as_str() {
            "production" | "prod" => Ok(Self::production()),
            "development" | "dev" => Ok(Self::development()),
            "minimal" | "test" => Ok(Self::minimal()),
            "default" => Ok(Self::default()),
            other => Err(anyhow!("unknown configuration preset '{}'", other)),
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::default();

        if self.registry.max_registrations == 0 {
            report.errors.push("registry.max_registrations must be greater than 0".into());
        }
        if self.resolution.max_depth == 0 {
            report.errors.push("resolution.max_depth must be greater than 0".into());
        } else if self.resolution.max_depth > 1_024 {
            report.warnings.push(format!(
                "resolution.max_depth = {} is unusually deep",
                self.resolution.max_depth
            ));
        }
        if let PoolExhaustion::Block { timeout_ms: 0 } = self.pool.exhaustion {
            report
                .warnings
                .push("pool.exhaustion blocks with zero timeout, behaves like fail".into());
        }
        if self.logging.level.trim().is_empty() {
            report.errors.push("logging.level must not be empty".into());
        }
        if self.resolution.propagate_inline_arguments {
            report
                .warnings
                .push("inline arguments propagate to every dependency of the root component".into());
        }

        report
    }

    /// Ошибка `Configuration` для первой проблемы, если они есть
    pub(crate) fn ensure_valid(&self) -> KernelResult<()> {
        let report = self.validate();
        for warning in &report.warnings {
            warn!(warning = %warning, "kernel configuration warning");
        }
        match report.errors.first() {
            Some(error) => {
                let (field, message) = error.split_once(' ').unwrap_or(("config", error.as_str()));
                Err(KernelError::configuration(field, message))
            }
            None => Ok(()),
        }
    }
}

/// Загрузка `KernelConfig` из нескольких источников
pub struct ConfigLoader {
    search_paths: Vec<PathBuf>,
    env_prefix: String,
    preset: Option<String>,
    file: Option<PathBuf>,
    validate_on_load: bool,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        let mut search_paths = Vec::new();
        if let Some(config_dir) = dirs::config_dir() {
            search_paths.push(config_dir.join("ioc-kernel"));
        }
        search_paths.push(PathBuf::from("."));
        search_paths.push(PathBuf::from("/etc/ioc-kernel"));

        Self {
            search_paths,
            env_prefix: DEFAULT_ENV_PREFIX.to_string(),
            preset: None,
            file: None,
            validate_on_load: true,
        }
    }

    /// Загрузчик без путей поиска (файл только явный)
    pub fn isolated() -> Self {
        Self {
            search_paths: Vec::new(),
            ..Self::new()
        }
    }

    pub fn add_search_path<P: AsRef<Path>>(&mut self, path: P) -> &mut Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    pub fn env_prefix<S: Into<String>>(&mut self, prefix: S) -> &mut Self {
        self.env_prefix = prefix.into();
        self
    }

    pub fn preset<S: Into<String>>(&mut self, preset: S) -> &mut Self {
        self.preset = Some(preset.into());
        self
    }

    pub fn file<P: AsRef<Path>>(&mut self, path: P) -> &mut Self {
        self.file = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn validate(&mut self, enabled: bool) -> &mut Self {
        self.validate_on_load = enabled;
        self
    }

    pub fn load(&self) -> Result<KernelConfig> {
        let mut config = match &self.preset {
            Some(preset) => KernelConfig::from_preset(preset)?,
            None => KernelConfig::default(),
        };

        let file = match &self.file {
            Some(path) => Some(path.clone()),
            None => self.find_configuration_file(),
        };
        if let Some(path) = file {
            let from_file = Self::load_from_file(&path)?;
            config = Self::merge(config, from_file)?;
            debug!(path = %path.display(), "kernel configuration file loaded");
        }

        self.apply_environment(&mut config)?;

        if self.validate_on_load {
            let report = config.validate();
            if !report.is_valid() {
                return Err(anyhow!("configuration validation failed: {}", report.errors.join("; ")));
            }
            for warning in &report.warnings {
                warn!(warning = %warning, "kernel configuration warning");
            }
        }

        Ok(config)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<KernelConfig> {
        let path = path.as_ref();
        let content =
            fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;

        match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => Self::from_toml(&content),
            Some("json") => Self::from_json(&content),
            _ => Err(anyhow!("unsupported configuration file format: {:?}", path.extension())),
        }
    }

    pub fn from_toml(content: &str) -> Result<KernelConfig> {
        toml::from_str(content).context("invalid TOML configuration")
    }

    pub fn from_json(content: &str) -> Result<KernelConfig> {
        serde_json::from_str(content).context("invalid JSON configuration")
    }

    pub fn save_to_file<P: AsRef<Path>>(config: &KernelConfig, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => toml::to_string_pretty(config)?,
            Some("json") => serde_json::to_string_pretty(config)?,
            _ => return Err(anyhow!("unsupported file format: {:?}", path.extension())),
        };

        fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    fn find_configuration_file(&self) -> Option<PathBuf> {
        const FILENAMES: [&str; 2] = ["kernel.toml", "kernel.json"];

        self.search_paths
            .iter()
            .flat_map(|dir| FILENAMES.iter().map(move |name| dir.join(name)))
            .find(|path| path.is_file())
    }

    /// Файл накладывается на preset: заданные в файле секции побеждают,
    /// параметры объединяются
    fn merge(base: KernelConfig, overlay: KernelConfig) -> Result<KernelConfig> {
        let mut merged = overlay;
        for (key, value) in base.parameters {
            merged.parameters.entry(key).or_insert(value);
        }
        Ok(merged)
    }

    pub fn apply_environment(&self, config: &mut KernelConfig) -> Result<()> {
        let prefix = format!("{}_", self.env_prefix);

        let mut pool_timeout = None;
        for (key, value) in env::vars() {
            let Some(setting) = key.strip_prefix(&prefix) else {
                continue;
            };
            match setting {
                "MAX_REGISTRATIONS" => {
                    config.registry.max_registrations =
                        value.parse().with_context(|| format!("{} must be a number", key))?;
                }
                "VERBOSE_LOGGING" => config.registry.verbose_logging = parse_flag(&value),
                "MAX_DEPTH" => {
                    config.resolution.max_depth = value.parse().with_context(|| format!("{} must be a number", key))?;
                }
                "PROPAGATE_INLINE_ARGUMENTS" => config.resolution.propagate_inline_arguments = parse_flag(&value),
                "POOL_EXHAUSTION" => {
                    config.pool.exhaustion = match value.to_lowercase().as_str() {
                        "fail" => PoolExhaustion::Fail,
                        "block" => PoolExhaustion::Block {
                            timeout_ms: match config.pool.exhaustion {
                                PoolExhaustion::Block { timeout_ms } => timeout_ms,
                                PoolExhaustion::Fail => 1_000,
                            },
                        },
                        other => return Err(anyhow!("{} has unknown value '{}'", key, other)),
                    };
                }
                "POOL_TIMEOUT_MS" => {
                    pool_timeout = Some(value.parse::<u64>().with_context(|| format!("{} must be a number", key))?);
                }
                "LOG_LEVEL" => config.logging.level = value.to_lowercase(),
                "LOG_JSON" => config.logging.json_output = parse_flag(&value),
                other => debug!(variable = other, "unknown kernel environment override ignored"),
            }
        }

        // Таймаут применяется после политики, порядок переменных не важен
        if let (Some(timeout), PoolExhaustion::Block { timeout_ms }) = (pool_timeout, &mut config.pool.exhaustion) {
            *timeout_ms = timeout;
        }
        Ok(())
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
