//! Environment sources the loader reads keys from.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// A read-only lookup of configuration keys.
///
/// Empty values are treated by the loader as absent.
pub trait EnvironmentSource {
    fn get(&self, key: &str) -> Option<String>;
}

/// The real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvironmentSource for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvironmentSource for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

impl<S: EnvironmentSource + ?Sized> EnvironmentSource for &S {
    fn get(&self, key: &str) -> Option<String> {
        (**self).get(key)
    }
}

/// Two sources stacked: `primary` wins, `fallback` fills the gaps.
#[derive(Debug, Clone)]
pub struct Layered<A, B> {
    primary: A,
    fallback: B,
}

impl<A, B> Layered<A, B> {
    pub fn new(primary: A, fallback: B) -> Self {
        Self { primary, fallback }
    }
}

impl<A: EnvironmentSource, B: EnvironmentSource> EnvironmentSource for Layered<A, B> {
    fn get(&self, key: &str) -> Option<String> {
        self.primary.get(key).or_else(|| self.fallback.get(key))
    }
}

/// Error type for env file loading.
#[derive(Debug, Error)]
pub enum EnvFileError {
    #[error("failed to read env file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("env file is not valid TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("env file key `{0}` must be a string, integer, float or boolean")]
    Unsupported(String),
}

/// A flat TOML table of `KEY = value` pairs, used for local development.
///
/// ```toml
/// POSTGRES_HOST = "localhost"
/// POSTGRES_PORT = 5432
/// ADMISSION_ENABLED = false
/// ```
#[derive(Debug, Clone, Default)]
pub struct EnvFile {
    values: HashMap<String, String>,
}

impl EnvFile {
    pub fn from_path(path: &Path) -> Result<Self, EnvFileError> {
        let content = fs::read_to_string(path).map_err(|source| EnvFileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, EnvFileError> {
        let table: toml::Table = toml::from_str(content)?;
        let mut values = HashMap::with_capacity(table.len());

        for (key, value) in table {
            let rendered = match value {
                toml::Value::String(s) => s,
                toml::Value::Integer(i) => i.to_string(),
                toml::Value::Float(f) => f.to_string(),
                toml::Value::Boolean(b) => b.to_string(),
                _ => return Err(EnvFileError::Unsupported(key)),
            };
            values.insert(key, rendered);
        }

        Ok(Self { values })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl EnvironmentSource for EnvFile {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}
