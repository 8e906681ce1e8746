//! The `KEY=VALUE` reader underlying every config file named in §6.
//! Grounded on the table-driven `readCfgFile`/`CfgEntry` reader: a file is
//! read once into a map, then each typed accessor pulls and parses a key,
//! reporting a [`ConfigError`] that names the offending file/key/value.

use crate::errors::ConfigError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub struct KeyValueFile {
    path: PathBuf,
    entries: HashMap<String, String>,
}

impl KeyValueFile {
    /// Reads `path` line by line: blank lines and lines starting with `#`
    /// are skipped, everything else must be `KEY=VALUE` (whitespace around
    /// `=` is trimmed).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref().to_path_buf();
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io {
            file: path.display().to_string(),
            source: e,
        })?;

        let mut entries = HashMap::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(ConfigError::InvalidValue {
                    file: path.display().to_string(),
                    key: line.to_string(),
                    value: String::new(),
                    reason: "expected KEY=VALUE".into(),
                });
            };
            entries.insert(key.trim().to_string(), value.trim().to_string());
        }

        Ok(KeyValueFile { path, entries })
    }

    pub fn path_display(&self) -> String {
        self.path.display().to_string()
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    fn missing(&self, key: &str) -> ConfigError {
        ConfigError::MissingKey {
            file: self.path_display(),
            key: key.to_string(),
        }
    }

    fn invalid(&self, key: &str, value: &str, reason: impl Into<String>) -> ConfigError {
        ConfigError::InvalidValue {
            file: self.path_display(),
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    pub fn required_string(&self, key: &str) -> Result<String, ConfigError> {
        self.get(key).map(str::to_string).ok_or_else(|| self.missing(key))
    }

    pub fn optional_string(&self, key: &str) -> Option<String> {
        self.get(key).map(str::to_string)
    }

    pub fn required_f64(&self, key: &str) -> Result<f64, ConfigError> {
        let raw = self.get(key).ok_or_else(|| self.missing(key))?;
        raw.parse().map_err(|_| self.invalid(key, raw, "not a number"))
    }

    pub fn optional_f64(&self, key: &str) -> Result<Option<f64>, ConfigError> {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|_| self.invalid(key, raw, "not a number")),
        }
    }

    pub fn required_bool(&self, key: &str) -> Result<bool, ConfigError> {
        let raw = self.get(key).ok_or_else(|| self.missing(key))?;
        parse_bool(raw).ok_or_else(|| self.invalid(key, raw, "expected 0/1"))
    }

    pub fn optional_bool(&self, key: &str) -> Result<Option<bool>, ConfigError> {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => parse_bool(raw)
                .map(Some)
                .ok_or_else(|| self.invalid(key, raw, "expected 0/1")),
        }
    }

    pub fn optional_i8(&self, key: &str) -> Result<Option<i8>, ConfigError> {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|_| self.invalid(key, raw, "not an integer")),
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw {
        "0" => Some(false),
        "1" => Some(true),
        _ => None,
    }
}
