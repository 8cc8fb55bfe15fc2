use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("error reading config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("[{section}] {key}: expected {expected}, got {value:?}")]
    InvalidValue {
        section: String,
        key: String,
        expected: &'static str,
        value: String,
    },
}

/// INI-style configuration: `[Section]` headers, `key = value` lines and
/// `#` comments. Keys before the first section are globals.
#[derive(Debug, Default, Clone)]
pub struct Config {
    pub globals: HashMap<String, String>,
    pub sections: HashMap<String, HashMap<String, String>>,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self::parse(&content))
    }

    #[must_use]
    pub fn parse(content: &str) -> Self {
        let mut globals = HashMap::new();
        let mut sections: HashMap<String, HashMap<String, String>> = HashMap::new();
        let mut current_section: Option<String> = None;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if line.starts_with('[') && line.ends_with(']') {
                current_section = Some(line[1..line.len() - 1].trim().to_string());
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim().to_string();
                let value = value.trim().trim_matches('"').to_string();
                match &current_section {
                    None => {
                        globals.insert(key, value);
                    }
                    Some(sec) => {
                        sections.entry(sec.clone()).or_default().insert(key, value);
                    }
                }
            }
        }
        Config { globals, sections }
    }

    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .get(section)
            .and_then(|sec| sec.get(key))
            .map(|s| s.as_str())
    }

    #[must_use]
    pub fn get_non_empty(&self, section: &str, key: &str) -> Option<&str> {
        self.get(section, key).filter(|s| !s.is_empty())
    }

    #[must_use]
    pub fn get_global(&self, key: &str) -> Option<&str> {
        self.globals.get(key).map(|s| s.as_str())
    }

    #[must_use]
    pub fn get_or_default<'a>(&'a self, section: &str, key: &str, default: &'a str) -> &'a str {
        self.get(section, key)
            .or_else(|| self.get_global(key))
            .unwrap_or(default)
    }

    #[must_use]
    pub fn get_non_empty_or_default<'a>(
        &'a self,
        section: &str,
        key: &str,
        default: &'a str,
    ) -> &'a str {
        self.get_non_empty(section, key)
            .or_else(|| self.get_global(key).filter(|s| !s.is_empty()))
            .unwrap_or(default)
    }

    /// `true/false`, `yes/no`, `on/off`, `1/0`; missing or empty is `Ok(None)`.
    pub fn get_bool(&self, section: &str, key: &str) -> Result<Option<bool>, ConfigError> {
        let Some(raw) = self.get_non_empty(section, key) else {
            return Ok(None);
        };
        match raw.to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Ok(Some(true)),
            "false" | "no" | "off" | "0" => Ok(Some(false)),
            _ => Err(self.invalid(section, key, "a boolean", raw)),
        }
    }

    pub fn get_u64(&self, section: &str, key: &str) -> Result<Option<u64>, ConfigError> {
        let Some(raw) = self.get_non_empty(section, key) else {
            return Ok(None);
        };
        raw.parse::<u64>()
            .map(Some)
            .map_err(|_| self.invalid(section, key, "an unsigned integer", raw))
    }

    /// Comma separated list with blanks removed.
    #[must_use]
    pub fn get_list(&self, section: &str, key: &str) -> Option<Vec<String>> {
        self.get_non_empty(section, key).map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
    }

    fn invalid(&self, section: &str, key: &str, expected: &'static str, raw: &str) -> ConfigError {
        ConfigError::InvalidValue {
            section: section.to_string(),
            key: key.to_string(),
            expected,
            value: raw.to_string(),
        }
    }
}

/// Expands a leading `~` to the user's home directory.
#[must_use]
pub fn expand_path(path_str: &str) -> PathBuf {
    if path_str.starts_with('~') {
        if let Some(mut home_path) = home_dir() {
            if path_str == "~" {
                return home_path;
            }
            if path_str.starts_with("~/") || path_str.starts_with("~\\") {
                home_path.push(&path_str[2..]);
                return home_path;
            }
        }
    }
    PathBuf::from(path_str)
}

/// `$HOME`, or `%USERPROFILE%` on Windows.
#[must_use]
pub fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .ok()
        .filter(|h| !h.is_empty())
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    const SAMPLE: &str = r#"
# global defaults
client_id = "global-client"

[Logging]
log_path = ~/logs
log_filename = zrtp

[Zrtp]
ciphers = AES3, AES1,
allow_clear = yes
t1_retries = 20
bad_bool = maybe
"#;

    #[test]
    fn parses_sections_and_globals() {
        let cfg = Config::parse(SAMPLE);
        assert_eq!(cfg.get("Logging", "log_filename"), Some("zrtp"));
        assert_eq!(cfg.get_global("client_id"), Some("global-client"));
        assert_eq!(cfg.get_or_default("Zrtp", "client_id", "x"), "global-client");
        assert_eq!(cfg.get_or_default("Zrtp", "missing", "x"), "x");
    }

    #[test]
    fn typed_getters() {
        let cfg = Config::parse(SAMPLE);
        assert_eq!(cfg.get_bool("Zrtp", "allow_clear").unwrap(), Some(true));
        assert_eq!(cfg.get_u64("Zrtp", "t1_retries").unwrap(), Some(20));
        assert_eq!(cfg.get_u64("Zrtp", "absent").unwrap(), None);
        assert!(matches!(
            cfg.get_bool("Zrtp", "bad_bool"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert_eq!(
            cfg.get_list("Zrtp", "ciphers").unwrap(),
            vec!["AES3".to_string(), "AES1".to_string()]
        );
    }

    #[test]
    fn load_missing_file_is_read_error() {
        let err = Config::load("/definitely/not/here.ini").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn expand_plain_path_is_untouched() {
        assert_eq!(expand_path("/tmp/x"), PathBuf::from("/tmp/x"));
    }
}
