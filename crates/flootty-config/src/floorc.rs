//! `~/.floorc`: one `KEY value` pair per line.

use std::collections::HashMap;

/// Credentials and defaults shared with the other Floobits clients.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Floorc {
    values: HashMap<String, String>,
}

impl Floorc {
    /// Returns the floorc path: ~/.floorc
    #[must_use]
    pub fn path() -> std::path::PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| std::path::PathBuf::from("."))
            .join(".floorc")
    }

    /// Load `~/.floorc`. A missing or unreadable file yields no values.
    #[must_use]
    pub fn load() -> Self {
        Self::load_from(&Self::path())
    }

    #[must_use]
    pub fn load_from(path: &std::path::Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content),
            Err(e) => {
                tracing::debug!("no floorc at {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Keys are case-insensitive; the value is everything after the first space.
    #[must_use]
    pub fn parse(content: &str) -> Self {
        let values = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.starts_with('#'))
            .filter_map(|line| line.split_once(' '))
            .map(|(key, value)| (key.trim().to_ascii_lowercase(), value.trim().to_string()))
            .filter(|(key, _)| !key.is_empty())
            .collect();
        Self { values }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(&key.to_ascii_lowercase())
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.get("username")
    }

    #[must_use]
    pub fn secret(&self) -> Option<&str> {
        self.get("secret")
    }

    #[must_use]
    pub fn default_host(&self) -> Option<&str> {
        self.get("default_host")
    }
}
