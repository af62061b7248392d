use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::Error;

/// Immutable name→version snapshot of an environment's contents.
///
/// Names are normalized on insert (lowercase, runs of `-`/`_`/`.` collapse to
/// a single `-`), so `Flask_Login` and `flask-login` are the same key.
/// Serializes as a plain sorted map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageSet {
    packages: BTreeMap<String, String>,
}

impl PackageSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, version: impl Into<String>) {
        self.packages
            .insert(normalize_package_name(name), version.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.packages
            .get(&normalize_package_name(name))
            .map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.packages.contains_key(&normalize_package_name(name))
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.packages
            .iter()
            .map(|(name, version)| (name.as_str(), version.as_str()))
    }

    /// `name==version` pin strings in name order.
    pub fn pins(&self) -> Vec<String> {
        self.packages
            .iter()
            .map(|(name, version)| format!("{name}=={version}"))
            .collect()
    }

    /// Parse `pip freeze` output: one `name==version` per line, `#`-prefixed
    /// and blank lines ignored. Any other line is a parse failure naming the
    /// offending line.
    pub fn parse_freeze(text: &str) -> Result<Self, Error> {
        let mut packages = BTreeMap::new();
        for (index, raw_line) in text.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let parsed = line.split_once("==").and_then(|(name, version)| {
                let name = normalize_package_name(name);
                let version = version.trim();
                if name.is_empty() || version.is_empty() {
                    None
                } else {
                    Some((name, version.to_string()))
                }
            });
            let Some((name, version)) = parsed else {
                return Err(Error::FreezeParse {
                    line_number: index + 1,
                    line: line.to_string(),
                });
            };
            packages.insert(name, version);
        }

        Ok(Self { packages })
    }

    /// Newline-delimited `name==version` text, sorted by name, trailing
    /// newline when non-empty.
    pub fn to_freeze_text(&self) -> String {
        let mut text = String::new();
        for (name, version) in &self.packages {
            text.push_str(name);
            text.push_str("==");
            text.push_str(version);
            text.push('\n');
        }
        text
    }
}

impl FromIterator<(String, String)> for PackageSet {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut set = Self::new();
        for (name, version) in iter {
            set.insert(&name, version);
        }
        set
    }
}

/// PEP-503-style name normalization: lowercase, runs of `-`, `_` and `.`
/// collapse to a single `-`.
pub fn normalize_package_name(name: &str) -> String {
    let mut normalized = String::with_capacity(name.len());
    let mut pending_separator = false;
    for ch in name.trim().chars() {
        if matches!(ch, '-' | '_' | '.') {
            pending_separator = true;
            continue;
        }
        if pending_separator && !normalized.is_empty() {
            normalized.push('-');
        }
        pending_separator = false;
        normalized.extend(ch.to_lowercase());
    }
    normalized
}
