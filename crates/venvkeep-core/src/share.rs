use anyhow::{anyhow, Result};
use chrono::{DateTime, SecondsFormat, Utc};

use crate::checksum::{sha256_hex, verify_sha256};
use crate::PackageSet;

pub const SHARE_BANNER: &str = "# venvkeep shared environment";
pub const SHARE_EXTENSION: &str = "venvkeep";

/// A collaboration share file: commented metadata header above plain freeze
/// text. Every header field is optional on parse so hand-edited files still
/// import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareDocument {
    pub created_at: Option<String>,
    pub python_version: Option<String>,
    pub author: Option<String>,
    pub declared_package_count: Option<usize>,
    pub sha256: Option<String>,
    pub packages: PackageSet,
}

impl ShareDocument {
    /// Fails when the header carries a digest that does not match the
    /// package payload. Files without a digest pass.
    pub fn verify_integrity(&self) -> Result<()> {
        let Some(expected) = &self.sha256 else {
            return Ok(());
        };
        if verify_sha256(self.packages.to_freeze_text().as_bytes(), expected) {
            return Ok(());
        }
        Err(anyhow!(
            "share file integrity check failed: package list does not match its SHA256 header"
        ))
    }
}

/// Digest over the canonical freeze text, embedded in the header at render
/// time and re-checked on import.
pub fn payload_digest(packages: &PackageSet) -> String {
    sha256_hex(packages.to_freeze_text().as_bytes())
}

pub fn render_share_document(
    packages: &PackageSet,
    python_version: Option<&str>,
    author: Option<&str>,
    created_at: DateTime<Utc>,
) -> String {
    let mut text = String::new();
    text.push_str(SHARE_BANNER);
    text.push('\n');
    text.push_str(&format!(
        "# Created: {}\n",
        created_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    ));
    if let Some(python_version) = python_version {
        text.push_str(&format!("# Python: {python_version}\n"));
    }
    text.push_str(&format!("# Packages: {}\n", packages.len()));
    if let Some(author) = author {
        text.push_str(&format!("# By: {author}\n"));
    }
    text.push_str(&format!("# SHA256: {}\n", payload_digest(packages)));
    text.push_str("#\n");
    text.push_str("# To import: venvkeep import <this file>\n");
    text.push('\n');
    text.push_str(&packages.to_freeze_text());
    text
}

pub fn parse_share_document(text: &str) -> Result<ShareDocument> {
    let mut created_at = None;
    let mut python_version = None;
    let mut author = None;
    let mut declared_package_count = None;
    let mut sha256 = None;

    for line in text.lines().map(str::trim) {
        let Some(comment) = line.strip_prefix('#') else {
            continue;
        };
        let Some((key, value)) = comment.trim().split_once(':') else {
            continue;
        };
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        match key.trim() {
            "Created" => created_at = Some(value.to_string()),
            "Python" => python_version = Some(value.to_string()),
            "By" => author = Some(value.to_string()),
            "SHA256" => sha256 = Some(value.to_string()),
            "Packages" => {
                declared_package_count = Some(value.parse::<usize>().map_err(|_| {
                    anyhow!("share file declares a non-numeric package count: '{value}'")
                })?);
            }
            _ => {}
        }
    }

    let packages = PackageSet::parse_freeze(text)?;
    if let Some(declared) = declared_package_count {
        if declared != packages.len() {
            return Err(anyhow!(
                "share file declares {declared} packages but lists {}",
                packages.len()
            ));
        }
    }

    Ok(ShareDocument {
        created_at,
        python_version,
        author,
        declared_package_count,
        sha256,
        packages,
    })
}

/// `Python 3.11.9` and `Python 3.11.2` are the same family; `Python 3.12.0`
/// is not. Inconclusive strings compare unequal only when both parse.
pub fn python_version_family_matches(left: &str, right: &str) -> bool {
    match (version_family(left), version_family(right)) {
        (Some(l), Some(r)) => l == r,
        _ => true,
    }
}

fn version_family(python_version: &str) -> Option<(u64, u64)> {
    let numeric = python_version
        .split_whitespace()
        .find(|token| token.chars().next().is_some_and(|ch| ch.is_ascii_digit()))?;
    let mut segments = numeric.split('.');
    let major = segments.next()?.parse::<u64>().ok()?;
    let minor = segments.next()?.parse::<u64>().ok()?;
    Some((major, minor))
}
