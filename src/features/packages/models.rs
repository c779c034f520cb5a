use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::shared::error::CollectionError;
use crate::shared::record::RawRecord;
use crate::shared::traits::Validatable;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub name: String,
    pub version: String,
    pub release: Option<String>,
    pub arch: Option<String>,
    pub summary: Option<String>,
    /// Installed size in bytes.
    pub size: Option<u64>,
    pub install_time: Option<DateTime<Utc>>,
    /// Package manager the entry came from.
    pub source: String,
}

impl Package {
    pub fn new(name: impl Into<String>, version: impl Into<String>, source: &str) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            release: None,
            arch: None,
            summary: None,
            size: None,
            install_time: None,
            source: source.to_string(),
        }
    }

    pub fn to_record(&self) -> RawRecord {
        RawRecord::new()
            .with("name", self.name.clone())
            .with("version", self.version.clone())
            .with_opt("release", self.release.clone())
            .with_opt("arch", self.arch.clone())
            .with_opt("summary", self.summary.clone())
            .with_opt("size", self.size)
            .with_opt("installtime", self.install_time)
            .with("type", self.source.clone())
    }
}

impl Validatable for Package {
    fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("Package name cannot be empty".to_string());
        }
        if self.version.is_empty() {
            return Err(format!("Package {} has no version", self.name));
        }
        Ok(())
    }
}

/// Splits a control-file style database into stanzas of `(key, value)`.
/// Continuation lines (leading whitespace) are appended to the previous value.
fn stanzas(content: &str, separator: char) -> Vec<Vec<(String, String)>> {
    let mut out = Vec::new();
    let mut current: Vec<(String, String)> = Vec::new();
    for line in content.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                out.push(std::mem::take(&mut current));
            }
            continue;
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some((_, value)) = current.last_mut() {
                value.push('\n');
                value.push_str(line.trim());
            }
            continue;
        }
        if let Some((key, value)) = line.split_once(separator) {
            current.push((key.trim().to_string(), value.trim().to_string()));
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

fn field<'a>(stanza: &'a [(String, String)], key: &str) -> Option<&'a str> {
    stanza
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

/// Parses `/var/lib/dpkg/status`. Only fully installed packages are kept.
pub fn parse_dpkg_status(content: &str) -> Result<Vec<Package>, CollectionError> {
    let mut packages = Vec::new();
    for stanza in stanzas(content, ':') {
        let status = field(&stanza, "Status").unwrap_or_default();
        if !status.split_whitespace().last().is_some_and(|s| s == "installed") {
            continue;
        }
        let name = field(&stanza, "Package")
            .ok_or_else(|| CollectionError::Parse("dpkg stanza without Package field".to_string()))?;
        let mut package = Package::new(name, field(&stanza, "Version").unwrap_or_default(), "dpkg");
        package.arch = field(&stanza, "Architecture").map(str::to_string);
        package.summary = field(&stanza, "Description")
            .and_then(|d| d.lines().next())
            .map(str::to_string);
        package.size = field(&stanza, "Installed-Size")
            .and_then(|s| s.parse::<u64>().ok())
            .map(|kib| kib * 1024);
        packages.push(package);
    }
    Ok(packages)
}

/// Parses Alpine's `/lib/apk/db/installed`.
pub fn parse_apk_installed(content: &str) -> Result<Vec<Package>, CollectionError> {
    let mut packages = Vec::new();
    for stanza in stanzas(content, ':') {
        let Some(name) = field(&stanza, "P") else {
            continue;
        };
        let version = field(&stanza, "V")
            .ok_or_else(|| CollectionError::Parse(format!("apk package {} has no version", name)))?;
        let (version, release) = match version.rsplit_once("-r") {
            Some((v, r)) if r.chars().all(|c| c.is_ascii_digit()) => (v, Some(r.to_string())),
            _ => (version, None),
        };
        let mut package = Package::new(name, version, "apk");
        package.release = release;
        package.arch = field(&stanza, "A").map(str::to_string);
        package.summary = field(&stanza, "T").map(str::to_string);
        package.size = field(&stanza, "I").and_then(|s| s.parse().ok());
        package.install_time = field(&stanza, "t")
            .and_then(|s| s.parse::<i64>().ok())
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0));
        packages.push(package);
    }
    Ok(packages)
}

/// Query format handed to `rpm -qa --qf`.
pub const RPM_QUERY_FORMAT: &str =
    "%{NAME}\\t%{VERSION}\\t%{RELEASE}\\t%{ARCH}\\t%{SIZE}\\t%{INSTALLTIME}\\t%{SUMMARY}\\n";

/// Parses output produced with [`RPM_QUERY_FORMAT`].
pub fn parse_rpm_output(output: &str) -> Result<Vec<Package>, CollectionError> {
    let mut packages = Vec::new();
    for line in output.lines().filter(|l| !l.trim().is_empty()) {
        let parts: Vec<&str> = line.splitn(7, '\t').collect();
        if parts.len() < 7 {
            return Err(CollectionError::Parse(format!("Unexpected rpm output line: {}", line)));
        }
        // gpg-pubkey entries are keys, not software.
        if parts[0] == "gpg-pubkey" {
            continue;
        }
        let mut package = Package::new(parts[0], parts[1], "rpm");
        package.release = Some(parts[2].to_string()).filter(|r| !r.is_empty());
        package.arch = Some(parts[3].to_string()).filter(|a| a != "(none)");
        package.size = parts[4].parse().ok();
        package.install_time = parts[5]
            .parse::<i64>()
            .ok()
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0));
        package.summary = Some(parts[6].to_string()).filter(|s| !s.is_empty());
        packages.push(package);
    }
    Ok(packages)
}
