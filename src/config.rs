//! Loads the daemon's TOML configuration file: directories to mirror, where
//! to find credentials, and the per-machine identifier used to derive the
//! remote root folder name.

use std::fs;
use std::io;

use anyhow::{Context, Result, anyhow};
use camino::Utf8PathBuf;
use serde_derive::Deserialize;

fn default_token_path() -> Result<Utf8PathBuf> {
    let mut p: Utf8PathBuf = home::home_dir()
        .ok_or_else(|| anyhow!("Can't find home directory"))?
        .try_into()
        .context("Home directory isn't UTF-8")?;
    p.push(".piledriver.token");
    Ok(p)
}

fn default_machine_identifier() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown-host".to_string())
}

fn default_recursive() -> bool {
    true
}

/// One locally configured directory tree to mirror.
#[derive(Debug, Clone, Deserialize)]
pub struct RootConfig {
    /// Absolute path of the local directory to watch.
    pub local: Utf8PathBuf,
    /// The name of the corresponding folder on the remote side.
    pub remote: String,
    /// Whether to watch subdirectories recursively. The core only supports
    /// `true` today; `false` is accepted but not yet honored by the watcher.
    #[serde(default = "default_recursive")]
    pub recursive: bool,
}

#[derive(Debug, Deserialize)]
pub struct Configuration {
    #[serde(default)]
    pub directories: Vec<RootConfig>,

    #[serde(default)]
    token_path: Option<Utf8PathBuf>,

    #[serde(default)]
    machine_identifier: Option<String>,
}

impl Configuration {
    pub fn token_path(&self) -> Result<Utf8PathBuf> {
        match &self.token_path {
            Some(p) => Ok(p.clone()),
            None => default_token_path(),
        }
    }

    pub fn machine_identifier(&self) -> String {
        self.machine_identifier
            .clone()
            .unwrap_or_else(default_machine_identifier)
    }

    pub fn machine_root_name(&self) -> String {
        format!("piledriver-{}", self.machine_identifier())
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            directories: Vec::new(),
            token_path: None,
            machine_identifier: None,
        }
    }
}

/// Looks for `<home>/.config/piledriver.toml`. A missing file isn't fatal -
/// callers that need at least one configured directory (the `run`
/// subcommand) check for that themselves.
pub fn load() -> Result<Configuration> {
    let mut confpath: Utf8PathBuf = home::home_dir()
        .ok_or_else(|| anyhow!("Can't find home directory"))?
        .try_into()
        .context("Home directory isn't UTF-8")?;
    confpath.extend([".config", "piledriver.toml"]);

    let s = match fs::read_to_string(&confpath) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Configuration::default()),
        found => found,
    }
    .with_context(|| format!("Couldn't open {confpath}"))?;

    toml::from_str(&s).with_context(|| format!("Couldn't parse {confpath}"))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_minimal_document() {
        let cfg: Configuration = toml::from_str(
            r#"
            [[directories]]
            local = "/home/joe/Documents"
            remote = "Documents"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.directories.len(), 1);
        assert!(cfg.directories[0].recursive);
    }

    #[test]
    fn defaults_apply_when_fields_are_absent() {
        let cfg = Configuration::default();
        assert!(cfg.directories.is_empty());
        assert!(cfg.token_path().is_ok());
        assert!(!cfg.machine_identifier().is_empty());
    }

    #[test]
    fn machine_root_name_is_derived() {
        let mut cfg = Configuration::default();
        cfg.machine_identifier = Some("laptop".to_string());
        assert_eq!(cfg.machine_root_name(), "piledriver-laptop");
    }
}
