//! Run configuration
//!
//! Resource envelope, run options, and the optional YAML defaults file.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration file locations (in order of precedence)
const CONFIG_LOCATIONS: &[&str] = &["./benchrun.yaml", "./benchrun.yml", "./.benchrun.yaml"];

/// Per-job resource envelope, enforced through rlimits at spawn time.
///
/// Sizes are in kilobytes to match the conventional `ulimit` units.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Output file-size cap (`RLIMIT_FSIZE`).
    #[serde(default = "default_file_size_kb")]
    pub file_size_kb: u64,

    /// Address-space cap (`RLIMIT_AS`).
    #[serde(default = "default_virtual_memory_kb")]
    pub virtual_memory_kb: u64,

    /// Stack cap (`RLIMIT_STACK`).
    #[serde(default = "default_stack_kb")]
    pub stack_kb: u64,

    /// Optional CPU-time cap in seconds (`RLIMIT_CPU`).
    #[serde(default)]
    pub cpu_secs: Option<u64>,
}

fn default_file_size_kb() -> u64 {
    262_144
}

fn default_virtual_memory_kb() -> u64 {
    8_388_608
}

fn default_stack_kb() -> u64 {
    16_384
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            file_size_kb: default_file_size_kb(),
            virtual_memory_kb: default_virtual_memory_kb(),
            stack_kb: default_stack_kb(),
            cpu_secs: None,
        }
    }
}

/// Options driving one pool run.
#[derive(Clone, Debug)]
pub struct RunOptions {
    /// Number of worker threads (minimum 1).
    pub workers: usize,

    /// Hard wall-clock timeout per job.
    pub timeout: Duration,

    /// Abort the whole run on the first failing job.
    pub fail_fast: bool,

    /// Skip jobs already recorded as successful.
    pub restart: bool,

    /// Remove non-canonical artifacts after a successful job.
    pub clean: bool,

    /// Resource envelope applied to every job.
    pub limits: ResourceLimits,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            workers: 1,
            timeout: Duration::from_secs(1440 * 60),
            fail_fast: false,
            restart: false,
            clean: true,
            limits: ResourceLimits::default(),
        }
    }
}

/// Parse a timeout string such as `30s`, `90m`, or `2h` (bare numbers are
/// minutes, matching the tool convention).
pub fn parse_timeout(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        bail!("empty timeout");
    }

    let (value, unit) = match s.chars().last() {
        Some(c) if c.is_ascii_alphabetic() => (&s[..s.len() - 1], Some(c)),
        _ => (s, None),
    };

    let value: u64 = value
        .parse()
        .with_context(|| format!("invalid timeout: {s}"))?;

    let secs = match unit {
        Some('s') | Some('S') => value,
        None | Some('m') | Some('M') => value * 60,
        Some('h') | Some('H') => value * 3600,
        Some(u) => bail!("unknown timeout unit '{u}' in {s}"),
    };
    Ok(Duration::from_secs(secs))
}

/// Optional defaults file, looked up next to the working directory.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Default worker count.
    #[serde(default)]
    pub workers: Option<usize>,

    /// Default timeout string.
    #[serde(default)]
    pub timeout: Option<String>,

    /// Default resource limits.
    #[serde(default)]
    pub limits: Option<ResourceLimits>,

    /// Default tool profile name.
    #[serde(default)]
    pub profile: Option<String>,
}

impl ConfigFile {
    /// Find a config file in the standard locations.
    pub fn find() -> Option<PathBuf> {
        CONFIG_LOCATIONS
            .iter()
            .map(PathBuf::from)
            .find(|p| p.exists())
    }

    /// Load from the default location, or empty defaults when absent.
    pub fn load_default() -> Result<Self> {
        match Self::find() {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load from a specific file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timeout_units() {
        assert_eq!(parse_timeout("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_timeout("90m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_timeout("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_timeout("1440").unwrap(), Duration::from_secs(86400));
    }

    #[test]
    fn test_parse_timeout_rejects_garbage() {
        assert!(parse_timeout("").is_err());
        assert!(parse_timeout("abc").is_err());
        assert!(parse_timeout("10x").is_err());
    }

    #[test]
    fn test_default_limits_match_ulimit_defaults() {
        let limits = ResourceLimits::default();
        assert_eq!(limits.file_size_kb, 262_144);
        assert_eq!(limits.virtual_memory_kb, 8_388_608);
        assert_eq!(limits.stack_kb, 16_384);
        assert_eq!(limits.cpu_secs, None);
    }

    #[test]
    fn test_config_file_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("benchrun.yaml");
        std::fs::write(&path, "workers: 8\ntimeout: 60m\n").unwrap();

        let config = ConfigFile::load(&path).unwrap();
        assert_eq!(config.workers, Some(8));
        assert_eq!(config.timeout.as_deref(), Some("60m"));
        assert!(config.limits.is_none());
    }
}
