//! Tool adapters
//!
//! Everything the engine needs to know about the invoked tool lives behind
//! the [`ToolAdapter`] trait: the prefix of the per-directory state files,
//! how a job's working directory is derived from its argument line, which
//! subdirectories are scratch space, and which metrics artifact a successful
//! run leaves behind.

use std::fs;
use std::path::{Path, PathBuf};

/// Per-tool policy injected into the runner and the aggregator.
pub trait ToolAdapter: Send + Sync {
    /// Prefix of the persisted state files (`<prefix>_return_value`, ...).
    fn file_prefix(&self) -> &str;

    /// Working directory for a job, relative to the run root, derived from
    /// structured fields in the argument line.
    fn job_dir(&self, args: &str) -> PathBuf;

    /// Subdirectory names that are tool scratch space: removed before a
    /// retry and never aggregated.
    fn scratch_dirs(&self) -> &[&str] {
        &[]
    }

    /// Structured metrics file a successful job may leave in its directory.
    fn metrics_artifact(&self) -> Option<&str> {
        None
    }

    fn return_value_file(&self) -> String {
        format!("{}_return_value", self.file_prefix())
    }

    fn execution_output_file(&self) -> String {
        format!("{}_execution_output", self.file_prefix())
    }

    fn failed_output_file(&self) -> String {
        format!("{}_failed_output", self.file_prefix())
    }

    fn results_file(&self) -> String {
        format!("{}_results", self.file_prefix())
    }

    /// Short metric summary for report lines, read from the job directory.
    fn results_summary(&self, job_dir: &Path) -> Option<String> {
        let path = job_dir.join(self.results_file());
        let content = fs::read_to_string(path).ok()?;
        let trimmed = content.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(format!("{trimmed} cycles"))
        }
    }

    /// Files preserved by the post-success cleanup, besides the metrics
    /// artifact.
    fn canonical_files(&self) -> Vec<String> {
        vec![
            self.return_value_file(),
            self.execution_output_file(),
            self.failed_output_file(),
            "args".to_string(),
        ]
    }
}

/// Split an argument line into tokens, honoring single/double quotes.
pub fn split_args(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for c in line.chars() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                } else {
                    current.push(c);
                }
            }
            None => match c {
                '\'' | '"' => quote = Some(c),
                c if c.is_whitespace() => {
                    if !current.is_empty() {
                        tokens.push(std::mem::take(&mut current));
                    }
                }
                _ => current.push(c),
            },
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn option_value<'a>(token: &'a str, option: &str) -> Option<&'a str> {
    token.strip_prefix(option)?.strip_prefix('=')
}

/// Adapter for the device-characterization tool: jobs are identified by a
/// target device seed file and a component name.
pub struct CharacterizeAdapter;

impl ToolAdapter for CharacterizeAdapter {
    fn file_prefix(&self) -> &str {
        "eucalyptus"
    }

    fn job_dir(&self, args: &str) -> PathBuf {
        let mut device = String::new();
        let mut component = String::new();

        for token in split_args(args) {
            if let Some(value) = option_value(&token, "--target-datafile") {
                let name = Path::new(value)
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or(value);
                device = name.strip_suffix("-seed.xml").unwrap_or(name).to_string();
            } else if let Some(value) = option_value(&token, "--characterize") {
                component = value
                    .split_once(',')
                    .map(|(head, _)| head)
                    .unwrap_or(value)
                    .to_string();
            }
        }

        PathBuf::from(device).join(component)
    }

    fn scratch_dirs(&self) -> &[&str] {
        &["panda-temp", "HLS_output"]
    }

    fn metrics_artifact(&self) -> Option<&str> {
        Some("characterization.xml")
    }
}

/// Adapter for the regression-test tool: jobs are identified by a
/// configuration name and a benchmark source file.
pub struct BenchmarkAdapter;

impl ToolAdapter for BenchmarkAdapter {
    fn file_prefix(&self) -> &str {
        "bambu"
    }

    fn job_dir(&self, args: &str) -> PathBuf {
        let mut configuration = String::new();
        let mut benchmark = String::new();

        for token in split_args(args) {
            if let Some(value) = option_value(&token, "--configuration-name") {
                configuration = value.to_string();
            } else if !token.starts_with('-') {
                // Last positional token is the benchmark source.
                benchmark = Path::new(&token)
                    .file_stem()
                    .and_then(|n| n.to_str())
                    .unwrap_or(&token)
                    .to_string();
            }
        }

        PathBuf::from(configuration).join(benchmark)
    }

    fn scratch_dirs(&self) -> &[&str] {
        &["panda-temp", "HLS_output"]
    }
}

/// Known adapter profiles selectable from the command line.
pub fn adapter_for_profile(name: &str) -> Option<Box<dyn ToolAdapter>> {
    match name.to_lowercase().as_str() {
        "characterize" => Some(Box::new(CharacterizeAdapter)),
        "benchmark" => Some(Box::new(BenchmarkAdapter)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_args_quotes() {
        let tokens = split_args("--opt=\"a b\" plain 'c d'");
        assert_eq!(tokens, vec!["--opt=a b", "plain", "c d"]);
    }

    #[test]
    fn test_characterize_job_dir() {
        let adapter = CharacterizeAdapter;
        let dir = adapter.job_dir(
            "--target-datafile=/opt/devices/xc7z020-1clg484-seed.xml --characterize=plus_expr,32",
        );
        assert_eq!(dir, PathBuf::from("xc7z020-1clg484/plus_expr"));
    }

    #[test]
    fn test_characterize_job_dir_without_variant() {
        let adapter = CharacterizeAdapter;
        let dir = adapter.job_dir("--target-datafile=dev-seed.xml --characterize=mult_expr");
        assert_eq!(dir, PathBuf::from("dev/mult_expr"));
    }

    #[test]
    fn test_benchmark_job_dir() {
        let adapter = BenchmarkAdapter;
        let dir = adapter.job_dir("--configuration-name=O2 -v2 /bench/crc32/crc32.c");
        assert_eq!(dir, PathBuf::from("O2/crc32"));
    }

    #[test]
    fn test_state_file_names() {
        let adapter = CharacterizeAdapter;
        assert_eq!(adapter.return_value_file(), "eucalyptus_return_value");
        assert_eq!(
            adapter.execution_output_file(),
            "eucalyptus_execution_output"
        );
        assert_eq!(adapter.failed_output_file(), "eucalyptus_failed_output");
        assert_eq!(adapter.results_file(), "eucalyptus_results");
    }

    #[test]
    fn test_adapter_profiles() {
        assert!(adapter_for_profile("characterize").is_some());
        assert!(adapter_for_profile("BENCHMARK").is_some());
        assert!(adapter_for_profile("unknown").is_none());
    }

    #[test]
    fn test_results_summary() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = CharacterizeAdapter;
        assert_eq!(adapter.results_summary(dir.path()), None);

        std::fs::write(dir.path().join("eucalyptus_results"), "42\n").unwrap();
        assert_eq!(
            adapter.results_summary(dir.path()),
            Some("42 cycles".to_string())
        );
    }
}
