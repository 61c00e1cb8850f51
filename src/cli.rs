// CLI subcommand definitions using clap derive macros
use clap::Parser;
use std::path::{Path, PathBuf};

use crate::config::{self, Config};
use crate::error::LoadTestError;

/// Open-model HTTP load generator with per-hop latency decomposition
#[derive(Parser, Debug, PartialEq)]
#[command(name = "latency-load-test")]
pub enum Cli {
    /// Run a load test
    Run {
        /// JSON config file path
        config: PathBuf,
        /// Override the target URL
        #[arg(long)]
        target_url: Option<String>,
        /// Override the bearer token
        #[arg(long)]
        token: Option<String>,
        /// HTML report output path
        #[arg(long)]
        report: Option<PathBuf>,
        /// JSON result output path
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Parse and validate a config file without running it
    Validate {
        /// JSON config file path
        config: PathBuf,
    },
    /// Print the reference config as JSON
    DefaultConfig,
}

/// Apply command-line overrides to a loaded config.
pub fn apply_overrides(
    mut cfg: Config,
    target_url: Option<String>,
    token: Option<String>,
    report: Option<PathBuf>,
    output: Option<PathBuf>,
) -> Config {
    if let Some(url) = target_url {
        cfg.target_url = url;
    }
    if let Some(token) = token {
        cfg.bearer_token = token;
    }
    if let Some(path) = report {
        cfg.report_path = path;
    }
    if output.is_some() {
        cfg.json_output = output;
    }
    cfg
}

/// Load and validate `config_path` and describe the resulting schedule.
pub fn run_validate(config_path: &Path) -> Result<String, LoadTestError> {
    let cfg = config::load_from_file(config_path)?;
    let schedule = cfg.schedule()?;
    Ok(format!(
        "Config OK: {} stages, {} total, ~{:.0} iterations, {} pre-allocated / {} max workers",
        schedule.stages().len(),
        humantime::format_duration(schedule.total_duration()),
        schedule.expected_iterations(),
        cfg.pre_allocated_workers,
        cfg.max_workers,
    ))
}

/// The reference config as pretty JSON.
pub fn run_default_config() -> Result<String, LoadTestError> {
    Ok(serde_json::to_string_pretty(&Config::default())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_run_minimal() {
        let cli = Cli::try_parse_from(["latency-load-test", "run", "config.json"]).unwrap();
        assert_eq!(
            cli,
            Cli::Run {
                config: PathBuf::from("config.json"),
                target_url: None,
                token: None,
                report: None,
                output: None,
            }
        );
    }

    #[test]
    fn test_parse_run_with_overrides() {
        let cli = Cli::try_parse_from([
            "latency-load-test",
            "run",
            "config.json",
            "--target-url",
            "http://localhost:8080/",
            "--token",
            "secret",
            "--report",
            "out/summary.html",
            "--output",
            "result.json",
        ])
        .unwrap();
        match cli {
            Cli::Run {
                target_url,
                token,
                report,
                output,
                ..
            } => {
                assert_eq!(target_url.as_deref(), Some("http://localhost:8080/"));
                assert_eq!(token.as_deref(), Some("secret"));
                assert_eq!(report, Some(PathBuf::from("out/summary.html")));
                assert_eq!(output, Some(PathBuf::from("result.json")));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_validate_and_default_config() {
        assert_eq!(
            Cli::try_parse_from(["latency-load-test", "validate", "c.json"]).unwrap(),
            Cli::Validate {
                config: PathBuf::from("c.json")
            }
        );
        assert_eq!(
            Cli::try_parse_from(["latency-load-test", "default-config"]).unwrap(),
            Cli::DefaultConfig
        );
    }

    #[test]
    fn test_run_requires_config_path() {
        assert!(Cli::try_parse_from(["latency-load-test", "run"]).is_err());
    }

    #[test]
    fn test_unknown_subcommand_is_rejected() {
        assert!(Cli::try_parse_from(["latency-load-test", "compare"]).is_err());
    }

    #[test]
    fn test_apply_overrides() {
        let cfg = apply_overrides(
            Config::default(),
            Some("http://localhost/".to_string()),
            Some("t0k3n".to_string()),
            Some(PathBuf::from("r.html")),
            Some(PathBuf::from("r.json")),
        );
        assert_eq!(cfg.target_url, "http://localhost/");
        assert_eq!(cfg.bearer_token, "t0k3n");
        assert_eq!(cfg.report_path, PathBuf::from("r.html"));
        assert_eq!(cfg.json_output, Some(PathBuf::from("r.json")));
    }

    #[test]
    fn test_apply_no_overrides_keeps_config() {
        let cfg = apply_overrides(Config::default(), None, None, None, None);
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn test_run_validate_describes_schedule() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"stages": [{{"duration": "1s", "target": 0}}, {{"duration": "1s", "target": 10}}, {{"duration": "1s", "target": 0}}], "pre_allocated_workers": 10, "max_workers": 100}}"#
        )
        .unwrap();
        let text = run_validate(file.path()).unwrap();
        assert!(text.contains("3 stages"), "{}", text);
        assert!(text.contains("3s total"), "{}", text);
        assert!(text.contains("~10 iterations"), "{}", text);
        assert!(text.contains("10 pre-allocated / 100 max workers"), "{}", text);
    }

    #[test]
    fn test_run_validate_reports_invalid_config() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"stages": []}}"#).unwrap();
        let err = run_validate(file.path()).unwrap_err();
        assert!(matches!(err, LoadTestError::ConfigError(_)));
    }

    #[test]
    fn test_default_config_roundtrips() {
        let json = run_default_config().unwrap();
        let cfg = config::load_from_str(&json).unwrap();
        assert_eq!(cfg, Config::default());
    }
}
