//! `addontrace discover` command - trace add-ons of a Dockerfile and verify
//! them against an image.

use std::collections::BTreeMap;
use std::path::PathBuf;

use addontrace_core::{DiscoverConfig, OutputFormat};
use addontrace_engine::{DefaultMaterializer, Discovery, DiscoveryOutcome};
use clap::Args;

/// Config file read when `--config` is not given.
const DEFAULT_CONFIG_FILE: &str = "addontrace/discover.yaml";

#[derive(Args)]
pub struct DiscoverArgs {
    /// Path to the Dockerfile
    #[arg(short = 'f', long = "file")]
    pub file: Option<PathBuf>,

    /// Image to verify: registry reference, OCI layout, image tarball or rootfs directory
    #[arg(short = 'i', long = "image")]
    pub image: Option<String>,

    /// SBOM namespace; also recorded as the origin of build-context files
    #[arg(short = 'n', long = "namespace")]
    pub namespace: Option<String>,

    /// Output file path (extension is set per format) [default: results]
    #[arg(short = 'r', long = "output")]
    pub output: Option<PathBuf>,

    /// Output format: spdx, cdx or json [default: cdx]
    #[arg(short = 'o', long = "format")]
    pub format: Option<OutputFormat>,

    /// Save the trace report next to the output
    #[arg(short = 's', long = "save-trace")]
    pub save_trace: bool,

    /// Set build-time variables (KEY=VALUE), can be repeated
    #[arg(long = "build-arg")]
    pub build_arg: Vec<String>,

    /// Configuration file (YAML or JSON); flags override its values
    #[arg(long = "config")]
    pub config: Option<PathBuf>,

    /// Never look the image up in the local Docker daemon; pull it from the registry
    #[arg(long = "no-daemon")]
    pub no_daemon: bool,
}

pub async fn execute(args: DiscoverArgs) -> Result<(), Box<dyn std::error::Error>> {
    let base = match &args.config {
        Some(path) => DiscoverConfig::from_file(path)?,
        None => match default_config_path().filter(|p| p.is_file()) {
            Some(path) => {
                tracing::debug!(path = %path.display(), "Using default config file");
                DiscoverConfig::from_file(&path)?
            }
            None => DiscoverConfig::default(),
        },
    };
    let config = merge_config(base, &args)?;
    config.validate()?;

    tracing::info!(
        dockerfile = %config.dockerfile.display(),
        image = config.image.as_deref().unwrap_or("-"),
        format = %config.format,
        "Starting discovery"
    );

    let mut materializer = DefaultMaterializer::default();
    if args.no_daemon {
        materializer = materializer.with_daemon(None);
    }
    let outcome = Discovery::new(config).run(&materializer).await?;
    print_summary(&outcome);
    Ok(())
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(DEFAULT_CONFIG_FILE))
}

/// Apply command-line flags on top of a loaded configuration.
fn merge_config(
    mut config: DiscoverConfig,
    args: &DiscoverArgs,
) -> Result<DiscoverConfig, String> {
    if let Some(file) = &args.file {
        config.dockerfile = file.clone();
    }
    if let Some(image) = args.image.as_deref().map(str::trim).filter(|i| !i.is_empty()) {
        config.image = Some(image.to_string());
    }
    if let Some(namespace) = &args.namespace {
        config.namespace = Some(namespace.clone());
    }
    if let Some(output) = &args.output {
        config.output = Some(output.clone());
    }
    if let Some(format) = args.format {
        config.format = format;
    }
    config.save_trace |= args.save_trace;
    config.build_args.extend(parse_build_args(&args.build_arg)?);
    Ok(config)
}

/// Parse KEY=VALUE pairs.
fn parse_build_args(args: &[String]) -> Result<BTreeMap<String, String>, String> {
    let mut map = BTreeMap::new();
    for arg in args {
        let (key, value) = arg
            .split_once('=')
            .ok_or_else(|| format!("Invalid build arg (expected KEY=VALUE): {arg}"))?;
        map.insert(key.to_string(), value.to_string());
    }
    Ok(map)
}

fn print_summary(outcome: &DiscoveryOutcome) {
    let installs: usize = outcome
        .report
        .build_stages
        .iter()
        .map(|s| s.addon_installs.len())
        .sum();
    println!(
        "Discovered {} add-on install(s) in {} build stage(s) of {}",
        installs,
        outcome.report.build_stages.len(),
        outcome.report.filepath
    );

    if let Some(verification) = &outcome.verification {
        println!(
            "Verified {} artifact(s); {} missing, {} need manual review",
            verification.artifacts.len(),
            verification.missing.len(),
            verification.manual_review.len()
        );
    }
    if let Some(path) = &outcome.trace_report {
        println!("Trace report saved to {}", path.display());
    }
    if let Some(path) = &outcome.sbom {
        println!("SBOM saved to {}", path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn args() -> DiscoverArgs {
        DiscoverArgs {
            file: None,
            image: None,
            namespace: None,
            output: None,
            format: None,
            save_trace: false,
            build_arg: Vec::new(),
            config: None,
            no_daemon: false,
        }
    }

    #[test]
    fn test_parse_build_args_valid() {
        let args = vec!["VERSION=1.0".to_string(), "URL=http://x/?a=b".to_string()];
        let result = parse_build_args(&args).unwrap();
        assert_eq!(result.get("VERSION").map(String::as_str), Some("1.0"));
        assert_eq!(result.get("URL").map(String::as_str), Some("http://x/?a=b"));
    }

    #[test]
    fn test_parse_build_args_invalid() {
        let args = vec!["NOEQUALS".to_string()];
        assert!(parse_build_args(&args).is_err());
    }

    #[test]
    fn test_merge_flags_override_config() {
        let mut base = DiscoverConfig {
            image: Some("app:1.0".to_string()),
            format: OutputFormat::Spdx,
            ..Default::default()
        };
        base.build_args.insert("A".to_string(), "1".to_string());

        let mut flags = args();
        flags.file = Some(PathBuf::from("build/Dockerfile"));
        flags.format = Some(OutputFormat::Json);
        flags.save_trace = true;
        flags.build_arg = vec!["A=2".to_string(), "B=3".to_string()];

        let config = merge_config(base, &flags).unwrap();
        assert_eq!(config.dockerfile, PathBuf::from("build/Dockerfile"));
        assert_eq!(config.image.as_deref(), Some("app:1.0"));
        assert_eq!(config.format, OutputFormat::Json);
        assert!(config.save_trace);
        assert_eq!(config.build_args.get("A").map(String::as_str), Some("2"));
        assert_eq!(config.build_args.len(), 2);
    }

    #[test]
    fn test_blank_image_flag_ignored() {
        let mut flags = args();
        flags.image = Some("  ".to_string());
        let config = merge_config(DiscoverConfig::default(), &flags).unwrap();
        assert_eq!(config.image, None);
    }

    #[tokio::test]
    async fn test_execute_without_image() {
        let dir = TempDir::new().unwrap();
        let dockerfile = dir.path().join("Dockerfile");
        std::fs::write(&dockerfile, "FROM alpine\nRUN curl -o /usr/bin/jq https://x/jq\n").unwrap();
        let config_file = dir.path().join("discover.json");
        std::fs::write(&config_file, "{}").unwrap();

        let mut flags = args();
        flags.file = Some(dockerfile);
        flags.config = Some(config_file);
        flags.output = Some(dir.path().join("results"));
        flags.save_trace = true;

        execute(flags).await.unwrap();
        assert!(dir.path().join("results-trace.json").is_file());
    }
}
