//! Shiki CLI - find duplicate images and sort a folder into seasons.
//!
//! # Usage
//!
//! ```bash
//! # Group near-identical images and review them
//! shiki duplicates ./photos --review
//!
//! # Classify with an automatic threshold and print statistics
//! shiki seasons ./photos --auto --metric entropy --report
//!
//! # Sort into ./photos/{spring,summer,autumn,winter}/
//! shiki seasons ./photos --apply move
//! shiki seasons ./photos --annotate --annotate-size 1920x1080 --apply
//!
//! # View configuration
//! shiki config show
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod cli;
mod logging;

/// Shiki - duplicate finder and season sorter for image folders.
#[derive(Parser, Debug)]
#[command(name = "shiki")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long, global = true)]
    json_logs: bool,

    /// Config file to use instead of the default location
    #[arg(long, global = true, env = "SHIKI_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Find near-identical images by perceptual hash
    Duplicates(cli::duplicates::DuplicatesArgs),

    /// Classify images into seasons and optionally sort them into folders
    Seasons(cli::seasons::SeasonsArgs),

    /// View and manage configuration
    Config(cli::config::ConfigArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logging isn't initialized yet, so config warnings go through eprintln.
    let loaded = match &cli.config {
        Some(path) => shiki_core::Config::load_from(path),
        None => shiki_core::Config::load(),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            eprintln!(
                "Warning: Failed to load config: {e}\n  \
                 Using default configuration. Check your config file with `shiki config check`."
            );
            shiki_core::Config::default()
        }
    };
    logging::init_from_config(&config, cli.verbose, cli.json_logs);

    tracing::debug!("Shiki v{}", shiki_core::VERSION);

    match cli.command {
        Commands::Duplicates(args) => cli::duplicates::execute(args, config).await,
        Commands::Seasons(args) => cli::seasons::execute(args, config).await,
        Commands::Config(args) => cli::config::execute(args, config).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use shiki_core::{Metric, ReorganizeMode};

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_seasons_flags() {
        let cli = Cli::try_parse_from([
            "shiki", "seasons", "./photos", "--metric", "ratio_confidence", "--apply", "copy",
            "-o", "./sorted", "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        let Commands::Seasons(args) = cli.command else {
            panic!("expected seasons");
        };
        assert_eq!(args.metric, Some(Metric::RatioConfidence));
        assert_eq!(args.apply, Some(Some(ReorganizeMode::Copy)));
        assert_eq!(args.output.as_deref(), Some(std::path::Path::new("./sorted")));
    }

    #[test]
    fn apply_value_is_optional() {
        let cli = Cli::try_parse_from([
            "shiki", "seasons", "./photos", "--apply", "--annotate", "--annotate-size", "1280x720",
        ])
        .unwrap();
        let Commands::Seasons(args) = cli.command else {
            panic!("expected seasons");
        };
        assert_eq!(args.apply, Some(None));
        assert!(args.annotate);
        assert_eq!(args.annotate_size.map(|s| (s.width, s.height)), Some((1280, 720)));

        assert!(Cli::try_parse_from(["shiki", "seasons", "./photos", "--annotate"]).is_err());
        assert!(Cli::try_parse_from([
            "shiki", "seasons", "./photos", "--apply", "--annotate", "--annotate-size", "big",
        ])
        .is_err());
    }

    #[test]
    fn config_flag_is_global() {
        let cli =
            Cli::try_parse_from(["shiki", "config", "show", "--config", "/tmp/shiki.toml"]).unwrap();
        assert_eq!(cli.config.as_deref(), Some(std::path::Path::new("/tmp/shiki.toml")));
    }

    #[test]
    fn rejects_unknown_metric_and_conflicting_threshold() {
        assert!(Cli::try_parse_from(["shiki", "seasons", ".", "--metric", "vibes"]).is_err());
        assert!(Cli::try_parse_from(["shiki", "seasons", ".", "--auto", "-t", "0.4"]).is_err());
        assert!(Cli::try_parse_from(["shiki", "seasons", ".", "-o", "out"]).is_err());
    }
}
