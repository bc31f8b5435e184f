//! orgmimic command-line tool.
//!
//! Provides subcommands for transplanting public repository histories into
//! synthetic organizations, previewing contributor mappings, and generating /
//! validating configuration files.

mod report;
mod style;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use orgmimic_core::config::AppConfig;
use orgmimic_core::TransplantEngine;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// orgmimic command-line tool.
#[derive(Parser, Debug)]
#[command(
    name = "orgmimic",
    version,
    about = "Provision synthetic organizations with realistic commit history"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, global = true, default_value = "./orgmimic.toml")]
    config: PathBuf,

    /// Enable debug logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Transplant source histories into the configured target repositories.
    Transplant {
        /// Only this organization (default: every configured organization).
        #[arg(long)]
        org: Option<String>,

        /// Only this target repository.
        #[arg(long)]
        repo: Option<String>,

        /// Print the run report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Rank source contributors and show their synthetic identities.
    Map {
        /// Only this target repository.
        #[arg(long)]
        repo: Option<String>,
    },

    /// Validate a configuration file.
    Validate,

    /// Generate a template configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./orgmimic.toml")]
        output: PathBuf,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("{}", style::error(&format!("Error: {:#}", e)));
            ExitCode::FAILURE
        }
    }
}

/// `Ok(false)` means the command ran but some of its work failed.
async fn run(cli: Cli) -> Result<bool> {
    let config_path = expand_home(&cli.config);
    match cli.command {
        Commands::Init { output } => {
            init_tracing("warn", cli.verbose);
            cmd_init(&expand_home(&output)).map(|()| true)
        }
        Commands::Validate => {
            init_tracing("warn", cli.verbose);
            cmd_validate(&config_path).map(|()| true)
        }
        Commands::Transplant { org, repo, json } => {
            let config = load_config(&config_path)?;
            init_tracing(&config.run.log_level, cli.verbose);
            cmd_transplant(config, org, repo, json).await
        }
        Commands::Map { repo } => {
            let config = load_config(&config_path)?;
            init_tracing(&config.run.log_level, cli.verbose);
            cmd_map(config, repo).await.map(|()| true)
        }
    }
}

/// `RUST_LOG` wins; otherwise `default_level`, or `debug` with `-v`.
fn init_tracing(default_level: &str, verbose: bool) {
    let fallback = if verbose { "debug" } else { default_level };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .with_target(false)
        .init();
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}

fn load_config(path: &Path) -> Result<AppConfig> {
    AppConfig::load_and_resolve(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))
}

fn spinner(message: String) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.blue} {msg}") {
        spinner.set_style(
            style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
    }
    spinner.set_message(message);
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

async fn cmd_transplant(
    config: AppConfig,
    org: Option<String>,
    repo: Option<String>,
    json: bool,
) -> Result<bool> {
    let orgs = match org {
        Some(org) => {
            if !config.orgs.contains(&org) {
                anyhow::bail!("organization '{}' is not listed in the configuration", org);
            }
            vec![org]
        }
        None => config.orgs.clone(),
    };
    let engine = TransplantEngine::new(config).context("failed to initialise transplant engine")?;

    let mut reports = Vec::with_capacity(orgs.len());
    for org in &orgs {
        let progress = (!json).then(|| spinner(format!("Transplanting into {}...", org)));
        let report = engine.run_org(org, repo.as_deref()).await;
        if let Some(progress) = progress {
            progress.finish_and_clear();
        }
        reports.push(report.with_context(|| format!("transplant run for '{}' failed", org))?);
    }

    let complete = reports.iter().all(|r| r.is_complete());
    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(complete);
    }

    for report in &reports {
        let elapsed = report
            .completed_at
            .map(|done| (done - report.started_at).num_seconds())
            .unwrap_or_default();
        println!();
        println!("{}", style::header(&format!("Organization {}", report.org)));
        println!("{}", report::render_report(report));
        let summary = format!(
            "{}/{} repositories published in {}s",
            report.succeeded(),
            report.pairs.len(),
            elapsed
        );
        if report.is_complete() {
            println!("{}", style::success(&summary));
        } else {
            println!("{}", style::warn(&summary));
        }
    }
    info!(orgs = reports.len(), complete, "transplant finished");
    Ok(complete)
}

async fn cmd_map(config: AppConfig, repo: Option<String>) -> Result<()> {
    let engine = TransplantEngine::new(config).context("failed to initialise transplant engine")?;
    let progress = spinner("Ranking source contributors...".into());
    let previews = engine.preview_mappings(repo.as_deref()).await;
    progress.finish_and_clear();
    let previews = previews.context("failed to compute contributor mappings")?;

    if previews.is_empty() {
        println!("{}", style::warn("No source repositories could be ranked."));
        return Ok(());
    }
    println!("{}", report::render_mappings(&previews));
    debug!(targets = previews.len(), "mapping preview printed");
    Ok(())
}

fn cmd_init(output: &Path) -> Result<()> {
    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    std::fs::write(output, AppConfig::default_template()).context("failed to write config file")?;

    println!(
        "{}",
        style::success(&format!("Template configuration written to {}", output.display()))
    );
    println!();
    println!("Next steps:");
    println!("  1. Edit the organizations, repositories and members");
    println!("  2. Export the token variable named by github.token_env (GITHUB_TOKEN)");
    println!(
        "  3. Validate with: orgmimic validate --config {}",
        output.display()
    );
    println!(
        "  4. Preview mappings: orgmimic map --config {}",
        output.display()
    );

    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let mut config =
        AppConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");

    config
        .resolve_env_vars()
        .context("failed to resolve environment variables")?;
    println!("  [OK] Environment variable references processed");

    match config.validate() {
        Ok(()) => println!("  [OK] All required fields are valid"),
        Err(e) => {
            println!("  [FAIL] Validation error: {}", e);
            anyhow::bail!("configuration validation failed");
        }
    }

    println!();
    println!("Configuration summary:");
    println!("  Organizations : {}", config.orgs.join(", "));
    println!("  Work dir      : {}", config.run.work_dir.display());
    println!("  API URL       : {}", config.github.api_url);
    println!(
        "  API token     : {}",
        if config.github.token.is_some() {
            "set"
        } else {
            "NOT SET"
        }
    );
    println!("  Repositories  : {}", config.repos.len());
    for (target, source) in &config.repos {
        let identities = config.identities_for(target);
        println!(
            "    {} <- {} ({} identities)",
            target,
            source.source_id(),
            identities.len()
        );
    }
    println!("  Members       : {}", config.members.len());
    if config.secrets.dir.is_none()
        && config
            .members
            .iter()
            .flat_map(|m| &m.activity)
            .any(|a| a.commit_secret)
    {
        println!(
            "{}",
            style::warn("commit_secret is enabled but no secrets.dir is configured")
        );
    }
    println!();
    println!("{}", style::dim("Configuration is valid."));

    Ok(())
}
