//! tokenprint — entry point.

use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use tokenprint::AbortHandle;
use tokenprint_cli::{
    load_run_config, render_plan_files, run_manifest, validate_config_file, ManifestRun, EXIT_ABORTED,
    EXIT_FAILURE,
};

#[derive(Parser)]
#[command(
    name = "tokenprint",
    about = "Canonicalize design tokens and components from captured site evidence",
    version
)]
struct Cli {
    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a normalized intake config.
    ValidateConfig {
        /// Path to the intake config JSON.
        config: PathBuf,

        /// Require every guardrail confirmation to be present and true.
        #[arg(long)]
        strict_guardrails: bool,
    },

    /// Render the run-plan preview for review before crawling.
    Plan {
        /// Path to the intake config JSON.
        config: PathBuf,

        /// URL list JSON: an array, {"urls": [...]}, or {"pages": [{"url": ...}]}.
        #[arg(long)]
        urls: Option<PathBuf>,

        /// Write the markdown here instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Canonicalize a capture manifest into a bundle.
    Run {
        /// Path to the capture manifest JSON.
        #[arg(short, long)]
        manifest: PathBuf,

        /// Run config or intake config JSON (defaults apply when omitted).
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Where to write the canonical bundle.
        #[arg(short, long, default_value = "canonical-bundle.json")]
        output: PathBuf,

        /// Override the manifest's source URL.
        #[arg(long)]
        source_url: Option<String>,
    },

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   tokenprint completions bash > ~/.local/share/bash-completion/completions/tokenprint
    ///   tokenprint completions zsh > ~/.zfunc/_tokenprint
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::ValidateConfig {
            config,
            strict_guardrails,
        } => {
            let report = validate_config_file(&config, strict_guardrails)?;
            for warning in &report.warnings {
                println!("WARN: {warning}");
            }
            for error in &report.errors {
                println!("ERROR: {error}");
            }
            println!("{}", report.summary());
            if !report.is_ok() {
                std::process::exit(EXIT_FAILURE);
            }
        }

        Commands::Plan { config, urls, output } => {
            let plan = render_plan_files(&config, urls.as_deref())?;
            match output {
                Some(path) => {
                    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(&path, plan)?;
                    println!("Wrote run plan: {}", path.display());
                }
                None => print!("{plan}"),
            }
        }

        Commands::Run {
            manifest,
            config,
            output,
            source_url,
        } => {
            let config = load_run_config(config.as_deref())?;
            let abort = AbortHandle::new();
            let on_interrupt = abort.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupted; finishing in-flight pages");
                    on_interrupt.abort("interrupted by user");
                }
            });

            let outcome = run_manifest(ManifestRun {
                manifest,
                config,
                output: output.clone(),
                source_url,
                abort: Some(abort),
            })
            .await?;

            let bundle = &outcome.bundle;
            println!("Bundle: {}", output.display());
            println!("  Entries: {} ({} canonical)", bundle.entries.len(), bundle.canonical_entries().count());
            println!("  Findings: {}", bundle.findings.len());
            println!("  Generation: {}", bundle.generation);
            if let Some(reason) = &bundle.abort_reason {
                eprintln!("Run aborted: {reason}; bundle is partial");
                std::process::exit(EXIT_ABORTED);
            }
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "tokenprint", &mut std::io::stdout());
        }
    }

    Ok(())
}
