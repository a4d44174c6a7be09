//! # aas-policyd
//!
//! Watches an `aas.policy.txt` file and keeps the effective policy current.
//!
//! On start the policy is resolved through the FILE → LKG → DEFAULT cascade
//! and an `INIT ...` line is printed. Every change to the file then prints
//! one of `ACCEPTED`, `REJECTED`, `UNCHANGED` or `KEPT` on stdout. Logs go
//! to stderr. Ctrl+C stops the loop cleanly.
//!
//! ## Usage
//!
//! ```text
//! aas-policyd --project-root . --out ./--out
//! aas-policyd --once            # resolve, write dumps, print summary, exit
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use aas_policy::report::summary_line;
use aas_policy::{PolicyEffectiveResolver, PolicyReconciler, PolicyWatchRunner, WatchConfig};

/// Policy hot-reload daemon.
#[derive(Parser)]
#[command(name = "aas-policyd", about = "Watch and apply agent automation policy")]
struct Cli {
    /// Project root directory (defaults to current directory).
    #[arg(long, default_value = ".")]
    project_root: PathBuf,

    /// Policy file (defaults to <project-root>/aas.policy.txt).
    #[arg(long)]
    file: Option<PathBuf>,

    /// Output root for system/ and policy/history/ (defaults to the project root).
    #[arg(long)]
    out: Option<PathBuf>,

    /// TOML watch configuration. Flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Quiet window in milliseconds before a change is evaluated.
    #[arg(long)]
    debounce_ms: Option<u64>,

    /// Resolve once, write the effective dumps and exit.
    #[arg(long)]
    once: bool,
}

impl Cli {
    fn watch_config(&self) -> Result<WatchConfig> {
        let mut config = match &self.config {
            Some(path) => WatchConfig::load(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => WatchConfig::for_project(&self.project_root),
        };
        if let Some(file) = &self.file {
            config.policy_path = file.clone();
        }
        if let Some(out) = &self.out {
            config.out_root = out.clone();
        }
        if let Some(ms) = self.debounce_ms {
            config.debounce_ms = ms;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Status lines own stdout; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("aas_policy=info".parse()?)
                .add_directive("aas_policyd=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let cli = Cli::parse();
    let config = cli.watch_config()?;
    let resolver =
        PolicyEffectiveResolver::with_builtin_default().context("built-in default policy")?;

    tracing::info!("Policy file: {}", config.policy_path.display());
    tracing::info!("Output root: {}", config.out_root.display());

    if cli.once {
        let reconciler = PolicyReconciler::initialize(config, resolver)?;
        println!("{}", summary_line(&reconciler.handle().current()));
        return Ok(());
    }

    let (runner, control) = PolicyWatchRunner::new(config, resolver)?;
    println!("{}", runner.init_line());

    let mut worker = tokio::task::spawn_blocking(move || {
        runner.run(|outcome| println!("{}", outcome))
    });

    // The loop only exits on its own when the watcher fails to start.
    let interrupted = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("listening for Ctrl+C")?;
            true
        }
        finished = &mut worker => {
            finished??;
            false
        }
    };
    if interrupted {
        tracing::info!("Shutdown requested");
        control.stop();
        worker.await??;
    }

    tracing::info!("Policy watch exited");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn flags_override_project_defaults() {
        let cli = Cli::try_parse_from([
            "aas-policyd",
            "--project-root",
            "/proj",
            "--out",
            "/proj/--out",
            "--debounce-ms",
            "250",
        ])
        .unwrap();
        let config = cli.watch_config().unwrap();
        assert_eq!(config.policy_path, Path::new("/proj/aas.policy.txt"));
        assert_eq!(config.out_root, Path::new("/proj/--out"));
        assert_eq!(config.debounce_ms, 250);
        assert!(!cli.once);
    }

    #[test]
    fn explicit_file_wins() {
        let cli = Cli::try_parse_from(["aas-policyd", "--file", "/etc/aas/policy.txt", "--once"])
            .unwrap();
        let config = cli.watch_config().unwrap();
        assert_eq!(config.policy_path, Path::new("/etc/aas/policy.txt"));
        assert_eq!(config.out_root, Path::new("."));
        assert!(cli.once);
    }
}
