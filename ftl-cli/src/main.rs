//! ftl: revision-based package deployment.
//!
//! # Usage
//!
//! ```bash
//! # Upload a new revision of package "web"
//! ftl --ftl-bucket /srv/bucket spool web.tar.gz
//!
//! # Point the remote current pointer at it
//! ftl jump --remote web.2024030703600ab
//!
//! # On each host: fetch, activate and prune
//! ftl --ftl-root /srv/ftl sync
//!
//! # Roll a host back
//! ftl jump-back web
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ftl_core::{
    DirectoryStore, FtlConfig, FtlError, LocalRepository, RemoteRepository, RevisionInfo,
    SyncReport, Syncer,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ftl")]
#[command(author = "FTL Contributors")]
#[command(version)]
#[command(about = "Revision-based package deployment")]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Local repository root
    #[arg(long, global = true, env = "FTL_ROOT")]
    ftl_root: Option<PathBuf>,

    /// Remote bucket: a directory path or file:// URL
    #[arg(long, global = true, env = "FTL_BUCKET")]
    ftl_bucket: Option<String>,

    /// Maximum concurrent downloads during sync
    #[arg(long, global = true, env = "FTL_DOWNLOAD_WORKERS")]
    download_workers: Option<usize>,

    /// Output verbosely
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Upload a file as a new revision; the package is the file's base name
    Spool {
        /// Artifact to upload, e.g. web.tar.gz
        file: PathBuf,
    },

    /// Make a revision current
    Jump {
        /// Revision name, <package>.<revision>
        revision: String,
        /// Move the remote pointer instead of the local one
        #[arg(long)]
        remote: bool,
    },

    /// Swap the current and previous revisions
    #[command(name = "jump-back")]
    JumpBack {
        /// Package name
        package: String,
        /// Operate on the remote pointers
        #[arg(long)]
        remote: bool,
    },

    /// List packages, or the revisions of one package
    List {
        /// Package name
        package: Option<String>,
        /// List the remote repository
        #[arg(long)]
        remote: bool,
    },

    /// Bring every local package in line with the remote repository
    Sync {
        /// Print the sync reports as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete a revision that is not current
    Purge {
        /// Revision name, <package>.<revision>
        revision: String,
        /// Purge from the remote repository
        #[arg(long)]
        remote: bool,
    },

    /// Prepare the local directory layout for a package
    Init {
        /// Package name
        package: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(exit_status(&e))
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "ftl=debug" } else { "ftl=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// The failing hook's exit status when a package script failed, 1 otherwise.
fn exit_status(err: &anyhow::Error) -> u8 {
    let code = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<FtlError>())
        .map(FtlError::exit_code)
        .unwrap_or(1);
    match u8::try_from(code) {
        Ok(0) | Err(_) => 1,
        Ok(code) => code,
    }
}

fn resolve_config(cli: &Cli) -> Result<FtlConfig> {
    let mut config = match &cli.config {
        Some(path) => FtlConfig::load(path)?,
        None => FtlConfig::default(),
    };
    if let Some(root) = &cli.ftl_root {
        config.root = Some(root.clone());
    }
    if let Some(bucket) = &cli.ftl_bucket {
        config.bucket = Some(bucket.clone());
    }
    if let Some(workers) = cli.download_workers {
        config.download_workers = workers;
    }
    Ok(config)
}

async fn open_remote(config: &FtlConfig) -> Result<RemoteRepository> {
    let path = config.bucket_path()?;
    let store = DirectoryStore::open(&path)
        .await
        .with_context(|| format!("Failed to open bucket {}", path.display()))?;
    Ok(RemoteRepository::new(Arc::new(store)))
}

fn open_local(config: &FtlConfig) -> Result<LocalRepository> {
    Ok(LocalRepository::new(config.root()?))
}

async fn run(cli: Cli) -> Result<()> {
    let config = resolve_config(&cli)?;
    tracing::debug!("Using {:?}", config);

    match cli.command {
        Commands::Spool { file } => cmd_spool(&config, file).await,

        Commands::Jump { revision, remote } => cmd_jump(&config, &revision, remote).await,

        Commands::JumpBack { package, remote } => cmd_jump_back(&config, &package, remote).await,

        Commands::List { package, remote } => cmd_list(&config, package, remote).await,

        Commands::Sync { json } => cmd_sync(&config, json).await,

        Commands::Purge { revision, remote } => cmd_purge(&config, &revision, remote).await,

        Commands::Init { package } => cmd_init(&config, &package),
    }
}

async fn cmd_spool(config: &FtlConfig, file: PathBuf) -> Result<()> {
    let remote = open_remote(config).await?;
    let revision = remote
        .spool(&file)
        .await
        .with_context(|| format!("Failed to spool {}", file.display()))?;
    println!("{}", revision.name());
    Ok(())
}

async fn cmd_jump(config: &FtlConfig, name: &str, remote: bool) -> Result<()> {
    let revision = RevisionInfo::parse(name)?;
    if remote {
        open_remote(config).await?.jump(&revision).await?;
    } else {
        open_local(config)?.jump(&revision)?;
    }
    Ok(())
}

async fn cmd_jump_back(config: &FtlConfig, package: &str, remote: bool) -> Result<()> {
    if remote {
        open_remote(config).await?.jump_back(package).await?;
    } else {
        open_local(config)?.jump_back(package)?;
    }
    Ok(())
}

async fn cmd_list(config: &FtlConfig, package: Option<String>, remote: bool) -> Result<()> {
    let (packages_or_revisions, active) = match (&package, remote) {
        (None, true) => (open_remote(config).await?.list_packages().await?, None),
        (None, false) => (open_local(config)?.list_packages()?, None),
        (Some(package), true) => {
            let repo = open_remote(config).await?;
            let mut revisions = repo.list_revisions(package).await?;
            revisions.sort();
            let active = repo.get_current_revision(package).await?;
            (names(revisions), active)
        }
        (Some(package), false) => {
            let repo = open_local(config)?;
            let active = repo.get_current_revision(package)?;
            (names(repo.list_revisions(package)?), active)
        }
    };

    let active = active.map(|rev| rev.name());
    for name in packages_or_revisions {
        if active.as_deref() == Some(name.as_str()) {
            println!("{}\t(active)", name);
        } else {
            println!("{}", name);
        }
    }
    Ok(())
}

fn names(revisions: Vec<RevisionInfo>) -> Vec<String> {
    revisions.iter().map(RevisionInfo::name).collect()
}

async fn cmd_sync(config: &FtlConfig, json: bool) -> Result<()> {
    let syncer = Syncer::new(
        open_remote(config).await?,
        open_local(config)?,
        config.download_workers(),
    );
    let outcome = syncer.sync_all().await.context("Sync failed")?;
    print_reports(&outcome.reports, json)?;
    for (package, e) in &outcome.failures {
        eprintln!("{}: {}", package, e);
    }
    outcome.into_result().context("Sync failed")?;
    Ok(())
}

fn print_reports(reports: &[SyncReport], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(reports)?);
        return Ok(());
    }
    for report in reports {
        println!(
            "{}: {} downloaded, {} purged{}",
            report.package,
            report.downloaded.len(),
            report.purged.len(),
            report
                .activated
                .as_ref()
                .map(|rev| format!(", now at {}", rev.revision))
                .unwrap_or_default()
        );
    }
    Ok(())
}

async fn cmd_purge(config: &FtlConfig, name: &str, remote: bool) -> Result<()> {
    let revision = RevisionInfo::parse(name)?;
    if remote {
        open_remote(config).await?.purge_revision(&revision).await?;
    } else {
        open_local(config)?.remove(&revision)?;
    }
    println!("Removed {}", revision.name());
    Ok(())
}

fn cmd_init(config: &FtlConfig, package: &str) -> Result<()> {
    open_local(config)?.check_package(package)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ftl_core::PackageScriptError;
    use tempfile::TempDir;

    #[test]
    fn test_parse_global_flags_after_command() {
        let cli = Cli::try_parse_from([
            "ftl",
            "jump",
            "web.2024030700042Ab",
            "--remote",
            "--ftl-bucket",
            "/srv/bucket",
        ])
        .unwrap();
        assert_eq!(cli.ftl_bucket.as_deref(), Some("/srv/bucket"));
        match cli.command {
            Commands::Jump { revision, remote } => {
                assert_eq!(revision, "web.2024030700042Ab");
                assert!(remote);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_jump_back() {
        let cli = Cli::try_parse_from(["ftl", "-v", "jump-back", "web"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::JumpBack { ref package, remote: false } if package == "web"));
    }

    #[test]
    fn test_flags_override_config_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("ftl.json");
        std::fs::write(
            &path,
            r#"{"root": "/from/file", "bucket": "/bucket/from/file", "download_workers": 8}"#,
        )
        .unwrap();

        let cli = Cli::try_parse_from([
            "ftl",
            "--config",
            path.to_str().unwrap(),
            "--ftl-root",
            "/from/flag",
            "sync",
        ])
        .unwrap();
        let config = resolve_config(&cli).unwrap();
        assert_eq!(config.root, Some(PathBuf::from("/from/flag")));
        assert_eq!(config.bucket.as_deref(), Some("/bucket/from/file"));
        assert_eq!(config.download_workers(), 8);
    }

    #[test]
    fn test_exit_status_from_hook() {
        let err = anyhow::Error::from(FtlError::from(PackageScriptError {
            exit_status: 3,
            hook_name: "pre-jump".into(),
            revision: "web.001".into(),
        }))
        .context("jump failed");
        assert_eq!(exit_status(&err), 3);
    }

    #[test]
    fn test_exit_status_from_failed_sync() {
        let hook = FtlError::from(PackageScriptError {
            exit_status: 5,
            hook_name: "pre-jump".into(),
            revision: "api.001".into(),
        });
        let err = anyhow::Error::from(FtlError::SyncFailed {
            failed: 1,
            total: 2,
            errors: vec![hook],
        })
        .context("Sync failed");
        assert_eq!(exit_status(&err), 5);
    }

    #[test]
    fn test_exit_status_defaults_to_one() {
        assert_eq!(exit_status(&anyhow::anyhow!("boom")), 1);
        let err = anyhow::Error::from(FtlError::NotFound("web.001".into()));
        assert_eq!(exit_status(&err), 1);

        let err = anyhow::Error::from(FtlError::from(PackageScriptError {
            exit_status: 256,
            hook_name: "post-jump".into(),
            revision: "web.001".into(),
        }));
        assert_eq!(exit_status(&err), 1);
    }
}
