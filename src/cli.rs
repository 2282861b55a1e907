use anyhow::Result;
use clap::{Parser, Subcommand};
use extension_registry_core::blob::LocalFsSnapshotStore;
use extension_registry_core::clock::SystemClock;
use extension_registry_core::contract::{Clock, DocumentStore, VcsHost};
use extension_registry_core::github::GitHubClient;
use extension_registry_core::notify::{Notifier, NotifierHandle};
use extension_registry_core::release::ReleaseRef;
use extension_registry_core::scheduler::spawn_workers;
use extension_registry_core::stars::StarsCollector;
use extension_registry_core::store::{HttpDocumentStore, InMemoryDocumentStore};
use extension_registry_core::{
    backup, downloads, ownership, popularity, release, setup, synchronise, RegistryContext,
    RegistryError,
};
use std::path::PathBuf;
use std::sync::Arc;

use crate::load_config::{load_config, AppConfig, DocumentStoreConfig};

/// CLI for the extension registry: publish releases, run the synchroniser and background jobs.
#[derive(Parser)]
#[clap(
    name = "extension-registry",
    version,
    about = "Publish VCS-host releases into the extension registry and keep its public snapshot in sync"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the synchroniser, popularity, stars and backup jobs until Ctrl-C
    Serve {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
    },
    /// Publish one release, given as <org>/<repo>:refs/tags/<tag>
    Publish {
        #[clap(long)]
        config: PathBuf,
        #[clap(long, value_parser = parse_release_ref)]
        release_ref: ReleaseRef,
    },
    /// Show the processing state of a release
    Status {
        #[clap(long)]
        config: PathBuf,
        #[clap(long)]
        owner: String,
        #[clap(long)]
        repo: String,
        #[clap(long)]
        tag: String,
    },
    /// Sync pending extension documents into the registry snapshot once
    Sync {
        #[clap(long)]
        config: PathBuf,
    },
    /// Refresh download and star counters in the snapshot once
    RefreshPopularity {
        #[clap(long)]
        config: PathBuf,
    },
    /// Run one star collection pass
    CollectStars {
        #[clap(long)]
        config: PathBuf,
    },
    /// Count one download of a published extension version
    CountDownload {
        #[clap(long)]
        config: PathBuf,
        #[clap(long)]
        name: String,
        #[clap(long)]
        version: String,
    },
    /// Transfer an extension to another repository
    ChangeOwnership {
        #[clap(long)]
        config: PathBuf,
        #[clap(long)]
        name: String,
        #[clap(long)]
        new_owner: String,
        #[clap(long)]
        new_repo: String,
    },
    /// Copy the published artifacts into today's archive folder
    Backup {
        #[clap(long)]
        config: PathBuf,
    },
    /// Create the stage's tables and unique indexes, then reload missing extensions from registry.json
    SetupStack {
        #[clap(long)]
        config: PathBuf,
    },
}

impl Commands {
    fn config_path(&self) -> &PathBuf {
        match self {
            Commands::Serve { config }
            | Commands::Publish { config, .. }
            | Commands::Status { config, .. }
            | Commands::Sync { config }
            | Commands::RefreshPopularity { config }
            | Commands::CollectStars { config }
            | Commands::CountDownload { config, .. }
            | Commands::ChangeOwnership { config, .. }
            | Commands::Backup { config }
            | Commands::SetupStack { config } => config,
        }
    }
}

pub fn parse_release_ref(input: &str) -> std::result::Result<ReleaseRef, String> {
    ReleaseRef::parse(input).map_err(|e| e.public_message().to_string())
}

/// Builds every client from the merged config. The notifier dispatcher runs until all contexts
/// are dropped.
pub fn build_context(config: &AppConfig) -> Result<(RegistryContext, NotifierHandle)> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let github = GitHubClient::new(config.github.clone(), clock.clone())
        .map_err(|e| anyhow::anyhow!("Failed to build GitHub client: {e}"))?;
    let vcs: Arc<dyn VcsHost> = Arc::new(github);
    let docs: Arc<dyn DocumentStore> = match &config.document_store {
        DocumentStoreConfig::Http { endpoint, auth_key } => {
            Arc::new(HttpDocumentStore::new(endpoint.as_str(), auth_key.as_str()))
        }
        DocumentStoreConfig::InMemory => Arc::new(InMemoryDocumentStore::for_registry(&config.registry)),
    };
    let snapshots = Arc::new(LocalFsSnapshotStore::new(config.snapshot_root.clone()));
    let (notifier, handle) = Notifier::spawn(vcs.clone());
    let ctx = RegistryContext::new(
        docs,
        snapshots,
        vcs,
        clock,
        config.registry.clone(),
        notifier,
    );
    Ok((ctx, handle))
}

/// Prints the caller-facing message with its status and turns it into the CLI error.
fn failure(operation: &str, e: RegistryError) -> anyhow::Error {
    let status = e.kind().status_code();
    eprintln!("[ERROR] {operation} failed ({status}): {}", e.public_message());
    anyhow::anyhow!("{operation} failed with status {status}: {}", e.public_message())
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    // Emit a top-level 'trace_initialised' event at the very start
    tracing::info!("trace_initialised");

    let config = load_config(cli.command.config_path())?;
    let (ctx, notifier) = build_context(&config)?;

    let result = execute(cli.command, &ctx, &config).await;

    // Queued issue comments are delivered before the process exits.
    drop(ctx);
    notifier.close().await;
    result
}

async fn execute(command: Commands, ctx: &RegistryContext, config: &AppConfig) -> Result<()> {
    match command {
        Commands::Serve { .. } => {
            let workers = spawn_workers(ctx.clone(), &config.schedule);
            println!("Registry workers running ({} jobs). Press Ctrl-C to stop.", workers.len());
            tokio::signal::ctrl_c().await?;
            tracing::info!("Shutdown requested");
            workers.shutdown().await;
            Ok(())
        }
        Commands::Publish { release_ref, .. } => {
            let outcome = release::publish_release(ctx, &release_ref)
                .await
                .map_err(|e| failure("Publish", e))?;
            println!(
                "Published {}@{}{}",
                outcome.extension_name,
                outcome.version,
                if outcome.created { " (new extension)" } else { "" }
            );
            Ok(())
        }
        Commands::Status {
            owner, repo, tag, ..
        } => {
            let record = release::release_status(ctx, &owner, &repo, &tag)
                .await
                .map_err(|e| failure("Status", e))?;
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(())
        }
        Commands::Sync { .. } => {
            println!("Synchronise starting...");
            let report = synchronise::synchronise(ctx)
                .await
                .map_err(|e| failure("Synchronise", e))?;
            println!("Synchronise complete.\nReport:");
            println!("{:#?}", report);
            Ok(())
        }
        Commands::RefreshPopularity { .. } => {
            let report = popularity::refresh_popularity(ctx)
                .await
                .map_err(|e| failure("Popularity refresh", e))?;
            println!("{:#?}", report);
            Ok(())
        }
        Commands::CollectStars { .. } => {
            let mut collector = StarsCollector::new(ctx.clone());
            let report = collector
                .run()
                .await
                .map_err(|e| failure("Star collection", e))?;
            println!("{:#?}", report);
            Ok(())
        }
        Commands::CountDownload { name, version, .. } => {
            downloads::count_download(ctx, &name, &version)
                .await
                .map_err(|e| failure("Count download", e))?;
            println!("Done");
            Ok(())
        }
        Commands::ChangeOwnership {
            name,
            new_owner,
            new_repo,
            ..
        } => {
            let change = ownership::change_ownership(ctx, &name, &new_owner, &new_repo)
                .await
                .map_err(|e| failure("Change ownership", e))?;
            println!("Old entry:\n{}", serde_json::to_string_pretty(&change.old_entry)?);
            println!("New entry:\n{}", serde_json::to_string_pretty(&change.new_entry)?);
            Ok(())
        }
        Commands::Backup { .. } => {
            let written = backup::backup_registry(ctx)
                .await
                .map_err(|e| failure("Backup", e))?;
            for path in written {
                println!("{path}");
            }
            Ok(())
        }
        Commands::SetupStack { .. } => {
            let report = setup::setup_stack(ctx)
                .await
                .map_err(|e| failure("Setup stack", e))?;
            println!("{:#?}", report);
            Ok(())
        }
    }
}
