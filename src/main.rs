use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use stoat_porter::clone::Cloner;
use stoat_porter::config;
use stoat_porter::migrate::{AssumeYes, ConfirmGate, Migrator, OperatorPrompt};
use stoat_porter::relay::AttachmentRelay;
use stoat_porter::report::TracingSink;
use stoat_porter::source::{ChatSource, DiscordSource};
use stoat_porter::stoat::StoatClient;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Replicate the source server's roles and channel hierarchy
    Clone {
        #[arg(long)]
        dry_run: bool,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Migrate the configured channel's message history
    Migrate {
        #[arg(long)]
        dry_run: bool,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Print a starter configuration file
    ExampleConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();

    if matches!(args.command, Command::ExampleConfig) {
        print!("{}", config::example());
        return Ok(());
    }

    let mut cfg = config::load(Some(&args.config))?;

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing current step then stopping");
            signal_cancel.cancel();
        }
    });

    match args.command {
        Command::Clone { dry_run, yes } => {
            cfg.migration.dry_run |= dry_run;
            run_clone(&cfg, yes).await?;
        }
        Command::Migrate { dry_run, yes } => {
            cfg.migration.dry_run |= dry_run;
            run_migrate(&cfg, yes, cancel).await?;
        }
        Command::ExampleConfig => unreachable!(),
    }

    Ok(())
}

async fn run_clone(cfg: &config::Config, yes: bool) -> Result<()> {
    let source = DiscordSource::new(&cfg.discord.token);
    let bot = source.connect().await?;
    info!(bot = %bot, "starting structure clone");

    let structure = source.fetch_structure(&cfg.discord.source_server_id).await;
    let structure = match structure {
        Ok(structure) => structure,
        Err(err) => {
            source.close().await;
            return Err(err);
        }
    };

    let summary = format!(
        "Clone '{}' ({} roles, {} channels) to destination server {}{}",
        structure.server_name,
        structure.roles.len(),
        structure.channels.len(),
        cfg.stoat.target_server_id,
        if cfg.migration.dry_run { " (dry run)" } else { "" }
    );
    let gate: Box<dyn ConfirmGate> = if yes {
        Box::new(AssumeYes)
    } else {
        Box::new(OperatorPrompt)
    };
    if !gate.confirm(&summary).await? {
        info!("cloning cancelled by operator");
        source.close().await;
        return Ok(());
    }

    let client = StoatClient::new(&cfg.stoat, &cfg.migration);
    let sink = TracingSink;
    let cloner = Cloner::new(&client, &sink, &cfg.stoat.target_server_id, cfg.migration.dry_run);
    let result = cloner.run(&structure).await;
    source.close().await;

    let mapping = result?;
    info!(
        roles = mapping.roles.len(),
        channels = mapping.channels.len(),
        "structure clone finished"
    );
    Ok(())
}

async fn run_migrate(cfg: &config::Config, yes: bool, cancel: CancellationToken) -> Result<()> {
    let source = DiscordSource::new(&cfg.discord.token);
    let client = StoatClient::new(&cfg.stoat, &cfg.migration);
    let relay = AttachmentRelay::new(client.clone(), &cfg.migration);
    let sink = TracingSink;
    let gate: Arc<dyn ConfirmGate> = if yes {
        Arc::new(AssumeYes)
    } else {
        Arc::new(OperatorPrompt)
    };

    let migrator = Migrator::new(
        &client,
        &relay,
        &sink,
        &cfg.migration,
        &cfg.stoat.target_channel_id,
        cancel,
    );
    let stats = migrator
        .run(&source, &cfg.discord.source_channel_id, gate.as_ref())
        .await?;

    info!(
        total = stats.total,
        succeeded = stats.succeeded,
        failed = stats.failed,
        "migration finished"
    );
    Ok(())
}
