use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use labelsync_core::platform;
use labelsync_core::wallet::{lock_wallet, share};
use labelsync_core::{
    derive_key_material, LabelWallet, SharedWallet, SqliteWallet, SyncConfig, SyncScheduler,
    WalletHandle,
};
use std::path::{Path, PathBuf};
use tokio::runtime::Handle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Label sync CLI - keep wallet labels in step across devices
#[derive(Parser)]
#[command(name = "labelsync")]
#[command(about = "Encrypted wallet label sync", long_about = None)]
struct Cli {
    /// Path to the sync configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to the wallet store
    #[arg(short, long)]
    wallet: Option<PathBuf>,

    /// Label service as host:port, overriding the config file
    #[arg(long)]
    server: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a wallet store for the given master public keys
    Init {
        /// Master public key (repeat for multisig wallets)
        #[arg(long = "mpk", required = true)]
        master_public_keys: Vec<String>,
    },

    /// Set a label and push it to the label service
    SetLabel {
        /// Address or transaction id
        key: String,

        /// Label text
        value: String,
    },

    /// List local labels
    List,

    /// Fetch labels changed since the last sync
    Pull,

    /// Upload every local label
    Upload,

    /// Re-download every label, overwriting local ones
    Download,

    /// Print the wallet id used by the label service
    WalletId,
}

/// A wallet store registered with the scheduler for one command
struct Session {
    scheduler: SyncScheduler,
    handle: WalletHandle,
    wallet: SharedWallet,
}

impl Session {
    fn open(store: SqliteWallet, config: &SyncConfig) -> Result<Self> {
        let scheduler = SyncScheduler::from_config(config, Handle::current())?;
        let handle = WalletHandle::next();
        let wallet = share(store);

        scheduler
            .register(handle, wallet.clone())
            .context("cannot enable label sync; run `labelsync init` first")?;

        Ok(Self {
            scheduler,
            handle,
            wallet,
        })
    }

    fn close(self) -> Result<()> {
        self.scheduler.on_wallet_closed(self.handle);
        lock_wallet(&self.wallet, "close")?.flush()?;
        Ok(())
    }
}

fn load_config(cli: &Cli) -> Result<SyncConfig> {
    if let Some(server) = &cli.server {
        return Ok(SyncConfig::from_target(server)?);
    }
    let path = cli
        .config
        .clone()
        .unwrap_or_else(platform::get_default_config_path);
    Ok(SyncConfig::load_or_default(&path)?)
}

fn wallet_path(cli: &Cli) -> Result<PathBuf> {
    match &cli.wallet {
        Some(path) => Ok(path.clone()),
        None => {
            platform::ensure_data_dir().context("cannot create data directory")?;
            Ok(platform::get_default_wallet_path())
        }
    }
}

fn open_store(path: &Path) -> Result<SqliteWallet> {
    SqliteWallet::open(path)
        .with_context(|| format!("cannot open wallet store {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();
    let path = wallet_path(&cli)?;

    match &cli.command {
        Commands::Init { master_public_keys } => {
            let mut store = open_store(&path)?;
            store.set_master_public_keys(master_public_keys)?;
            let material = derive_key_material(master_public_keys)?;
            info!("Initialized wallet store at {}", path.display());
            println!("Wallet id: {}", material.wallet_id());
        }
        Commands::List => {
            let store = open_store(&path)?;
            for (key, value) in store.labels() {
                println!("{}\t{}", key, value);
            }
        }
        Commands::WalletId => {
            let store = open_store(&path)?;
            let material = derive_key_material(store.master_public_keys())?;
            println!("{}", material.wallet_id());
        }
        Commands::Pull => {
            let session = Session::open(open_store(&path)?, &load_config(&cli)?)?;
            let result = session.scheduler.pull(session.handle).await;
            let count = lock_wallet(&session.wallet, "pull")?.labels().len();
            session.close()?;
            match result {
                Ok(outcome) => println!(
                    "{} labels received, wallet now has {} labels",
                    outcome.applied, count
                ),
                Err(e) => bail!("Error retrieving labels: {}", e),
            }
        }
        Commands::SetLabel { key, value } => {
            let mut store = open_store(&path)?;
            store.set_label(key, value)?;

            let session = Session::open(store, &load_config(&cli)?)?;
            if let Err(e) = session.scheduler.pull(session.handle).await {
                warn!("could not retrieve labels before pushing: {}", e);
            }
            if let Some(push) = session.scheduler.on_label_set(session.handle, key, value) {
                push.await?;
            }
            session.close()?;
            println!("Label set for {}", key);
        }
        Commands::Upload => {
            let session = Session::open(open_store(&path)?, &load_config(&cli)?)?;
            let result = session.scheduler.force_upload(session.handle).await;
            session.close()?;
            match result {
                Ok(count) => println!("{} labels uploaded", count),
                Err(e) => bail!("Error uploading labels: {}", e),
            }
        }
        Commands::Download => {
            let session = Session::open(open_store(&path)?, &load_config(&cli)?)?;
            let result = session.scheduler.force_download(session.handle).await;
            session.close()?;
            match result {
                Ok(outcome) => println!("{} labels downloaded", outcome.applied),
                Err(e) => bail!("Error downloading labels: {}", e),
            }
        }
    }

    Ok(())
}
