//! Archipelago control CLI
//!
//! Starts and stops the storage peers, reports their status and manages
//! volumes. `archipelago status` exits with the health code (0 when fully
//! stopped).

use anyhow::{Context, Result};
use archip_common::{Config, DEFAULT_CONFIG_PATH, Role};
use archip_control::{Controller, Scope, SystemStatus};
use archip_peer::{PidfileProcessManager, ProcessManager};
use archip_vlmc::{BlockDriver, CreateOptions, ExclusiveLock, TapCtl, Vlmc, VolumeMapper};
use archip_xseg::{SocketTransport, Transport};
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "archipelago")]
#[command(about = "Archipelago control CLI")]
#[command(version)]
struct Args {
    /// Configuration file
    #[arg(short, long, env = "ARCHIPELAGO_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the peers
    Start(ScopeArgs),
    /// Stop the peers
    Stop(ScopeArgs),
    /// Show peer, module and mapping status; exit code is the health code
    Status {
        /// Print the status as JSON
        #[arg(long)]
        json: bool,
    },
    /// Stop, then start the peers
    Restart(ScopeArgs),
    /// Volume operations
    Vlmc {
        #[command(subcommand)]
        action: VlmcCommands,
    },
}

#[derive(ClapArgs, Debug)]
struct ScopeArgs {
    /// Leave the block driver alone; pause/resume mapped devices instead
    #[arg(short, long, conflicts_with = "role")]
    user: bool,

    /// Apply to a single peer
    #[arg(short, long)]
    role: Option<Role>,
}

impl ScopeArgs {
    fn scope(&self) -> Scope {
        match (self.role, self.user) {
            (Some(role), _) => Scope::Role(role),
            (None, true) => Scope::User,
            (None, false) => Scope::System,
        }
    }
}

#[derive(Subcommand, Debug)]
enum VlmcCommands {
    /// Create a volume
    Create {
        name: String,
        /// Size in MiB
        #[arg(short, long)]
        size: Option<u64>,
        /// Snapshot to clone from
        #[arg(long)]
        snap: Option<String>,
        /// Create a content-addressed volume
        #[arg(long)]
        cont_addr: bool,
    },
    /// Snapshot a volume
    Snapshot {
        name: String,
        /// Snapshot name
        #[arg(long)]
        snap_name: Option<String>,
    },
    /// Print the content-addressed name of a volume
    Hash { name: String },
    /// Remove a volume
    #[command(alias = "rm")]
    Remove { name: String },
    /// Print the size of a volume
    Info { name: String },
    /// Open a volume
    Open { name: String },
    /// Close a volume
    Close { name: String },
    /// Lock a volume
    Lock { name: String },
    /// Unlock a volume
    Unlock {
        name: String,
        /// Release the lock even if held by someone else
        #[arg(short, long)]
        force: bool,
    },
    /// Resize a volume
    Resize {
        name: String,
        /// New size in MiB
        size: u64,
    },
    /// Map a volume to a block device
    Map { name: String },
    /// Unmap a block device (path or minor)
    Unmap { device: String },
    /// List mapped volumes
    #[command(alias = "showmapped")]
    Mapped,
}

fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() && path == Path::new(DEFAULT_CONFIG_PATH) {
        warn!("{} not found, using built-in defaults", path.display());
        return Ok(Config::default());
    }
    Config::load(path).with_context(|| format!("loading {}", path.display()))
}

fn print_status(status: &SystemStatus) {
    for peer in &status.peers {
        println!("{:<12} {}", peer.role.to_string(), peer.state);
    }
    let module = if status.module_loaded {
        "loaded"
    } else {
        "not loaded"
    };
    println!("{:<12} {module}", "blktap");
    println!();
    print_mapped(&status.mapped);
}

fn print_mapped(mapped: &[archip_vlmc::MappedVolume]) {
    if mapped.is_empty() {
        println!("No volumes mapped");
        return;
    }
    let width = mapped
        .iter()
        .filter_map(|m| m.volume.as_deref().map(str::len))
        .max()
        .unwrap_or(0)
        .max("image".len());
    println!(
        "{:<10} {:<width$} {:<30} {:<8} {:<5}",
        "id", "image", "device", "state", "PID"
    );
    for m in mapped {
        let pid = m.pid.map(|pid| pid.to_string()).unwrap_or_default();
        println!(
            "{:<10} {:<width$} {:<30} {:<8} {:<5}",
            m.minor,
            m.volume.as_deref().unwrap_or("-"),
            m.device,
            m.state.to_string(),
            pid
        );
    }
}

async fn run_vlmc(vlmc: &Vlmc, action: VlmcCommands) -> Result<()> {
    match action {
        VlmcCommands::Create {
            name,
            size,
            snap,
            cont_addr,
        } => {
            let options = CreateOptions {
                size_mib: size,
                snapshot: snap,
                cont_addr,
            };
            vlmc.create(&name, options).await?;
        }
        VlmcCommands::Snapshot { name, snap_name } => {
            vlmc.snapshot(&name, snap_name.as_deref()).await?;
            if let Some(snap_name) = snap_name {
                println!("Snapshot name: {snap_name}");
            }
        }
        VlmcCommands::Hash { name } => {
            let hash = vlmc.hash(&name).await?;
            println!("Hash name: {hash}");
        }
        VlmcCommands::Remove { name } => vlmc.remove(&name).await?,
        VlmcCommands::Info { name } => {
            let size = vlmc.info(&name).await?;
            println!("Volume {name}: size: {size}");
        }
        VlmcCommands::Open { name } => {
            vlmc.open(&name).await?;
            println!("Volume opened");
        }
        VlmcCommands::Close { name } => {
            vlmc.close(&name).await?;
            println!("Volume closed");
        }
        VlmcCommands::Lock { name } => {
            vlmc.lock(&name).await?;
            println!("Volume locked");
        }
        VlmcCommands::Unlock { name, force } => {
            vlmc.unlock(&name, force).await?;
            println!("Volume unlocked");
        }
        VlmcCommands::Resize { name, size } => vlmc.resize(&name, size).await?,
        VlmcCommands::Map { name } => {
            let minor = vlmc.map(&name)?;
            println!("{}", vlmc.mapper().device_path(minor));
        }
        VlmcCommands::Unmap { device } => vlmc.unmap(&device)?,
        VlmcCommands::Mapped => print_mapped(&vlmc.mapper().list_mapped()?),
    }
    Ok(())
}

fn controller(
    config: &Arc<Config>,
    transport: Arc<dyn Transport>,
    mapper: VolumeMapper,
) -> Controller {
    let processes: Arc<dyn ProcessManager> = Arc::new(PidfileProcessManager::new());
    Controller::new(Arc::clone(config), processes, transport, mapper)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Arc::new(load_config(&args.config)?);

    let transport: Arc<dyn Transport> = Arc::new(SocketTransport::new(
        config.segment.clone(),
        &config.channel,
    ));
    let driver: Arc<dyn BlockDriver> = Arc::new(TapCtl::new(config.blktap.clone()));
    let mapper = VolumeMapper::new(
        driver,
        ExclusiveLock::new(&config.paths.lock_file),
        &config.blktap,
    );

    match args.command {
        Commands::Vlmc { action } => {
            let vlmc = Vlmc::new(Arc::clone(&config), transport, mapper);
            run_vlmc(&vlmc, action).await?;
        }
        Commands::Start(scope) => {
            controller(&config, transport, mapper)
                .start(scope.scope())
                .await?;
        }
        Commands::Stop(scope) => {
            controller(&config, transport, mapper)
                .stop(scope.scope())
                .await?;
        }
        Commands::Restart(scope) => {
            let scope = scope.scope();
            info!("restarting {scope}");
            controller(&config, transport, mapper).restart(scope).await?;
        }
        Commands::Status { json } => {
            let status = controller(&config, transport, mapper).report()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print_status(&status);
            }
            let code = u8::try_from(status.code()).unwrap_or(u8::MAX);
            return Ok(ExitCode::from(code));
        }
    }

    Ok(ExitCode::SUCCESS)
}
