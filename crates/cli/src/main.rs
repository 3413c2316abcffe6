//! droidci - Android device automation for test and CI pipelines

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tabled::{Table, Tabled};
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use droidci_core::application::{AdbToolchain, DeviceOps, DeviceRegistry};
use droidci_core::domain::Device;
use droidci_core::port::time_provider::SystemTimeProvider;
use droidci_core::port::{ProcessSupervisor, TimeProvider};
use droidci_core::AppError;
use droidci_infra_process::TokioProcessSupervisor;

/// Environment variable identifying the Android SDK installation root
const SDK_ROOT_ENV: &str = "ANDROID_HOME";

#[derive(Parser)]
#[command(name = "droidci")]
#[command(about = "Android device automation for CI pipelines", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Device serial; defaults to the sole online device
    #[arg(short, long, global = true)]
    serial: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// List connected devices with their model names
    Devices {
        /// Emit the snapshot as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check whether a package is installed on the device
    Installed {
        /// Package name, e.g. com.example.app
        package: String,
    },

    /// Install an APK, aborting the run if the device rejects it
    Install {
        /// Path to the APK on the host
        apk: PathBuf,

        /// Install timeout in seconds
        #[arg(long, default_value = "120")]
        timeout_secs: u64,
    },

    /// Pull a device directory to the host
    Pull {
        /// Directory on the device
        remote: String,

        /// Destination directory on the host
        local: PathBuf,

        /// Timeout in seconds per pull attempt
        #[arg(long, default_value = "60")]
        timeout_secs: u64,

        /// Do not log pull failures
        #[arg(long)]
        quiet_errors: bool,
    },

    /// Stream the device log into a file until interrupted
    Logcat {
        /// Destination file
        #[arg(long, default_value = "logcat.txt")]
        output: PathBuf,
    },
}

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "SERIAL")]
    serial: String,
    #[tabled(rename = "STATE")]
    state: String,
    #[tabled(rename = "MODEL")]
    model: String,
}

impl From<&Device> for DeviceRow {
    fn from(device: &Device) -> Self {
        let state = if device.online {
            "device".green().to_string()
        } else {
            "offline".red().to_string()
        };
        Self {
            serial: device.id.clone(),
            state,
            model: device.model.clone(),
        }
    }
}

fn init_logging() {
    let log_format = std::env::var("DROIDCI_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("droidci=info,droidci_core=info,droidci_infra_process=info"))
        .expect("Failed to create env filter");

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty())
                .init();
        }
    }
}

/// Resolve the adb toolchain from the SDK root environment variable.
/// Absence is a fatal startup error - nothing works without the tool.
fn resolve_toolchain() -> Result<AdbToolchain> {
    let root = std::env::var(SDK_ROOT_ENV).with_context(|| {
        format!("{SDK_ROOT_ENV} is not set; it must point at the Android SDK root")
    })?;
    let root = shellexpand::tilde(&root).into_owned();
    Ok(AdbToolchain::from_sdk_root(root))
}

/// Pick the target serial: the explicit flag, or the sole online device
async fn select_serial(registry: &DeviceRegistry, requested: Option<String>) -> Result<String> {
    if let Some(serial) = requested {
        return Ok(serial);
    }

    let devices = registry.discover().await?;
    let mut online = devices.into_iter().filter(|d| d.online);
    match (online.next(), online.next()) {
        (Some(device), None) => {
            info!(serial = %device.id, "Using the sole online device");
            Ok(device.id)
        }
        (None, _) => anyhow::bail!("no online device connected; pass --serial"),
        (Some(_), Some(_)) => anyhow::bail!("multiple online devices connected; pass --serial"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();

    // DI wiring: one toolchain, one supervisor, shared by every component
    let toolchain = Arc::new(resolve_toolchain()?);
    let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let supervisor: Arc<dyn ProcessSupervisor> =
        Arc::new(TokioProcessSupervisor::new(time_provider.clone()));
    let registry = DeviceRegistry::new(toolchain.clone(), supervisor.clone());

    match cli.command {
        Commands::Devices { json } => {
            let devices = registry.discover().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&devices)?);
            } else if devices.is_empty() {
                println!("{}", "No devices attached".yellow());
            } else {
                let rows: Vec<DeviceRow> = devices.iter().map(DeviceRow::from).collect();
                println!("{}", Table::new(rows));
            }
        }

        Commands::Installed { package } => {
            let serial = select_serial(&registry, cli.serial).await?;
            let ops = DeviceOps::new(serial, toolchain, supervisor, time_provider);
            if ops.is_app_installed(&package).await? {
                println!("{} {}", package, "installed".green());
            } else {
                println!("{} {}", package, "not installed".red());
                std::process::exit(1);
            }
        }

        Commands::Install { apk, timeout_secs } => {
            let serial = select_serial(&registry, cli.serial).await?;
            let ops = DeviceOps::new(serial, toolchain, supervisor, time_provider);
            match ops
                .install_apk_with_timeout(&apk, Duration::from_secs(timeout_secs))
                .await
            {
                Ok(()) => println!("{}", "Install succeeded".green()),
                Err(err @ AppError::InstallFailed { .. }) => {
                    // Install failure is fatal for the whole run by policy
                    error!(error = %err, "Aborting run");
                    std::process::exit(1);
                }
                Err(err) => return Err(err.into()),
            }
        }

        Commands::Pull {
            remote,
            local,
            timeout_secs,
            quiet_errors,
        } => {
            let serial = select_serial(&registry, cli.serial).await?;
            let ops = DeviceOps::new(serial, toolchain, supervisor, time_provider);
            let pulled = ops
                .pull_folder_with_timeout(
                    &remote,
                    &local,
                    !quiet_errors,
                    Duration::from_secs(timeout_secs),
                )
                .await;
            if pulled {
                println!("{}", "Pull succeeded".green());
            } else {
                println!("{}", "Pull failed".red());
                std::process::exit(1);
            }
        }

        Commands::Logcat { output } => {
            let serial = select_serial(&registry, cli.serial).await?;
            let ops = DeviceOps::new(serial, toolchain, supervisor, time_provider);
            let mut lease = ops.redirect_logcat_to_file(&output).await?;
            println!(
                "Streaming logcat to {} (Ctrl-C to stop)",
                output.display()
            );

            // Interruption is the expected way to stop an indefinite stream
            tokio::signal::ctrl_c().await?;
            info!("Shutdown signal received, stopping logcat");
            lease.terminate().await?;
        }
    }

    Ok(())
}
