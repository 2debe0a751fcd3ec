//! Warden CLI entry point.
//!
//! Secrets are read from stdin, one per line, so they never show up in
//! process listings or shell history.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::io::BufRead;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tokio::io::AsyncBufReadExt;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use warden::biometric::{BiometricGate, NoSensor};
use warden::config::{Config, RuntimePaths};
use warden::executor::{CommandExecutor, LogExecutor, ProcessExecutor};
use warden::gateway::RemoteCommandGateway;
use warden::keystore::SoftwareKeystore;
use warden::lockdown::{
    EntryKind, LockdownController, LockdownExecutor, LockdownState, PolicyCapability,
    SimulatedDevice, SurfaceCapability, SurfaceEvent,
};
use warden::store::{open_database, SqliteStore};
use warden::vault::CredentialVault;

/// Store namespace of the credential vault.
const CREDENTIAL_NAMESPACE: &str = "credential";

/// Store namespace of the lockdown snapshot.
const LOCKDOWN_NAMESPACE: &str = "lockdown";

/// Warden: device credential vault, remote command gateway and theft mode.
#[derive(Parser)]
#[command(name = "warden", version, about)]
struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Set, verify or change the device credential.
    Password {
        /// Password operation.
        #[command(subcommand)]
        action: PasswordAction,
    },
    /// Read inbound messages from stdin, one per line, and authorize them.
    Listen,
    /// Control theft mode.
    Lockdown {
        /// Lockdown operation.
        #[command(subcommand)]
        action: LockdownAction,
    },
    /// Unlock with the biometric sensor.
    Biometric,
}

/// Password subcommands.
#[derive(Subcommand)]
enum PasswordAction {
    /// Show whether the surface would offer "set" or "verify".
    Status,
    /// Set the first password (password and confirmation on stdin).
    Set,
    /// Verify a password read from stdin.
    Verify,
    /// Change the password (current, new and confirmation on stdin).
    Change,
}

/// Lockdown subcommands.
#[derive(Subcommand)]
enum LockdownAction {
    /// Enter theft mode.
    Enter {
        /// Package to pin. Defaults to the configured kiosk package.
        #[arg(long)]
        package: Option<String>,
    },
    /// Leave theft mode and restore the previous restrictions.
    Exit,
    /// Print the current lockdown state.
    Status,
    /// Re-apply a persisted lockdown after a restart.
    Resume,
    /// Deliver a surface lifecycle event to the watchdog.
    Event {
        /// Event to deliver.
        event: EventArg,
    },
}

/// Surface events accepted on the command line.
#[derive(Clone, Copy, ValueEnum)]
enum EventArg {
    /// Window focus lost.
    FocusLost,
    /// Surface paused while leaving its task.
    Leave,
    /// Surface paused as task root.
    Pause,
    /// Key pressed.
    KeyDown,
    /// Surface started.
    Started,
}

impl From<EventArg> for SurfaceEvent {
    fn from(arg: EventArg) -> Self {
        match arg {
            EventArg::FocusLost => Self::FocusLost,
            EventArg::Leave => Self::Paused { task_root: false },
            EventArg::Pause => Self::Paused { task_root: true },
            EventArg::KeyDown => Self::KeyDown,
            EventArg::Started => Self::Started,
        }
    }
}

/// Wired components shared by the subcommands.
struct App {
    config: Config,
    paths: RuntimePaths,
    vault: Arc<CredentialVault>,
    lockdown: Arc<LockdownController>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load().context("failed to load configuration")?;

    if !matches!(cli.command, Command::Listen) {
        warden::logging::init_cli(&config.logging.level);
    }

    let app = build_app(config).await?;
    match cli.command {
        Command::Password { action } => handle_password(&app, action).await,
        Command::Listen => handle_listen(&app).await,
        Command::Lockdown { action } => handle_lockdown(&app, action).await,
        Command::Biometric => handle_biometric(&app).await,
    }
}

/// Open the stores, key capability and device, and wire the components.
async fn build_app(config: Config) -> anyhow::Result<App> {
    let paths = config.runtime_paths()?;
    std::fs::create_dir_all(&paths.root)
        .with_context(|| format!("failed to create {}", paths.root.display()))?;

    let pool = open_database(&paths.database).await?;
    let keys = SoftwareKeystore::open(&paths.keys_dir)
        .with_context(|| format!("failed to open key store {}", paths.keys_dir.display()))?;
    let device = Arc::new(SimulatedDevice::open(&paths.device_state)?);
    let policy: Arc<dyn PolicyCapability> = device.clone();
    let surface: Arc<dyn SurfaceCapability> = device;

    let vault = Arc::new(CredentialVault::new(
        Arc::new(keys),
        Arc::new(SqliteStore::new(pool.clone(), CREDENTIAL_NAMESPACE)),
        config.vault.key_alias.clone(),
    ));
    let lockdown = Arc::new(
        LockdownController::open(
            policy,
            surface,
            Arc::new(SqliteStore::new(pool, LOCKDOWN_NAMESPACE)),
            config.lockdown.package.clone(),
        )
        .await
        .context("failed to load lockdown state")?,
    );

    debug!(root = %paths.root.display(), "warden components ready");
    Ok(App {
        config,
        paths,
        vault,
        lockdown,
    })
}

async fn handle_password(app: &App, action: PasswordAction) -> anyhow::Result<()> {
    let stdin = std::io::stdin();
    let mut lines = stdin.lock().lines();

    let result = match action {
        PasswordAction::Status => {
            let configured = app
                .vault
                .has_credential()
                .await
                .map_err(|e| anyhow::anyhow!(e.user_message()))?;
            println!("{}", if configured { "verify" } else { "set" });
            return Ok(());
        }
        PasswordAction::Set => {
            let password = read_secret(&mut lines, "Password")?;
            let confirmation = read_secret(&mut lines, "Confirm password")?;
            app.vault
                .set_credential(&password, &confirmation)
                .await
                .map(|()| "Password set")
        }
        PasswordAction::Verify => {
            let candidate = read_secret(&mut lines, "Password")?;
            match app.vault.verify_credential(&candidate).await {
                Ok(true) => Ok("Password verified"),
                Ok(false) => anyhow::bail!("Incorrect Password"),
                Err(e) => Err(e),
            }
        }
        PasswordAction::Change => {
            let current = read_secret(&mut lines, "Current password")?;
            let new_password = read_secret(&mut lines, "New password")?;
            let confirmation = read_secret(&mut lines, "Confirm new password")?;
            app.vault
                .change_credential(&current, &new_password, &confirmation)
                .await
                .map(|()| "Password changed")
        }
    };

    match result {
        Ok(message) => {
            println!("{message}");
            Ok(())
        }
        Err(e) => {
            warn!(error = %e, "password operation failed");
            anyhow::bail!(e.user_message())
        }
    }
}

/// Read one line from stdin as a secret, prompting on stderr.
fn read_secret(
    lines: &mut impl Iterator<Item = std::io::Result<String>>,
    label: &str,
) -> anyhow::Result<Zeroizing<String>> {
    eprint!("{label}: ");
    let line = lines
        .next()
        .with_context(|| format!("missing {} on stdin", label.to_lowercase()))?
        .context("failed to read stdin")?;
    Ok(Zeroizing::new(line))
}

async fn handle_listen(app: &App) -> anyhow::Result<()> {
    let _logging_guard =
        warden::logging::init_production(&app.paths.logs_dir, &app.config.logging.level)?;

    if let Err(e) = app.vault.ensure_key() {
        warn!(error = %e, "vault key unavailable, messages will be dropped");
    }
    match app.lockdown.resume().await {
        Ok(LockdownState::Active) => info!("persisted lockdown resumed"),
        Ok(LockdownState::Inactive) => {}
        Err(e) => warn!(error = %e, "failed to resume lockdown"),
    }

    let gateway_config = &app.config.gateway;
    let inner: Arc<dyn CommandExecutor> = match &gateway_config.executor_program {
        Some(program) => Arc::new(ProcessExecutor::new(
            program.clone(),
            gateway_config.executor_args.clone(),
            gateway_config.executor_timeout(),
        )),
        None => Arc::new(LogExecutor),
    };
    let executor = Arc::new(LockdownExecutor::new(Arc::clone(&app.lockdown), inner));
    let gateway = Arc::new(
        RemoteCommandGateway::new(Arc::clone(&app.vault), executor)
            .with_allowed_commands(gateway_config.allowed_commands.clone()),
    );

    info!(
        database = %app.paths.database.display(),
        allow_list = gateway_config.allowed_commands.is_some(),
        "warden listening on stdin"
    );

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let mut tasks = JoinSet::new();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read inbound message")? else {
                    break;
                };
                let message = Zeroizing::new(line);
                let gateway = Arc::clone(&gateway);
                tasks.spawn(async move {
                    gateway.handle(&message).await;
                });
            }
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = joined {
                    warn!(error = %e, "message task failed");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, stopping listener");
                break;
            }
        }
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            warn!(error = %e, "message task failed");
        }
    }
    info!("warden listener stopped");
    Ok(())
}

async fn handle_lockdown(app: &App, action: LockdownAction) -> anyhow::Result<()> {
    let controller = &app.lockdown;
    let outcome = match action {
        LockdownAction::Enter { package } => {
            let package = package.unwrap_or_else(|| app.config.lockdown.package.clone());
            controller
                .enter(&package)
                .await
                .map(|kind| match kind {
                    EntryKind::Engaged => format!("Theft mode engaged for {package}"),
                    EntryKind::Reasserted => "Theft mode already active".to_owned(),
                })
        }
        LockdownAction::Exit => controller
            .exit()
            .await
            .map(|_| "Theft mode released".to_owned()),
        LockdownAction::Status => controller.status().await.map(|status| {
            let state = match status.state {
                LockdownState::Active => "active",
                LockdownState::Inactive => "inactive",
            };
            let package = status.package.unwrap_or_default();
            let since = status.since.map(|t| t.to_rfc3339()).unwrap_or_default();
            format!(
                "state={state} pinned={} package={package} since={since}",
                status.pinned
            )
        }),
        LockdownAction::Resume => controller
            .resume()
            .await
            .map(|state| format!("{state:?}").to_lowercase()),
        LockdownAction::Event { event } => {
            Ok(format!("{:?}", controller.on_surface_event(event.into())))
        }
    };

    match outcome {
        Ok(message) => {
            println!("{message}");
            Ok(())
        }
        Err(e) => {
            warn!(error = %e, "lockdown operation failed");
            anyhow::bail!(e.user_message())
        }
    }
}

async fn handle_biometric(app: &App) -> anyhow::Result<()> {
    let gate = BiometricGate::new(
        Arc::new(NoSensor),
        Arc::clone(&app.vault),
        app.config.biometric.timeout(),
    );
    match gate.authenticate().await {
        Ok(()) => {
            println!("Password verified");
            Ok(())
        }
        Err(e) => {
            warn!(error = %e, "biometric unlock failed");
            anyhow::bail!(e.user_message())
        }
    }
}
