//! Command-line surface: argument parsing and the agent commands

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use account_access::{AccessController, SystemBrowser, UserInfo};
use account_license::EntitlementStatus;
use anyhow::{Context, Result, bail};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Sign in through the system browser
    Login,
    /// Revoke the stored token and forget the account
    Logout,
    /// Print the stored account without network access
    Status,
    /// Check the stored entitlement; fails when it is not valid
    Verify,
    /// Keep the session fresh until interrupted
    Watch,
}

impl FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "login" => Ok(Self::Login),
            "logout" => Ok(Self::Logout),
            "status" => Ok(Self::Status),
            "verify" => Ok(Self::Verify),
            "watch" => Ok(Self::Watch),
            other => bail!(
                "unknown command {other:?}, expected one of: login, logout, status, verify, watch"
            ),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct Args {
    pub command: Command,
    pub config_path: Option<String>,
}

impl Args {
    /// `account-agent [--config <path>] [command]`, defaulting to `status`.
    pub fn parse(args: &[String]) -> Result<Self> {
        let mut command = None;
        let mut config_path = None;
        let mut rest = args.iter().skip(1);
        while let Some(arg) = rest.next() {
            if arg == "--config" {
                let path = rest.next().context("--config needs a path")?;
                config_path = Some(path.clone());
            } else if command.is_none() {
                command = Some(arg.parse()?);
            } else {
                bail!("unexpected argument {arg:?}");
            }
        }
        Ok(Self {
            command: command.unwrap_or(Command::Status),
            config_path,
        })
    }
}

fn describe(status: &EntitlementStatus) -> String {
    match status {
        EntitlementStatus::Supported => "active".into(),
        EntitlementStatus::Unsupported => "none".into(),
        EntitlementStatus::Expired => "expired".into(),
        EntitlementStatus::Rejected(reason) => format!("invalid ({reason})"),
    }
}

/// What `status` prints.
#[derive(Debug)]
pub struct StatusReport {
    pub authorized: bool,
    pub user: UserInfo,
    pub entitlement: EntitlementStatus,
    pub enterprise: bool,
}

impl StatusReport {
    pub async fn collect(controller: &AccessController) -> Self {
        Self {
            authorized: controller.is_user_authorized(),
            user: controller.user_info(),
            entitlement: controller.check_stored_entitlement().await,
            enterprise: controller.is_enterprise(),
        }
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.authorized {
            let user = &self.user;
            let name = format!("{} {}", user.first_name, user.last_name);
            let name = name.trim();
            let shown = if name.is_empty() { user.user_id.as_str() } else { name };
            write!(f, "account: {shown}")?;
            if !user.email.is_empty() {
                write!(f, " <{}>", user.email)?;
            }
            if !name.is_empty() {
                write!(f, " ({})", user.user_id)?;
            }
        } else {
            write!(f, "account: not signed in")?;
        }
        write!(f, "\nsupport: {}", describe(&self.entitlement))?;
        if self.enterprise {
            write!(f, "\nlicense: enterprise")?;
        }
        Ok(())
    }
}

pub async fn run(
    command: Command,
    controller: &Arc<AccessController>,
    config: &Config,
) -> Result<()> {
    match command {
        Command::Login => login(controller).await,
        Command::Logout => {
            controller.load_session().await?;
            controller.logout().await.context("sign out failed")?;
            println!("signed out");
            Ok(())
        }
        Command::Status => {
            controller.load_session().await?;
            println!("{}", StatusReport::collect(controller).await);
            Ok(())
        }
        Command::Verify => verify(controller).await,
        Command::Watch => watch(controller, config).await,
    }
}

async fn login(controller: &Arc<AccessController>) -> Result<()> {
    let api = controller.config().api_endpoint.clone();
    controller.check_endpoint_reachability(&api).await;
    let tasks = controller
        .login(&SystemBrowser)
        .await
        .context("sign in failed")?;
    tasks.join().await;
    println!("{}", StatusReport::collect(controller).await);
    Ok(())
}

async fn verify(controller: &Arc<AccessController>) -> Result<()> {
    controller.load_session().await?;
    match controller.check_stored_entitlement().await {
        EntitlementStatus::Supported => {
            println!("support: active");
            Ok(())
        }
        other => bail!("support is not active: {}", describe(&other)),
    }
}

async fn watch(controller: &Arc<AccessController>, config: &Config) -> Result<()> {
    let mut events = controller.subscribe();
    let probe = controller.spawn_reachability_probe(config.probe_interval());
    if controller.restore().await?.is_none() {
        info!("no stored account, run `account-agent login` to sign in");
    }

    let mut refresh = tokio::time::interval(config.refresh_interval());
    // The first tick completes immediately and restore already refreshed.
    refresh.tick().await;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = refresh.tick() => {
                if controller.is_user_authorized() || controller.is_enterprise() {
                    controller.refresh_all();
                }
            }
            event = events.recv() => match event {
                Ok(event) => info!(
                    ?event,
                    authorized = controller.is_user_authorized(),
                    supported = controller.is_user_supported(),
                    endpoint_available = controller.endpoint_available(),
                    "account state changed"
                ),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "missed account events"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    probe.abort();
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
