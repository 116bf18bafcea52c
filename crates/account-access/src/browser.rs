//! Opening the authorization URL in the user's browser

use tokio::process::Command;
use tracing::debug;
use transport::BoxFuture;

use crate::error::{Error, Result};

/// Opens a URL for the user to interact with.
pub trait BrowserLauncher: Send + Sync {
    fn open<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<()>>;
}

/// Hands the URL to the platform opener (`open`, `xdg-open`, `url.dll`).
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBrowser;

/// Program and leading arguments of the opener for `os`.
///
/// Windows bypasses `cmd /C start`, which would split the query at `&`.
fn opener(os: &str) -> (&'static str, &'static [&'static str]) {
    match os {
        "macos" => ("open", &[]),
        "windows" => ("rundll32", &["url.dll,FileProtocolHandler"]),
        _ => ("xdg-open", &[]),
    }
}

impl SystemBrowser {
    fn command_for(os: &str, url: &str) -> Command {
        let (program, args) = opener(os);
        let mut command = Command::new(program);
        command.args(args).arg(url);
        command
    }

    fn command(url: &str) -> Command {
        Self::command_for(std::env::consts::OS, url)
    }
}

impl BrowserLauncher for SystemBrowser {
    fn open<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            debug!("launching system browser");
            let status = Self::command(url)
                .stdin(std::process::Stdio::null())
                .stdout(std::process::Stdio::null())
                .stderr(std::process::Stdio::null())
                .status()
                .await
                .map_err(|e| Error::Browser(e.to_string()))?;
            if !status.success() {
                return Err(Error::Browser(format!("opener exited with {status}")));
            }
            Ok(())
        })
    }
}
