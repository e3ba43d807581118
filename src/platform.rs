//! OS collaborators: permission prompt, position fixes, device identity,
//! dialer and user notices. Termux:API commands are used when present.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::io::Write;
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::oneshot;

use crate::error::PlatformError;
use crate::model::GeoSample;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accuracy {
    Balanced,
    High,
}

#[async_trait]
pub trait PermissionPrompt: Send + Sync {
    async fn request_foreground_location(&self) -> PermissionStatus;
}

#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn current_position(&self, accuracy: Accuracy) -> Result<GeoSample, PlatformError>;
}

#[async_trait]
pub trait DeviceIdentity: Send + Sync {
    /// Platform-specific unique identifier, `None` when it cannot be determined
    async fn device_id(&self) -> Option<String>;
    fn device_name(&self) -> Option<String>;
}

#[async_trait]
pub trait Dialer: Send + Sync {
    async fn open_url(&self, url: &str) -> Result<(), PlatformError>;
}

/// Blocking, modal-style user notice.
pub trait Notifier: Send + Sync {
    fn alert(&self, title: &str, message: &str);
}

/// Bundle of OS collaborators handed to the client operations.
#[derive(Clone)]
pub struct Platform {
    pub permission: Arc<dyn PermissionPrompt>,
    pub location: Arc<dyn LocationProvider>,
    pub identity: Arc<dyn DeviceIdentity>,
    pub dialer: Arc<dyn Dialer>,
    pub notifier: Arc<dyn Notifier>,
}

/// Asks on the terminal, like the OS permission sheet would.
pub struct TerminalPermission {
    assume_yes: bool,
}

impl TerminalPermission {
    pub fn new(assume_yes: bool) -> Self {
        Self { assume_yes }
    }
}

#[async_trait]
impl PermissionPrompt for TerminalPermission {
    async fn request_foreground_location(&self) -> PermissionStatus {
        if self.assume_yes {
            return PermissionStatus::Granted;
        }

        let answer = read_answer(|| {
            eprint!("Allow SenseSafe to access this device's location? [y/N] ");
            let _ = std::io::stderr().flush();
            let mut line = String::new();
            std::io::stdin().read_line(&mut line).map(|_| line)
        })
        .await;

        match answer {
            Some(line) if is_affirmative(&line) => PermissionStatus::Granted,
            _ => PermissionStatus::Denied,
        }
    }
}

/// Run a blocking read on a detached thread. An unanswered prompt must not
/// hold up runtime shutdown, so the thread is never joined.
async fn read_answer<F>(read_line: F) -> Option<String>
where
    F: FnOnce() -> std::io::Result<String> + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    std::thread::spawn(move || {
        let _ = tx.send(read_line());
    });
    rx.await.ok()?.ok()
}

fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Reads fixes from `termux-location`.
pub struct TermuxLocation;

#[async_trait]
impl LocationProvider for TermuxLocation {
    async fn current_position(&self, accuracy: Accuracy) -> Result<GeoSample, PlatformError> {
        let provider = match accuracy {
            Accuracy::High => "gps",
            Accuracy::Balanced => "network",
        };

        let output = Command::new("termux-location")
            .args(["-p", provider, "-r", "once"])
            .output()
            .await
            .map_err(|_| PlatformError::Unavailable("termux-location".to_string()))?;

        if !output.status.success() {
            return Err(PlatformError::CommandFailed(format!(
                "termux-location exited with {}",
                output.status
            )));
        }

        parse_termux_location(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Always reports the same configured position.
pub struct FixedLocation {
    pub latitude: f64,
    pub longitude: f64,
}

#[async_trait]
impl LocationProvider for FixedLocation {
    async fn current_position(&self, _accuracy: Accuracy) -> Result<GeoSample, PlatformError> {
        Ok(GeoSample {
            latitude: self.latitude,
            longitude: self.longitude,
            timestamp: Some(Utc::now().to_rfc3339()),
        })
    }
}

#[derive(Deserialize)]
struct TermuxFix {
    latitude: f64,
    longitude: f64,
}

/// Parse the JSON printed by `termux-location`
/// (`{"latitude": .., "longitude": .., "accuracy": .., "provider": "gps", ..}`).
pub fn parse_termux_location(output: &str) -> Result<GeoSample, PlatformError> {
    let fix: TermuxFix = serde_json::from_str(output.trim()).map_err(|e| PlatformError::Parse {
        what: "termux-location output",
        detail: e.to_string(),
    })?;

    Ok(GeoSample {
        latitude: fix.latitude,
        longitude: fix.longitude,
        timestamp: Some(Utc::now().to_rfc3339()),
    })
}

/// Android id through `settings`, falling back to the machine id on Linux.
pub struct SystemIdentity;

#[async_trait]
impl DeviceIdentity for SystemIdentity {
    async fn device_id(&self) -> Option<String> {
        if let Ok(output) = Command::new("settings")
            .args(["get", "secure", "android_id"])
            .output()
            .await
        {
            if output.status.success() {
                if let Some(id) = clean_identifier(&String::from_utf8_lossy(&output.stdout)) {
                    return Some(id);
                }
            }
        }

        for path in ["/etc/machine-id", "/var/lib/dbus/machine-id"] {
            if let Ok(text) = tokio::fs::read_to_string(path).await {
                if let Some(id) = clean_identifier(&text) {
                    return Some(id);
                }
            }
        }

        None
    }

    fn device_name(&self) -> Option<String> {
        std::env::var("HOSTNAME")
            .ok()
            .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
            .and_then(|name| clean_identifier(&name))
    }
}

fn clean_identifier(raw: &str) -> Option<String> {
    let id = raw.trim();
    if id.is_empty() || id == "null" {
        None
    } else {
        Some(id.to_string())
    }
}

/// Launches `tel:` URLs with `termux-telephony-call`, anything else with `xdg-open`.
pub struct CommandDialer;

#[async_trait]
impl Dialer for CommandDialer {
    async fn open_url(&self, url: &str) -> Result<(), PlatformError> {
        let mut command = match url.strip_prefix("tel:") {
            Some(number) => {
                let mut command = Command::new("termux-telephony-call");
                command.arg(number);
                command
            }
            None => {
                let mut command = Command::new("xdg-open");
                command.arg(url);
                command
            }
        };

        let status = command
            .status()
            .await
            .map_err(|e| PlatformError::Unavailable(format!("dialer ({e})")))?;
        if status.success() {
            Ok(())
        } else {
            Err(PlatformError::CommandFailed(format!("dialer exited with {status}")))
        }
    }
}

/// Prints notices to stderr.
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn alert(&self, title: &str, message: &str) {
        eprintln!("[{title}] {message}");
    }
}
