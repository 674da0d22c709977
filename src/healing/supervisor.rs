//! External restart supervisor

use async_trait::async_trait;
use tracing::debug;

use crate::error::SupervisorError;
use crate::types::ServiceDescriptor;

/// Issues the restart for a service's opaque `restart_command`.
///
/// Implementations report [`SupervisorError::Unreachable`] only when the
/// restart could not be issued at all; the orchestrator escalates those at
/// once instead of retrying.
#[async_trait]
pub trait Supervisor: Send + Sync {
    async fn restart(&self, descriptor: &ServiceDescriptor) -> Result<(), SupervisorError>;
}

/// Dispatches restart handles by shape:
/// - `http://` / `https://` URLs are POSTed with the descriptor as JSON
/// - anything else runs through `sh -c`, with `PLANE_SERVICE_ID` set
pub struct ProcessSupervisor {
    client: reqwest::Client,
}

impl ProcessSupervisor {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    async fn post_webhook(&self, url: &str, descriptor: &ServiceDescriptor) -> Result<(), SupervisorError> {
        let resp = self
            .client
            .post(url)
            .json(descriptor)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_builder() {
                    SupervisorError::Unreachable(e.to_string())
                } else {
                    SupervisorError::CommandFailed(e.to_string())
                }
            })?;

        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(SupervisorError::CommandFailed(format!("supervisor answered HTTP {status}")))
        }
    }

    async fn run_shell(&self, command: &str, descriptor: &ServiceDescriptor) -> Result<(), SupervisorError> {
        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .env("PLANE_SERVICE_ID", &descriptor.id)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| SupervisorError::Unreachable(format!("cannot spawn shell: {e}")))?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(SupervisorError::CommandFailed(format!(
                "{} {}",
                output.status,
                stderr.trim()
            ).trim_end().to_string()))
        }
    }
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Supervisor for ProcessSupervisor {
    async fn restart(&self, descriptor: &ServiceDescriptor) -> Result<(), SupervisorError> {
        let command = descriptor.restart_command.trim();
        if command.is_empty() {
            return Err(SupervisorError::Unreachable(format!(
                "no restart command configured for {}",
                descriptor.id
            )));
        }

        debug!(service = %descriptor.id, command, "Invoking supervisor");
        if command.starts_with("http://") || command.starts_with("https://") {
            self.post_webhook(command, descriptor).await
        } else {
            self.run_shell(command, descriptor).await
        }
    }
}
