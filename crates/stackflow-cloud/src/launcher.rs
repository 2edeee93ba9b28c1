//! Worker launcher and its transition registry
//!
//! A [`WorkerLauncher`] brings a worker stack up or down. Transitions for a
//! launcher id are serialized through a [`LauncherRegistry`]; the
//! [`LauncherGuard`] it hands out releases the id on drop, so early returns,
//! errors, and cancelled tasks all leave the registry clean.

use crate::error::{LauncherError, Result};
use crate::pagination::{Page, find_in_pages};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Transition a launcher is going through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LauncherState {
    Enabling,
    Disabling,
}

impl std::fmt::Display for LauncherState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LauncherState::Enabling => write!(f, "enabling"),
            LauncherState::Disabling => write!(f, "disabling"),
        }
    }
}

/// In-flight launcher transitions, keyed by launcher id
#[derive(Debug, Clone, Default)]
pub struct LauncherRegistry {
    states: Arc<Mutex<HashMap<String, LauncherState>>>,
}

impl LauncherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn states(&self) -> MutexGuard<'_, HashMap<String, LauncherState>> {
        // The map is always left consistent, so a poisoned lock is still usable.
        self.states.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claim `launcher_id` for a transition
    pub fn try_acquire(
        &self,
        launcher_id: &str,
        state: LauncherState,
    ) -> std::result::Result<LauncherGuard, LauncherError> {
        let mut states = self.states();
        if let Some(current) = states.get(launcher_id) {
            tracing::warn!("Launcher {} is already {}", launcher_id, current);
            return Err(LauncherError::Busy(launcher_id.to_string()));
        }
        states.insert(launcher_id.to_string(), state);
        tracing::debug!("Launcher {} {}", launcher_id, state);

        Ok(LauncherGuard {
            registry: self.clone(),
            launcher_id: launcher_id.to_string(),
        })
    }

    pub fn is_locked(&self, launcher_id: &str) -> bool {
        self.states().contains_key(launcher_id)
    }

    pub fn state(&self, launcher_id: &str) -> Option<LauncherState> {
        self.states().get(launcher_id).copied()
    }
}

/// Scoped claim on a launcher id
#[derive(Debug)]
pub struct LauncherGuard {
    registry: LauncherRegistry,
    launcher_id: String,
}

impl LauncherGuard {
    pub fn launcher_id(&self) -> &str {
        &self.launcher_id
    }
}

impl Drop for LauncherGuard {
    fn drop(&mut self) {
        self.registry.states().remove(&self.launcher_id);
        tracing::debug!("Released launcher {}", self.launcher_id);
    }
}

/// Server certificate metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerCertificate {
    pub name: String,
    pub path: String,
    pub arn: String,
}

/// Stack operations the launcher needs
#[async_trait]
pub trait StackControl: Send + Sync {
    async fn stack_exists(&self, stack_name: &str) -> Result<bool>;

    async fn create_stack(
        &self,
        stack_name: &str,
        template: &str,
        parameters: &[(String, String)],
    ) -> Result<()>;

    async fn delete_stack(&self, stack_name: &str) -> Result<()>;
}

/// Server certificate operations the launcher needs
#[async_trait]
pub trait CertificateStore: Send + Sync {
    /// One page of certificates under `path_prefix`
    async fn list_certificates(
        &self,
        path_prefix: &str,
        marker: Option<String>,
    ) -> Result<Page<ServerCertificate>>;

    /// Generate a key pair and upload a certificate for it
    async fn upload_certificate(&self, name: &str, path: &str) -> Result<ServerCertificate>;

    async fn delete_certificate(&self, name: &str) -> Result<()>;
}

/// Launcher settings
#[derive(Debug, Clone)]
pub struct LauncherSettings {
    pub launcher_id: String,
    pub stack_name: String,
    pub certificate_name: String,
    pub certificate_path: String,
    pub image: Option<String>,
    pub template: String,
    pub parameters: Vec<(String, String)>,
    pub max_pages: usize,
}

/// Brings the worker stack up and down
pub struct WorkerLauncher<S, C> {
    registry: LauncherRegistry,
    settings: LauncherSettings,
    stacks: S,
    certificates: C,
}

impl<S: StackControl, C: CertificateStore> WorkerLauncher<S, C> {
    pub fn new(registry: LauncherRegistry, settings: LauncherSettings, stacks: S, certificates: C) -> Self {
        Self {
            registry,
            settings,
            stacks,
            certificates,
        }
    }

    pub fn settings(&self) -> &LauncherSettings {
        &self.settings
    }

    /// Whether the worker stack is up and no transition is running
    pub async fn is_worker_enabled(&self) -> bool {
        !self.registry.is_locked(&self.settings.launcher_id) && self.stack_exists().await
    }

    /// Create the worker stack, uploading its certificate first if needed
    pub async fn enable(&self) -> std::result::Result<(), LauncherError> {
        let _guard = self
            .registry
            .try_acquire(&self.settings.launcher_id, LauncherState::Enabling)?;

        if self.stack_exists().await {
            return Err(LauncherError::AlreadyEnabled(self.settings.stack_name.clone()));
        }

        let image = self
            .settings
            .image
            .clone()
            .ok_or(LauncherError::ImageNotConfigured)?;

        let certificate = self.ensure_certificate().await?;

        let mut parameters = self.settings.parameters.clone();
        parameters.push(("CERTARN".to_string(), certificate.arn));
        parameters.push(("ImageId".to_string(), image));

        tracing::info!("Creating worker stack {}", self.settings.stack_name);
        self.stacks
            .create_stack(&self.settings.stack_name, &self.settings.template, &parameters)
            .await?;
        Ok(())
    }

    /// Delete the worker stack and its certificate
    pub async fn disable(&self) -> std::result::Result<(), LauncherError> {
        let _guard = match self
            .registry
            .try_acquire(&self.settings.launcher_id, LauncherState::Disabling)
        {
            Ok(guard) => guard,
            Err(_) => {
                tracing::warn!("Previous worker transition is still in progress");
                return Ok(());
            }
        };

        if !self.stack_exists().await {
            tracing::warn!("Worker stack {} not found", self.settings.stack_name);
            return Ok(());
        }

        tracing::info!("Deleting worker stack {}", self.settings.stack_name);
        self.stacks.delete_stack(&self.settings.stack_name).await?;
        self.certificates
            .delete_certificate(&self.settings.certificate_name)
            .await?;
        Ok(())
    }

    async fn stack_exists(&self) -> bool {
        match self.stacks.stack_exists(&self.settings.stack_name).await {
            Ok(exists) => exists,
            Err(e) => {
                tracing::warn!("Could not describe stack {}: {}", self.settings.stack_name, e);
                false
            }
        }
    }

    async fn ensure_certificate(&self) -> Result<ServerCertificate> {
        let name = &self.settings.certificate_name;
        let path = &self.settings.certificate_path;

        let existing = find_in_pages(
            self.settings.max_pages,
            |marker| self.certificates.list_certificates(path, marker),
            |cert| cert.name == *name,
        )
        .await?;

        if let Some(cert) = existing {
            tracing::debug!("Certificate {} already exists", name);
            return Ok(cert);
        }

        let cert = self.certificates.upload_certificate(name, path).await?;
        tracing::debug!("Uploaded certificate {}", cert.name);
        Ok(cert)
    }
}
