//! `stackflow launcher`: bring the worker stack up and down against
//! in-memory stack and certificate backends.

use async_trait::async_trait;
use colored::Colorize;
use stackflow_cloud::{
    CertificateStore, CloudError, LauncherRegistry, Page, ServerCertificate, StackControl,
    WorkerLauncher,
};
use stackflow_config::EngineConfig;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Template the worker stack is created from
pub const WORKER_TEMPLATE: &str = r#"{
  "Parameters": {
    "CERTARN": { "Type": "String" },
    "ImageId": { "Type": "String" }
  },
  "Resources": {}
}"#;

/// Certificates returned per list page
const CERTIFICATE_PAGE_SIZE: usize = 2;

const ACCOUNT_ID: &str = "000000000000";

pub struct LauncherOptions {
    pub existing_certificates: usize,
    pub keep: bool,
}

pub async fn handle(config: &EngineConfig, options: LauncherOptions) -> anyhow::Result<()> {
    let settings = super::launcher_settings(config);
    let certificates = SimulatedCertificates::default();
    for n in 0..options.existing_certificates {
        certificates.insert(&format!("unrelated-{}", n), &settings.certificate_path);
    }

    tracing::info!(
        launcher = %settings.launcher_id,
        stack = %settings.stack_name,
        max_pages = settings.max_pages,
        "Running worker launcher"
    );
    let launcher = WorkerLauncher::new(
        LauncherRegistry::new(),
        settings,
        SimulatedStacks::default(),
        certificates,
    );
    let stack_name = launcher.settings().stack_name.clone();

    println!("{}", format!("Enabling worker stack {}...", stack_name).blue());
    launcher.enable().await?;
    println!(
        "{} worker enabled: {}",
        "✓".green(),
        launcher.is_worker_enabled().await
    );

    if options.keep {
        return Ok(());
    }

    println!();
    println!("{}", format!("Disabling worker stack {}...", stack_name).blue());
    launcher.disable().await?;
    println!(
        "{} worker enabled: {}",
        "✓".green(),
        launcher.is_worker_enabled().await
    );
    Ok(())
}

/// Stacks by name, with the parameters they were created with
#[derive(Debug, Default)]
struct SimulatedStacks {
    stacks: Mutex<HashMap<String, Vec<(String, String)>>>,
}

impl SimulatedStacks {
    fn stacks(&self) -> MutexGuard<'_, HashMap<String, Vec<(String, String)>>> {
        self.stacks.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl StackControl for SimulatedStacks {
    async fn stack_exists(&self, stack_name: &str) -> stackflow_cloud::Result<bool> {
        Ok(self.stacks().contains_key(stack_name))
    }

    async fn create_stack(
        &self,
        stack_name: &str,
        _template: &str,
        parameters: &[(String, String)],
    ) -> stackflow_cloud::Result<()> {
        for (key, value) in parameters {
            tracing::debug!("Stack {} parameter {}={}", stack_name, key, value);
        }
        self.stacks()
            .insert(stack_name.to_string(), parameters.to_vec());
        Ok(())
    }

    async fn delete_stack(&self, stack_name: &str) -> stackflow_cloud::Result<()> {
        self.stacks().remove(stack_name);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct SimulatedCertificates {
    certificates: Mutex<Vec<ServerCertificate>>,
}

impl SimulatedCertificates {
    fn certificates(&self) -> MutexGuard<'_, Vec<ServerCertificate>> {
        self.certificates.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn insert(&self, name: &str, path: &str) -> ServerCertificate {
        let certificate = ServerCertificate {
            name: name.to_string(),
            path: path.to_string(),
            arn: format!(
                "arn:aws:iam::{}:server-certificate{}/{}",
                ACCOUNT_ID,
                path.trim_end_matches('/'),
                name
            ),
        };
        self.certificates().push(certificate.clone());
        certificate
    }
}

#[async_trait]
impl CertificateStore for SimulatedCertificates {
    async fn list_certificates(
        &self,
        path_prefix: &str,
        marker: Option<String>,
    ) -> stackflow_cloud::Result<Page<ServerCertificate>> {
        let start = match marker {
            Some(marker) => marker
                .parse::<usize>()
                .map_err(|_| CloudError::Transport(format!("Invalid marker '{}'", marker)))?,
            None => 0,
        };
        let matching: Vec<ServerCertificate> = self
            .certificates()
            .iter()
            .filter(|c| c.path.starts_with(path_prefix))
            .cloned()
            .collect();

        let end = (start + CERTIFICATE_PAGE_SIZE).min(matching.len());
        let items = matching.get(start..end).map(<[_]>::to_vec).unwrap_or_default();
        if end < matching.len() {
            Ok(Page::truncated(items, end.to_string()))
        } else {
            Ok(Page::last(items))
        }
    }

    async fn upload_certificate(
        &self,
        name: &str,
        path: &str,
    ) -> stackflow_cloud::Result<ServerCertificate> {
        tracing::debug!("Uploading certificate {} under {}", name, path);
        Ok(self.insert(name, path))
    }

    async fn delete_certificate(&self, name: &str) -> stackflow_cloud::Result<()> {
        self.certificates().retain(|c| c.name != name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_certificates_page_by_marker() {
        let certificates = SimulatedCertificates::default();
        for name in ["a", "b", "c"] {
            certificates.insert(name, "/internal");
        }
        certificates.insert("elsewhere", "/other");

        let first = certificates.list_certificates("/internal", None).await.unwrap();
        assert_eq!(first.items.len(), 2);
        assert!(first.is_truncated);

        let second = certificates
            .list_certificates("/internal", first.marker)
            .await
            .unwrap();
        assert_eq!(second.items.len(), 1);
        assert_eq!(second.items[0].name, "c");
        assert!(!second.is_truncated);
    }

    #[test]
    fn test_settings_follow_config() {
        let mut config = EngineConfig::default();
        config.pagination.max_pages = 3;
        config.launcher.image = Some("emi-1".to_string());

        let settings = super::super::launcher_settings(&config);
        assert_eq!(settings.max_pages, 3);
        assert_eq!(settings.image.as_deref(), Some("emi-1"));
        assert_eq!(settings.stack_name, config.launcher.stack_name);
        assert_eq!(settings.template, WORKER_TEMPLATE);
    }
}
