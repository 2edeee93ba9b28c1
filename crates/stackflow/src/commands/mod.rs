pub mod config;
pub mod launcher;
pub mod simulate;
pub mod steps;

use stackflow_cloud::{LauncherSettings, RetryConfig};
use stackflow_config::EngineConfig;
use stackflow_ec2::VolumeTimeouts;

pub fn volume_timeouts(config: &EngineConfig) -> VolumeTimeouts {
    VolumeTimeouts {
        available: config.volume.available_timeout(),
        snapshot_complete: config.volume.snapshot_complete_timeout(),
        deleted: config.volume.deleted_timeout(),
    }
}

pub fn retry_config(config: &EngineConfig) -> RetryConfig {
    RetryConfig {
        initial_delay: config.retry.initial_delay(),
        max_delay: config.retry.max_delay(),
        backoff_multiplier: config.retry.multiplier,
    }
}

pub fn launcher_settings(config: &EngineConfig) -> LauncherSettings {
    let launcher = &config.launcher;
    LauncherSettings {
        launcher_id: launcher.launcher_id.clone(),
        stack_name: launcher.stack_name.clone(),
        certificate_name: launcher.certificate_name.clone(),
        certificate_path: launcher.certificate_path.clone(),
        image: launcher.image.clone(),
        template: launcher::WORKER_TEMPLATE.to_string(),
        parameters: Vec::new(),
        max_pages: config.pagination.max_pages,
    }
}
