//! Preflight checks before any device or backend side effect

use std::path::PathBuf;

use serde::Serialize;
use tracing::{info, warn};

use crate::errors::{DeviceControlError, PreflightError};
use crate::lease::jmp::{ClientIdentity, DeviceControl};

/// Preflight options
#[derive(Debug, Clone)]
pub struct PreflightOptions {
    /// Exporter that must be visible to the client
    pub exporter: Option<String>,

    /// Fail when `exporter` is not listed
    pub fail_on_missing_exporter: bool,

    /// Only check the tool is present
    pub skip_exporter_query: bool,

    /// Exporter configuration directory, reported but not required
    pub exporters_dir: Option<PathBuf>,

    pub identity: ClientIdentity,
}

impl Default for PreflightOptions {
    fn default() -> Self {
        Self {
            exporter: None,
            fail_on_missing_exporter: true,
            skip_exporter_query: false,
            exporters_dir: Some(PathBuf::from("/etc/jumpstarter/exporters")),
            identity: ClientIdentity::Default,
        }
    }
}

/// What preflight found
#[derive(Debug, Clone, Default, Serialize)]
pub struct PreflightReport {
    pub tool_version: String,
    pub exporters: Vec<String>,
    pub exporter: Option<String>,
    pub exporter_present: Option<bool>,
    pub exporters_dir: Option<PathBuf>,
    pub exporters_dir_exists: Option<bool>,
}

fn missing_client_context(err: &DeviceControlError) -> bool {
    match err {
        DeviceControlError::Failed { message, .. } => {
            let lowered = message.to_lowercase();
            lowered.contains("none of --client") || lowered.contains("default config is not set")
        }
        _ => false,
    }
}

/// Check the device-control tool and, optionally, the exporter inventory
pub async fn preflight(
    control: &dyn DeviceControl,
    options: &PreflightOptions,
) -> Result<PreflightReport, PreflightError> {
    let mut report = PreflightReport {
        exporter: options.exporter.clone(),
        exporters_dir: options.exporters_dir.clone(),
        ..Default::default()
    };

    if let Some(dir) = &options.exporters_dir {
        let exists = tokio::fs::metadata(dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        report.exporters_dir_exists = Some(exists);
    }

    report.tool_version = control
        .version()
        .await
        .map_err(PreflightError::ToolUnavailable)?;
    info!("Device control tool version: {}", report.tool_version);

    if options.skip_exporter_query {
        if options.exporter.is_some() && options.fail_on_missing_exporter {
            return Err(PreflightError::InvalidPlan(
                "cannot validate the exporter when the exporter query is skipped".to_string(),
            ));
        }
        return Ok(report);
    }

    let exporters = control
        .list_exporters(&options.identity)
        .await
        .map_err(|e| {
            if missing_client_context(&e) {
                warn!("No client context configured; set a client config or client name");
            }
            PreflightError::ExporterQuery(e)
        })?;
    report.exporters = exporters;

    if let Some(exporter) = &options.exporter {
        let present = report.exporters.iter().any(|e| e == exporter);
        report.exporter_present = Some(present);
        if !present && options.fail_on_missing_exporter {
            return Err(PreflightError::ExporterMissing {
                exporter: exporter.clone(),
                available: report.exporters.clone(),
            });
        }
    }

    Ok(report)
}
