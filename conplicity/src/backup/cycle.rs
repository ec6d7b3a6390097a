//! One backup cycle: every target volume in turn, then a metrics batch.

use chrono::Utc;
use tracing::{error, info, warn};

use crate::backup::supervisor::{BackupCommand, RunResult, Supervisor};
use crate::config::RunConfiguration;
use crate::error::Result;
use crate::metrics::MetricBatch;
use crate::runtime::BindMount;
use crate::utils::context::CallContext;
use crate::volume::Volume;

/// Metric name of every line emitted by a cycle.
const METRIC_NAME: &str = "conplicity";

/// Where volume data is mounted inside the duplicity container.
const BACKUP_SOURCE_ROOT: &str = "/var/backups";

/// Builds the duplicity command lines for one volume.
pub struct DuplicityCommands<'a> {
    config: &'a RunConfiguration,
    volume: &'a Volume,
}

impl<'a> DuplicityCommands<'a> {
    pub fn new(config: &'a RunConfiguration, volume: &'a Volume) -> Self {
        Self { config, volume }
    }

    fn source(&self) -> String {
        format!("{BACKUP_SOURCE_ROOT}/{}", self.volume.name)
    }

    pub fn target(&self) -> String {
        format!(
            "{}/{}/{}",
            self.config.duplicity.target_url, self.config.hostname, self.volume.name
        )
    }

    fn source_bind(&self) -> BindMount {
        BindMount::read_only(&self.volume.mountpoint, self.source())
    }

    pub fn backup(&self) -> BackupCommand {
        BackupCommand::new([
            "--full-if-older-than",
            self.config.duplicity.full_if_older_than.as_str(),
            "--s3-use-new-style",
            "--no-encryption",
            "--allow-source-mismatch",
            "--name",
            self.volume.name.as_str(),
            self.source().as_str(),
            self.target().as_str(),
        ])
        .bind(self.source_bind())
    }

    pub fn verify(&self) -> BackupCommand {
        BackupCommand::new([
            "verify",
            "--s3-use-new-style",
            "--no-encryption",
            "--allow-source-mismatch",
            "--name",
            self.volume.name.as_str(),
            self.target().as_str(),
            self.source().as_str(),
        ])
        .bind(self.source_bind())
    }

    pub fn remove_older_than(&self) -> BackupCommand {
        BackupCommand::new([
            "remove-older-than",
            self.config.duplicity.remove_older_than.as_str(),
            "--s3-use-new-style",
            "--no-encryption",
            "--force",
            "--name",
            self.volume.name.as_str(),
            self.target().as_str(),
        ])
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeReport {
    pub volume: String,
    pub backup_exit_code: i64,
    pub verify_exit_code: Option<i64>,
    pub retention_exit_code: Option<i64>,
}

impl VolumeReport {
    pub fn succeeded(&self) -> bool {
        self.backup_exit_code == 0 && self.verify_exit_code.is_none_or(|code| code == 0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub volumes: Vec<VolumeReport>,
    pub skipped: Vec<String>,
}

impl CycleReport {
    pub fn failed(&self) -> impl Iterator<Item = &VolumeReport> {
        self.volumes.iter().filter(|report| !report.succeeded())
    }
}

pub struct BackupCycle {
    supervisor: Supervisor,
    metrics: MetricBatch,
}

impl BackupCycle {
    pub fn new(supervisor: Supervisor) -> Self {
        Self {
            supervisor,
            metrics: MetricBatch::new(),
        }
    }

    pub fn metrics(&self) -> &MetricBatch {
        &self.metrics
    }

    /// Backs up `volumes` one after the other. Provisioning failures stop the
    /// cycle; failed backups are reported and the cycle moves on.
    pub async fn run(&mut self, ctx: &CallContext, volumes: &[Volume]) -> Result<CycleReport> {
        let mut report = CycleReport::default();
        for volume in volumes {
            if self.supervisor.config().is_blacklisted(&volume.name) {
                info!(volume = %volume.name, "Ignoring blacklisted volume");
                report.skipped.push(volume.name.clone());
                continue;
            }
            report.volumes.push(self.backup_volume(ctx, volume).await?);
        }
        Ok(report)
    }

    pub async fn backup_volume(&mut self, ctx: &CallContext, volume: &Volume) -> Result<VolumeReport> {
        let config = self.supervisor.config();
        let commands = DuplicityCommands::new(config, volume);
        let no_verify = config.no_verify;

        info!(volume = %volume.name, target = %commands.target(), "Backing up volume");
        let backup = self.supervisor.run(ctx, commands.backup()).await?;
        log_outcome(&volume.name, "backup", &backup);

        let mut report = VolumeReport {
            volume: volume.name.clone(),
            backup_exit_code: backup.exit_code,
            verify_exit_code: None,
            retention_exit_code: None,
        };

        if backup.succeeded() {
            if !no_verify {
                let verify = self.supervisor.run(ctx, commands.verify()).await?;
                log_outcome(&volume.name, "verify", &verify);
                report.verify_exit_code = Some(verify.exit_code);
            }

            let retention = self.supervisor.run(ctx, commands.remove_older_than()).await?;
            log_outcome(&volume.name, "remove-older-than", &retention);
            report.retention_exit_code = Some(retention.exit_code);
        }

        self.record_metrics(&report, backup.succeeded());
        Ok(report)
    }

    fn record_metrics(&mut self, report: &VolumeReport, backed_up: bool) {
        self.metrics
            .push_volume_metric(METRIC_NAME, &report.volume, "backupExitCode", report.backup_exit_code);
        if let Some(code) = report.verify_exit_code {
            self.metrics
                .push_volume_metric(METRIC_NAME, &report.volume, "verifyExitCode", code);
        }
        if backed_up {
            self.metrics.push_volume_metric(
                METRIC_NAME,
                &report.volume,
                "lastBackup",
                Utc::now().timestamp(),
            );
        }
    }
}

fn log_outcome(volume: &str, step: &str, result: &RunResult) {
    for warning in &result.warnings {
        warn!(volume = %volume, step = %step, error = %warning, "Run completed with degraded reporting");
    }
    if result.succeeded() {
        info!(volume = %volume, step = %step, "Duplicity run succeeded");
    } else {
        error!(
            volume = %volume,
            step = %step,
            exit_code = result.exit_code,
            output = %result.output,
            "Duplicity run failed"
        );
    }
}
