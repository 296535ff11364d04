pub mod log;

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::api::{Snapshot, SnapshotStatus, VirtApi, Vm, found};
use crate::backup::log::BackupLog;
use crate::config::Environment;
use crate::naming::{self, SnapshotClass};
use crate::retention::{self, Eviction};
use crate::waiter::Waiter;

/// The self-hosted engine VM; never backed up.
pub const HOSTED_ENGINE: &str = "HostedEngine";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupKind {
    Snapshot { keep_memory: bool },
    Ova,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    pub succeeded: usize,
    pub failed: usize,
}

/// Drives one backup invocation: per VM, in sequence, snapshot (create →
/// wait → retention sweep) or OVA export. One VM is fully processed before
/// the next begins; the waiter's sleep is the only suspension point.
pub struct BackupRunner {
    api: Arc<dyn VirtApi>,
    env: Environment,
    date: NaiveDate,
    waiter: Waiter,
}

impl BackupRunner {
    pub fn new(
        api: Arc<dyn VirtApi>,
        env: Environment,
        date: NaiveDate,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let waiter = Waiter::new(env.poll_interval()?, env.poll_deadline()?, cancel);
        Ok(Self {
            api,
            env,
            date,
            waiter,
        })
    }

    /// Backs up one named VM, or every VM except `HostedEngine` when no
    /// name is given. In bulk mode a failing VM is logged and skipped; a
    /// named VM that cannot be found or backed up is a hard error.
    pub async fn run(&self, vm_name: Option<&str>, kind: BackupKind) -> Result<RunReport> {
        match vm_name {
            Some(name) => {
                if name == HOSTED_ENGINE {
                    bail!("refusing to back up {}", HOSTED_ENGINE);
                }
                let vm = self
                    .api
                    .vm_by_name(name)
                    .await
                    .with_context(|| format!("VM {:?} not found", name))?;
                self.backup_vm(&vm, kind).await?;
                Ok(RunReport {
                    succeeded: 1,
                    failed: 0,
                })
            }
            None => {
                let vms = self.api.list_vms().await.context("failed to list VMs")?;
                let mut report = RunReport::default();
                for vm in vms.iter().filter(|vm| vm.name != HOSTED_ENGINE) {
                    match self.backup_vm(vm, kind).await {
                        Ok(()) => report.succeeded += 1,
                        Err(e) => {
                            error!(vm = %vm.name, "backup failed: {:#}", e);
                            report.failed += 1;
                        }
                    }
                }
                Ok(report)
            }
        }
    }

    async fn backup_vm(&self, vm: &Vm, kind: BackupKind) -> Result<()> {
        match kind {
            BackupKind::Snapshot { keep_memory } => self.snapshot_vm(vm, keep_memory).await,
            BackupKind::Ova => self.export_vm(vm).await,
        }
    }

    async fn snapshot_vm(&self, vm: &Vm, keep_memory: bool) -> Result<()> {
        let class = SnapshotClass::for_memory(keep_memory);
        let mut log =
            BackupLog::open(self.env.log_dir.as_deref(), &vm.name, class.as_str()).await?;
        log.info(format!("snapshotting VM {}", vm.name)).await;

        // live listing at call time; the label must be unique among
        // currently existing descriptions
        let existing = self
            .api
            .list_snapshots(&vm.id)
            .await
            .with_context(|| format!("failed to list snapshots of {}", vm.name))?;
        let mut descriptions: HashSet<String> =
            existing.iter().map(|s| s.description.clone()).collect();
        let label = naming::unique_label(self.date, class, &vm.name, &mut descriptions);

        let created = self
            .api
            .create_snapshot(&vm.id, &label.to_string(), keep_memory)
            .await
            .with_context(|| format!("failed to create snapshot {}", label))?;
        log.info(format!("snapshot {} requested as {}", created.id, label))
            .await;

        let settled = self
            .waiter
            .until(
                || {
                    let api = self.api.clone();
                    let vm_id = vm.id.clone();
                    let snapshot_id = created.id.clone();
                    async move { found(api.get_snapshot(&vm_id, &snapshot_id).await) }
                },
                |snapshot: &Snapshot| snapshot.status.is_terminal(),
            )
            .await
            .with_context(|| format!("waiting for snapshot {}", label))?;

        if settled.status != SnapshotStatus::Ok {
            bail!("snapshot {} settled in state {}", label, settled.status);
        }
        log.info(format!("snapshot {} completed", label)).await;

        self.sweep_old(vm, class, &mut log).await
    }

    async fn sweep_old(&self, vm: &Vm, class: SnapshotClass, log: &mut BackupLog) -> Result<()> {
        let policy = self.env.policy(class);
        let snapshots = self
            .api
            .list_snapshots(&vm.id)
            .await
            .with_context(|| format!("failed to list snapshots of {} for retention", vm.name))?;

        let evictions = retention::sweep(&snapshots, &vm.name, &policy);
        if evictions.is_empty() {
            log.info(format!(
                "retention: nothing to remove ({} keep {})",
                class, policy.keep
            ))
            .await;
            return Ok(());
        }

        for eviction in evictions {
            log.info(format!(
                "retention: removing snapshot {} ({})",
                eviction.label, eviction.id
            ))
            .await;
            // one stuck removal must not abort the sweep for the others
            match self.remove_and_confirm(vm, &eviction).await {
                Ok(()) => {
                    log.info(format!("retention: snapshot {} removed", eviction.label))
                        .await
                }
                Err(e) => {
                    log.warn(format!(
                        "retention: failed to remove snapshot {}: {:#}",
                        eviction.label, e
                    ))
                    .await
                }
            }
        }

        Ok(())
    }

    async fn remove_and_confirm(&self, vm: &Vm, eviction: &Eviction) -> Result<()> {
        self.api.remove_snapshot(&vm.id, &eviction.id).await?;

        let leftover = self
            .waiter
            .until_gone(
                || {
                    let api = self.api.clone();
                    let vm_id = vm.id.clone();
                    let snapshot_id = eviction.id.clone();
                    async move { found(api.get_snapshot(&vm_id, &snapshot_id).await) }
                },
                |snapshot: &Snapshot| snapshot.status.is_terminal(),
            )
            .await?;

        if let Some(snapshot) = leftover {
            bail!("snapshot still present in state {}", snapshot.status);
        }

        Ok(())
    }

    async fn export_vm(&self, vm: &Vm) -> Result<()> {
        let mut log = BackupLog::open(self.env.log_dir.as_deref(), &vm.name, "ova").await?;
        log.info(format!("exporting OVA of VM {}", vm.name)).await;

        let host = self
            .api
            .host_by_name(&self.env.export_host)
            .await
            .with_context(|| format!("export host {:?} not found", self.env.export_host))?;

        let filename = format!(
            "{}_{}_{}.ova",
            self.date.format("%Y%m%d"),
            self.env.name,
            vm.name
        );
        self.api
            .export_vm(&vm.id, &host, &self.env.export_dir, &filename)
            .await
            .with_context(|| format!("failed to export {}", vm.name))?;

        // the engine exposes no pollable entity for path exports; the
        // request is fire-and-forget
        log.info(format!(
            "OVA export of {} requested to {}:{}/{}",
            vm.name, host.name, self.env.export_dir, filename
        ))
        .await;

        Ok(())
    }
}
