use std::path::Path;

use anyhow::{Context, Result};
use chrono::Local;
use tokio::fs::{File, OpenOptions, create_dir_all};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

/// Per-VM, per-class log handle. Lines go to tracing and, when the
/// environment configures a `log-dir`, to an append-only file named
/// `<vm>_<tag>.log`. Passed explicitly into each backup operation instead
/// of reconfiguring any global logger state.
pub struct BackupLog {
    vm_name: String,
    file: Option<File>,
}

impl BackupLog {
    pub async fn open(log_dir: Option<&Path>, vm_name: &str, tag: &str) -> Result<Self> {
        let file = match log_dir {
            Some(dir) => {
                if !dir.exists() {
                    create_dir_all(dir)
                        .await
                        .with_context(|| format!("failed to create log dir {}", dir.display()))?;
                }
                let path = dir.join(format!("{}_{}.log", vm_name, tag));
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .await
                    .with_context(|| format!("failed to open log file {}", path.display()))?;
                Some(file)
            }
            None => None,
        };

        Ok(Self {
            vm_name: vm_name.to_string(),
            file,
        })
    }

    pub async fn info(&mut self, message: impl AsRef<str>) {
        let message = message.as_ref();
        info!(vm = %self.vm_name, "{}", message);
        self.append("INFO", message).await;
    }

    pub async fn warn(&mut self, message: impl AsRef<str>) {
        let message = message.as_ref();
        warn!(vm = %self.vm_name, "{}", message);
        self.append("WARN", message).await;
    }

    async fn append(&mut self, level: &str, message: &str) {
        let Some(file) = &mut self.file else {
            return;
        };
        let line = format!(
            "[{}]: {} - {}\n",
            level,
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            message
        );
        // a failed log write must not fail the backup
        let _ = file.write_all(line.as_bytes()).await;
        let _ = file.flush().await;
    }
}
