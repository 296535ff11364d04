pub mod engine;

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VmId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SnapshotId(pub String);

impl fmt::Display for VmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Vm {
    pub id: VmId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Host {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub id: SnapshotId,
    pub description: String,
    pub status: SnapshotStatus,
    pub persists_memory: bool,
}

/// `Locked` is the only transient state; the engine reports it while a
/// snapshot is being created or torn down. Everything else is terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotStatus {
    Locked,
    Ok,
    Other(String),
}

impl SnapshotStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SnapshotStatus::Locked)
    }
}

impl From<&str> for SnapshotStatus {
    fn from(value: &str) -> Self {
        match value {
            "locked" => SnapshotStatus::Locked,
            "ok" => SnapshotStatus::Ok,
            other => SnapshotStatus::Other(other.to_string()),
        }
    }
}

impl fmt::Display for SnapshotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotStatus::Locked => f.write_str("locked"),
            SnapshotStatus::Ok => f.write_str("ok"),
            SnapshotStatus::Other(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not found")]
    NotFound,

    #[error("authentication rejected by the engine")]
    Unauthorized,

    #[error("engine returned {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Collapses `NotFound` into `Ok(None)` so polling callers can treat a
/// vanished entity as data rather than an error.
pub fn found<T>(result: Result<T, ApiError>) -> Result<Option<T>, ApiError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(ApiError::NotFound) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Capability set the backup core calls into. The engine client implements
/// it for real; tests substitute an in-memory directory.
#[async_trait]
pub trait VirtApi: Send + Sync {
    async fn list_vms(&self) -> Result<Vec<Vm>, ApiError>;

    async fn vm_by_name(&self, name: &str) -> Result<Vm, ApiError>;

    async fn list_snapshots(&self, vm: &VmId) -> Result<Vec<Snapshot>, ApiError>;

    async fn create_snapshot(
        &self,
        vm: &VmId,
        description: &str,
        persist_memory: bool,
    ) -> Result<Snapshot, ApiError>;

    async fn get_snapshot(&self, vm: &VmId, snapshot: &SnapshotId) -> Result<Snapshot, ApiError>;

    async fn remove_snapshot(&self, vm: &VmId, snapshot: &SnapshotId) -> Result<(), ApiError>;

    async fn host_by_name(&self, name: &str) -> Result<Host, ApiError>;

    async fn export_vm(
        &self,
        vm: &VmId,
        host: &Host,
        directory: &str,
        filename: &str,
    ) -> Result<(), ApiError>;
}
