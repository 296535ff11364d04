use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Certificate, Response, StatusCode, header};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;
use url::Url;

use crate::api::{ApiError, Host, Snapshot, SnapshotId, SnapshotStatus, VirtApi, Vm, VmId};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub fqdn: String,
    pub username: String,
    pub password: String,
    pub ca_file: Option<PathBuf>,
}

/// REST client for the engine API. One instance per process run; the
/// connection is validated once at construction so auth failures surface
/// before any VM is touched.
pub struct EngineClient {
    http: reqwest::Client,
    base: Url,
    username: String,
    password: String,
}

impl EngineClient {
    pub async fn connect(config: EngineConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .default_headers(Self::default_headers());

        if let Some(ca_file) = &config.ca_file {
            let pem = tokio::fs::read(ca_file)
                .await
                .with_context(|| format!("failed to read CA file {}", ca_file.display()))?;
            let cert = Certificate::from_pem(&pem)
                .with_context(|| format!("invalid CA certificate {}", ca_file.display()))?;
            builder = builder.add_root_certificate(cert);
        }

        let base = Url::parse(&format!("https://{}/ovirt-engine/api", config.fqdn))
            .with_context(|| format!("invalid engine FQDN {:?}", config.fqdn))?;

        let client = Self {
            http: builder.build()?,
            base,
            username: config.username,
            password: config.password,
        };

        // Probe the API root so a bad endpoint or credentials fail fast.
        client
            .get_checked(client.base.clone())
            .await
            .with_context(|| format!("failed to connect to the engine at {}", config.fqdn))?;

        Ok(client)
    }

    fn default_headers() -> header::HeaderMap {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));
        headers
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        {
            // base path is never cannot-be-a-base, so this does not fail
            let mut path = url.path_segments_mut().unwrap();
            for segment in segments {
                path.push(segment);
            }
        }
        url
    }

    async fn get_checked(&self, url: Url) -> Result<Response, ApiError> {
        debug!(%url, "engine GET");
        let response = self
            .http
            .get(url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;
        Self::check(response).await
    }

    async fn post_checked(&self, url: Url, body: serde_json::Value) -> Result<Response, ApiError> {
        debug!(%url, "engine POST");
        let response = self
            .http
            .post(url)
            .basic_auth(&self.username, Some(&self.password))
            .json(&body)
            .send()
            .await?;
        Self::check(response).await
    }

    async fn delete_checked(&self, url: Url) -> Result<Response, ApiError> {
        debug!(%url, "engine DELETE");
        let response = self
            .http
            .delete(url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;
        Self::check(response).await
    }

    async fn check(response: Response) -> Result<Response, ApiError> {
        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::NOT_FOUND => Err(ApiError::NotFound),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ApiError::Unauthorized),
            status => {
                let message = response.text().await.unwrap_or_default();
                Err(ApiError::Remote {
                    status: status.as_u16(),
                    message,
                })
            }
        }
    }
}

#[async_trait]
impl VirtApi for EngineClient {
    async fn list_vms(&self) -> Result<Vec<Vm>, ApiError> {
        let url = self.endpoint(&["vms"]);
        let list: WireVmList = self.get_checked(url).await?.json().await?;
        Ok(list.vm.unwrap_or_default().into_iter().map(Vm::from).collect())
    }

    async fn vm_by_name(&self, name: &str) -> Result<Vm, ApiError> {
        let mut url = self.endpoint(&["vms"]);
        url.query_pairs_mut()
            .append_pair("search", &format!("name={}", name));
        let list: WireVmList = self.get_checked(url).await?.json().await?;
        list.vm
            .unwrap_or_default()
            .into_iter()
            .next()
            .map(Vm::from)
            .ok_or(ApiError::NotFound)
    }

    async fn list_snapshots(&self, vm: &VmId) -> Result<Vec<Snapshot>, ApiError> {
        let url = self.endpoint(&["vms", &vm.0, "snapshots"]);
        let list: WireSnapshotList = self.get_checked(url).await?.json().await?;
        Ok(list
            .snapshot
            .unwrap_or_default()
            .into_iter()
            .map(Snapshot::from)
            .collect())
    }

    async fn create_snapshot(
        &self,
        vm: &VmId,
        description: &str,
        persist_memory: bool,
    ) -> Result<Snapshot, ApiError> {
        let url = self.endpoint(&["vms", &vm.0, "snapshots"]);
        // The engine serializes booleans as strings on this API version.
        let body = json!({
            "description": description,
            "persist_memorystate": persist_memory.to_string(),
        });
        let snapshot: WireSnapshot = self.post_checked(url, body).await?.json().await?;
        Ok(snapshot.into())
    }

    async fn get_snapshot(&self, vm: &VmId, snapshot: &SnapshotId) -> Result<Snapshot, ApiError> {
        let url = self.endpoint(&["vms", &vm.0, "snapshots", &snapshot.0]);
        let snapshot: WireSnapshot = self.get_checked(url).await?.json().await?;
        Ok(snapshot.into())
    }

    async fn remove_snapshot(&self, vm: &VmId, snapshot: &SnapshotId) -> Result<(), ApiError> {
        let url = self.endpoint(&["vms", &vm.0, "snapshots", &snapshot.0]);
        self.delete_checked(url).await?;
        Ok(())
    }

    async fn host_by_name(&self, name: &str) -> Result<Host, ApiError> {
        let mut url = self.endpoint(&["hosts"]);
        url.query_pairs_mut()
            .append_pair("search", &format!("name={}", name));
        let list: WireHostList = self.get_checked(url).await?.json().await?;
        list.host
            .unwrap_or_default()
            .into_iter()
            .next()
            .map(|h| Host {
                id: h.id,
                name: h.name,
            })
            .ok_or(ApiError::NotFound)
    }

    async fn export_vm(
        &self,
        vm: &VmId,
        host: &Host,
        directory: &str,
        filename: &str,
    ) -> Result<(), ApiError> {
        let url = self.endpoint(&["vms", &vm.0, "export"]);
        let body = json!({
            "host": { "id": host.id },
            "directory": directory,
            "filename": filename,
        });
        self.post_checked(url, body).await?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct WireVmList {
    vm: Option<Vec<WireVm>>,
}

#[derive(Debug, Deserialize)]
struct WireVm {
    id: String,
    name: String,
}

impl From<WireVm> for Vm {
    fn from(wire: WireVm) -> Self {
        Vm {
            id: VmId(wire.id),
            name: wire.name,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireSnapshotList {
    snapshot: Option<Vec<WireSnapshot>>,
}

#[derive(Debug, Deserialize)]
struct WireSnapshot {
    id: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    snapshot_status: Option<String>,
    #[serde(default)]
    persist_memorystate: Option<String>,
}

impl From<WireSnapshot> for Snapshot {
    fn from(wire: WireSnapshot) -> Self {
        Snapshot {
            id: SnapshotId(wire.id),
            description: wire.description.unwrap_or_default(),
            status: wire
                .snapshot_status
                .as_deref()
                .map(SnapshotStatus::from)
                .unwrap_or(SnapshotStatus::Locked),
            persists_memory: wire.persist_memorystate.as_deref() == Some("true"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireHostList {
    host: Option<Vec<WireHost>>,
}

#[derive(Debug, Deserialize)]
struct WireHost {
    id: String,
    name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_snapshot_decoding() {
        let raw = r#"{
            "snapshot": [
                {
                    "id": "aa11",
                    "description": "20240101_nightly_vmA",
                    "snapshot_status": "ok",
                    "persist_memorystate": "false"
                },
                {
                    "id": "bb22",
                    "description": "20240108_weekly_vmA",
                    "snapshot_status": "locked",
                    "persist_memorystate": "true"
                }
            ]
        }"#;

        let list: WireSnapshotList = serde_json::from_str(raw).expect("decode");
        let snapshots: Vec<Snapshot> = list
            .snapshot
            .unwrap_or_default()
            .into_iter()
            .map(Snapshot::from)
            .collect();

        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[0].status, SnapshotStatus::Ok);
        assert!(!snapshots[0].persists_memory);
        assert_eq!(snapshots[1].status, SnapshotStatus::Locked);
        assert!(snapshots[1].persists_memory);
    }

    #[test]
    fn test_wire_snapshot_tolerates_missing_fields() {
        // The base "Active VM" snapshot has no parseable description; it must
        // still decode so listings never fail on it.
        let raw = r#"{"id": "cc33"}"#;
        let snapshot: Snapshot = serde_json::from_str::<WireSnapshot>(raw)
            .expect("decode")
            .into();
        assert_eq!(snapshot.description, "");
        assert_eq!(snapshot.status, SnapshotStatus::Locked);
    }
}
