//! Backends that only log.
//!
//! Lets an operator check a blueprint and the hub settings without a
//! hypervisor or container runtime on the host.

use async_trait::async_trait;
use labhub_core::{
    Backends, BoxError, CancellationToken, ContainerLaunchSpec, ContainerRuntime, Hypervisor,
    Instance, Network, NetworkProvider, VmOption, DNS_SUFFIX,
};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

/// Last host suffix a dry-run network hands out.
const LAST_SUFFIX: u8 = 254;

/// Build logging-only backends whose networks live on `prefix`.
pub fn backends(prefix: &str) -> Backends {
    let backend = Arc::new(DryRun {
        prefix: prefix.to_string(),
        next_id: AtomicU64::new(1),
    });
    Backends::new(backend.clone(), backend.clone(), backend)
}

struct DryRun {
    prefix: String,
    next_id: AtomicU64,
}

impl DryRun {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

struct DryInstance {
    id: String,
}

#[async_trait]
impl Instance for DryInstance {
    fn id(&self) -> String {
        self.id.clone()
    }

    async fn start(&self) -> Result<(), BoxError> {
        tracing::info!(instance = %self.id, "start");
        Ok(())
    }

    async fn close(&self) -> Result<(), BoxError> {
        tracing::info!(instance = %self.id, "close");
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for DryRun {
    async fn create_container(
        &self,
        spec: &ContainerLaunchSpec,
        _cancel: &CancellationToken,
    ) -> Result<Arc<dyn Instance>, BoxError> {
        let id = format!("container-{}", self.next_id());
        tracing::info!(
            instance = %id,
            image = %spec.image,
            memory_mb = spec.resources.memory_mb,
            cpu = spec.resources.cpu,
            env = spec.env.len(),
            dns = ?spec.dns,
            "create container"
        );
        Ok(Arc::new(DryInstance { id }))
    }
}

#[async_trait]
impl Hypervisor for DryRun {
    async fn get_copy(
        &self,
        image: &str,
        options: &[VmOption],
        _cancel: &CancellationToken,
    ) -> Result<Arc<dyn Instance>, BoxError> {
        let id = format!("vm-{}", self.next_id());
        tracing::info!(instance = %id, image, ?options, "copy vm");
        Ok(Arc::new(DryInstance { id }))
    }
}

#[async_trait]
impl NetworkProvider for DryRun {
    async fn create_network(
        &self,
        _cancel: &CancellationToken,
    ) -> Result<Arc<dyn Network>, BoxError> {
        let bridge = format!("labhub-br{}", self.next_id());
        tracing::info!(%bridge, prefix = %self.prefix, "create network");
        Ok(Arc::new(DryNetwork {
            prefix: self.prefix.clone(),
            bridge,
            next: AtomicU8::new(DNS_SUFFIX + 1),
        }))
    }
}

struct DryNetwork {
    prefix: String,
    bridge: String,
    next: AtomicU8,
}

#[async_trait]
impl Network for DryNetwork {
    async fn connect(
        &self,
        instance: &dyn Instance,
        _mac_address: Option<&str>,
        suffix: Option<u8>,
    ) -> Result<u8, BoxError> {
        let assigned = match suffix {
            Some(s) => s,
            None => self
                .next
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |s| {
                    (s <= LAST_SUFFIX).then(|| s + 1)
                })
                .map_err(|_| format!("network {} has no free addresses", self.bridge))?,
        };
        tracing::info!(
            instance = %instance.id(),
            bridge = %self.bridge,
            ip = %self.format_ip(assigned),
            "connect"
        );
        Ok(assigned)
    }

    fn format_ip(&self, suffix: u8) -> String {
        format!("{}.{}", self.prefix, suffix)
    }

    fn interface(&self) -> String {
        self.bridge.clone()
    }

    async fn close(&self) -> Result<(), BoxError> {
        tracing::info!(bridge = %self.bridge, "close network");
        Ok(())
    }
}
