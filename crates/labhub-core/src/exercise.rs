//! Exercise assembly: turns a blueprint into running machines on a lab's
//! private network and drives their shared lifecycle.

use crate::backend::{ContainerRuntime, Hypervisor, Machine, Network, VmOption};
use crate::blueprint::{Blueprint, DnsRecord};
use crate::error::{BoxError, HubError, Result};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Run a backend call unless the token fires first.
pub(crate) async fn cancellable<T>(
    cancel: &CancellationToken,
    call: impl Future<Output = std::result::Result<T, BoxError>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(HubError::Cancelled),
        res = call => res.map_err(HubError::Backend),
    }
}

/// The machines, addressing and DNS records of one lab.
///
/// An exercise is owned by exactly one lab. Lifecycle calls take `&mut self`
/// so they can never run concurrently on the same exercise.
pub struct Exercise {
    blueprint: Arc<Blueprint>,
    network: Arc<dyn Network>,
    dns_address: String,
    machines: Vec<Machine>,
    /// Host suffixes of the containers, recorded by the first successful
    /// `create` and reused by every later one.
    ips: Option<Vec<u8>>,
    dns_records: Vec<DnsRecord>,
    runtime: Arc<dyn ContainerRuntime>,
    hypervisor: Arc<dyn Hypervisor>,
    cancel: CancellationToken,
}

impl Exercise {
    pub fn new(
        blueprint: Arc<Blueprint>,
        network: Arc<dyn Network>,
        dns_address: impl Into<String>,
        runtime: Arc<dyn ContainerRuntime>,
        hypervisor: Arc<dyn Hypervisor>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            blueprint,
            network,
            dns_address: dns_address.into(),
            machines: Vec::new(),
            ips: None,
            dns_records: Vec::new(),
            runtime,
            hypervisor,
            cancel,
        }
    }

    /// Create every container and VM of the blueprint.
    ///
    /// Containers come first, in blueprint order, each connected to the
    /// network; VMs follow, bridged to the network interface. Fails on the
    /// first backend error. Machines created before the failure stay in
    /// [`machines`](Self::machines) so the caller can close them.
    pub async fn create(&mut self) -> Result<()> {
        let blueprint = Arc::clone(&self.blueprint);
        let containers = blueprint.container_opts();

        self.machines.clear();
        self.dns_records.clear();
        let mut new_ips = Vec::with_capacity(containers.len());

        for (i, (mut spec, records)) in containers.into_iter().enumerate() {
            spec.dns = vec![self.dns_address.clone()];

            tracing::debug!(image = %spec.image, position = i, "Creating container");
            let container =
                cancellable(&self.cancel, self.runtime.create_container(&spec, &self.cancel))
                    .await?;
            self.machines.push(Machine::Container(Arc::clone(&container)));

            let known = self.ips.as_ref().and_then(|ips| ips.get(i).copied());
            let suffix = cancellable(
                &self.cancel,
                self.network
                    .connect(container.as_ref(), spec.mac_address.as_deref(), known),
            )
            .await?;
            if known.is_none() {
                new_ips.push(suffix);
            }

            let addr = self.network.format_ip(suffix);
            tracing::debug!(image = %spec.image, suffix, %addr, "Container connected");

            for mut record in records {
                if record.rdata.is_empty() {
                    record.rdata = addr.clone();
                }
                self.dns_records.push(record);
            }
        }

        let bridge = self.network.interface();
        for spec in &blueprint.vms {
            tracing::debug!(image = %spec.image, %bridge, "Copying VM");
            let options = [VmOption::Bridge(bridge.clone())];
            let vm = cancellable(
                &self.cancel,
                self.hypervisor.get_copy(&spec.image, &options, &self.cancel),
            )
            .await?;
            self.machines.push(Machine::Vm(vm));
        }

        if self.ips.is_none() {
            self.ips = Some(new_ips);
        }

        tracing::debug!(
            exercise = %blueprint.name,
            machines = self.machines.len(),
            "Exercise created"
        );
        Ok(())
    }

    /// Start every machine in order, stopping at the first failure.
    pub async fn start(&mut self) -> Result<()> {
        for machine in &self.machines {
            cancellable(&self.cancel, machine.start()).await?;
        }
        Ok(())
    }

    /// Close every machine in order, stopping at the first failure.
    pub async fn stop(&mut self) -> Result<()> {
        for machine in &self.machines {
            machine.close().await.map_err(HubError::Backend)?;
        }
        Ok(())
    }

    /// Close every machine and forget them.
    ///
    /// The machine list is only cleared when every close succeeded.
    pub async fn close(&mut self) -> Result<()> {
        self.stop().await?;
        self.machines.clear();
        Ok(())
    }

    /// Stop, then start again. A failed stop skips the start.
    pub async fn reset(&mut self) -> Result<()> {
        self.stop().await?;
        self.start().await
    }

    pub fn blueprint(&self) -> &Arc<Blueprint> {
        &self.blueprint
    }

    pub fn machines(&self) -> &[Machine] {
        &self.machines
    }

    /// Container host suffixes, once the first `create` succeeded.
    pub fn ips(&self) -> Option<&[u8]> {
        self.ips.as_deref()
    }

    /// DNS records with every blank address resolved.
    pub fn dns_records(&self) -> &[DnsRecord] {
        &self.dns_records
    }

    pub fn dns_address(&self) -> &str {
        &self.dns_address
    }

    pub fn network(&self) -> &Arc<dyn Network> {
        &self.network
    }
}
