//! Interfaces to the virtualization and network collaborators.
//!
//! The hypervisor, container runtime and network service live outside this
//! crate. They are consumed through the narrow traits below so that
//! different backends (and in-memory fakes in tests) can be swapped without
//! touching the exercise or hub logic.

use crate::blueprint::ContainerLaunchSpec;
use crate::error::BoxError;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Lifecycle shared by containers and virtual machines.
#[async_trait]
pub trait Instance: Send + Sync {
    /// Backend identifier of the instance.
    fn id(&self) -> String;

    /// Start (or restart) the instance.
    async fn start(&self) -> Result<(), BoxError>;

    /// Stop the instance and release its backend resources.
    async fn close(&self) -> Result<(), BoxError>;
}

/// Which backend produced a [`Machine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineKind {
    Container,
    Vm,
}

impl fmt::Display for MachineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Container => write!(f, "container"),
            Self::Vm => write!(f, "vm"),
        }
    }
}

/// One running machine of a lab: a container or a virtual machine.
#[derive(Clone)]
pub enum Machine {
    Container(Arc<dyn Instance>),
    Vm(Arc<dyn Instance>),
}

impl Machine {
    pub fn kind(&self) -> MachineKind {
        match self {
            Self::Container(_) => MachineKind::Container,
            Self::Vm(_) => MachineKind::Vm,
        }
    }

    /// The underlying backend instance.
    pub fn instance(&self) -> &Arc<dyn Instance> {
        match self {
            Self::Container(i) | Self::Vm(i) => i,
        }
    }

    pub async fn start(&self) -> Result<(), BoxError> {
        self.instance().start().await
    }

    pub async fn close(&self) -> Result<(), BoxError> {
        self.instance().close().await
    }
}

impl fmt::Debug for Machine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Machine")
            .field("kind", &self.kind())
            .field("id", &self.instance().id())
            .finish()
    }
}

/// Options applied when copying a VM image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmOption {
    /// Bridge the VM's network adapter to the given host interface.
    Bridge(String),
}

/// Container-runtime client.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create (but do not start) a container from a launch spec.
    async fn create_container(
        &self,
        spec: &ContainerLaunchSpec,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn Instance>, BoxError>;
}

/// Virtual-machine hypervisor client.
#[async_trait]
pub trait Hypervisor: Send + Sync {
    /// Produce a fresh copy of an image, configured with `options`.
    async fn get_copy(
        &self,
        image: &str,
        options: &[VmOption],
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn Instance>, BoxError>;
}

/// An isolated virtual network owned by one lab.
#[async_trait]
pub trait Network: Send + Sync {
    /// Attach an instance to the network.
    ///
    /// With `suffix` set the instance gets exactly that host address,
    /// otherwise the network picks one. Returns the assigned suffix.
    async fn connect(
        &self,
        instance: &dyn Instance,
        mac_address: Option<&str>,
        suffix: Option<u8>,
    ) -> Result<u8, BoxError>;

    /// Render a host suffix as a full address on this network.
    fn format_ip(&self, suffix: u8) -> String;

    /// Host bridge interface that VMs attach to.
    fn interface(&self) -> String;

    /// Tear the network down.
    async fn close(&self) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Hands out a fresh isolated network per lab.
#[async_trait]
pub trait NetworkProvider: Send + Sync {
    async fn create_network(&self, cancel: &CancellationToken)
        -> Result<Arc<dyn Network>, BoxError>;
}

/// Receives plain-text progress messages while a hub pre-warms.
pub trait ProgressSink: Send + Sync {
    fn send(&self, msg: &str) -> Result<(), BoxError>;
}

/// Handles to every collaborator a lab is built from.
#[derive(Clone)]
pub struct Backends {
    pub hypervisor: Arc<dyn Hypervisor>,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub networks: Arc<dyn NetworkProvider>,
}

impl Backends {
    pub fn new(
        hypervisor: Arc<dyn Hypervisor>,
        runtime: Arc<dyn ContainerRuntime>,
        networks: Arc<dyn NetworkProvider>,
    ) -> Self {
        Self {
            hypervisor,
            runtime,
            networks,
        }
    }
}

impl fmt::Debug for Backends {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backends").finish_non_exhaustive()
    }
}
