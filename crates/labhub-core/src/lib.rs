//! # labhub-core
//!
//! Warm pool and exercise assembly for disposable cybersecurity training labs.
//!
//! A lab bundles containers and virtual machines on an isolated network, with
//! scoring flags injected as environment variables. This crate assembles those
//! machines from a declarative [`Blueprint`] and keeps a pool of started labs
//! ready to hand out.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       labhub-core                        │
//! ├──────────────────────────────────────────────────────────┤
//! │                                                          │
//! │  ┌─────────────────┐     ┌──────────────────────────┐   │
//! │  │      Hub        │────▶│  warm buffer (bounded)   │   │
//! │  │   - get()       │     │  dispensed labs (mutex)  │   │
//! │  │   - close()     │     │  creation / capacity     │   │
//! │  └─────────────────┘     │  semaphores              │   │
//! │           │              └──────────────────────────┘   │
//! │           ▼ LabFactory                                   │
//! │  ┌─────────────────┐     ┌──────────────────────────┐   │
//! │  │      Lab        │────▶│   Exercise               │   │
//! │  │  - start/stop   │     │   containers + VMs       │   │
//! │  │  - reset/close  │     │   IP suffixes, DNS       │   │
//! │  └─────────────────┘     └──────────────────────────┘   │
//! │                                       │                  │
//! └───────────────────────────────────────┼──────────────────┘
//!                                         ▼
//!        ContainerRuntime · Hypervisor · Network (external)
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use labhub_core::{Backends, Blueprint, Hub, HubConfig};
//!
//! # async fn example(backends: Backends) -> labhub_core::Result<()> {
//! let blueprint = Blueprint::from_path("exercises/sqli.json")?;
//!
//! // Pre-warms two labs before returning
//! let hub = Hub::builder(blueprint, backends)
//!     .config(HubConfig::new(2, 5))
//!     .build()
//!     .await?;
//!
//! let lab = hub.get()?;
//! println!("lab {} ready, dns at {}", lab.tag(), lab.dns_address());
//!
//! hub.close().await?;
//! # Ok(())
//! # }
//! ```

mod backend;
mod blueprint;
mod config;
mod error;
mod exercise;
mod hub;
mod lab;
mod semaphore;

pub use backend::{
    Backends, ContainerRuntime, Hypervisor, Instance, Machine, MachineKind, Network,
    NetworkProvider, ProgressSink, VmOption,
};
pub use blueprint::{
    Blueprint, ContainerLaunchSpec, ContainerSpec, DnsRecord, EnvVar, FlagDefinition, Resources,
    VmSpec,
};
pub use config::{HubConfig, DEFAULT_CREATE_LIMIT, DEFAULT_LOW_WATER_MARK};
pub use error::{BoxError, HubError, Result};
pub use exercise::Exercise;
pub use hub::{Hub, HubBuilder, HubStats};
pub use lab::{Lab, LabFactory, LabHost, LabId, DNS_SUFFIX};
pub use semaphore::{CountingSemaphore, SemaphoreGuard};

/// Re-exported so backend implementations can name the token type.
pub use tokio_util::sync::CancellationToken;
