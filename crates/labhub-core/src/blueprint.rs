//! Blueprint types: the declarative description of one lab.
//!
//! Blueprints are produced by an external loader and treated as immutable
//! once parsed. Field names on the wire follow the exercise documents the
//! platform already ships (`docker`, `vbox`, `flag`, `memoryMB`, ...).

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// A scoring flag exposed to a machine through an environment variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagDefinition {
    /// Display name of the flag.
    pub name: String,
    /// Environment variable the flag value is injected into.
    pub env: String,
    /// Value used when no per-lab value is provided.
    #[serde(default)]
    pub default: String,
    /// Points awarded for the flag.
    #[serde(default)]
    pub points: u32,
}

/// An explicit environment variable for a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub env: String,
    #[serde(default)]
    pub value: String,
}

/// A DNS record template served by the lab's DNS server.
///
/// An empty `rdata` is filled with the address of the container that
/// declares the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsRecord {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub rdata: String,
}

/// One container of a lab.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub image: String,
    #[serde(rename = "flag", default)]
    pub flags: Vec<FlagDefinition>,
    #[serde(rename = "env", default)]
    pub envs: Vec<EnvVar>,
    #[serde(rename = "dns", default)]
    pub records: Vec<DnsRecord>,
    #[serde(rename = "memoryMB", default)]
    pub memory_mb: u32,
    #[serde(default)]
    pub cpu: f64,
}

/// One virtual machine of a lab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmSpec {
    pub image: String,
    #[serde(rename = "memoryMB", default)]
    pub memory_mb: u32,
    #[serde(rename = "flag", default)]
    pub flags: Vec<FlagDefinition>,
}

/// Description of one lab's machines and flags.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Blueprint {
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(rename = "docker", default)]
    pub containers: Vec<ContainerSpec>,
    #[serde(rename = "vbox", default)]
    pub vms: Vec<VmSpec>,
}

/// Resource limits handed to the container runtime.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Resources {
    pub memory_mb: u32,
    pub cpu: f64,
}

/// Everything the container runtime needs to launch one container.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ContainerLaunchSpec {
    pub image: String,
    pub resources: Resources,
    pub env: BTreeMap<String, String>,
    /// DNS servers the container resolves through.
    pub dns: Vec<String>,
    pub mac_address: Option<String>,
}

impl Blueprint {
    /// Parse a blueprint from a JSON document.
    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Read and parse a blueprint file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// All flag definitions: container flags first, then VM flags.
    pub fn flags(&self) -> Vec<FlagDefinition> {
        self.containers
            .iter()
            .flat_map(|c| c.flags.iter())
            .chain(self.vms.iter().flat_map(|v| v.flags.iter()))
            .cloned()
            .collect()
    }

    /// Expand every container spec into a launch spec plus its DNS record
    /// templates, in blueprint order.
    ///
    /// Flag defaults are written to the environment first and explicit
    /// variables second, so an explicit variable wins on a key collision.
    pub fn container_opts(&self) -> Vec<(ContainerLaunchSpec, Vec<DnsRecord>)> {
        self.containers
            .iter()
            .map(|conf| {
                let mut env = BTreeMap::new();
                for flag in &conf.flags {
                    env.insert(flag.env.clone(), flag.default.clone());
                }
                for var in &conf.envs {
                    env.insert(var.env.clone(), var.value.clone());
                }

                let spec = ContainerLaunchSpec {
                    image: conf.image.clone(),
                    resources: Resources {
                        memory_mb: conf.memory_mb,
                        cpu: conf.cpu,
                    },
                    env,
                    dns: Vec::new(),
                    mac_address: None,
                };
                (spec, conf.records.clone())
            })
            .collect()
    }
}
