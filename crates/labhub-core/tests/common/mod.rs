//! In-memory backends shared by the integration tests.
//!
//! `FakeBackend` plays container runtime, hypervisor and network provider at
//! once over one shared `Fake`. Every call is counted and failures can be
//! switched on per test.

#![allow(dead_code)]

use async_trait::async_trait;
use labhub_core::{
    Backends, BoxError, Blueprint, CancellationToken, ContainerLaunchSpec, ContainerRuntime,
    ContainerSpec, DnsRecord, EnvVar, FlagDefinition, Hypervisor, Instance, Network,
    NetworkProvider, ProgressSink, VmOption, VmSpec,
};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const PREFIX: &str = "10.0.0";
pub const BRIDGE: &str = "br-lab";
const FIRST_SUFFIX: u8 = 10;

#[derive(Default)]
pub struct Fake {
    // Counters
    pub containers_created: AtomicUsize,
    pub vms_copied: AtomicUsize,
    pub starts: AtomicUsize,
    pub closes: AtomicUsize,
    pub networks_created: AtomicUsize,
    pub networks_closed: AtomicUsize,

    // Faults
    /// Fail the n-th container creation (1-based, 0 = never).
    pub fail_create_on: AtomicUsize,
    pub fail_copy: AtomicBool,
    pub fail_start: AtomicBool,
    pub fail_close: AtomicBool,
    pub fail_network: AtomicBool,
    /// Container creation waits until cancelled.
    pub hang_create: AtomicBool,
    /// Milliseconds every network close takes.
    pub close_delay_ms: AtomicUsize,

    // Recorded calls
    pub launch_specs: Mutex<Vec<ContainerLaunchSpec>>,
    pub vm_options: Mutex<Vec<Vec<VmOption>>>,
    /// (instance id, requested suffix, assigned suffix)
    pub connects: Mutex<Vec<(String, Option<u8>, u8)>>,
}

impl Fake {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn backends(self: &Arc<Self>) -> Backends {
        let backend = Arc::new(FakeBackend(Arc::clone(self)));
        Backends::new(backend.clone(), backend.clone(), backend)
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    pub fn set(flag: &AtomicBool) {
        flag.store(true, Ordering::SeqCst);
    }
}

/// Trait implementations over the shared [`Fake`] state.
pub struct FakeBackend(pub Arc<Fake>);

pub struct FakeInstance {
    id: String,
    fake: Arc<Fake>,
}

#[async_trait]
impl Instance for FakeInstance {
    fn id(&self) -> String {
        self.id.clone()
    }

    async fn start(&self) -> Result<(), BoxError> {
        if self.fake.fail_start.load(Ordering::SeqCst) {
            return Err(format!("{}: start failed", self.id).into());
        }
        self.fake.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<(), BoxError> {
        if self.fake.fail_close.load(Ordering::SeqCst) {
            return Err(format!("{}: close failed", self.id).into());
        }
        self.fake.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for FakeBackend {
    async fn create_container(
        &self,
        spec: &ContainerLaunchSpec,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn Instance>, BoxError> {
        if self.0.hang_create.load(Ordering::SeqCst) {
            cancel.cancelled().await;
            return Err("container creation aborted".into());
        }

        let n = self.0.containers_created.fetch_add(1, Ordering::SeqCst) + 1;
        if self.0.fail_create_on.load(Ordering::SeqCst) == n {
            return Err(format!("cannot create container {}", spec.image).into());
        }
        self.0.launch_specs.lock().unwrap().push(spec.clone());

        Ok(Arc::new(FakeInstance {
            id: format!("container-{n}"),
            fake: Arc::clone(&self.0),
        }))
    }
}

#[async_trait]
impl Hypervisor for FakeBackend {
    async fn get_copy(
        &self,
        image: &str,
        options: &[VmOption],
        _cancel: &CancellationToken,
    ) -> Result<Arc<dyn Instance>, BoxError> {
        if self.0.fail_copy.load(Ordering::SeqCst) {
            return Err(format!("cannot copy {image}").into());
        }
        let n = self.0.vms_copied.fetch_add(1, Ordering::SeqCst) + 1;
        self.0.vm_options.lock().unwrap().push(options.to_vec());

        Ok(Arc::new(FakeInstance {
            id: format!("vm-{n}"),
            fake: Arc::clone(&self.0),
        }))
    }
}

#[async_trait]
impl NetworkProvider for FakeBackend {
    async fn create_network(
        &self,
        _cancel: &CancellationToken,
    ) -> Result<Arc<dyn Network>, BoxError> {
        if self.0.fail_network.load(Ordering::SeqCst) {
            return Err("no free subnet".into());
        }
        self.0.networks_created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeNetwork {
            next: AtomicU8::new(FIRST_SUFFIX),
            fake: Arc::clone(&self.0),
        }))
    }
}

pub struct FakeNetwork {
    next: AtomicU8,
    fake: Arc<Fake>,
}

#[async_trait]
impl Network for FakeNetwork {
    async fn connect(
        &self,
        instance: &dyn Instance,
        _mac_address: Option<&str>,
        suffix: Option<u8>,
    ) -> Result<u8, BoxError> {
        let assigned = match suffix {
            Some(s) => s,
            None => self.next.fetch_add(1, Ordering::SeqCst),
        };
        self.fake
            .connects
            .lock()
            .unwrap()
            .push((instance.id(), suffix, assigned));
        Ok(assigned)
    }

    fn format_ip(&self, suffix: u8) -> String {
        format!("{PREFIX}.{suffix}")
    }

    fn interface(&self) -> String {
        BRIDGE.to_string()
    }

    async fn close(&self) -> Result<(), BoxError> {
        let delay = self.fake.close_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }
        self.fake.networks_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Progress sink that keeps every message.
#[derive(Default)]
pub struct RecordingSink {
    pub messages: Mutex<Vec<String>>,
}

impl ProgressSink for RecordingSink {
    fn send(&self, msg: &str) -> Result<(), BoxError> {
        self.messages.lock().unwrap().push(msg.to_string());
        Ok(())
    }
}

pub fn flag(name: &str, env: &str, default: &str) -> FlagDefinition {
    FlagDefinition {
        name: name.into(),
        env: env.into(),
        default: default.into(),
        points: 10,
    }
}

pub fn record(name: &str, rdata: &str) -> DnsRecord {
    DnsRecord {
        name: name.into(),
        kind: "A".into(),
        rdata: rdata.into(),
    }
}

/// Two containers (web, db) and one VM.
pub fn two_containers_one_vm() -> Blueprint {
    Blueprint {
        name: "sql-injection".into(),
        tags: vec!["sqli".into()],
        containers: vec![
            ContainerSpec {
                image: "registry/web".into(),
                flags: vec![flag("Login bypass", "APP_FLAG", "flag{default}")],
                envs: vec![EnvVar {
                    env: "APP_FLAG".into(),
                    value: "flag{override}".into(),
                }],
                records: vec![record("web.lab", ""), record("static.lab", "1.2.3.4")],
                memory_mb: 256,
                cpu: 0.5,
            },
            ContainerSpec {
                image: "registry/db".into(),
                flags: vec![flag("Dump", "DB_FLAG", "flag{db}")],
                envs: vec![],
                records: vec![record("db.lab", "")],
                memory_mb: 512,
                cpu: 1.0,
            },
        ],
        vms: vec![VmSpec {
            image: "kali.ova".into(),
            memory_mb: 2048,
            flags: vec![flag("Root", "ROOT_FLAG", "flag{root}")],
        }],
    }
}

/// One container and one VM.
pub fn small() -> Blueprint {
    Blueprint {
        name: "ftp".into(),
        tags: vec!["ftp".into()],
        containers: vec![ContainerSpec {
            image: "registry/ftp".into(),
            flags: vec![flag("Anonymous", "FTP_FLAG", "flag{ftp}")],
            envs: vec![],
            records: vec![record("ftp.lab", "")],
            memory_mb: 64,
            cpu: 0.25,
        }],
        vms: vec![VmSpec {
            image: "kali.ova".into(),
            memory_mb: 1024,
            flags: vec![],
        }],
    }
}

/// Poll `cond` until it holds or a second passes.
pub async fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
