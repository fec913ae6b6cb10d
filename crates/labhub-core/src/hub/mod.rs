//! Warm lab pool ("hub").
//!
//! The hub keeps a buffer of started labs ready to hand out, throttles how
//! many labs are built at once, and caps how many labs may be outstanding in
//! total.
//!
//! # Architecture
//!
//! ```text
//!            build()                          get()
//!               │                               │
//!   ┌───────────▼───────────┐        ┌──────────▼──────────┐
//!   │ add_lab × warm_size   │        │ pop from warm buffer │
//!   │  capacity permit      │        │ record as dispensed  │
//!   │  creation permit      │        │ below low-water mark │──┐
//!   │  factory → start      │        └──────────────────────┘  │
//!   │  push to warm buffer  │◀───────── spawn add_lab ─────────┘
//!   └───────────────────────┘
//! ```
//!
//! Each lab holds its capacity permit for as long as the hub tracks it.
//! Construction failures, start failures and labs the buffer refuses give
//! their permit back.
//!
//! # Example
//!
//! ```ignore
//! use labhub_core::{Backends, Blueprint, Hub, HubConfig};
//!
//! let hub = Hub::builder(blueprint, backends)
//!     .config(HubConfig::new(2, 5))
//!     .build()
//!     .await?;
//!
//! let lab = hub.get()?;
//! lab.reset().await?;
//!
//! hub.close().await?;
//! ```

mod buffer;

use crate::backend::{Backends, ProgressSink};
use crate::blueprint::{Blueprint, FlagDefinition};
use crate::config::HubConfig;
use crate::error::{HubError, Result};
use crate::lab::{Lab, LabFactory, LabHost};
use crate::semaphore::{CountingSemaphore, SemaphoreGuard};
use buffer::{Rejected, WarmBuffer};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Message sent to the progress sink once pre-warming finished.
const READY_MESSAGE: &str = "\n----> Labs are ready to use...\n";

// ============================================================================
// Statistics
// ============================================================================

/// Hub statistics for observability.
///
/// All counters are atomic and can be read without locking.
#[derive(Debug, Default)]
pub struct HubStats {
    /// Labs built, started and placed in the warm buffer.
    pub created: AtomicU64,
    /// Labs whose construction or start failed.
    pub failed: AtomicU64,
    /// Labs handed out by `get`.
    pub dispensed: AtomicU64,
    /// Labs closed by the hub.
    pub closed: AtomicU64,
}

impl HubStats {
    pub fn created(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn dispensed(&self) -> u64 {
        self.dispensed.load(Ordering::Relaxed)
    }

    pub fn closed(&self) -> u64 {
        self.closed.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Hub Implementation
// ============================================================================

/// A lab plus the capacity permit it occupies.
struct Slot {
    lab: Arc<Lab>,
    _capacity: SemaphoreGuard,
}

struct HubInner {
    blueprint: Arc<Blueprint>,
    backends: Backends,
    factory: Arc<dyn LabFactory>,
    config: HubConfig,
    /// Every lab handed out, in dispense order.
    labs: Mutex<Vec<Slot>>,
    buffer: WarmBuffer<Slot>,
    create_sema: CountingSemaphore,
    capacity_sema: CountingSemaphore,
    cancel: CancellationToken,
    closed: AtomicBool,
    stats: HubStats,
    runtime: Handle,
}

impl HubInner {
    /// Build, start and buffer one lab.
    async fn add_lab(self: Arc<Self>) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(HubError::Closed);
        }
        if self.capacity_sema.available() == 0 {
            return Err(HubError::MaximumLabs);
        }

        let capacity = self.capacity_sema.claim_guard().await?;
        let creating = self.create_sema.claim_guard().await?;

        let lab = match self
            .factory
            .new_lab(
                Arc::clone(&self.blueprint),
                &self.backends,
                self.cancel.child_token(),
            )
            .await
        {
            Ok(lab) => Arc::new(lab),
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(error = %e, "Error while creating new lab");
                return Err(e);
            }
        };

        if let Err(e) = lab.start().await {
            self.stats.failed.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(lab_id = %lab.id(), error = %e, "Error while starting lab");
            self.runtime.spawn(async move {
                if let Err(e) = lab.close().await {
                    tracing::warn!(lab_id = %lab.id(), error = %e, "Error while closing lab");
                }
                drop(capacity);
            });
            return Err(e);
        }
        drop(creating);

        let lab_id = lab.id();
        match self.buffer.try_push(Slot {
            lab,
            _capacity: capacity,
        }) {
            Ok(buffered) => {
                self.stats.created.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(lab_id = %lab_id, buffered, "Lab added to warm buffer");
            }
            Err((slot, reason)) => {
                tracing::debug!(lab_id = %lab_id, ?reason, "Warm buffer refused lab, closing it");
                let inner = Arc::clone(&self);
                self.runtime.spawn(async move {
                    close_lab(&inner, &slot.lab).await;
                    drop(slot);
                });
                return Err(match reason {
                    Rejected::Closed => HubError::Closed,
                    Rejected::Full => HubError::MaximumLabs,
                });
            }
        }

        Ok(())
    }

    /// Schedule one replacement lab without waiting for it.
    fn replenish(self: &Arc<Self>) {
        let inner = Arc::clone(self);
        self.runtime.spawn(async move {
            match inner.add_lab().await {
                Ok(()) => {}
                Err(e) if e.is_capacity_exhausted() => {
                    tracing::debug!("No room for another lab, not replenishing");
                }
                Err(HubError::Closed) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "Error while adding lab");
                }
            }
        });
    }
}

/// A pool of pre-started labs for instant dispensing.
///
/// # Thread Safety
///
/// All methods take `&self`; wrap the hub in an `Arc` to share it between
/// tasks.
pub struct Hub {
    inner: Arc<HubInner>,
}

impl Hub {
    /// Start configuring a hub for `blueprint` on top of `backends`.
    pub fn builder(blueprint: impl Into<Arc<Blueprint>>, backends: Backends) -> HubBuilder {
        HubBuilder {
            blueprint: blueprint.into(),
            backends,
            config: HubConfig::default(),
            factory: Arc::new(LabHost),
            progress: None,
        }
    }

    /// Take the oldest lab from the warm buffer.
    ///
    /// Never waits: an empty buffer fails with [`HubError::MaximumLabs`].
    /// When the buffer is left at or below the low-water mark a replacement
    /// is built in the background.
    pub fn get(&self) -> Result<Arc<Lab>> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(HubError::Closed);
        }

        // Hold the dispensed list while popping so `close` sees the lab in
        // one place or the other.
        let mut labs = self.inner.labs.lock();
        let (slot, remaining) = self.inner.buffer.try_pop().ok_or(HubError::MaximumLabs)?;
        let lab = Arc::clone(&slot.lab);
        labs.push(slot);
        drop(labs);

        self.inner.stats.dispensed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(lab_id = %lab.id(), tag = %lab.tag(), remaining, "Lab dispensed");

        if remaining <= self.inner.config.low_water_mark {
            self.inner.replenish();
        }

        Ok(lab)
    }

    /// Number of labs currently waiting in the warm buffer.
    pub fn available(&self) -> usize {
        self.inner.buffer.len()
    }

    /// Capacity permits not held by any lab (buffered, dispensed or being built).
    ///
    /// A snapshot; it may be stale under concurrent construction.
    pub fn remaining_capacity(&self) -> usize {
        self.inner.capacity_sema.available()
    }

    /// Flag definitions of the hub's blueprint.
    pub fn flags(&self) -> Vec<FlagDefinition> {
        self.inner.blueprint.flags()
    }

    /// Snapshot of every dispensed lab, in dispense order.
    pub fn labs(&self) -> Vec<Arc<Lab>> {
        self.inner
            .labs
            .lock()
            .iter()
            .map(|slot| Arc::clone(&slot.lab))
            .collect()
    }

    /// First dispensed lab carrying `tag`.
    pub fn lab_by_tag(&self, tag: &str) -> Result<Arc<Lab>> {
        self.inner
            .labs
            .lock()
            .iter()
            .find(|slot| slot.lab.tag() == tag)
            .map(|slot| Arc::clone(&slot.lab))
            .ok_or_else(|| HubError::LabNotFound(tag.to_string()))
    }

    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> &HubStats {
        &self.inner.stats
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Tear the hub down.
    ///
    /// Refuses further buffering, cancels in-flight provisioning, then
    /// closes every dispensed and buffered lab concurrently and waits for
    /// all of them. Individual close failures are logged; the call itself
    /// always succeeds. Calling it again is a no-op.
    pub async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::info!("Closing lab hub");

        let buffered = self.inner.buffer.close();
        self.inner.cancel.cancel();
        self.inner.create_sema.close();
        self.inner.capacity_sema.close();

        let dispensed = self.labs();
        let count = dispensed.len() + buffered.len();
        tracing::info!(
            dispensed = dispensed.len(),
            buffered = buffered.len(),
            "Closing labs"
        );

        let mut tasks = JoinSet::new();
        for lab in dispensed {
            let inner = Arc::clone(&self.inner);
            tasks.spawn(async move {
                close_lab(&inner, &lab).await;
            });
        }
        for slot in buffered {
            let inner = Arc::clone(&self.inner);
            tasks.spawn(async move {
                close_lab(&inner, &slot.lab).await;
                drop(slot);
            });
        }

        while let Some(res) = tasks.join_next().await {
            if let Err(e) = res {
                tracing::error!(error = ?e, "Lab close task panicked");
            }
        }

        tracing::info!(
            closed = count,
            created = self.inner.stats.created(),
            dispensed = self.inner.stats.dispensed(),
            failed = self.inner.stats.failed(),
            "Lab hub closed"
        );
        Ok(())
    }
}

async fn close_lab(inner: &HubInner, lab: &Lab) {
    match lab.close().await {
        Ok(()) => {
            inner.stats.closed.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => {
            tracing::warn!(lab_id = %lab.id(), error = %e, "Error while closing hub lab");
        }
    }
}

/// Builder for [`Hub`].
pub struct HubBuilder {
    blueprint: Arc<Blueprint>,
    backends: Backends,
    config: HubConfig,
    factory: Arc<dyn LabFactory>,
    progress: Option<Arc<dyn ProgressSink>>,
}

impl HubBuilder {
    /// Set warm size, hard cap and throttles.
    pub fn config(mut self, config: HubConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a custom lab factory instead of [`LabHost`].
    pub fn factory(mut self, factory: Arc<dyn LabFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Report pre-warm progress to `sink`.
    pub fn progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(sink);
        self
    }

    /// Validate the configuration and pre-warm `warm_size` labs.
    ///
    /// Returns once every initial construction finished. Failed
    /// constructions are logged and leave the hub with fewer warm labs;
    /// they never fail the build.
    ///
    /// # Errors
    ///
    /// [`HubError::AvailableSize`] if `warm_size > capacity`, before any lab
    /// is built.
    pub async fn build(self) -> Result<Hub> {
        self.config.validate()?;

        tracing::info!(
            blueprint = %self.blueprint.name,
            warm_size = self.config.warm_size,
            capacity = self.config.capacity,
            create_limit = self.config.create_limit,
            "Creating lab hub"
        );

        let inner = Arc::new(HubInner {
            buffer: WarmBuffer::new(self.config.warm_size),
            create_sema: CountingSemaphore::new(self.config.create_limit),
            capacity_sema: CountingSemaphore::new(self.config.capacity),
            labs: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
            stats: HubStats::default(),
            runtime: Handle::current(),
            blueprint: self.blueprint,
            backends: self.backends,
            factory: self.factory,
            config: self.config,
        });

        prewarm(&inner, self.progress.as_deref()).await;

        tracing::info!(available = inner.buffer.len(), "Lab hub ready");
        Ok(Hub { inner })
    }
}

async fn prewarm(inner: &Arc<HubInner>, progress: Option<&dyn ProgressSink>) {
    let count = inner.config.warm_size;
    tracing::debug!(count, "Instantiating labs");

    let mut tasks = JoinSet::new();
    for _ in 0..count {
        tasks.spawn(Arc::clone(inner).add_lab());
    }

    while let Some(res) = tasks.join_next().await {
        let msg = match res {
            Ok(Ok(())) => "lab ready",
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Error while adding lab");
                "lab failed to start"
            }
            Err(e) => {
                tracing::error!(error = ?e, "Lab creation task panicked");
                "lab failed to start"
            }
        };
        send_progress(progress, msg);
    }

    send_progress(progress, READY_MESSAGE);
}

fn send_progress(progress: Option<&dyn ProgressSink>, msg: &str) {
    if let Some(sink) = progress {
        if let Err(e) = sink.send(msg) {
            tracing::debug!(error = %e, "Failed to send progress message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{
        ContainerRuntime, Hypervisor, Instance, Network, NetworkProvider, VmOption,
    };
    use crate::blueprint::{ContainerLaunchSpec, ContainerSpec};
    use crate::error::BoxError;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[derive(Default)]
    struct Counters {
        closes: AtomicUsize,
        networks_closed: AtomicUsize,
    }

    struct TestMachine(Arc<Counters>);

    #[async_trait]
    impl Instance for TestMachine {
        fn id(&self) -> String {
            "machine".into()
        }

        async fn start(&self) -> std::result::Result<(), BoxError> {
            Ok(())
        }

        async fn close(&self) -> std::result::Result<(), BoxError> {
            self.0.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Backend(Arc<Counters>);

    #[async_trait]
    impl ContainerRuntime for Backend {
        async fn create_container(
            &self,
            _spec: &ContainerLaunchSpec,
            _cancel: &CancellationToken,
        ) -> std::result::Result<Arc<dyn Instance>, BoxError> {
            Ok(Arc::new(TestMachine(Arc::clone(&self.0))))
        }
    }

    #[async_trait]
    impl Hypervisor for Backend {
        async fn get_copy(
            &self,
            _image: &str,
            _options: &[VmOption],
            _cancel: &CancellationToken,
        ) -> std::result::Result<Arc<dyn Instance>, BoxError> {
            Ok(Arc::new(TestMachine(Arc::clone(&self.0))))
        }
    }

    #[async_trait]
    impl NetworkProvider for Backend {
        async fn create_network(
            &self,
            _cancel: &CancellationToken,
        ) -> std::result::Result<Arc<dyn Network>, BoxError> {
            Ok(Arc::new(Net(Arc::clone(&self.0))))
        }
    }

    struct Net(Arc<Counters>);

    #[async_trait]
    impl Network for Net {
        async fn connect(
            &self,
            _instance: &dyn Instance,
            _mac_address: Option<&str>,
            suffix: Option<u8>,
        ) -> std::result::Result<u8, BoxError> {
            Ok(suffix.unwrap_or(10))
        }

        fn format_ip(&self, suffix: u8) -> String {
            format!("10.9.9.{suffix}")
        }

        fn interface(&self) -> String {
            "br-test".into()
        }

        async fn close(&self) -> std::result::Result<(), BoxError> {
            self.0.networks_closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn one_container() -> Blueprint {
        Blueprint {
            name: "single".into(),
            containers: vec![ContainerSpec {
                image: "registry/web".into(),
                flags: vec![],
                envs: vec![],
                records: vec![],
                memory_mb: 64,
                cpu: 0.1,
            }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_lab_refused_by_full_buffer_is_closed() {
        let counters = Arc::new(Counters::default());
        let backend = Arc::new(Backend(Arc::clone(&counters)));
        let backends = Backends::new(backend.clone(), backend.clone(), backend);

        // a zero-sized warm buffer refuses every lab
        let hub = Hub::builder(one_container(), backends)
            .config(HubConfig::new(0, 2))
            .build()
            .await
            .unwrap();

        let res = Arc::clone(&hub.inner).add_lab().await;
        assert!(matches!(res, Err(HubError::MaximumLabs)));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
        assert_eq!(counters.networks_closed.load(Ordering::SeqCst), 1);
        assert_eq!(hub.remaining_capacity(), 2);
        assert_eq!(hub.available(), 0);
        assert_eq!(hub.stats().created(), 0);
        assert_eq!(hub.stats().closed(), 1);
    }

    #[test]
    fn test_hub_stats_default() {
        let stats = HubStats::default();
        assert_eq!(stats.created(), 0);
        assert_eq!(stats.failed(), 0);
        assert_eq!(stats.dispensed(), 0);
        assert_eq!(stats.closed(), 0);
    }

    #[test]
    fn test_hub_stats_counters() {
        let stats = HubStats::default();
        stats.created.fetch_add(2, Ordering::Relaxed);
        stats.dispensed.fetch_add(1, Ordering::Relaxed);
        assert_eq!(stats.created(), 2);
        assert_eq!(stats.dispensed(), 1);
    }
}
