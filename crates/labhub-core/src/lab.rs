//! Lab type - one trainee-facing environment built around an exercise.

use crate::backend::{Backends, Network};
use crate::blueprint::{Blueprint, DnsRecord, FlagDefinition};
use crate::error::{HubError, Result};
use crate::exercise::{cancellable, Exercise};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Host suffix reserved for the lab's DNS server on its network.
pub const DNS_SUFFIX: u8 = 3;

/// Length of the human-facing lab tag.
const TAG_LEN: usize = 8;

/// Unique identifier for a lab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LabId(Uuid);

impl LabId {
    /// Create a new random lab ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Short tag derived from the ID, used to look labs up.
    fn tag(&self) -> String {
        self.0.simple().to_string()[..TAG_LEN].to_string()
    }
}

impl Default for LabId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for LabId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// A lab: one exercise plus the network it lives on.
///
/// Labs are shared as `Arc<Lab>` between the hub and its callers. The
/// exercise sits behind an async mutex, so lifecycle calls on the same lab
/// are serialized rather than interleaved.
pub struct Lab {
    id: LabId,
    tag: String,
    created_at: DateTime<Utc>,
    dns_address: String,
    blueprint: Arc<Blueprint>,
    network: Arc<dyn Network>,
    /// Set once the network teardown has been issued.
    network_closed: AtomicBool,
    exercise: Mutex<Exercise>,
}

impl Lab {
    /// Wrap an exercise (usually already created) into a lab.
    pub fn new(exercise: Exercise) -> Self {
        let id = LabId::new();
        Self {
            tag: id.tag(),
            id,
            created_at: Utc::now(),
            dns_address: exercise.dns_address().to_string(),
            blueprint: Arc::clone(exercise.blueprint()),
            network: Arc::clone(exercise.network()),
            network_closed: AtomicBool::new(false),
            exercise: Mutex::new(exercise),
        }
    }

    pub fn id(&self) -> LabId {
        self.id
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Address of the lab's DNS server.
    pub fn dns_address(&self) -> &str {
        &self.dns_address
    }

    pub fn blueprint(&self) -> &Arc<Blueprint> {
        &self.blueprint
    }

    /// Flag definitions of the lab's blueprint.
    pub fn flags(&self) -> Vec<FlagDefinition> {
        self.blueprint.flags()
    }

    /// Resolved DNS records of the lab.
    pub async fn dns_records(&self) -> Vec<DnsRecord> {
        self.exercise.lock().await.dns_records().to_vec()
    }

    /// Number of machines currently held by the exercise.
    pub async fn machine_count(&self) -> usize {
        self.exercise.lock().await.machines().len()
    }

    pub async fn start(&self) -> Result<()> {
        tracing::debug!(lab_id = %self.id, tag = %self.tag, "Starting lab");
        self.exercise.lock().await.start().await
    }

    pub async fn stop(&self) -> Result<()> {
        tracing::debug!(lab_id = %self.id, tag = %self.tag, "Stopping lab");
        self.exercise.lock().await.stop().await
    }

    pub async fn reset(&self) -> Result<()> {
        tracing::info!(lab_id = %self.id, tag = %self.tag, "Resetting lab");
        self.exercise.lock().await.reset().await
    }

    /// Close every machine, then the network.
    ///
    /// The network is closed even when a machine fails to close; the first
    /// error is returned. The network is only torn down on the first call.
    pub async fn close(&self) -> Result<()> {
        let start = std::time::Instant::now();
        tracing::debug!(lab_id = %self.id, tag = %self.tag, "Closing lab");

        let machines = self.exercise.lock().await.close().await;
        let network = if self.network_closed.swap(true, Ordering::SeqCst) {
            Ok(())
        } else {
            self.network.close().await.map_err(HubError::Backend)
        };

        machines?;
        network?;
        tracing::info!(
            lab_id = %self.id,
            tag = %self.tag,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Lab closed"
        );
        Ok(())
    }
}

impl fmt::Debug for Lab {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lab")
            .field("id", &self.id)
            .field("tag", &self.tag)
            .field("blueprint", &self.blueprint.name)
            .finish()
    }
}

/// Builds ready-to-start labs for the hub.
#[async_trait]
pub trait LabFactory: Send + Sync {
    /// Build a lab whose machines exist but have not been started.
    async fn new_lab(
        &self,
        blueprint: Arc<Blueprint>,
        backends: &Backends,
        cancel: CancellationToken,
    ) -> Result<Lab>;
}

/// Default factory: one fresh network and one created exercise per lab.
#[derive(Debug, Default, Clone, Copy)]
pub struct LabHost;

#[async_trait]
impl LabFactory for LabHost {
    async fn new_lab(
        &self,
        blueprint: Arc<Blueprint>,
        backends: &Backends,
        cancel: CancellationToken,
    ) -> Result<Lab> {
        let network = cancellable(&cancel, backends.networks.create_network(&cancel)).await?;
        let dns_address = network.format_ip(DNS_SUFFIX);

        let mut exercise = Exercise::new(
            blueprint,
            Arc::clone(&network),
            dns_address,
            Arc::clone(&backends.runtime),
            Arc::clone(&backends.hypervisor),
            cancel,
        );

        if let Err(e) = exercise.create().await {
            tracing::warn!(error = %e, "Exercise creation failed, closing partial lab");
            if let Err(close_err) = exercise.close().await {
                tracing::warn!(error = %close_err, "Failed to close partial exercise");
            }
            if let Err(close_err) = network.close().await {
                tracing::warn!(error = %close_err, "Failed to close lab network");
            }
            return Err(e);
        }

        Ok(Lab::new(exercise))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lab_id_display() {
        let id = LabId::new();
        let s = format!("{}", id);
        assert_eq!(s.len(), 36);
        assert!(s.contains('-'));
    }

    #[test]
    fn test_lab_tag_is_short_hex() {
        let id = LabId::new();
        let tag = id.tag();
        assert_eq!(tag.len(), TAG_LEN);
        assert!(tag.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(id.to_string().starts_with(&tag));
    }

    #[test]
    fn test_lab_id_from_uuid() {
        let uuid = Uuid::new_v4();
        let id: LabId = uuid.into();
        assert_eq!(id.as_uuid(), uuid);
    }
}
