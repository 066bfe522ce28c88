//! Background delivery of active encryption keys to master nodes.
//!
//! Every tick walks all tenants and their clusters. For each cluster that is
//! not locked and has rotated its key at least once, the active key is
//! resolved and pushed to every master that does not already hold it.
//!
//! ## Guarantees
//!
//! - **Active only**: a follower replica skips every tick
//! - **Single flight**: a tick that starts while another is running does
//!   nothing; the next tick retries
//! - **Contained**: node failures are isolated per node, cluster failures
//!   per cluster and tenant listing failures per tenant; nothing escapes a
//!   tick

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::Instrument as _;

use unimgr_core::observability::rekey_span;
use unimgr_core::{ClusterId, TenantId};

use crate::error::Result;
use crate::ha::HaRole;
use crate::kms::{ActiveKey, HostPort, KeyHistory, KeyManager, NodeKeyClient};
use crate::metrics::{OrchestratorMetrics, time_rekey_tick};
use crate::registry::ClusterRegistry;

/// Enumerates tenants and the clusters they own.
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    /// Returns every tenant.
    async fn list_tenants(&self) -> Result<Vec<TenantId>>;

    /// Returns the clusters owned by `tenant_id`.
    async fn list_clusters_for_tenant(&self, tenant_id: &TenantId) -> Result<Vec<ClusterId>>;
}

/// Capabilities a rekey tick reads from and writes to.
#[derive(Clone)]
pub struct RekeyDependencies {
    /// Cluster lookup, for lock state and master addresses.
    pub registry: Arc<dyn ClusterRegistry>,
    /// Per-cluster key rotation history.
    pub key_history: Arc<dyn KeyHistory>,
    /// Resolves key references to key material.
    pub key_manager: Arc<dyn KeyManager>,
    /// Key delivery RPCs.
    pub node_keys: Arc<dyn NodeKeyClient>,
    /// Active/follower role of this process.
    pub ha_role: Arc<dyn HaRole>,
    /// Tenant and cluster enumeration.
    pub tenants: Arc<dyn TenantDirectory>,
}

impl std::fmt::Debug for RekeyDependencies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RekeyDependencies").finish_non_exhaustive()
    }
}

/// Counters for one completed tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Tenants visited.
    pub tenants: usize,
    /// Tenants whose clusters could not be listed.
    pub failed_tenants: usize,
    /// Clusters whose key could not be read or resolved.
    pub failed_clusters: usize,
    /// Clusters whose masters were checked.
    pub clusters_checked: usize,
    /// Clusters skipped (locked, never rotated, no usable key).
    pub clusters_skipped: usize,
    /// Keys pushed to nodes that lacked them.
    pub keys_pushed: usize,
    /// Nodes that already held the key.
    pub keys_present: usize,
    /// Nodes that could not be checked or pushed to.
    pub node_failures: usize,
}

/// What a call to [`RekeyScheduler::tick`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// This process is a follower (or its role is unknown); nothing ran.
    SkippedFollower,
    /// A previous tick is still running; nothing ran.
    SkippedBusy,
    /// The tick ran to completion.
    Completed(TickReport),
}

impl TickOutcome {
    /// Returns a lowercase label suitable for metrics and logs.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::SkippedFollower => "skipped_follower",
            Self::SkippedBusy => "skipped_busy",
            Self::Completed(_) => "completed",
        }
    }
}

/// Clears the running flag when a tick ends, including on unwind.
struct RunningGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> RunningGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Periodically pushes each cluster's active key to its masters.
#[derive(Debug)]
pub struct RekeyScheduler {
    deps: RekeyDependencies,
    metrics: OrchestratorMetrics,
    running: AtomicBool,
    ticks: AtomicU64,
}

impl RekeyScheduler {
    /// Creates an idle scheduler.
    #[must_use]
    pub fn new(deps: RekeyDependencies, metrics: OrchestratorMetrics) -> Self {
        Self {
            deps,
            metrics,
            running: AtomicBool::new(false),
            ticks: AtomicU64::new(0),
        }
    }

    /// Returns true while a tick is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Runs one pass over every tenant's clusters.
    pub async fn tick(&self) -> TickOutcome {
        let tick = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        let outcome = self.tick_inner().instrument(rekey_span(tick)).await;
        self.metrics.record_rekey_tick(outcome.as_label());
        outcome
    }

    async fn tick_inner(&self) -> TickOutcome {
        match self.deps.ha_role.is_follower().await {
            Ok(false) => {}
            Ok(true) => {
                tracing::debug!("follower instance, skipping rekey");
                return TickOutcome::SkippedFollower;
            }
            Err(e) => {
                tracing::warn!(error = %e, "could not determine ha role, skipping rekey");
                return TickOutcome::SkippedFollower;
            }
        }

        let Some(_running) = RunningGuard::try_acquire(&self.running) else {
            tracing::debug!("previous rekey still running, skipping");
            return TickOutcome::SkippedBusy;
        };
        let _timer = time_rekey_tick();

        let mut report = TickReport::default();
        let tenants = match self.deps.tenants.list_tenants().await {
            Ok(tenants) => tenants,
            Err(e) => {
                tracing::error!(error = %e, "failed to list tenants");
                return TickOutcome::Completed(report);
            }
        };

        for tenant_id in tenants {
            report.tenants += 1;
            if let Err(e) = self.process_tenant(&tenant_id, &mut report).await {
                report.failed_tenants += 1;
                tracing::error!(%tenant_id, error = %e, "failed to list clusters for tenant");
            }
        }

        tracing::debug!(
            tenants = report.tenants,
            failed_tenants = report.failed_tenants,
            failed_clusters = report.failed_clusters,
            clusters = report.clusters_checked,
            pushed = report.keys_pushed,
            node_failures = report.node_failures,
            "rekey tick completed"
        );
        TickOutcome::Completed(report)
    }

    async fn process_tenant(&self, tenant_id: &TenantId, report: &mut TickReport) -> Result<()> {
        let clusters = self.deps.tenants.list_clusters_for_tenant(tenant_id).await?;
        for cluster_id in clusters {
            if let Err(e) = self.process_cluster(&cluster_id, report).await {
                report.failed_clusters += 1;
                tracing::error!(%tenant_id, %cluster_id, error = %e, "rekey failed for cluster");
            }
        }
        Ok(())
    }

    async fn process_cluster(
        &self,
        cluster_id: &ClusterId,
        report: &mut TickReport,
    ) -> Result<()> {
        let Some(cluster) = self.deps.registry.get(cluster_id).await? else {
            tracing::debug!(%cluster_id, "cluster disappeared, skipping");
            report.clusters_skipped += 1;
            return Ok(());
        };
        if cluster.update_in_progress {
            tracing::debug!(%cluster_id, "cluster locked, skipping");
            report.clusters_skipped += 1;
            return Ok(());
        }
        if self.deps.key_history.num_key_rotations(cluster_id).await? == 0 {
            report.clusters_skipped += 1;
            return Ok(());
        }
        let Some(active) = self
            .deps
            .key_history
            .active_key(cluster_id)
            .await?
            .filter(ActiveKey::has_key_ref)
        else {
            tracing::debug!(%cluster_id, "no active key, skipping");
            report.clusters_skipped += 1;
            return Ok(());
        };
        let key_ref = match active.decode_key_ref() {
            Ok(key_ref) => key_ref,
            Err(e) => {
                tracing::error!(%cluster_id, error = %e, "unusable key reference, skipping");
                report.clusters_skipped += 1;
                return Ok(());
            }
        };
        let key = self
            .deps
            .key_manager
            .resolve_key(cluster_id, &active.config_id, &key_ref)
            .await?;

        report.clusters_checked += 1;
        for address in cluster.master_addresses() {
            match self.deliver(&active.key_ref, &key, &address).await {
                Ok(true) => {
                    report.keys_pushed += 1;
                    self.metrics.record_key_push("pushed");
                    tracing::info!(%cluster_id, node = %address, "pushed universe key");
                }
                Ok(false) => {
                    report.keys_present += 1;
                    self.metrics.record_key_push("present");
                }
                Err(e) => {
                    report.node_failures += 1;
                    self.metrics.record_key_push("error");
                    tracing::error!(
                        %cluster_id,
                        node = %address,
                        error = %e,
                        "key delivery failed"
                    );
                }
            }
        }
        Ok(())
    }

    /// Pushes the key to one node if it lacks it. Returns true if pushed.
    async fn deliver(&self, encoded_key_ref: &str, key: &Bytes, address: &str) -> Result<bool> {
        let node: HostPort = address.parse()?;
        if self
            .deps
            .node_keys
            .has_key_in_memory(encoded_key_ref, &node)
            .await?
        {
            return Ok(false);
        }
        self.deps
            .node_keys
            .push_key(encoded_key_ref, key, &node)
            .await?;
        Ok(true)
    }

    /// Starts ticking every `interval` until the returned handle is stopped.
    ///
    /// The first tick fires immediately. Each tick is spawned so a slow tick
    /// never delays the timer; overlapping ticks are absorbed by the
    /// single-flight guard.
    #[must_use]
    pub fn start(self: Arc<Self>, interval: Duration) -> RekeyHandle {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let period = interval.max(Duration::from_millis(1));
        let join = tokio::spawn(async move {
            let mut timer = tokio::time::interval(period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tracing::info!(interval_secs = period.as_secs(), "rekey scheduler started");
            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        let scheduler = Arc::clone(&self);
                        tokio::spawn(async move {
                            scheduler.tick().await;
                        });
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::info!("rekey scheduler stopped");
        });
        RekeyHandle { shutdown, join }
    }
}

/// Handle to a running scheduler loop.
#[derive(Debug)]
pub struct RekeyHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl RekeyHandle {
    /// Stops the timer and waits for the loop to exit.
    ///
    /// A tick already in flight runs to completion on its own.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.join.await {
            tracing::warn!(error = %e, "rekey loop ended abnormally");
        }
    }
}
