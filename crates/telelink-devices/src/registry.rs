//! Registry of active devices.
//!
//! Each device identifier maps to a once-cell holding its handler. The map's
//! shard lock is only held while fetching or inserting a cell; handler
//! construction runs inside the cell, so concurrent duplicate registrations
//! construct exactly one handler while lookups for other devices proceed.
//! Cells that are still being initialised are invisible to every read
//! operation.
//!
//! Every slot carries a teardown marker. A removed slot stays on the
//! device's pending list until its handler is stopped and its sub-link
//! disabled, or until it is known to hold no handler at all. A new handler
//! for the same device is only built once that list is drained, so an old
//! teardown never withdraws the sub-link of its successor.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use telelink_core::{lifecycle_err, Error, EventProducer, Result};
use tokio::sync::{watch, OnceCell};
use tracing::{debug, warn};

use crate::handler::TelemetryHandler;
use crate::link_manager::LinkManager;

/// Default bound on waiting for a previous handler's teardown.
pub const DEFAULT_TEARDOWN_TIMEOUT: Duration = Duration::from_secs(5);

struct DeviceSlot {
    cell: OnceCell<Arc<dyn TelemetryHandler>>,
    /// Set once the slot's handler is torn down or will never exist
    torn_down: watch::Sender<bool>,
    /// Whoever wins this runs the teardown
    claimed: AtomicBool,
}

impl Default for DeviceSlot {
    fn default() -> Self {
        Self {
            cell: OnceCell::new(),
            torn_down: watch::channel(false).0,
            claimed: AtomicBool::new(false),
        }
    }
}

impl DeviceSlot {
    fn claim(&self) -> bool {
        !self.claimed.swap(true, Ordering::AcqRel)
    }

    fn release(&self) {
        self.torn_down.send_replace(true);
    }
}

type Slot = Arc<DeviceSlot>;

enum InitError {
    /// The slot was dropped from the map by a failed attempt; retry on a fresh one
    Stale,
    Failed(Error),
}

/// Completion handle of a device teardown.
///
/// Dropping it lets the teardown finish in the background.
pub struct Removal {
    device_id: String,
    done: watch::Receiver<bool>,
}

impl Removal {
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Whether the teardown has completed.
    pub fn is_finished(&self) -> bool {
        teardown_finished(&self.done)
    }

    /// Wait until the handler is stopped and its sub-link disabled.
    pub async fn wait(mut self) {
        if self.done.wait_for(|done| *done).await.is_err() {
            warn!("Teardown of device {} did not complete", self.device_id);
        }
    }
}

impl std::fmt::Debug for Removal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Removal")
            .field("device_id", &self.device_id)
            .field("finished", &self.is_finished())
            .finish()
    }
}

fn teardown_finished(done: &watch::Receiver<bool>) -> bool {
    // A dropped sender means the slot is gone along with any handler
    done.has_changed().is_err() || *done.borrow()
}

/// Device identifier → live handler.
pub struct DeviceRegistry {
    entries: DashMap<String, Slot>,
    /// Teardowns still running, by device identifier
    teardowns: DashMap<String, Vec<watch::Receiver<bool>>>,
    teardown_timeout: Duration,
    link_manager: Arc<dyn LinkManager>,
    events: EventProducer,
}

impl DeviceRegistry {
    pub fn new(link_manager: Arc<dyn LinkManager>, events: EventProducer) -> Self {
        Self {
            entries: DashMap::new(),
            teardowns: DashMap::new(),
            teardown_timeout: DEFAULT_TEARDOWN_TIMEOUT,
            link_manager,
            events,
        }
    }

    /// Bound the wait for a previous handler of the same device to be torn
    /// down before a new one is built.
    pub fn with_teardown_timeout(mut self, timeout: Duration) -> Self {
        self.teardown_timeout = timeout;
        self
    }

    /// Return the handler for `device_id`, creating it with `init` if absent.
    ///
    /// The boolean is `true` when this call created the handler. Concurrent
    /// callers for the same identifier wait for the one running `init` and
    /// observe its handler. When `init` fails nothing is stored and a later
    /// call tries again. No registry lock is held while `init` runs.
    ///
    /// A previous handler of the same device that is still being torn down
    /// is waited for before `init` runs. If that takes longer than the
    /// teardown timeout, [`Error::Lifecycle`] is returned without calling
    /// `init`.
    ///
    /// If the device is removed while `init` is still running, the new
    /// handler is torn down and [`Error::Lifecycle`] is returned.
    pub async fn register_if_absent<F, Fut>(
        &self,
        device_id: &str,
        init: F,
    ) -> Result<(Arc<dyn TelemetryHandler>, bool)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<dyn TelemetryHandler>>>,
    {
        let mut init = Some(init);
        loop {
            let slot = self.slot(device_id);
            let mut created = false;

            let init_ref = &mut init;
            let created_ref = &mut created;
            let slot_ref = &slot;
            let result = slot
                .cell
                .get_or_try_init(move || async move {
                    if !self.is_current(device_id, slot_ref) {
                        return Err(InitError::Stale);
                    }
                    let init = init_ref.take().ok_or(InitError::Stale)?;
                    self.wait_for_teardown(device_id)
                        .await
                        .map_err(InitError::Failed)?;
                    *created_ref = true;
                    init().await.map_err(InitError::Failed)
                })
                .await
                .cloned();

            match result {
                Ok(handler) if self.is_current(device_id, &slot) => return Ok((handler, created)),
                Ok(handler) => {
                    if created && slot.claim() {
                        debug!("Device {} was removed during registration", device_id);
                        self.spawn_teardown(handler, "removed during registration", slot.clone());
                    }
                    return Err(lifecycle_err!(
                        "device {} was removed during registration",
                        device_id
                    ));
                }
                Err(InitError::Stale) => continue,
                Err(InitError::Failed(e)) => {
                    self.entries
                        .remove_if(device_id, |_, s| Arc::ptr_eq(s, &slot) && !s.cell.initialized());
                    slot.release();
                    return Err(e);
                }
            }
        }
    }

    /// Remove a device and tear its handler down in the background.
    ///
    /// Returns `None` when no handler was registered. Must be called from
    /// within a Tokio runtime.
    pub fn remove(&self, device_id: &str) -> Option<Removal> {
        self.remove_with_reason(device_id, "metadata cleared")
    }

    /// Remove every device. Used when the aggregate link stops.
    pub fn clear(&self) -> Vec<Removal> {
        let ids: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        ids.iter()
            .filter_map(|id| self.remove_with_reason(id, "link stopped"))
            .collect()
    }

    /// The handler registered for `device_id`, if any. Never creates one.
    pub fn lookup(&self, device_id: &str) -> Option<Arc<dyn TelemetryHandler>> {
        self.entries
            .get(device_id)
            .and_then(|slot| slot.value().cell.get().cloned())
    }

    pub fn contains(&self, device_id: &str) -> bool {
        self.lookup(device_id).is_some()
    }

    /// Every registered handler, ordered by device identifier.
    pub fn handlers(&self) -> Vec<Arc<dyn TelemetryHandler>> {
        let mut handlers: Vec<Arc<dyn TelemetryHandler>> = self
            .entries
            .iter()
            .filter_map(|e| e.value().cell.get().cloned())
            .collect();
        handlers.sort_by(|a, b| a.device_id().cmp(b.device_id()));
        handlers
    }

    /// Registered device identifiers, sorted.
    pub fn device_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.value().cell.initialized())
            .map(|e| e.key().clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.value().cell.initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, device_id: &str) -> Slot {
        self.entries
            .entry(device_id.to_string())
            .or_default()
            .clone()
    }

    fn is_current(&self, device_id: &str, slot: &Slot) -> bool {
        self.entries
            .get(device_id)
            .is_some_and(|current| Arc::ptr_eq(current.value(), slot))
    }

    async fn wait_for_teardown(&self, device_id: &str) -> Result<()> {
        let pending: Vec<watch::Receiver<bool>> = self
            .teardowns
            .get(device_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        if pending.iter().all(teardown_finished) {
            return Ok(());
        }

        debug!("Waiting for previous handler of {} to be torn down", device_id);
        let all = futures::future::join_all(pending.into_iter().map(|mut done| async move {
            let _ = done.wait_for(|done| *done).await;
        }));
        if tokio::time::timeout(self.teardown_timeout, all).await.is_err() {
            warn!(
                "Previous handler of {} not torn down within {:?}",
                device_id, self.teardown_timeout
            );
            return Err(lifecycle_err!(
                "previous handler of device {} is still being torn down",
                device_id
            ));
        }
        Ok(())
    }

    /// Put a removed slot on its device's pending teardown list.
    fn track_teardown(&self, device_id: &str, slot: &Slot) {
        self.teardowns.retain(|_, pending| {
            pending.retain(|done| !teardown_finished(done));
            !pending.is_empty()
        });
        self.teardowns
            .entry(device_id.to_string())
            .or_default()
            .push(slot.torn_down.subscribe());
    }

    fn remove_with_reason(&self, device_id: &str, reason: &'static str) -> Option<Removal> {
        let (_, slot) = self.entries.remove(device_id)?;
        self.track_teardown(device_id, &slot);

        // In-flight creations are torn down, or released, by their creator
        let handler = slot.cell.get()?.clone();
        if slot.claim() {
            self.spawn_teardown(handler, reason, slot.clone());
        }
        Some(Removal {
            device_id: device_id.to_string(),
            done: slot.torn_down.subscribe(),
        })
    }

    fn spawn_teardown(&self, handler: Arc<dyn TelemetryHandler>, reason: &'static str, slot: Slot) {
        let link_manager = self.link_manager.clone();
        let events = self.events.clone();

        tokio::spawn(async move {
            if let Err(e) = handler.stop().await {
                events.send_warning(format!("Failed to stop {}: {}", handler.name(), e));
            }
            if let Err(e) = link_manager.disable(handler.name()).await {
                events.send_warning(format!(
                    "Failed to disable sub-link {}: {}",
                    handler.name(),
                    e
                ));
            }
            events.send_info(format!("Removed device {} ({})", handler.device_id(), reason));
            slot.release();
        });
    }
}
