use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::{
    error::SyncError,
    filter::{
        apply_filter, derive_view, server_query, FilterDef, FilterDomain, FilterEffect, FilterState,
    },
    resource::{fetch_list, Auxiliary, Endpoint, Resource},
    transport::Transport,
};

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    Loading,
    Ready,
    Failed,
}

/// State changes published to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    Loading {
        resource: &'static str,
        seq: u64,
    },
    Ready {
        resource: &'static str,
        seq: u64,
        records: usize,
    },
    Failed {
        resource: &'static str,
        seq: u64,
        reason: String,
    },
    Removed {
        resource: &'static str,
        key: String,
    },
    FiltersChanged {
        resource: &'static str,
    },
}

#[derive(Debug)]
pub enum LoadOutcome {
    Ready { records: usize },
    Failed(SyncError),
    /// A newer load was issued before this one resolved; its response was dropped.
    Superseded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    Cancelled,
}

/// First step of a delete: the record exists and the caller must confirm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDelete<K> {
    pub key: K,
    pub prompt: String,
}

/// Yes/no gate consulted before a delete request is issued.
#[async_trait]
pub trait ConfirmGate: Send + Sync {
    async fn confirm(&self, prompt: &str) -> bool;
}

pub struct AlwaysConfirm;

#[async_trait]
impl ConfirmGate for AlwaysConfirm {
    async fn confirm(&self, _prompt: &str) -> bool {
        true
    }
}

/// Consistent copy of a synchronizer's state.
#[derive(Debug, Clone)]
pub struct SyncSnapshot<R: Resource> {
    pub phase: SyncPhase,
    pub error: Option<String>,
    pub collection: Vec<R>,
    pub auxiliary: R::Auxiliary,
    pub filters: FilterState,
    pub loaded_at: Option<DateTime<Utc>>,
}

struct SyncState<R: Resource> {
    phase: SyncPhase,
    collection: Vec<R>,
    auxiliary: R::Auxiliary,
    error: Option<String>,
    filters: FilterState,
    latest_seq: u64,
    loaded_at: Option<DateTime<Utc>>,
    detached: bool,
}

impl<R: Resource> SyncState<R> {
    /// Phase implied by the last applied load.
    fn settled_phase(&self) -> SyncPhase {
        if self.error.is_some() {
            SyncPhase::Failed
        } else if self.loaded_at.is_some() {
            SyncPhase::Ready
        } else {
            SyncPhase::Idle
        }
    }
}

struct MutationGuard<'a>(&'a AtomicBool);

impl Drop for MutationGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Keeps one remote collection in sync and exposes a filtered view of it.
pub struct ResourceSynchronizer<R: Resource> {
    transport: Arc<dyn Transport>,
    endpoint: Endpoint,
    filter_defs: Vec<FilterDef<R>>,
    inner: Mutex<SyncState<R>>,
    mutation_in_flight: AtomicBool,
    events: broadcast::Sender<SyncEvent>,
}

impl<R: Resource> ResourceSynchronizer<R> {
    pub fn new(transport: Arc<dyn Transport>, endpoint: Endpoint) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(Self {
            transport,
            endpoint,
            filter_defs: R::filters(),
            inner: Mutex::new(SyncState {
                phase: SyncPhase::Idle,
                collection: Vec::new(),
                auxiliary: Default::default(),
                error: None,
                filters: FilterState::default(),
                latest_seq: 0,
                loaded_at: None,
                detached: false,
            }),
            mutation_in_flight: AtomicBool::new(false),
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn filter_names(&self) -> Vec<&'static str> {
        self.filter_defs.iter().map(|d| d.name).collect()
    }

    fn publish(&self, event: SyncEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Fetches the collection together with its auxiliary collections. Only the
    /// response of the most recently issued load is applied.
    pub async fn load(&self) -> Result<LoadOutcome, SyncError> {
        let (seq, query) = {
            let mut guard = self.inner.lock().await;
            if guard.detached {
                return Err(SyncError::Detached { resource: R::NAME });
            }
            guard.latest_seq += 1;
            guard.phase = SyncPhase::Loading;
            (
                guard.latest_seq,
                server_query(&self.filter_defs, &guard.filters),
            )
        };
        self.publish(SyncEvent::Loading {
            resource: R::NAME,
            seq,
        });

        let transport = self.transport.as_ref();
        let result = futures::try_join!(
            fetch_list::<R>(transport, self.endpoint.list_path(), &query),
            <R::Auxiliary as Auxiliary>::fetch(transport),
        );

        let mut guard = self.inner.lock().await;
        if guard.detached {
            debug!(resource = R::NAME, seq, "sync: dropping load response after detach");
            return Err(SyncError::Detached { resource: R::NAME });
        }
        if seq != guard.latest_seq {
            debug!(
                resource = R::NAME,
                seq,
                latest = guard.latest_seq,
                "sync: dropping stale load response"
            );
            return Ok(LoadOutcome::Superseded);
        }

        match result {
            Ok((collection, auxiliary)) => {
                let records = collection.len();
                guard.collection = collection;
                guard.auxiliary = auxiliary;
                guard.error = None;
                guard.phase = SyncPhase::Ready;
                guard.loaded_at = Some(Utc::now());
                drop(guard);
                info!(resource = R::NAME, seq, records, "sync: collection loaded");
                self.publish(SyncEvent::Ready {
                    resource: R::NAME,
                    seq,
                    records,
                });
                Ok(LoadOutcome::Ready { records })
            }
            Err(err) => {
                let reason = err.to_string();
                guard.error = Some(reason.clone());
                guard.phase = SyncPhase::Failed;
                drop(guard);
                warn!(resource = R::NAME, seq, error = %reason, "sync: load failed");
                self.publish(SyncEvent::Failed {
                    resource: R::NAME,
                    seq,
                    reason,
                });
                Ok(LoadOutcome::Failed(err))
            }
        }
    }

    fn begin_mutation(&self) -> Result<MutationGuard<'_>, SyncError> {
        if self.mutation_in_flight.swap(true, Ordering::AcqRel) {
            return Err(SyncError::Busy { resource: R::NAME });
        }
        Ok(MutationGuard(&self.mutation_in_flight))
    }

    async fn ensure_attached(&self) -> Result<(), SyncError> {
        if self.inner.lock().await.detached {
            return Err(SyncError::Detached { resource: R::NAME });
        }
        Ok(())
    }

    fn encode(payload: &R::Payload) -> Result<serde_json::Value, SyncError> {
        serde_json::to_value(payload).map_err(|e| SyncError::Encode(e.to_string()))
    }

    /// Creates a record remotely, then reloads. The collection is never patched
    /// optimistically.
    pub async fn create(&self, payload: &R::Payload) -> Result<LoadOutcome, SyncError> {
        let path = self
            .endpoint
            .create_path()
            .ok_or(SyncError::Unsupported {
                resource: R::NAME,
                operation: "create",
            })?
            .to_string();
        let _mutation = self.begin_mutation()?;
        self.ensure_attached().await?;
        let body = Self::encode(payload)?;

        if let Err(err) = self.transport.post(&path, &body).await {
            warn!(resource = R::NAME, error = %err, "sync: create failed");
            return Err(err);
        }
        info!(resource = R::NAME, "sync: record created");
        self.load().await
    }

    pub async fn update(&self, key: R::Key, payload: &R::Payload) -> Result<LoadOutcome, SyncError> {
        let path = self.endpoint.update_path(key).ok_or(SyncError::Unsupported {
            resource: R::NAME,
            operation: "update",
        })?;
        let _mutation = self.begin_mutation()?;
        self.ensure_attached().await?;
        let body = Self::encode(payload)?;

        if let Err(err) = self.transport.put(&path, &body).await {
            warn!(resource = R::NAME, %key, error = %err, "sync: update failed");
            return Err(err);
        }
        info!(resource = R::NAME, %key, "sync: record updated");
        self.load().await
    }

    /// Checks that `key` can be deleted and returns the confirmation the caller
    /// has to obtain. Nothing is sent yet.
    pub async fn request_delete(&self, key: R::Key) -> Result<PendingDelete<R::Key>, SyncError> {
        if !self.endpoint.supports_delete() {
            return Err(SyncError::Unsupported {
                resource: R::NAME,
                operation: "delete",
            });
        }
        let guard = self.inner.lock().await;
        if guard.detached {
            return Err(SyncError::Detached { resource: R::NAME });
        }
        if !guard.collection.iter().any(|r| r.key() == key) {
            return Err(SyncError::UnknownKey {
                resource: R::NAME,
                key: key.to_string(),
            });
        }
        Ok(PendingDelete {
            key,
            prompt: format!("Are you sure you want to delete {} #{key}?", R::NAME),
        })
    }

    /// Issues the delete for a confirmed request. On success the record is removed
    /// from the local collection without reloading.
    pub async fn confirm_delete(&self, pending: PendingDelete<R::Key>) -> Result<(), SyncError> {
        let key = pending.key;
        let path = self.endpoint.delete_path(key).ok_or(SyncError::Unsupported {
            resource: R::NAME,
            operation: "delete",
        })?;
        let _mutation = self.begin_mutation()?;
        self.ensure_attached().await?;

        if let Err(err) = self.transport.delete(&path).await {
            warn!(resource = R::NAME, %key, error = %err, "sync: delete failed");
            return Err(err);
        }

        let mut guard = self.inner.lock().await;
        if guard.detached {
            debug!(resource = R::NAME, %key, "sync: delete confirmed after detach");
            return Ok(());
        }
        // Loads issued before the delete must not bring the record back.
        guard.latest_seq += 1;
        if guard.phase == SyncPhase::Loading {
            guard.phase = guard.settled_phase();
        }
        guard.collection.retain(|r| r.key() != key);
        drop(guard);
        info!(resource = R::NAME, %key, "sync: record deleted");
        self.publish(SyncEvent::Removed {
            resource: R::NAME,
            key: key.to_string(),
        });
        Ok(())
    }

    /// `request_delete` and `confirm_delete` behind a yes/no gate.
    pub async fn remove(
        &self,
        key: R::Key,
        gate: &dyn ConfirmGate,
    ) -> Result<DeleteOutcome, SyncError> {
        let pending = self.request_delete(key).await?;
        if !gate.confirm(&pending.prompt).await {
            debug!(resource = R::NAME, %key, "sync: delete cancelled");
            return Ok(DeleteOutcome::Cancelled);
        }
        self.confirm_delete(pending).await?;
        Ok(DeleteOutcome::Deleted)
    }

    /// Updates one filter and resets the filters depending on it. A `Reload` effect
    /// means a server-side filter changed and `load` has to be called.
    pub async fn set_filter(&self, name: &str, value: &str) -> Result<FilterEffect, SyncError> {
        let effect = {
            let mut guard = self.inner.lock().await;
            if guard.detached {
                return Err(SyncError::Detached { resource: R::NAME });
            }
            apply_filter(&self.filter_defs, &mut guard.filters, name, value)?
        };
        debug!(resource = R::NAME, filter = name, value, ?effect, "sync: filter changed");
        self.publish(SyncEvent::FiltersChanged { resource: R::NAME });
        Ok(effect)
    }

    /// `set_filter` followed by a reload when the change requires one.
    pub async fn apply_filter(&self, name: &str, value: &str) -> Result<FilterEffect, SyncError> {
        let effect = self.set_filter(name, value).await?;
        if effect == FilterEffect::Reload {
            self.load().await?;
        }
        Ok(effect)
    }

    pub async fn filters(&self) -> FilterState {
        self.inner.lock().await.filters.clone()
    }

    /// Records passing the active filters, in collection order. Empty while the
    /// last load failed; the cached collection stays available through `snapshot`.
    pub async fn derived_view(&self) -> Vec<R> {
        let guard = self.inner.lock().await;
        if guard.phase == SyncPhase::Failed {
            return Vec::new();
        }
        derive_view(
            &self.filter_defs,
            &guard.collection,
            &guard.filters,
            &guard.auxiliary,
        )
        .into_iter()
        .cloned()
        .collect()
    }

    /// Dropdown domains of the declared filters for the current state.
    pub async fn domains(&self) -> Vec<FilterDomain> {
        let guard = self.inner.lock().await;
        R::domains(&guard.collection, &guard.filters, &guard.auxiliary)
    }

    pub async fn phase(&self) -> SyncPhase {
        self.inner.lock().await.phase
    }

    pub async fn snapshot(&self) -> SyncSnapshot<R> {
        let guard = self.inner.lock().await;
        SyncSnapshot {
            phase: guard.phase,
            error: guard.error.clone(),
            collection: guard.collection.clone(),
            auxiliary: guard.auxiliary.clone(),
            filters: guard.filters.clone(),
            loaded_at: guard.loaded_at,
        }
    }

    /// Tears the view down: pending responses are discarded and every further
    /// operation fails with `Detached`.
    pub async fn detach(&self) {
        let mut guard = self.inner.lock().await;
        if !guard.detached {
            guard.detached = true;
            debug!(resource = R::NAME, "sync: detached");
        }
    }
}

#[cfg(test)]
#[path = "tests/synchronizer_tests.rs"]
mod tests;
