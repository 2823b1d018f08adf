//! Watcher registry shared by every watch session on a server.
//!
//! Maps a watch id to the session sink that should receive its updates, and
//! keeps the last published endpoints of each subject so a new watch can be
//! answered with a snapshot.
//!
//! # Ordering
//!
//! ```text
//! create_watch:  reserve sink slot (and the replaced owner's slot)
//!                -> [write lock] enqueue canceled to old owner -> enqueue created -> insert
//! cancel_watch:  reserve sink slot -> [write lock] enqueue canceled -> remove
//! broadcast:     [read lock] try_send update to every matching sink
//! ```
//!
//! Because the confirmation is enqueued while the write lock is held, no
//! update can precede `created`, and no update can follow `canceled`.
//! Slots are reserved before the lock is taken, so the lock is never held
//! across an await point.
//!
//! # Overload
//!
//! Broadcast never blocks: a full sink drops the update and the drop is
//! counted in `watch_events_dropped_total`.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::OwnedPermit;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use super::EndpointUpdate;
use crate::proto::Endpoint;
use crate::proto::Subject;
use crate::proto::WatchResponse;
use crate::DuplicateWatchIdPolicy;
use crate::Result;
use crate::WatchConfig;
use crate::WatchError;
use crate::ACTIVE_WATCH_REGISTRATIONS;
use crate::WATCH_EVENTS_BROADCAST;
use crate::WATCH_EVENTS_DROPPED;

pub(crate) const TAKEN_OVER_REASON: &str = "watch id taken over by another session";

/// One registered watch: where its updates go and who owns it.
#[derive(Debug)]
pub struct Registration {
    subject: Subject,
    sink: mpsc::Sender<WatchResponse>,
    session_id: String,
    generation: u64,
}

impl Registration {
    pub fn new(
        subject: Subject,
        sink: mpsc::Sender<WatchResponse>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            subject,
            sink,
            session_id: session_id.into(),
            generation: 0,
        }
    }

    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

pub struct WatcherRegistry {
    watchers: RwLock<HashMap<String, Registration>>,
    /// Last published endpoints per subject
    catalog: RwLock<HashMap<Subject, Vec<Endpoint>>>,
    next_generation: AtomicU64,
    filter_by_subject: bool,
    duplicate_policy: DuplicateWatchIdPolicy,
    cancel_reserve_timeout: Duration,
}

impl std::fmt::Debug for WatcherRegistry {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("WatcherRegistry")
            .field("watchers", &self.watchers.read().len())
            .field("filter_by_subject", &self.filter_by_subject)
            .field("duplicate_policy", &self.duplicate_policy)
            .finish()
    }
}

impl WatcherRegistry {
    pub fn new(config: &WatchConfig) -> Self {
        Self {
            watchers: RwLock::new(HashMap::new()),
            catalog: RwLock::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
            filter_by_subject: config.filter_by_subject,
            duplicate_policy: config.duplicate_watch_id_policy,
            cancel_reserve_timeout: config.cancel_reserve_timeout(),
        }
    }

    /// Registers `watch_id` and enqueues its `created` confirmation, carrying
    /// the current endpoint snapshot of the subject.
    ///
    /// An existing registration under the same id is replaced (or, with the
    /// `reject` policy, the create is refused with
    /// [`WatchError::AlreadyExists`] when another session owns it).
    pub async fn create_watch(
        &self,
        watch_id: &str,
        mut registration: Registration,
    ) -> Result<()> {
        let permit = registration.sink.clone().reserve_owned().await.map_err(|_| {
            WatchError::SinkClosed {
                watch_id: watch_id.to_string(),
            }
        })?;
        let created = WatchResponse::created(
            registration.subject.clone(),
            self.snapshot(&registration.subject),
        );
        let session_id = registration.session_id.clone();

        let replaced = loop {
            let current = self.current_owner(watch_id);
            let notice = match &current {
                Some((owner, sink, _)) if *owner != session_id => {
                    if self.duplicate_policy == DuplicateWatchIdPolicy::Reject {
                        return Err(WatchError::AlreadyExists {
                            watch_id: watch_id.to_string(),
                        }
                        .into());
                    }
                    self.reserve_cancel_slot(watch_id, sink.clone()).await
                }
                _ => None,
            };

            let observed = current.map(|(_, _, generation)| generation);
            {
                let mut watchers = self.watchers.write();
                if watchers.get(watch_id).map(|r| r.generation) == observed {
                    registration.generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                    let replaced = watchers.insert(watch_id.to_string(), registration);
                    if let (Some(notice), Some(old)) = (notice, replaced.as_ref()) {
                        notice.send(WatchResponse::canceled(Some(old.subject.clone()), TAKEN_OVER_REASON));
                    }
                    permit.send(created);
                    break replaced;
                }
            }
            // Ownership moved while we waited for queue space
        };

        match replaced {
            None => ACTIVE_WATCH_REGISTRATIONS.inc(),
            Some(old) if old.session_id != session_id => debug!(
                watch_id,
                old_session = %old.session_id,
                new_session = %session_id,
                "Watch id taken over"
            ),
            Some(_) => trace!(watch_id, "Watch re-created by the same session"),
        }

        trace!(watch_id, session_id = %session_id, "Watcher registered");
        Ok(())
    }

    /// Enqueues `canceled` with `reason` to the watch's sink and removes it.
    ///
    /// Returns false when the id is not registered.
    pub async fn cancel_watch(
        &self,
        watch_id: &str,
        reason: &str,
    ) -> bool {
        self.deregister(watch_id, None, Some(reason)).await
    }

    /// Removes `watch_id` only if it is still owned by `session_id`.
    ///
    /// With a reason the sink receives a final `canceled`; without one the
    /// registration disappears silently.
    pub async fn release_session_watch(
        &self,
        watch_id: &str,
        session_id: &str,
        reason: Option<&str>,
    ) -> bool {
        self.deregister(watch_id, Some(session_id), reason).await
    }

    async fn deregister(
        &self,
        watch_id: &str,
        owner: Option<&str>,
        reason: Option<&str>,
    ) -> bool {
        let (sink, generation, subject) = {
            let watchers = self.watchers.read();
            match watchers.get(watch_id) {
                Some(r) if owner.map_or(true, |o| o == r.session_id) => {
                    (r.sink.clone(), r.generation, r.subject.clone())
                }
                _ => return false,
            }
        };

        let permit = match reason {
            None => None,
            Some(_) => self.reserve_cancel_slot(watch_id, sink).await,
        };

        let removed = {
            let mut watchers = self.watchers.write();
            match watchers.get(watch_id) {
                Some(r) if r.generation == generation => {
                    if let (Some(permit), Some(reason)) = (permit, reason) {
                        permit.send(WatchResponse::canceled(Some(subject), reason));
                    }
                    watchers.remove(watch_id);
                    true
                }
                // Replaced while we waited for queue space
                _ => false,
            }
        };

        if removed {
            ACTIVE_WATCH_REGISTRATIONS.dec();
            trace!(watch_id, reason = ?reason, "Watcher unregistered");
        }
        removed
    }

    fn current_owner(
        &self,
        watch_id: &str,
    ) -> Option<(String, mpsc::Sender<WatchResponse>, u64)> {
        self.watchers
            .read()
            .get(watch_id)
            .map(|r| (r.session_id.clone(), r.sink.clone(), r.generation))
    }

    /// Waits up to `cancel_reserve_timeout` for room to enqueue a final
    /// `canceled` on `sink`.
    async fn reserve_cancel_slot(
        &self,
        watch_id: &str,
        sink: mpsc::Sender<WatchResponse>,
    ) -> Option<OwnedPermit<WatchResponse>> {
        match tokio::time::timeout(self.cancel_reserve_timeout, sink.reserve_owned()).await {
            Ok(Ok(permit)) => Some(permit),
            Ok(Err(_)) => {
                debug!(watch_id, "Sink closed, removing watcher without cancel notice");
                None
            }
            Err(_) => {
                warn!(
                    watch_id,
                    timeout = ?self.cancel_reserve_timeout,
                    "Sink stayed full, removing watcher without cancel notice"
                );
                WATCH_EVENTS_DROPPED.with_label_values(&["cancel_timeout"]).inc();
                None
            }
        }
    }

    /// Fans `update` out to every matching registration without blocking.
    ///
    /// Returns the number of sinks the update was enqueued to.
    pub fn broadcast(
        &self,
        update: &EndpointUpdate,
    ) -> usize {
        self.catalog.write().insert(update.subject.clone(), update.endpoints.clone());

        let watchers = self.watchers.read();
        let mut delivered = 0;
        for (watch_id, registration) in watchers.iter() {
            if self.filter_by_subject && registration.subject != update.subject {
                continue;
            }
            let response = WatchResponse::update(registration.subject.clone(), update.endpoints.clone());
            match registration.sink.try_send(response) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(watch_id = %watch_id, "Watch sink full, dropping update");
                    WATCH_EVENTS_DROPPED.with_label_values(&["full"]).inc();
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(watch_id = %watch_id, "Watch sink closed, skipping update");
                    WATCH_EVENTS_DROPPED.with_label_values(&["closed"]).inc();
                }
            }
        }

        trace!(
            subject = %update.subject,
            watchers = watchers.len(),
            delivered,
            "Update broadcast"
        );
        WATCH_EVENTS_BROADCAST.inc_by(delivered as u64);
        delivered
    }

    /// Last published endpoints of `subject`, empty if none yet.
    pub fn snapshot(
        &self,
        subject: &Subject,
    ) -> Vec<Endpoint> {
        self.catalog.read().get(subject).cloned().unwrap_or_default()
    }

    /// Distinct subjects that currently have at least one watcher.
    pub fn subjects(&self) -> Vec<Subject> {
        let watchers = self.watchers.read();
        let subjects: HashSet<&Subject> = watchers.values().map(|r| &r.subject).collect();
        subjects.into_iter().cloned().collect()
    }

    pub fn filters_by_subject(&self) -> bool {
        self.filter_by_subject
    }

    pub fn contains(
        &self,
        watch_id: &str,
    ) -> bool {
        self.watchers.read().contains_key(watch_id)
    }

    /// Session currently owning `watch_id`.
    pub fn owner(
        &self,
        watch_id: &str,
    ) -> Option<String> {
        self.watchers.read().get(watch_id).map(|r| r.session_id.clone())
    }

    pub fn len(&self) -> usize {
        self.watchers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.watchers.read().is_empty()
    }
}
