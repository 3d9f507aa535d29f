//! Two-tier client cache: authoritative rows keyed by id plus an optimistic
//! overlay keyed by client-generated correlation id.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use uuid::Uuid;

use pitstay_types::models::{Booking, Message, Notification, PointsTransaction};

/// A row the cache can reconcile.
pub trait Versioned: Clone + PartialEq + Send + Sync + 'static {
    /// Monotonic per row. An incoming copy replaces the cached one only if
    /// its version is greater.
    type Version: Ord + Copy;

    const NEWEST_FIRST: bool;

    fn id(&self) -> Uuid;
    fn version(&self) -> Self::Version;
    fn position(&self) -> DateTime<Utc>;

    /// Correlation id of an optimistic placeholder this row confirms.
    fn correlation(&self) -> Option<&str> {
        None
    }
}

impl Versioned for Booking {
    type Version = DateTime<Utc>;
    const NEWEST_FIRST: bool = true;

    fn id(&self) -> Uuid {
        self.id
    }
    fn version(&self) -> DateTime<Utc> {
        self.updated_at
    }
    fn position(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl Versioned for Message {
    // Messages only ever flip `read` from false to true.
    type Version = (DateTime<Utc>, bool);
    const NEWEST_FIRST: bool = false;

    fn id(&self) -> Uuid {
        self.id
    }
    fn version(&self) -> (DateTime<Utc>, bool) {
        (self.created_at, self.read)
    }
    fn position(&self) -> DateTime<Utc> {
        self.created_at
    }
    fn correlation(&self) -> Option<&str> {
        self.client_ref.as_deref()
    }
}

impl Versioned for Notification {
    type Version = DateTime<Utc>;
    const NEWEST_FIRST: bool = true;

    fn id(&self) -> Uuid {
        self.id
    }
    fn version(&self) -> DateTime<Utc> {
        self.updated_at
    }
    fn position(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl Versioned for PointsTransaction {
    type Version = DateTime<Utc>;
    const NEWEST_FIRST: bool = true;

    fn id(&self) -> Uuid {
        self.id
    }
    fn version(&self) -> DateTime<Utc> {
        self.created_at
    }
    fn position(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// What applying one incoming row did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Inserted,
    Replaced,
    /// Duplicate or stale; nothing changed.
    Ignored,
}

#[derive(Debug)]
pub struct SyncCache<T: Versioned> {
    authoritative: HashMap<Uuid, T>,
    overlay: HashMap<String, T>,
}

impl<T: Versioned> Default for SyncCache<T> {
    fn default() -> Self {
        Self { authoritative: HashMap::new(), overlay: HashMap::new() }
    }
}

impl<T: Versioned> SyncCache<T> {
    /// Apply one change-feed row. Inserts and updates reconcile the same
    /// way: merge by id, newer version wins.
    pub fn apply(&mut self, row: T) -> Applied {
        if let Some(corr) = row.correlation() {
            self.overlay.remove(corr);
        }
        match self.authoritative.get(&row.id()) {
            None => {
                self.authoritative.insert(row.id(), row);
                Applied::Inserted
            }
            Some(current) if row.version() > current.version() => {
                self.authoritative.insert(row.id(), row);
                Applied::Replaced
            }
            Some(_) => Applied::Ignored,
        }
    }

    /// Accept a row read directly from the server. Unlike a feed event, an
    /// equal version also replaces.
    pub fn upsert(&mut self, row: T) -> Applied {
        if let Some(corr) = row.correlation() {
            self.overlay.remove(corr);
        }
        match self.authoritative.get(&row.id()) {
            None => {
                self.authoritative.insert(row.id(), row);
                Applied::Inserted
            }
            Some(current) if row.version() >= current.version() => {
                self.authoritative.insert(row.id(), row);
                Applied::Replaced
            }
            Some(_) => Applied::Ignored,
        }
    }

    /// Reconciliation pass: the fetched rows become the authoritative set.
    /// Placeholders they confirm are dropped; the rest stay pending.
    pub fn replace_all(&mut self, rows: Vec<T>) {
        for row in &rows {
            if let Some(corr) = row.correlation() {
                self.overlay.remove(corr);
            }
        }
        self.authoritative = rows.into_iter().map(|r| (r.id(), r)).collect();
    }

    /// Show `row` until the overlay entry is settled.
    pub fn set_optimistic(&mut self, correlation: impl Into<String>, row: T) {
        self.overlay.insert(correlation.into(), row);
    }

    /// Drop an optimistic entry, returning it.
    pub fn clear_optimistic(&mut self, correlation: &str) -> Option<T> {
        self.overlay.remove(correlation)
    }

    /// The durable write behind an optimistic entry succeeded: keep its row
    /// as authoritative unless the server has already sent something newer.
    pub fn promote_optimistic(&mut self, correlation: &str) -> bool {
        let Some(row) = self.overlay.remove(correlation) else {
            return false;
        };
        match self.authoritative.get(&row.id()) {
            Some(current) if current.version() > row.version() => false,
            _ => {
                self.authoritative.insert(row.id(), row);
                true
            }
        }
    }

    pub fn has_optimistic(&self, correlation: &str) -> bool {
        self.overlay.contains_key(correlation)
    }

    pub fn get(&self, id: Uuid) -> Option<&T> {
        self.authoritative.get(&id)
    }

    /// Authoritative rows with the overlay applied, in display order.
    pub fn view(&self) -> Vec<T> {
        let mut by_id: HashMap<Uuid, T> = self.authoritative.clone();
        for row in self.overlay.values() {
            by_id.insert(row.id(), row.clone());
        }
        let mut rows: Vec<T> = by_id.into_values().collect();
        rows.sort_by(|a, b| (a.position(), a.id()).cmp(&(b.position(), b.id())));
        if T::NEWEST_FIRST {
            rows.reverse();
        }
        rows
    }
}

/// A cache plus a watch channel carrying its current view.
pub struct Snapshot<T: Versioned> {
    cache: Mutex<SyncCache<T>>,
    tx: watch::Sender<Vec<T>>,
}

impl<T: Versioned> Default for Snapshot<T> {
    fn default() -> Self {
        let (tx, _) = watch::channel(Vec::new());
        Self { cache: Mutex::new(SyncCache::default()), tx }
    }
}

impl<T: Versioned> Snapshot<T> {
    /// Run `f` against the cache and publish the new view if anything changed.
    pub fn update<R>(&self, f: impl FnOnce(&mut SyncCache<T>) -> R) -> R {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        let result = f(&mut cache);
        let view = cache.view();
        drop(cache);
        self.tx.send_if_modified(|current| {
            // Optimistic rows keep their version, so compare whole rows.
            let changed = *current != view;
            if changed {
                *current = view;
            }
            changed
        });
        result
    }

    pub fn read<R>(&self, f: impl FnOnce(&SyncCache<T>) -> R) -> R {
        let cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        f(&cache)
    }

    pub fn get(&self) -> Vec<T> {
        self.tx.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Vec<T>> {
        self.tx.subscribe()
    }
}
