use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

use pitstay_types::models::Notification;

use crate::backoff::{ReconnectPolicy, retry_read};
use crate::cache::{Applied, Snapshot, SyncCache};
use crate::error::Result;
use crate::transport::Api;

/// The user's notifications and the unread count derived from them.
///
/// The count is always recomputed from the cached rows; there is no
/// separate counter to drift.
pub struct NotificationDispatcher {
    api: Arc<dyn Api>,
    snapshot: Snapshot<Notification>,
    unread: watch::Sender<usize>,
    page_size: u32,
    read_retry: ReconnectPolicy,
}

fn read_key(id: Uuid) -> String {
    format!("read:{id}")
}

fn count_unread(rows: &[Notification]) -> usize {
    rows.iter().filter(|n| !n.read).count()
}

impl NotificationDispatcher {
    pub(crate) fn new(api: Arc<dyn Api>, page_size: u32, read_retry: ReconnectPolicy) -> Self {
        let (unread, _) = watch::channel(0);
        Self { api, snapshot: Snapshot::default(), unread, page_size, read_retry }
    }

    pub fn list(&self) -> Vec<Notification> {
        self.snapshot.get()
    }

    pub fn watch(&self) -> watch::Receiver<Vec<Notification>> {
        self.snapshot.watch()
    }

    pub fn unread_count(&self) -> usize {
        count_unread(&self.snapshot.get())
    }

    pub fn watch_unread(&self) -> watch::Receiver<usize> {
        self.unread.subscribe()
    }

    fn update<R>(&self, f: impl FnOnce(&mut SyncCache<Notification>) -> R) -> R {
        let result = self.snapshot.update(f);
        let count = self.unread_count();
        self.unread.send_if_modified(|current| {
            let changed = *current != count;
            *current = count;
            changed
        });
        result
    }

    pub(crate) fn apply(&self, row: Notification) -> Applied {
        self.update(|c| c.apply(row))
    }

    /// Replace the cached list with the server's.
    pub async fn refresh(&self) -> Result<()> {
        let rows = retry_read(&self.read_retry, "notifications", || self.api.notifications(self.page_size)).await?;
        self.update(|c| c.replace_all(rows));
        Ok(())
    }

    /// Mark one notification read: locally at once, then durably. A failed
    /// write rolls back by re-fetching the authoritative list.
    pub async fn mark_read(&self, notification_id: Uuid) -> Result<()> {
        let key = read_key(notification_id);
        let optimistic = self.update(|c| {
            let Some(mut n) = c.get(notification_id).filter(|n| !n.read).cloned() else {
                return false;
            };
            n.read = true;
            c.set_optimistic(key.clone(), n);
            true
        });

        match self.api.mark_notification_read(notification_id).await {
            Ok(resp) => {
                if optimistic {
                    self.update(|c| c.promote_optimistic(&key));
                }
                debug!(%notification_id, updated = resp.updated, "notification marked read");
                Ok(())
            }
            Err(e) => {
                self.update(|c| c.clear_optimistic(&key));
                self.recover(&e).await;
                Err(e)
            }
        }
    }

    /// Mark every notification read, with the same rollback rule.
    pub async fn mark_all_read(&self) -> Result<()> {
        let keys = self.update(|c| {
            let unread: Vec<Notification> = c.view().into_iter().filter(|n| !n.read).collect();
            unread
                .into_iter()
                .map(|mut n| {
                    let key = read_key(n.id);
                    n.read = true;
                    c.set_optimistic(key.clone(), n);
                    key
                })
                .collect::<Vec<_>>()
        });

        match self.api.mark_all_notifications_read().await {
            Ok(resp) => {
                self.update(|c| {
                    for key in &keys {
                        c.promote_optimistic(key);
                    }
                });
                debug!(updated = resp.updated, "all notifications marked read");
                Ok(())
            }
            Err(e) => {
                self.update(|c| {
                    for key in &keys {
                        c.clear_optimistic(key);
                    }
                });
                self.recover(&e).await;
                Err(e)
            }
        }
    }

    async fn recover(&self, cause: &crate::error::ClientError) {
        warn!("mark-read failed ({}), re-fetching notifications", cause);
        if let Err(e) = self.refresh().await {
            warn!("notification re-fetch failed: {}", e);
        }
    }
}
