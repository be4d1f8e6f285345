//! Read-side cache for `GET /api/v1/downloads`.
//!
//! Pages are cached per `(userId, limit, offset)`. Invalidation is scoped to
//! one user: a ledger transition for user `u` drops only `u`'s pages.
//!
//! Each user entry carries the generation it was created at. Invalidating a
//! user removes the entry and advances a cache-wide epoch, so a page read
//! before an invalidation is never stored after it, and users without
//! cached pages cost nothing. The cache holds at most [`MAX_USERS`] users
//! and [`MAX_PAGES_PER_USER`] pages each; inserts past either bound are
//! skipped.

use std::collections::HashMap;

use shutter_db::models::download_request::DownloadRequestView;
use tokio::sync::RwLock;

pub const MAX_USERS: usize = 10_000;
pub const MAX_PAGES_PER_USER: usize = 8;

struct UserPages {
    generation: u64,
    pages: HashMap<(i64, i64), Vec<DownloadRequestView>>,
}

#[derive(Default)]
struct Inner {
    epoch: u64,
    users: HashMap<String, UserPages>,
}

#[derive(Default)]
pub struct ListCache {
    inner: RwLock<Inner>,
}

impl ListCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, user_id: &str, limit: i64, offset: i64) -> Option<Vec<DownloadRequestView>> {
        self.inner
            .read()
            .await
            .users
            .get(user_id)
            .and_then(|u| u.pages.get(&(limit, offset)).cloned())
    }

    /// Current generation for `user_id`. Read it before querying the ledger
    /// and pass it to [`insert`](Self::insert).
    pub async fn generation(&self, user_id: &str) -> u64 {
        let inner = self.inner.read().await;
        inner
            .users
            .get(user_id)
            .map(|u| u.generation)
            .unwrap_or(inner.epoch)
    }

    /// Store a page unless the user was invalidated since `generation` or
    /// the cache is full. Returns whether the page was stored.
    pub async fn insert(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
        generation: u64,
        rows: Vec<DownloadRequestView>,
    ) -> bool {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;

        if !inner.users.contains_key(user_id) {
            if inner.epoch != generation || inner.users.len() >= MAX_USERS {
                return false;
            }
            inner.users.insert(
                user_id.to_string(),
                UserPages {
                    generation,
                    pages: HashMap::new(),
                },
            );
        }
        let Some(entry) = inner.users.get_mut(user_id) else {
            return false;
        };
        if entry.generation != generation {
            return false;
        }
        let key = (limit, offset);
        if !entry.pages.contains_key(&key) && entry.pages.len() >= MAX_PAGES_PER_USER {
            return false;
        }
        entry.pages.insert(key, rows);
        true
    }

    /// Drop every cached page of `user_id`. Returns how many were dropped.
    pub async fn invalidate_user(&self, user_id: &str) -> usize {
        let mut inner = self.inner.write().await;
        inner.epoch += 1;
        inner
            .users
            .remove(user_id)
            .map(|u| u.pages.len())
            .unwrap_or(0)
    }

    /// Drop everything. Used only when invalidation events were lost.
    pub async fn invalidate_all(&self) {
        let mut inner = self.inner.write().await;
        inner.epoch += 1;
        inner.users.clear();
    }

    /// Users with at least one cached page.
    pub async fn user_count(&self) -> usize {
        self.inner.read().await.users.len()
    }

    pub async fn page_count(&self, user_id: &str) -> usize {
        self.inner
            .read()
            .await
            .users
            .get(user_id)
            .map(|u| u.pages.len())
            .unwrap_or(0)
    }
}
