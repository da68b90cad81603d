//! Keyed pool of initialized MCP sessions
//!
//! Each key owns one slot guarded by an async mutex. Holding the slot is what
//! serializes work: concurrent requests for the same key wait for each other,
//! so at most one handshake runs per key and calls on one session never
//! interleave. Different keys proceed independently.
//!
//! Lock order: the slot map is never held while waiting on a slot.

use salvager_config::{GatewayConfig, McpSettings, PoolSettings};
use salvager_core::{Result, SalvagerError};
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMappedMutexGuard, OwnedMutexGuard, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::client::McpSessionClient;

type Slot = Arc<Mutex<Option<PoolEntry>>>;

struct PoolEntry {
    client: McpSessionClient,
    last_used: Instant,
    owner: Option<String>,
}

/// Idle expiry and reaper cadence
#[derive(Debug, Clone, Copy)]
pub struct PoolOptions {
    pub idle_timeout: Duration,
    pub sweep_interval: Duration,
}

impl From<&PoolSettings> for PoolOptions {
    fn from(settings: &PoolSettings) -> Self {
        Self {
            idle_timeout: settings.idle_timeout(),
            sweep_interval: settings.sweep_interval(),
        }
    }
}

impl Default for PoolOptions {
    fn default() -> Self {
        (&PoolSettings::default()).into()
    }
}

struct PoolInner {
    slots: RwLock<HashMap<String, Slot>>,
    settings: McpSettings,
    options: PoolOptions,
    http: reqwest::Client,
}

pub struct SessionPool {
    inner: Arc<PoolInner>,
    reaper: StdMutex<Option<JoinHandle<()>>>,
}

/// Exclusive use of one pooled, ready session.
///
/// The slot stays locked until this guard is dropped, so keep it only for the
/// duration of the calls that need it.
pub struct PooledSession {
    key: String,
    entry: OwnedMappedMutexGuard<Option<PoolEntry>, PoolEntry>,
}

impl PooledSession {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn owner(&self) -> Option<&str> {
        self.entry.owner.as_deref()
    }

    /// Close the session in place; the next checkout for this key starts a new one.
    pub fn discard(mut self) {
        debug!("Discarding pooled session '{}'", self.key);
        self.entry.client.close();
    }
}

impl std::fmt::Debug for PooledSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledSession")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl Deref for PooledSession {
    type Target = McpSessionClient;

    fn deref(&self) -> &Self::Target {
        &self.entry.client
    }
}

impl DerefMut for PooledSession {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.entry.client
    }
}

impl SessionPool {
    pub fn new(settings: McpSettings, options: PoolOptions) -> Self {
        Self::with_http_client(settings, options, reqwest::Client::new())
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new(config.mcp.clone(), (&config.pool).into())
    }

    pub fn with_http_client(settings: McpSettings, options: PoolOptions, http: reqwest::Client) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                slots: RwLock::new(HashMap::new()),
                settings,
                options,
                http,
            }),
            reaper: StdMutex::new(None),
        }
    }

    /// Check out the ready session for `key`, creating and initializing one if needed.
    ///
    /// A pooled session created with a different token is replaced.
    pub async fn get_session(&self, key: &str, token: &str) -> Result<PooledSession> {
        self.checkout(key, token, None).await
    }

    /// Per-user session, keyed `user:<id>`.
    pub async fn get_user_session(&self, user_id: &str, token: &str) -> Result<PooledSession> {
        self.checkout(&user_key(user_id), token, Some(user_id)).await
    }

    async fn checkout(&self, key: &str, token: &str, owner: Option<&str>) -> Result<PooledSession> {
        loop {
            let slot = self.inner.slot(key).await;
            let mut guard = slot.clone().lock_owned().await;

            // Evicted while we were waiting; start over with the current slot
            if !self.inner.is_current(key, &slot).await {
                continue;
            }

            match guard.as_mut() {
                Some(entry) if entry.client.is_ready() && entry.client.uses_token(token) => {
                    debug!("Reusing pooled session '{}'", key);
                    entry.last_used = Instant::now();
                }
                _ => {
                    if let Some(mut stale) = guard.take() {
                        debug!("Replacing stale pooled session '{}'", key);
                        stale.client.close();
                    }

                    let mut client = McpSessionClient::with_http_client(
                        &self.inner.settings,
                        token,
                        self.inner.http.clone(),
                    );
                    if let Err(e) = client.initialize().await {
                        warn!("Failed to create pooled session '{}': {}", key, e);
                        self.inner.remove_if_current(key, &slot).await;
                        return Err(e);
                    }

                    info!("Created pooled session '{}' ({})", key, client.instance_id());
                    *guard = Some(PoolEntry {
                        client,
                        last_used: Instant::now(),
                        owner: owner.map(str::to_string),
                    });
                }
            }

            return check_out(key, guard);
        }
    }

    /// Close and forget the session under `key`. Returns whether one existed.
    pub async fn close_session(&self, key: &str) -> bool {
        let removed = self.inner.slots.write().await.remove(key);
        match removed {
            Some(slot) => {
                if let Some(mut entry) = slot.lock().await.take() {
                    entry.client.close();
                }
                info!("Closed pooled session '{}'", key);
                true
            }
            None => false,
        }
    }

    pub async fn close_all(&self) {
        let drained: Vec<(String, Slot)> = self.inner.slots.write().await.drain().collect();
        for (key, slot) in drained {
            if let Some(mut entry) = slot.lock().await.take() {
                entry.client.close();
                debug!("Closed pooled session '{}'", key);
            }
        }
    }

    /// Evict sessions idle for longer than the idle timeout. Returns the number evicted.
    ///
    /// Slots busy with a call are skipped; they are by definition not idle.
    pub async fn sweep(&self) -> usize {
        self.inner.sweep().await
    }

    /// Start the background reaper. Idempotent.
    pub fn start(&self) {
        let mut reaper = self.reaper.lock().unwrap_or_else(|e| e.into_inner());
        if reaper.is_some() {
            return;
        }

        let period = self.inner.options.sweep_interval;
        let weak: Weak<PoolInner> = Arc::downgrade(&self.inner);

        info!("Starting session reaper (every {:?})", period);
        *reaper = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                let evicted = inner.sweep().await;
                if evicted > 0 {
                    debug!("Session reaper evicted {} idle sessions", evicted);
                }
            }
        }));
    }

    /// Stop the background reaper. Pooled sessions are kept.
    pub fn stop(&self) {
        let handle = self.reaper.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            handle.abort();
            info!("Stopped session reaper");
        }
    }

    pub fn is_running(&self) -> bool {
        self.reaper
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    pub async fn shutdown(&self) {
        self.stop();
        self.close_all().await;
    }

    /// Ready sessions currently pooled. A slot busy with a call counts as active.
    pub async fn active_session_count(&self) -> usize {
        let slots = self.inner.snapshot().await;
        slots
            .iter()
            .filter(|(_, slot)| match slot.try_lock() {
                Ok(entry) => entry.as_ref().is_some_and(|e| e.client.is_ready()),
                Err(_) => true,
            })
            .count()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.inner.slots.read().await.contains_key(key)
    }

    pub fn options(&self) -> PoolOptions {
        self.inner.options
    }
}

impl PoolInner {
    async fn slot(&self, key: &str) -> Slot {
        if let Some(slot) = self.slots.read().await.get(key) {
            return slot.clone();
        }
        self.slots
            .write()
            .await
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    async fn is_current(&self, key: &str, slot: &Slot) -> bool {
        self.slots
            .read()
            .await
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
    }

    async fn remove_if_current(&self, key: &str, slot: &Slot) {
        let mut slots = self.slots.write().await;
        if slots.get(key).is_some_and(|current| Arc::ptr_eq(current, slot)) {
            slots.remove(key);
        }
    }

    async fn snapshot(&self) -> Vec<(String, Slot)> {
        self.slots
            .read()
            .await
            .iter()
            .map(|(key, slot)| (key.clone(), slot.clone()))
            .collect()
    }

    async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut evicted = 0;

        for (key, slot) in self.snapshot().await {
            let Ok(mut guard) = slot.clone().try_lock_owned() else {
                continue;
            };

            let expired = match guard.as_ref() {
                Some(entry) => {
                    !entry.client.is_ready()
                        || now.duration_since(entry.last_used) > self.options.idle_timeout
                }
                None => true,
            };
            if !expired {
                continue;
            }

            if let Some(mut entry) = guard.take() {
                entry.client.close();
                info!("Evicted idle session '{}'", key);
                evicted += 1;
            }
            self.remove_if_current(&key, &slot).await;
        }

        evicted
    }
}

impl Drop for SessionPool {
    fn drop(&mut self) {
        if let Some(handle) = self.reaper.get_mut().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
        }
        debug!("SessionPool dropped");
    }
}

fn check_out(key: &str, guard: OwnedMutexGuard<Option<PoolEntry>>) -> Result<PooledSession> {
    OwnedMutexGuard::try_map(guard, Option::as_mut)
        .map(|entry| PooledSession {
            key: key.to_string(),
            entry,
        })
        .map_err(|_| SalvagerError::SessionClosed(format!("Pooled session '{}' vanished", key)))
}

pub fn user_key(user_id: &str) -> String {
    format!("user:{}", user_id)
}
