//! The "save" action: payload fetch, capability-dependent delivery,
//! optimistic consumption flag with rollback.

use api_client::{ConsumptionRow, RecordStoreClient, StorageClient};
use cache::CacheManager;
use chrono::Utc;
use feed::{MediaEntry, SharedFeedState};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("Fetch Error: {0}")]
    Fetch(String),
    #[error("Delivery Error: {0}")]
    Delivery(String),
    #[error("Persistence Error: {0}")]
    Persistence(String),
    #[error("Other Error: {0}")]
    Other(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    Desktop,
    Mobile,
}

/// Read-only environment probes, resolved once per client.
#[derive(Debug, Clone, Copy)]
pub struct ClientCapabilities {
    pub native_share: bool,
    pub device_class: DeviceClass,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryKind {
    NativeShare,
    DirectSave,
    OpenFallback,
}

/// Pick the delivery path from the capability probes, once per
/// acquisition. Mobile prefers the native share affordance; desktop saves
/// directly; the locator fallback is best-effort (delivery cannot be
/// verified, but still counts as consumed).
pub fn select_strategy(caps: &ClientCapabilities) -> DeliveryKind {
    match caps.device_class {
        DeviceClass::Mobile if caps.native_share => DeliveryKind::NativeShare,
        DeviceClass::Desktop => DeliveryKind::DirectSave,
        _ => DeliveryKind::OpenFallback,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AcquireOutcome {
    Delivered(DeliveryKind),
    /// Guarded no-op: already consumed or already in flight.
    AlreadyConsumed,
    InFlight,
}

/// Where a fetched payload ends up. The reported outcome always carries
/// the kind of the sink that actually delivered, so a capability probe
/// and the wired sink cannot disagree in the result.
#[async_trait::async_trait]
pub trait DeliverySink: Send + Sync {
    fn kind(&self) -> DeliveryKind;
    async fn deliver(&self, name: &str, payload: &[u8], url: &str) -> Result<(), AcquireError>;
}

/// Writes the payload into a local directory (the direct-save path).
pub struct FileSaveSink {
    dir: PathBuf,
}

impl FileSaveSink {
    pub fn new(dir: PathBuf) -> Self {
        FileSaveSink { dir }
    }
}

#[async_trait::async_trait]
impl DeliverySink for FileSaveSink {
    fn kind(&self) -> DeliveryKind {
        DeliveryKind::DirectSave
    }

    async fn deliver(&self, name: &str, payload: &[u8], _url: &str) -> Result<(), AcquireError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| AcquireError::Delivery(e.to_string()))?;
        let path = self.dir.join(name);
        tokio::fs::write(&path, payload)
            .await
            .map_err(|e| AcquireError::Delivery(e.to_string()))?;
        tracing::info!(path = %path.display(), "saved payload");
        Ok(())
    }
}

/// Best-effort fallback: hand the raw locator to the environment to open.
/// Records the URL so callers can act on it.
#[derive(Default)]
pub struct OpenFallbackSink {
    opened: Mutex<Vec<String>>,
}

impl OpenFallbackSink {
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl DeliverySink for OpenFallbackSink {
    fn kind(&self) -> DeliveryKind {
        DeliveryKind::OpenFallback
    }

    async fn deliver(&self, _name: &str, _payload: &[u8], url: &str) -> Result<(), AcquireError> {
        if let Ok(mut opened) = self.opened.lock() {
            opened.push(url.to_string());
        }
        Ok(())
    }
}

/// Hands the payload to the platform share affordance. Records the shared
/// names so callers can surface them.
#[derive(Default)]
pub struct NativeShareSink {
    shared: Mutex<Vec<String>>,
}

impl NativeShareSink {
    pub fn shared(&self) -> Vec<String> {
        self.shared.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl DeliverySink for NativeShareSink {
    fn kind(&self) -> DeliveryKind {
        DeliveryKind::NativeShare
    }

    async fn deliver(&self, name: &str, _payload: &[u8], _url: &str) -> Result<(), AcquireError> {
        if let Ok(mut shared) = self.shared.lock() {
            shared.push(name.to_string());
        }
        Ok(())
    }
}

/// Runs the acquire flow with single-flight per entry id and an optimistic
/// consumption flag that rolls back when persistence fails.
pub struct Acquirer {
    storage: StorageClient,
    record_store: RecordStoreClient,
    cache: CacheManager,
    caps: ClientCapabilities,
    in_flight: Mutex<HashSet<String>>,
}

impl Acquirer {
    pub fn new(
        storage: StorageClient,
        record_store: RecordStoreClient,
        cache: CacheManager,
        caps: ClientCapabilities,
    ) -> Self {
        Acquirer {
            storage,
            record_store,
            cache,
            caps,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// The delivery path resolved from the capability probes. Callers pick
    /// the sink to wire from this, once per acquisition.
    pub fn strategy(&self) -> DeliveryKind {
        select_strategy(&self.caps)
    }

    /// Seed the session's consumption flags from the record store, falling
    /// back to the local cache mirror when the store is unreachable.
    pub async fn bootstrap_consumption(&self, state: &SharedFeedState) {
        let flags = match self.record_store.select_consumption().await {
            Ok(rows) => rows.into_iter().map(|r| (r.id, r.consumed)).collect(),
            Err(e) => {
                tracing::warn!(%e, "record store unreachable, using local consumption mirror");
                self.cache.all_consumed_async().await.unwrap_or_default()
            }
        };
        if let Ok(mut guard) = state.lock() {
            for (id, consumed) in flags {
                guard.mark_consumed(&id, consumed);
            }
        }
    }

    fn guard_enter(&self, id: &str) -> Result<bool, AcquireError> {
        let mut in_flight = self
            .in_flight
            .lock()
            .map_err(|_| AcquireError::Other("poisoned in-flight guard".into()))?;
        Ok(in_flight.insert(id.to_string()))
    }

    fn guard_exit(&self, id: &str) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.remove(id);
        }
    }

    /// Acquire one entry: fetch the payload, deliver it, then persist the
    /// consumption record. The local flag flips optimistically after
    /// delivery and flips back if the upsert fails, so the media renders
    /// again and the action stays retryable.
    #[cfg_attr(feature = "trace-spans", tracing::instrument(skip(self, state, sink), fields(id = %entry.id)))]
    pub async fn acquire(
        &self,
        state: &SharedFeedState,
        entry: &MediaEntry,
        sink: &dyn DeliverySink,
    ) -> Result<AcquireOutcome, AcquireError> {
        {
            let guard = state
                .lock()
                .map_err(|_| AcquireError::Other("poisoned feed state".into()))?;
            if guard.is_consumed(&entry.id) {
                return Ok(AcquireOutcome::AlreadyConsumed);
            }
        }
        if !self.guard_enter(&entry.id)? {
            return Ok(AcquireOutcome::InFlight);
        }

        let result = self.acquire_inner(state, entry, sink).await;
        self.guard_exit(&entry.id);
        result
    }

    async fn acquire_inner(
        &self,
        state: &SharedFeedState,
        entry: &MediaEntry,
        sink: &dyn DeliverySink,
    ) -> Result<AcquireOutcome, AcquireError> {
        let payload = self
            .storage
            .download(&entry.collection, &entry.relative_path)
            .await
            .map_err(|e| AcquireError::Fetch(e.to_string()))?;

        let name = entry
            .relative_path
            .rsplit('/')
            .next()
            .unwrap_or(&entry.relative_path);
        let url = {
            let guard = state
                .lock()
                .map_err(|_| AcquireError::Other("poisoned feed state".into()))?;
            guard.url(&entry.id).unwrap_or_default().to_string()
        };
        sink.deliver(name, &payload, &url).await?;

        // optimistic: flag first, persist after
        let timestamp = Utc::now();
        self.set_consumed(state, &entry.id, true).await;

        let row = ConsumptionRow { id: entry.id.clone(), consumed: true, timestamp };
        if let Err(e) = self.record_store.upsert_consumption(&row).await {
            self.set_consumed(state, &entry.id, false).await;
            return Err(AcquireError::Persistence(e.to_string()));
        }

        Ok(AcquireOutcome::Delivered(sink.kind()))
    }

    async fn set_consumed(&self, state: &SharedFeedState, id: &str, consumed: bool) {
        if let Ok(mut guard) = state.lock() {
            guard.mark_consumed(id, consumed);
        }
        let timestamp = consumed.then(Utc::now);
        if let Err(e) = self
            .cache
            .set_consumed_async(id.to_string(), consumed, timestamp)
            .await
        {
            tracing::warn!(id, %e, "failed to mirror consumption flag locally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_follows_capabilities() {
        let mobile_share = ClientCapabilities {
            native_share: true,
            device_class: DeviceClass::Mobile,
        };
        let mobile_no_share = ClientCapabilities {
            native_share: false,
            device_class: DeviceClass::Mobile,
        };
        let desktop = ClientCapabilities {
            native_share: false,
            device_class: DeviceClass::Desktop,
        };
        assert_eq!(select_strategy(&mobile_share), DeliveryKind::NativeShare);
        assert_eq!(select_strategy(&mobile_no_share), DeliveryKind::OpenFallback);
        assert_eq!(select_strategy(&desktop), DeliveryKind::DirectSave);
    }
}
