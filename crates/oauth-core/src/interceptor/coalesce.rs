//! At-most-one-refresh-in-flight coalescing, keyed by `(server, user)`
//! (spec §4.3 / §5). A second requester for a key already refreshing
//! awaits the first requester's result instead of issuing a parallel
//! refresh.
//!
//! Implemented as a per-key mutex plus a generation counter: a caller
//! records the generation it observed before queuing, then after
//! acquiring the lock checks whether a newer result was produced by
//! whoever held the lock first — in that case it reuses that result
//! instead of calling `refresh` again.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::Mutex as AsyncMutex;

use crate::error::{OAuthError, OAuthResult};
use crate::types::{TokenData, TokenKey};

struct KeySlot {
    lock: AsyncMutex<()>,
    generation: AtomicU64,
    result: StdMutex<Option<(u64, Result<TokenData, String>)>>,
}

impl KeySlot {
    fn new() -> Self {
        Self {
            lock: AsyncMutex::new(()),
            generation: AtomicU64::new(0),
            result: StdMutex::new(None),
        }
    }
}

/// Single-flight table for refreshes, one slot per `(server, user)` key.
#[derive(Default)]
pub struct RefreshCoalescer {
    slots: AsyncMutex<HashMap<TokenKey, Arc<KeySlot>>>,
}

impl RefreshCoalescer {
    /// An empty coalescer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `refresh` for `key`, coalescing concurrent callers so at most
    /// one actually executes per contended window.
    pub async fn run<F, Fut>(&self, key: TokenKey, refresh: F) -> OAuthResult<TokenData>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = OAuthResult<TokenData>>,
    {
        let slot = {
            let mut slots = self.slots.lock().await;
            Arc::clone(slots.entry(key).or_insert_with(|| Arc::new(KeySlot::new())))
        };

        let observed_gen = slot.generation.load(Ordering::SeqCst);
        let _guard = slot.lock.lock().await;

        if let Some((gen, result)) = slot.result.lock().expect("slot result lock poisoned").clone() {
            if gen > observed_gen {
                return result.map_err(|message| OAuthError::ProviderPayload { provider: "coalesced".into(), message });
            }
        }

        let outcome = refresh().await;
        let new_gen = slot.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let stored = outcome.as_ref().map(Clone::clone).map_err(ToString::to_string);
        *slot.result.lock().expect("slot result lock poisoned") = Some((new_gen, stored));
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn concurrent_callers_share_one_refresh() {
        let coalescer = Arc::new(RefreshCoalescer::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let key = TokenKey::new("svc", "user");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let coalescer = Arc::clone(&coalescer);
            let calls = Arc::clone(&calls);
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                coalescer
                    .run(key, || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(sample_token())
                    })
                    .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    fn sample_token() -> TokenData {
        let now = chrono::Utc::now();
        TokenData {
            server_name: "svc".into(),
            user_id: "user".into(),
            provider_type: crate::types::ProviderType::Github,
            tenant_id: None,
            access_token: "tok".into(),
            refresh_token: None,
            id_token: None,
            token_type: "Bearer".into(),
            issued_at: now,
            expires_at: now + chrono::Duration::hours(1),
            refresh_at: now + chrono::Duration::minutes(50),
            last_used: None,
            scopes: vec![],
            storage_tier: crate::types::StorageTier::LocalSecretsDir,
            usage_count: 0,
        }
    }
}
