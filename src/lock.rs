// Fleet-wide mutual exclusion for scheduled jobs
//
// A `CronGuard` runs an action only when this instance holds the named lock.
// Contention is not an error: it means another instance is already on it.

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::EngineResult;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
    pub key: String,
    pub value: String,
}

#[async_trait]
pub trait LockBroker: Send + Sync + 'static {
    // None when another holder owns the key
    async fn obtain(&self, key: &str, lease: Duration) -> EngineResult<Option<LockToken>>;

    async fn release(&self, token: &LockToken) -> EngineResult<()>;
}

// Deletes the key only while it still carries our value
const RELEASE_SCRIPT: &str = r#"
    if redis.call("GET", KEYS[1]) == ARGV[1] then
        return redis.call("DEL", KEYS[1])
    else
        return 0
    end
"#;

#[derive(Clone)]
pub struct RedisLockBroker {
    client: redis::Client,
}

impl RedisLockBroker {
    pub fn new(connection_string: &str) -> EngineResult<Self> {
        let client = redis::Client::open(connection_string)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl LockBroker for RedisLockBroker {
    async fn obtain(&self, key: &str, lease: Duration) -> EngineResult<Option<LockToken>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let value = format!("{:016x}", rand::random::<u64>());

        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(&value)
            .arg("NX")
            .arg("PX")
            .arg(lease.as_millis() as u64)
            .query_async(&mut conn)
            .await?;

        Ok(result.map(|_| LockToken {
            key: key.to_string(),
            value,
        }))
    }

    async fn release(&self, token: &LockToken) -> EngineResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let deleted: i64 = redis::Script::new(RELEASE_SCRIPT)
            .key(&token.key)
            .arg(&token.value)
            .invoke_async(&mut conn)
            .await?;
        if deleted == 0 {
            debug!(key = %token.key, "lock already expired before release");
        }
        Ok(())
    }
}

pub type GuardedAction<'a> = BoxFuture<'a, EngineResult<()>>;

#[async_trait]
pub trait CronGuard: Send + Sync + 'static {
    async fn with_lock<'a>(
        &self,
        name: &str,
        lease: Duration,
        action: GuardedAction<'a>,
    ) -> EngineResult<()>;
}

/// Runs the action only while holding the broker's lock, and releases it on
/// every exit path including a panicking action.
pub struct BrokeredGuard {
    broker: Arc<dyn LockBroker>,
}

impl BrokeredGuard {
    pub fn new(broker: Arc<dyn LockBroker>) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl CronGuard for BrokeredGuard {
    async fn with_lock<'a>(
        &self,
        name: &str,
        lease: Duration,
        action: GuardedAction<'a>,
    ) -> EngineResult<()> {
        let token = match self.broker.obtain(name, lease).await? {
            Some(token) => token,
            None => {
                debug!(lock = name, "lock held by another instance, skipping");
                return Ok(());
            }
        };

        let outcome = AssertUnwindSafe(action).catch_unwind().await;

        if let Err(err) = self.broker.release(&token).await {
            warn!(lock = name, error = %err, tag = "lock_release_error", "cannot release lock, leaving it to expire");
        }

        match outcome {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

// Used when no broker is configured: every instance runs every job
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopGuard;

#[async_trait]
impl CronGuard for NoopGuard {
    async fn with_lock<'a>(
        &self,
        _name: &str,
        _lease: Duration,
        action: GuardedAction<'a>,
    ) -> EngineResult<()> {
        action.await
    }
}
