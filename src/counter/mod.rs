use std::sync::Arc;

use tokio::sync::{watch, RwLock};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::common::Error;
use crate::config::CounterConfig;
use crate::kv::{KvError, KvStore};

/*
    The counter lives in the shared key-value store under a single key;
    this node keeps no copy of it. An add is a read followed by a
    compare-and-swap from the value read to value + delta. If another node
    got in between, the CAS fails and the add starts over from a fresh read,
    so every applied delta lands exactly once on the value it was computed
    from. Adds from this node are serialized by a local lock; adds from
    different nodes are serialized only by the store's CAS.
*/

pub struct GrowOnlyCounter<K: KvStore> {
    kv: Arc<K>,
    config: CounterConfig,
    /// Adds take this exclusively, reads share it.
    lock: RwLock<()>,
    /// Flips to true once the key is known to exist.
    ready: watch::Sender<bool>,
    cancel: CancellationToken,
}

impl<K: KvStore> GrowOnlyCounter<K> {
    pub fn new(kv: Arc<K>, config: CounterConfig, cancel: CancellationToken) -> Self {
        let (ready, _) = watch::channel(false);
        GrowOnlyCounter {
            kv,
            config,
            lock: RwLock::new(()),
            ready,
            cancel,
        }
    }

    #[cfg(test)]
    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Makes sure the key exists, creating it at zero if nobody has yet.
    /// Adds and reads wait until this has finished.
    pub async fn initialize(&self) -> Result<(), Error> {
        let key = self.config.key.as_str();
        loop {
            match self.kv.read(key).await {
                Ok(value) => {
                    info!(key, value, "counter already present");
                    break;
                }
                // A CAS with create-if-missing cannot clobber a value another
                // node created and incremented in the meantime.
                Err(KvError::KeyNotFound(_)) => match self.kv.compare_and_swap(key, 0, 0, true).await {
                    Ok(()) => {
                        info!(key, "counter created");
                        break;
                    }
                    Err(KvError::Mismatch { .. }) => {
                        info!(key, "counter created by another node");
                        break;
                    }
                    Err(e) => warn!(key, error = %e, "creating counter failed, retrying"),
                },
                Err(e) => warn!(key, error = %e, "reading counter failed, retrying"),
            }
            self.backoff().await?;
        }

        self.ready.send_replace(true);
        Ok(())
    }

    /// Adds `delta` and returns the value this add produced. A negative
    /// delta is rejected with `InvalidArgument` before the store is touched,
    /// since the counter only grows.
    pub async fn add(&self, delta: i64) -> Result<i64, Error> {
        if delta < 0 {
            return Err(Error::InvalidArgument(format!(
                "counter only grows, got delta {delta}"
            )));
        }
        self.wait_ready().await?;

        let _guard = self.lock.write().await;
        let key = self.config.key.as_str();
        loop {
            let current = match self.kv.read(key).await {
                Ok(value) => value,
                Err(e) => {
                    debug!(key, error = %e, "read failed, retrying");
                    self.backoff().await?;
                    continue;
                }
            };
            let next = current
                .checked_add(delta)
                .ok_or_else(|| Error::InvalidArgument(format!("adding {delta} to {current} overflows")))?;

            match self.kv.compare_and_swap(key, current, next, false).await {
                Ok(()) => {
                    debug!(key, delta, value = next, "add applied");
                    return Ok(next);
                }
                Err(KvError::Mismatch { .. }) => debug!(key, observed = current, "value moved, rereading"),
                Err(e) => debug!(key, error = %e, "cas failed, retrying"),
            }
            self.backoff().await?;
        }
    }

    pub async fn read(&self) -> Result<i64, Error> {
        self.wait_ready().await?;

        let _guard = self.lock.read().await;
        let key = self.config.key.as_str();
        loop {
            match self.kv.read(key).await {
                Ok(value) => return Ok(value),
                Err(e) => debug!(key, error = %e, "read failed, retrying"),
            }
            self.backoff().await?;
        }
    }

    async fn wait_ready(&self) -> Result<(), Error> {
        let mut ready = self.ready.subscribe();
        loop {
            let is_ready = *ready.borrow_and_update();
            if is_ready {
                return Ok(());
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(Error::Shutdown),
                changed = ready.changed() => changed.map_err(|_| Error::Shutdown)?,
            }
        }
    }

    async fn backoff(&self) -> Result<(), Error> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(Error::Shutdown),
            _ = sleep(self.config.retry_delay) => Ok(()),
        }
    }
}
