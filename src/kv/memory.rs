use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;

use super::{KvError, KvStore};
use crate::common::Error;
use crate::network::{Body, ErrorCode};

/// In-process key-value store. Every operation takes one lock, so all
/// clients see a single order of operations.
pub struct MemoryKv {
    values: Mutex<HashMap<String, i64>>,
    read_delay: Duration,
    failing_reads: AtomicUsize,
    mismatches: AtomicUsize,
}

#[derive(Deserialize)]
struct KeyRequest {
    key: String,
}

#[derive(Deserialize)]
struct WriteRequest {
    key: String,
    value: i64,
}

#[derive(Deserialize)]
struct CasRequest {
    key: String,
    from: i64,
    to: i64,
    #[serde(default)]
    create_if_not_exists: bool,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::with_read_delay(Duration::ZERO)
    }

    /// Holds every read result back for `delay` before returning it, which
    /// widens the window between a client's read and its CAS.
    pub fn with_read_delay(delay: Duration) -> Self {
        MemoryKv {
            values: Mutex::new(HashMap::new()),
            read_delay: delay,
            failing_reads: AtomicUsize::new(0),
            mismatches: AtomicUsize::new(0),
        }
    }

    /// Makes the next `count` reads fail as if the service timed out.
    pub fn fail_next_reads(&self, count: usize) {
        self.failing_reads.store(count, Ordering::SeqCst);
    }

    pub async fn get(&self, key: &str) -> Option<i64> {
        self.values.lock().await.get(key).copied()
    }

    /// Unconditional write, for seeding a value or serving a wire `write`.
    pub async fn write(&self, key: &str, value: i64) -> Result<(), KvError> {
        self.values.lock().await.insert(key.to_string(), value);
        Ok(())
    }

    /// CAS calls rejected so far because the value had moved.
    pub fn mismatches(&self) -> usize {
        self.mismatches.load(Ordering::SeqCst)
    }

    /// Answers one wire request the way the key-value service node would.
    pub async fn serve(&self, request: &Body) -> Body {
        match self.apply(request).await {
            Ok(body) => body,
            Err(KvError::KeyNotFound(key)) => {
                Body::error(ErrorCode::KEY_DOES_NOT_EXIST, format!("key {key} does not exist"))
            }
            Err(KvError::Mismatch { expected, .. }) => Body::error(
                ErrorCode::PRECONDITION_FAILED,
                format!("current value is not {expected}"),
            ),
            Err(KvError::Transport(e)) => Body::error(e.code(), e.to_string()),
        }
    }

    async fn apply(&self, request: &Body) -> Result<Body, KvError> {
        match request.kind.as_str() {
            "read" => {
                let KeyRequest { key } = request.decode()?;
                let value = self.read(&key).await?;
                let mut reply = Body::new("read_ok");
                reply.fields.insert("value".into(), Value::from(value));
                Ok(reply)
            }
            "write" => {
                let WriteRequest { key, value } = request.decode()?;
                self.write(&key, value).await?;
                Ok(Body::new("write_ok"))
            }
            "cas" => {
                let cas: CasRequest = request.decode()?;
                self.compare_and_swap(&cas.key, cas.from, cas.to, cas.create_if_not_exists)
                    .await?;
                Ok(Body::new("cas_ok"))
            }
            other => Err(KvError::Transport(Error::NotSupported(other.to_string()))),
        }
    }
}

impl Default for MemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn read(&self, key: &str) -> Result<i64, KvError> {
        let failing = self
            .failing_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(KvError::Transport(Error::Timeout {
                dest: "memory-kv".into(),
                after: Duration::ZERO,
            }));
        }

        let value = self.get(key).await;
        if !self.read_delay.is_zero() {
            tokio::time::sleep(self.read_delay).await;
        }
        value.ok_or_else(|| KvError::KeyNotFound(key.to_string()))
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: i64,
        new: i64,
        create_if_missing: bool,
    ) -> Result<(), KvError> {
        let mut values = self.values.lock().await;
        match values.get_mut(key) {
            Some(current) if *current == expected => {
                *current = new;
                Ok(())
            }
            Some(_) => {
                self.mismatches.fetch_add(1, Ordering::SeqCst);
                Err(KvError::Mismatch {
                    key: key.to_string(),
                    expected,
                })
            }
            None if create_if_missing => {
                values.insert(key.to_string(), new);
                Ok(())
            }
            None => Err(KvError::KeyNotFound(key.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cas_semantics() {
        let kv = MemoryKv::new();

        assert!(matches!(kv.compare_and_swap("k", 0, 1, false).await, Err(KvError::KeyNotFound(_))));
        kv.compare_and_swap("k", 0, 1, true).await.unwrap();
        assert!(matches!(kv.compare_and_swap("k", 0, 2, false).await, Err(KvError::Mismatch { .. })));
        kv.compare_and_swap("k", 1, 2, false).await.unwrap();

        assert_eq!(kv.read("k").await.unwrap(), 2);
        assert_eq!(kv.mismatches(), 1);
    }

    #[tokio::test]
    async fn test_serve_wire_requests() {
        let kv = MemoryKv::new();
        let mut read = Body::new("read");
        read.fields.insert("key".into(), Value::from("count"));

        let missing = kv.serve(&read).await;
        kv.write("count", 3).await.unwrap();
        let found = kv.serve(&read).await;

        assert_eq!(missing.fields.get("code"), Some(&Value::from(20)));
        assert_eq!(found.kind, "read_ok");
        assert_eq!(found.fields.get("value"), Some(&Value::from(3)));
    }
}
