use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::timeout;

use super::{KvError, KvStore};
use crate::common::Error;
use crate::config::KvConfig;
use crate::network::{Body, ErrorCode, Transport};

/// Client for a key-value service node reached over the transport.
pub struct SeqKv<T: Transport> {
    transport: Arc<T>,
    config: KvConfig,
}

#[derive(Serialize)]
struct ReadRequest<'a> {
    key: &'a str,
}

#[derive(Deserialize)]
struct ReadReply {
    value: i64,
}

#[derive(Serialize)]
struct CasRequest<'a> {
    key: &'a str,
    from: i64,
    to: i64,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    create_if_not_exists: bool,
}

impl<T: Transport> SeqKv<T> {
    pub fn new(transport: Arc<T>, config: KvConfig) -> Self {
        SeqKv { transport, config }
    }

    async fn call(&self, key: &str, body: Body) -> Result<Body, KvError> {
        let service = self.config.service.as_str();
        match timeout(self.config.timeout, self.transport.rpc(service, body)).await {
            Ok(Ok(reply)) => Ok(reply.body),
            Ok(Err(Error::Remote { code, .. })) if code == ErrorCode::KEY_DOES_NOT_EXIST => {
                Err(KvError::KeyNotFound(key.to_string()))
            }
            Ok(Err(e)) => Err(KvError::Transport(e)),
            Err(_) => Err(KvError::Transport(Error::Timeout {
                dest: service.to_string(),
                after: self.config.timeout,
            })),
        }
    }
}

#[async_trait]
impl<T: Transport> KvStore for SeqKv<T> {
    async fn read(&self, key: &str) -> Result<i64, KvError> {
        let body = Body::with_payload("read", &ReadRequest { key })?;
        let reply: ReadReply = self.call(key, body).await?.decode()?;
        Ok(reply.value)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: i64,
        new: i64,
        create_if_missing: bool,
    ) -> Result<(), KvError> {
        let request = CasRequest {
            key,
            from: expected,
            to: new,
            create_if_not_exists: create_if_missing,
        };
        let body = Body::with_payload("cas", &request)?;
        match self.call(key, body).await {
            Ok(_) => Ok(()),
            Err(KvError::Transport(Error::Remote { code, .. })) if code == ErrorCode::PRECONDITION_FAILED => {
                Err(KvError::Mismatch {
                    key: key.to_string(),
                    expected,
                })
            }
            Err(e) => Err(e),
        }
    }
}
