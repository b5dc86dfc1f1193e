use std::sync::Mutex;

use async_trait::async_trait;

use super::{Body, Message, NodeId, Transport};
use crate::common::Error;

type Responder = Box<dyn Fn(&str, &Body) -> Result<Body, Error> + Send + Sync>;

/// Transport double that records every outbound body and answers RPCs with
/// a caller-supplied function.
pub struct ScriptedTransport {
    id: NodeId,
    responder: Responder,
    sent: Mutex<Vec<(NodeId, Body)>>,
}

impl ScriptedTransport {
    pub fn new<F>(id: &str, responder: F) -> Self
    where
        F: Fn(&str, &Body) -> Result<Body, Error> + Send + Sync + 'static,
    {
        ScriptedTransport {
            id: id.to_string(),
            responder: Box::new(responder),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Every (destination, body) pair sent so far, RPCs included.
    pub fn sent(&self) -> Vec<(NodeId, Body)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, dest: &str) -> usize {
        self.sent.lock().unwrap().iter().filter(|(to, _)| to == dest).count()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn node_id(&self) -> Result<NodeId, Error> {
        Ok(self.id.clone())
    }

    async fn send(&self, dest: &str, body: Body) -> Result<(), Error> {
        self.sent.lock().unwrap().push((dest.to_string(), body));
        Ok(())
    }

    async fn reply(&self, request: &Message, mut body: Body) -> Result<(), Error> {
        body.in_reply_to = request.body.msg_id;
        self.send(&request.src, body).await
    }

    async fn rpc(&self, dest: &str, body: Body) -> Result<Message, Error> {
        self.sent.lock().unwrap().push((dest.to_string(), body.clone()));
        let reply = (self.responder)(dest, &body)?.into_result()?;
        Ok(Message {
            src: dest.to_string(),
            dest: self.id.clone(),
            body: reply,
        })
    }
}
