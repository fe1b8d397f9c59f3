//! Replies for asynchronous shell requests.
//!
//! Jobs hold a [`ListenerHandle`] so they can answer after the dispatcher has
//! moved on; if the client is gone by then the reply is dropped.

use crate::listener::ListenerHandle;
use serde_json::{json, Map, Value};
use tracing::warn;

/// An `ASYNC_*` request, answered with `RESOLVE|id|…` or `REJECT|id|…`.
#[derive(Debug)]
pub struct SocketApiJob {
    job_id: String,
    listener: ListenerHandle,
    arguments: Map<String, Value>,
}

impl SocketApiJob {
    pub fn new(job_id: String, listener: ListenerHandle, arguments: Map<String, Value>) -> Self {
        Self {
            job_id,
            listener,
            arguments,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn arguments(&self) -> &Map<String, Value> {
        &self.arguments
    }

    pub fn resolve(self, response: &str) {
        self.listener
            .send_message(&format!("RESOLVE|{}|{}", self.job_id, response));
    }

    pub fn resolve_json(self, response: &Value) {
        let payload = response.to_string();
        self.resolve(&payload);
    }

    pub fn reject(self, reason: &str) {
        self.listener
            .send_message(&format!("REJECT|{}|{}", self.job_id, reason));
    }
}

/// A `V2/*` request, answered with `<COMMAND>_RESULT:{json}`.
///
/// Dropping a job without answering sends a failure, so a client never waits
/// forever on a forgotten id.
#[derive(Debug)]
pub struct SocketApiJobV2 {
    listener: Option<ListenerHandle>,
    command: String,
    job_id: String,
    arguments: Map<String, Value>,
    warning: Option<String>,
}

impl SocketApiJobV2 {
    pub fn new(
        listener: ListenerHandle,
        command: String,
        job_id: String,
        arguments: Map<String, Value>,
    ) -> Self {
        Self {
            listener: Some(listener),
            command,
            job_id,
            arguments,
            warning: None,
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn arguments(&self) -> &Map<String, Value> {
        &self.arguments
    }

    /// Attached to the eventual reply, success or failure.
    pub fn set_warning(&mut self, warning: impl Into<String>) {
        self.warning = Some(warning.into());
    }

    pub fn success(mut self, response: Map<String, Value>) {
        self.do_finish(response);
    }

    pub fn failure(mut self, error: &str) {
        let mut response = Map::new();
        response.insert("error".into(), Value::from(error));
        self.do_finish(response);
    }

    fn do_finish(&mut self, response: Map<String, Value>) {
        let Some(listener) = self.listener.take() else {
            return;
        };
        let mut envelope = json!({
            "id": self.job_id,
            "arguments": Value::Object(response),
        });
        if let (Some(warning), Value::Object(map)) = (self.warning.take(), &mut envelope) {
            map.insert("warning".into(), Value::from(warning));
        }
        listener.send_message(&format!("{}_RESULT:{}", self.command, envelope));
    }
}

impl Drop for SocketApiJobV2 {
    fn drop(&mut self) {
        if self.listener.is_some() {
            warn!(command = %self.command, id = %self.job_id, "Job dropped without a reply");
            let mut response = Map::new();
            response.insert("error".into(), Value::from("no reply"));
            self.do_finish(response);
        }
    }
}
