//! # Streaming Channel
//!
//! Generalizes the dashboard's WebSocket broadcaster
//! (`dashboard::websocket`) from a metrics-update feed into the real-time
//! frame-analysis and job-progress channel described by spec §4.7/§6.2:
//! per-client connections, topic subscriptions (`"job:<id>"` for progress),
//! personal delivery, and topic/global broadcast, all guarded by the same
//! `Arc<RwLock<HashMap<...>>>` pattern the dashboard module uses for its
//! connection table.
//!
//! Frames arriving on a connection are analyzed **synchronously on the
//! receiving task**, calling straight into `ToolRunner::execute` — never
//! through the job store or worker pool. Earlier designs routed frames
//! through the async job queue, which meant a client's "live" feed was
//! actually polling queued work; that indirection is deliberately absent here.

pub mod handler;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};

/// Envelope exchanged in both directions over the streaming channel
/// (spec §4.7, §6.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamingMessage {
    Connected {
        client_id: String,
        plugin: Option<String>,
    },
    Result {
        payload: FrameResultPayload,
        timestamp: i64,
    },
    Error {
        payload: ErrorPayload,
        timestamp: i64,
    },
    PluginSwitched {
        plugin: String,
        timestamp: i64,
    },
    Pong {
        timestamp: i64,
    },
    Progress {
        payload: ProgressPayload,
        timestamp: i64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameResultPayload {
    pub frame_id: Option<String>,
    pub plugin: String,
    pub result: serde_json::Map<String, serde_json::Value>,
    pub processing_time_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub error: String,
    pub frame_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressPayload {
    pub job_id: String,
    pub current_frame: Option<u64>,
    pub total_frames: Option<u64>,
    pub percent: f64,
    pub current_tool: Option<String>,
    pub tools_total: Option<u64>,
    pub tools_completed: Option<u64>,
}

/// Client message types accepted from the wire (spec §6.2).
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Frame {
        frame_id: Option<String>,
        #[serde(default)]
        image_base64: Option<String>,
        #[serde(default)]
        image_url: Option<String>,
        #[serde(default)]
        options: serde_json::Map<String, serde_json::Value>,
    },
    Subscribe {
        topic: String,
    },
    SwitchPlugin {
        plugin: String,
    },
    Ping,
}

fn job_topic(job_id: &str) -> String {
    format!("job:{job_id}")
}

struct Connection {
    sender: mpsc::Sender<StreamingMessage>,
    plugin: String,
}

/// Connection table + topic subscription sets. A [`StreamingManager`] is a
/// cheap `Arc`-backed handle; clone it freely across connection tasks.
#[derive(Clone)]
pub struct StreamingManager {
    connections: Arc<RwLock<HashMap<String, Connection>>>,
    subscriptions: Arc<RwLock<HashMap<String, HashSet<String>>>>,
}

impl StreamingManager {
    pub fn new() -> Self {
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Registers a new connection and returns the receiving half of its
    /// personal channel. Always succeeds — "accept+register, false on
    /// failure" degenerates to "always true" since there is no admission
    /// control beyond auth, which already ran before this is called.
    pub async fn connect(
        &self,
        client_id: String,
        plugin: String,
    ) -> mpsc::Receiver<StreamingMessage> {
        let (tx, rx) = mpsc::channel(64);
        self.connections
            .write()
            .await
            .insert(client_id, Connection { sender: tx, plugin });
        rx
    }

    /// Removes a client from the connection table and every subscription
    /// set. Idempotent.
    pub async fn disconnect(&self, client_id: &str) {
        self.connections.write().await.remove(client_id);
        let mut subscriptions = self.subscriptions.write().await;
        for subscribers in subscriptions.values_mut() {
            subscribers.remove(client_id);
        }
        subscriptions.retain(|_, subscribers| !subscribers.is_empty());
    }

    /// Double-subscribe is a no-op; the topic is created on first subscriber.
    pub async fn subscribe(&self, client_id: &str, topic: &str) {
        self.subscriptions
            .write()
            .await
            .entry(topic.to_string())
            .or_default()
            .insert(client_id.to_string());
    }

    pub async fn unsubscribe(&self, client_id: &str, topic: &str) {
        if let Some(subscribers) = self.subscriptions.write().await.get_mut(topic) {
            subscribers.remove(client_id);
        }
    }

    pub async fn subscribe_job(&self, client_id: &str, job_id: &str) {
        self.subscribe(client_id, &job_topic(job_id)).await;
    }

    pub async fn current_plugin(&self, client_id: &str) -> Option<String> {
        self.connections
            .read()
            .await
            .get(client_id)
            .map(|c| c.plugin.clone())
    }

    pub async fn set_plugin(&self, client_id: &str, plugin: String) {
        if let Some(conn) = self.connections.write().await.get_mut(client_id) {
            conn.plugin = plugin;
        }
    }

    /// Delivers to one client's personal channel; disconnects the client on
    /// delivery failure (the receiver task has exited).
    pub async fn send_personal(&self, client_id: &str, message: StreamingMessage) {
        let sender = self
            .connections
            .read()
            .await
            .get(client_id)
            .map(|c| c.sender.clone());
        let Some(sender) = sender else { return };
        if sender.send(message).await.is_err() {
            self.disconnect(client_id).await;
        }
    }

    /// Sends to every connection, or just a topic's subscribers when one is
    /// given. The target set is snapshotted before sending so a concurrent
    /// disconnect can't corrupt the iteration; anything that fails during
    /// delivery is collected and disconnected once the broadcast completes.
    pub async fn broadcast(&self, message: StreamingMessage, topic: Option<&str>) {
        let targets: Vec<String> = match topic {
            Some(topic) => self
                .subscriptions
                .read()
                .await
                .get(topic)
                .map(|set| set.iter().cloned().collect())
                .unwrap_or_default(),
            None => self.connections.read().await.keys().cloned().collect(),
        };

        let mut failed = Vec::new();
        {
            let connections = self.connections.read().await;
            for client_id in &targets {
                if let Some(conn) = connections.get(client_id) {
                    if conn.sender.send(message.clone()).await.is_err() {
                        failed.push(client_id.clone());
                    }
                }
            }
        }
        for client_id in failed {
            self.disconnect(&client_id).await;
        }
    }

    pub async fn send_frame_result(
        &self,
        client_id: &str,
        frame_id: Option<String>,
        plugin: String,
        result: serde_json::Map<String, serde_json::Value>,
        processing_time_ms: u64,
    ) {
        self.send_personal(
            client_id,
            StreamingMessage::Result {
                payload: FrameResultPayload {
                    frame_id,
                    plugin,
                    result,
                    processing_time_ms,
                },
                timestamp: Utc::now().timestamp(),
            },
        )
        .await;
    }

    pub async fn send_error(&self, client_id: &str, error: String, frame_id: Option<String>) {
        self.send_personal(
            client_id,
            StreamingMessage::Error {
                payload: ErrorPayload { error, frame_id },
                timestamp: Utc::now().timestamp(),
            },
        )
        .await;
    }

    /// Broadcasts job progress to that job's topic subscribers only.
    pub async fn send_progress(&self, payload: ProgressPayload) {
        let topic = job_topic(&payload.job_id);
        self.broadcast(
            StreamingMessage::Progress {
                payload,
                timestamp: Utc::now().timestamp(),
            },
            Some(&topic),
        )
        .await;
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }
}

impl Default for StreamingManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disconnect_removes_client_from_subscriptions() {
        let manager = StreamingManager::new();
        let _rx = manager.connect("c1".to_string(), "ocr".to_string()).await;
        manager.subscribe("c1", "job:abc").await;
        manager.disconnect("c1").await;
        assert_eq!(manager.subscriptions.read().await.len(), 0);
    }

    #[tokio::test]
    async fn broadcast_without_topic_reaches_every_connection() {
        let manager = StreamingManager::new();
        let mut rx1 = manager.connect("c1".to_string(), "ocr".to_string()).await;
        let mut rx2 = manager.connect("c2".to_string(), "ocr".to_string()).await;
        manager
            .broadcast(
                StreamingMessage::Pong {
                    timestamp: 0,
                },
                None,
            )
            .await;
        assert!(rx1.recv().await.is_some());
        assert!(rx2.recv().await.is_some());
    }

    #[tokio::test]
    async fn broadcast_with_topic_reaches_only_subscribers() {
        let manager = StreamingManager::new();
        let mut rx1 = manager.connect("c1".to_string(), "ocr".to_string()).await;
        let mut rx2 = manager.connect("c2".to_string(), "ocr".to_string()).await;
        manager.subscribe_job("c1", "job-1").await;

        manager
            .send_progress(ProgressPayload {
                job_id: "job-1".to_string(),
                current_frame: Some(1),
                total_frames: Some(10),
                percent: 10.0,
                current_tool: None,
                tools_total: None,
                tools_completed: None,
            })
            .await;

        assert!(rx1.recv().await.is_some());
        assert!(tokio::time::timeout(std::time::Duration::from_millis(20), rx2.recv())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn double_subscribe_is_a_no_op() {
        let manager = StreamingManager::new();
        let _rx = manager.connect("c1".to_string(), "ocr".to_string()).await;
        manager.subscribe("c1", "job:x").await;
        manager.subscribe("c1", "job:x").await;
        let subscriptions = manager.subscriptions.read().await;
        assert_eq!(subscriptions.get("job:x").unwrap().len(), 1);
    }
}
