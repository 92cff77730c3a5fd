//! Axum WebSocket upgrade handlers for the streaming channel: the main
//! frame-analysis socket (`GET /v1/stream`) and the job-progress socket
//! (`GET /ws/jobs/{job_id}`).

use std::time::Instant;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::response::Response;
use base64::Engine;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use uuid::Uuid;

use crate::server::AppState;
use crate::streaming::{ClientMessage, StreamingMessage};

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub plugin: Option<String>,
    #[allow(dead_code)]
    pub api_key: Option<String>,
}

/// `GET /v1/stream?plugin=<name>&api_key=<key>` — authentication has
/// already run in `auth_middleware` by the time this handler is reached.
pub async fn stream_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> Response {
    let plugin = query.plugin.unwrap_or_else(|| "ocr".to_string());
    ws.on_upgrade(move |socket| handle_socket(socket, state, plugin, None))
}

/// `GET /ws/jobs/{job_id}` — a dedicated socket that auto-subscribes to
/// that job's progress topic.
pub async fn job_progress_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, "ocr".to_string(), Some(job_id)))
}

async fn handle_socket(
    socket: WebSocket,
    state: AppState,
    initial_plugin: String,
    auto_subscribe_job: Option<String>,
) {
    let client_id = Uuid::new_v4().to_string();
    let mut rx = state
        .streaming
        .connect(client_id.clone(), initial_plugin.clone())
        .await;
    crate::metrics::increment_connections().await;

    if let Some(job_id) = &auto_subscribe_job {
        state.streaming.subscribe_job(&client_id, job_id).await;
    }

    let (mut sender, mut receiver) = socket.split();

    state
        .streaming
        .send_personal(
            &client_id,
            StreamingMessage::Connected {
                client_id: client_id.clone(),
                plugin: Some(initial_plugin),
            },
        )
        .await;

    let outgoing = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let Ok(text) = serde_json::to_string(&message) else {
                continue;
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = receiver.next().await {
        match message {
            Message::Text(text) => {
                handle_client_message(&state, &client_id, &text).await;
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    outgoing.abort();
    state.streaming.disconnect(&client_id).await;
    crate::metrics::decrement_connections().await;
}

async fn handle_client_message(state: &AppState, client_id: &str, text: &str) {
    let parsed: Result<ClientMessage, _> = serde_json::from_str(text);
    let Ok(client_message) = parsed else {
        state
            .streaming
            .send_error(client_id, "malformed client message".to_string(), None)
            .await;
        return;
    };

    match client_message {
        ClientMessage::Ping => {
            state
                .streaming
                .send_personal(
                    client_id,
                    StreamingMessage::Pong {
                        timestamp: chrono::Utc::now().timestamp(),
                    },
                )
                .await;
        }
        ClientMessage::Subscribe { topic } => {
            state.streaming.subscribe(client_id, &topic).await;
        }
        ClientMessage::SwitchPlugin { plugin } => {
            state.streaming.set_plugin(client_id, plugin.clone()).await;
            state
                .streaming
                .send_personal(
                    client_id,
                    StreamingMessage::PluginSwitched {
                        plugin,
                        timestamp: chrono::Utc::now().timestamp(),
                    },
                )
                .await;
        }
        ClientMessage::Frame {
            frame_id,
            image_base64,
            image_url,
            options,
        } => {
            analyze_frame(state, client_id, frame_id, image_base64, image_url, options).await;
        }
    }
}

/// Decodes the frame and runs it through the execution chain synchronously
/// on this task — the fix for the earlier design where real-time frames
/// were silently routed through the async job queue instead of being
/// analyzed inline.
async fn analyze_frame(
    state: &AppState,
    client_id: &str,
    frame_id: Option<String>,
    image_base64: Option<String>,
    image_url: Option<String>,
    options: serde_json::Map<String, serde_json::Value>,
) {
    let plugin = state
        .streaming
        .current_plugin(client_id)
        .await
        .unwrap_or_else(|| "ocr".to_string());

    let bytes = if let Some(url) = image_url.as_deref() {
        state.image_acquisition.fetch_url(url).await
    } else if let Some(encoded) = image_base64.as_deref() {
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| forgesyte_core::CoreError::validation("artifact", format!("invalid base64: {e}")))
    } else {
        Err(forgesyte_core::CoreError::validation(
            "artifact",
            "frame message carried neither image_base64 nor image_url",
        ))
    };

    let bytes = match bytes {
        Ok(bytes) => bytes,
        Err(e) => {
            state.streaming.send_error(client_id, e.to_string(), frame_id).await;
            return;
        }
    };

    let mut arguments = options;
    arguments.insert(
        "artifact".to_string(),
        serde_json::Value::String(base64::engine::general_purpose::STANDARD.encode(&bytes)),
    );

    let started = Instant::now();
    let default_tool = state
        .plugin_registry
        .get(&plugin)
        .await
        .ok()
        .and_then(|handle| handle.metadata().default_tool)
        .unwrap_or_else(|| "default".to_string());

    let result = state
        .tool_runner
        .execute(&plugin, &default_tool, arguments, "image/jpeg")
        .await;
    let processing_time_ms = started.elapsed().as_millis() as u64;

    match result {
        Ok(output) => {
            state
                .streaming
                .send_frame_result(client_id, frame_id, plugin, output, processing_time_ms)
                .await;
        }
        Err(e) => {
            state.streaming.send_error(client_id, e.to_string(), frame_id).await;
        }
    }
}
