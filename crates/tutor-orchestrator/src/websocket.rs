//! WebSocket event types and broadcasting for real-time observation.
//!
//! Operators and dashboards can watch the orchestrator over `/api/ws`. Events
//! are broadcast to every connected client as requests complete and backend
//! health changes.
//!
//! # Event Types
//!
//! - `connected` - Sent when a client connects, includes health and metrics
//! - `request_completed` - A dispatched request resolved
//! - `rate_limited` - A request was denied by the rate limiter
//! - `service_health_changed` - A backend flipped between healthy and unhealthy
//! - `context_updated` - A learner's XP or skill level changed
//! - `error` - A request failed after dispatch
//!
//! # Example
//!
//! ```no_run
//! use tutor_orchestrator::websocket::{EventBroadcaster, TutorEvent};
//!
//! # async fn example() {
//! let broadcaster = EventBroadcaster::new(100);
//! let mut receiver = broadcaster.subscribe();
//!
//! broadcaster.send(TutorEvent::error("backend exploded"));
//!
//! if let Ok(event) = receiver.recv().await {
//!     println!("Received: {:?}", event);
//! }
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::api::AppState;
use crate::backend::ServiceId;
use crate::context::{SkillLevel, UserLearningContext};
use crate::health::ServiceHealthRecord;
use crate::metrics::MetricsSnapshot;
use crate::request::RequestType;

// ============================================================================
// Event Payloads
// ============================================================================

/// Payload for the `connected` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectedPayload {
    /// Current backend health.
    pub health: Vec<ServiceHealthRecord>,
    /// Current aggregate metrics.
    pub metrics: MetricsSnapshot,
}

/// Payload for the `request_completed` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestCompletedPayload {
    /// The requesting user.
    pub user_id: String,
    /// The kind of request.
    pub request_type: RequestType,
    /// The backend that served (or last attempted) the request.
    pub service: ServiceId,
    /// Whether a non-preferred backend was used.
    pub used_fallback: bool,
    /// Whether a usable result was produced.
    pub success: bool,
    /// End-to-end backend latency.
    pub response_time_ms: u64,
    /// When the request resolved.
    pub timestamp: DateTime<Utc>,
}

/// Payload for the `rate_limited` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitedPayload {
    /// The denied user.
    pub user_id: String,
    /// The kind of request.
    pub request_type: RequestType,
    /// Seconds until the window rolls over.
    pub retry_after_secs: u64,
}

/// Payload for the `service_health_changed` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceHealthChangedPayload {
    /// The backend whose health changed.
    pub service: ServiceId,
    /// The new health.
    pub healthy: bool,
    /// Failure streak at the time of the change.
    pub consecutive_failures: u32,
    /// When the change happened.
    pub timestamp: DateTime<Utc>,
}

/// Payload for the `context_updated` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextUpdatedPayload {
    /// The learner.
    pub user_id: String,
    /// Skill level after the update.
    pub skill_level: SkillLevel,
    /// XP after the update.
    #[serde(rename = "totalXP")]
    pub total_xp: u64,
    /// Streak after the update.
    pub streak: u32,
}

/// Payload for the `error` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Human-readable error message.
    pub message: String,
}

// ============================================================================
// Event Enum
// ============================================================================

/// Orchestrator events.
///
/// All events are serialized as JSON objects with "event" and "payload" fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum TutorEvent {
    /// Sent when a client connects.
    Connected(ConnectedPayload),
    /// Sent when a dispatched request resolves.
    RequestCompleted(RequestCompletedPayload),
    /// Sent when a request is denied by the rate limiter.
    RateLimited(RateLimitedPayload),
    /// Sent when a backend's health flips.
    ServiceHealthChanged(ServiceHealthChangedPayload),
    /// Sent when a learner's progress changes.
    ContextUpdated(ContextUpdatedPayload),
    /// Sent when a dispatched request fails.
    Error(ErrorPayload),
}

impl TutorEvent {
    /// Creates a `Connected` event.
    #[must_use]
    pub const fn connected(health: Vec<ServiceHealthRecord>, metrics: MetricsSnapshot) -> Self {
        Self::Connected(ConnectedPayload { health, metrics })
    }

    /// Creates a `RequestCompleted` event.
    #[must_use]
    pub fn request_completed(
        user_id: impl Into<String>,
        request_type: RequestType,
        service: ServiceId,
        used_fallback: bool,
        success: bool,
        response_time_ms: u64,
    ) -> Self {
        Self::RequestCompleted(RequestCompletedPayload {
            user_id: user_id.into(),
            request_type,
            service,
            used_fallback,
            success,
            response_time_ms,
            timestamp: Utc::now(),
        })
    }

    /// Creates a `RateLimited` event.
    #[must_use]
    pub fn rate_limited(
        user_id: impl Into<String>,
        request_type: RequestType,
        retry_after_secs: u64,
    ) -> Self {
        Self::RateLimited(RateLimitedPayload {
            user_id: user_id.into(),
            request_type,
            retry_after_secs,
        })
    }

    /// Creates a `ServiceHealthChanged` event from a health record.
    #[must_use]
    pub fn service_health_changed(record: &ServiceHealthRecord) -> Self {
        Self::ServiceHealthChanged(ServiceHealthChangedPayload {
            service: record.service_id,
            healthy: record.healthy,
            consecutive_failures: record.consecutive_failures,
            timestamp: record.last_checked_at.unwrap_or_else(Utc::now),
        })
    }

    /// Creates a `ContextUpdated` event from a learner's context.
    #[must_use]
    pub fn context_updated(context: &UserLearningContext) -> Self {
        Self::ContextUpdated(ContextUpdatedPayload {
            user_id: context.user_id.clone(),
            skill_level: context.skill_level,
            total_xp: context.total_xp,
            streak: context.streak,
        })
    }

    /// Creates an `Error` event.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(ErrorPayload {
            message: message.into(),
        })
    }

    /// Returns the event name as a string.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::Connected(_) => "connected",
            Self::RequestCompleted(_) => "request_completed",
            Self::RateLimited(_) => "rate_limited",
            Self::ServiceHealthChanged(_) => "service_health_changed",
            Self::ContextUpdated(_) => "context_updated",
            Self::Error(_) => "error",
        }
    }
}

// ============================================================================
// Event Broadcaster
// ============================================================================

/// Broadcasts orchestrator events to all subscribers.
///
/// Events are not persisted for disconnected clients.
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<TutorEvent>,
}

impl EventBroadcaster {
    /// Creates a new `EventBroadcaster` with the specified buffer capacity.
    ///
    /// The buffer determines how many events can be queued per subscriber
    /// before old events are dropped.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Creates a new subscriber for receiving events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TutorEvent> {
        self.sender.subscribe()
    }

    /// Broadcasts an event to all connected subscribers.
    ///
    /// Returns the number of active receivers; 0 means nobody is listening.
    pub fn send(&self, event: TutorEvent) -> usize {
        // send() returns Err only if there are no receivers
        self.sender.send(event).unwrap_or(0)
    }

    /// Returns the number of active subscribers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

// ============================================================================
// WebSocket Handler
// ============================================================================

/// Maximum number of missed pong responses before disconnecting.
const MAX_MISSED_PONGS: u8 = 3;

/// Interval between heartbeat pings.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// WebSocket upgrade handler for `/api/ws`.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    info!("New WebSocket connection request");
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handles a single WebSocket connection.
///
/// Sends a `connected` event, then forwards every broadcast event. Pings every
/// 30 seconds and closes after 3 missed pongs.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    // Subscribe before the snapshot so nothing between the two is missed
    let mut event_receiver = state.orchestrator.events().subscribe();

    let connected = TutorEvent::connected(
        state.orchestrator.service_health(),
        state.orchestrator.metrics(),
    );
    let connected_json = match serde_json::to_string(&connected) {
        Ok(json) => json,
        Err(e) => {
            warn!("Failed to serialize connected event: {}", e);
            return;
        }
    };

    if sender.send(Message::Text(connected_json)).await.is_err() {
        debug!("Client disconnected before receiving connected event");
        return;
    }

    info!("WebSocket client connected, sent initial snapshot");

    let mut heartbeat_interval = interval(HEARTBEAT_INTERVAL);
    // The first tick completes immediately
    heartbeat_interval.tick().await;
    let mut missed_pongs = 0u8;

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        missed_pongs = 0;
                        debug!("Received pong from client");
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("Client requested close");
                        break;
                    }
                    Some(Ok(Message::Text(_) | Message::Binary(_))) => {
                        debug!("Ignoring message from client");
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            debug!("Failed to send pong, client disconnected");
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        debug!("WebSocket error: {}", e);
                        break;
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        break;
                    }
                }
            }

            event = event_receiver.recv() => {
                match event {
                    Ok(tutor_event) => {
                        let json = match serde_json::to_string(&tutor_event) {
                            Ok(j) => j,
                            Err(e) => {
                                warn!("Failed to serialize event: {}", e);
                                continue;
                            }
                        };

                        if sender.send(Message::Text(json)).await.is_err() {
                            debug!("Failed to send event, client disconnected");
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Client lagged, missed {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Broadcaster closed");
                        break;
                    }
                }
            }

            _ = heartbeat_interval.tick() => {
                if sender.send(Message::Ping(vec![])).await.is_err() {
                    debug!("Failed to send ping, client disconnected");
                    break;
                }
                missed_pongs += 1;
                if missed_pongs >= MAX_MISSED_PONGS {
                    info!("Client missed {} pongs, closing connection", MAX_MISSED_PONGS);
                    break;
                }
            }
        }
    }

    info!("WebSocket client disconnected");
}

// ============================================================================
// Tests
// ============================================================================
