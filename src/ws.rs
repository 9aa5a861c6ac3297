//! WebSocket transport. One task reads client frames and drives the engine;
//! a writer task drains the session outbox into the socket; each joined room
//! gets a forwarding task from its broadcast channel into the outbox.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, OwnedSemaphorePermit};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::auth::Credentials;
use crate::engine::*;
use crate::http::ApiError;
use crate::limits::{MAX_ROOMS_PER_CONNECTION, SESSION_OUTBOX_CAPACITY};
use crate::model::*;
use crate::observability::*;
use crate::server::AppState;
use crate::tenant::DEFAULT_TENANT;

// ── Wire format ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    JoinDay { day: Day },
    LeaveDay { day: Day },
    HoldSlot { slot_id: SlotId },
    ReleaseHold { slot_id: SlotId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    JoinedDay { day: Day },
    SlotsSnapshot(DaySnapshot),
    HoldSlotAck(HoldAck),
    ReleaseHoldAck(ReleaseAck),
    Error { error: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HoldAck {
    pub ok: bool,
    pub slot_id: SlotId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub renewed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub held_by: Option<HolderId>,
    /// The slot the caller already holds, on `user_has_other_hold`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub held_slot_id: Option<SlotId>,
}

impl HoldAck {
    fn rejected(slot_id: SlotId, error: &'static str) -> Self {
        Self {
            ok: false,
            slot_id,
            ttl: None,
            renewed: None,
            error: Some(error),
            held_by: None,
            held_slot_id: None,
        }
    }

    fn from_outcome(slot_id: SlotId, outcome: AcquireOutcome) -> Self {
        match outcome {
            AcquireOutcome::Acquired { ttl, renewed, .. } => Self {
                ok: true,
                slot_id,
                ttl: Some(ttl_secs(ttl)),
                renewed: Some(renewed),
                error: None,
                held_by: None,
                held_slot_id: None,
            },
            AcquireOutcome::Conflict(conflict) => {
                let mut ack = Self::rejected(slot_id, conflict.reason());
                match conflict {
                    Conflict::HeldByOther { owner, ttl } => {
                        ack.held_by = Some(owner);
                        ack.ttl = Some(ttl_secs(ttl));
                    }
                    Conflict::HolderHasOther { slot_id: held, ttl } => {
                        ack.held_slot_id = Some(held);
                        ack.ttl = Some(ttl_secs(ttl));
                    }
                }
                ack
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleaseAck {
    pub ok: bool,
    pub slot_id: SlotId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub released: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'static str>,
}

// ── Upgrade ──────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
    pub holder: Option<String>,
    pub tenant: Option<String>,
}

/// Everything a handler needs to act for one connection.
#[derive(Clone)]
pub struct SessionContext {
    pub session_id: SessionId,
    pub holder: HolderId,
    pub engine: Arc<Engine>,
    pub shutdown: CancellationToken,
}

/// Credentials come from headers or, for browsers that cannot set them on an
/// upgrade, from the query string. Rejections happen before the upgrade.
pub async fn upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let creds = Credentials::from_headers(&headers).or(Credentials {
        token: params.token.as_deref(),
        holder: params.holder.as_deref(),
        role: None,
    });
    let identity = state.auth.verify(creds).map_err(ApiError::Unauthorized)?;

    let tenant = headers
        .get(crate::auth::TENANT_HEADER)
        .and_then(|v| v.to_str().ok())
        .or(params.tenant.as_deref())
        .unwrap_or(DEFAULT_TENANT);
    let engine = state.tenants.get_or_create(tenant).map_err(ApiError::Tenant)?;

    let Ok(permit) = state.sessions.clone().try_acquire_owned() else {
        warn!("session limit reached, rejecting {}", identity.holder);
        metrics::counter!(SESSIONS_REJECTED_TOTAL).increment(1);
        return Err(ApiError::Unavailable("too_many_connections"));
    };

    let ctx = SessionContext {
        session_id: Ulid::new(),
        holder: identity.holder,
        engine,
        shutdown: state.shutdown.clone(),
    };
    Ok(ws.on_upgrade(move |socket| run_session(socket, ctx, permit)))
}

// ── Session ──────────────────────────────────────────────────────

struct Session {
    ctx: SessionContext,
    outbox: mpsc::Sender<Message>,
    rooms: HashMap<Day, JoinHandle<()>>,
}

async fn run_session(socket: WebSocket, ctx: SessionContext, _permit: OwnedSemaphorePermit) {
    let session_id = ctx.session_id;
    info!("session {session_id} opened for {}", ctx.holder);
    metrics::counter!(SESSIONS_TOTAL).increment(1);
    metrics::gauge!(SESSIONS_ACTIVE).increment(1.0);

    let (mut sink, mut stream) = socket.split();
    let (outbox, mut rx) = mpsc::channel::<Message>(SESSION_OUTBOX_CAPACITY);
    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sink.send(msg).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let shutdown = ctx.shutdown.clone();
    let mut session = Session {
        ctx,
        outbox,
        rooms: HashMap::new(),
    };

    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = stream.next() => frame,
        };
        let text = match frame {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Binary(_))) => {
                session.send(&ServerEvent::Error { error: "bad_request" }).await;
                continue;
            }
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                debug!("session {session_id}: read error: {e}");
                break;
            }
        };
        if !session.handle(&text).await {
            break;
        }
    }

    session.close().await;
    let _ = writer.await;
    metrics::gauge!(SESSIONS_ACTIVE).decrement(1.0);
    info!("session {session_id} closed");
}

impl Session {
    /// Returns false once the outbox is gone.
    async fn send(&self, event: &ServerEvent) -> bool {
        match serde_json::to_string(event) {
            Ok(text) => self.outbox.send(Message::Text(text)).await.is_ok(),
            Err(e) => {
                warn!("session {}: unencodable reply: {e}", self.ctx.session_id);
                true
            }
        }
    }

    async fn handle(&mut self, text: &str) -> bool {
        let event = match serde_json::from_str::<ClientEvent>(text) {
            Ok(event) => event,
            Err(e) => {
                debug!("session {}: bad frame: {e}", self.ctx.session_id);
                return self.send(&ServerEvent::Error { error: "bad_request" }).await;
            }
        };
        match event {
            ClientEvent::JoinDay { day } => self.join(day).await,
            ClientEvent::LeaveDay { day } => {
                self.leave(day);
                true
            }
            ClientEvent::HoldSlot { slot_id } => {
                let ack = self.hold(slot_id).await;
                self.send(&ServerEvent::HoldSlotAck(ack)).await
            }
            ClientEvent::ReleaseHold { slot_id } => {
                let ack = self.release(slot_id).await;
                self.send(&ServerEvent::ReleaseHoldAck(ack)).await
            }
        }
    }

    /// Subscribe before taking the snapshot so nothing falls between the two.
    async fn join(&mut self, day: Day) -> bool {
        if !self.rooms.contains_key(&day) {
            if self.rooms.len() >= MAX_ROOMS_PER_CONNECTION {
                return self.send(&ServerEvent::Error { error: "too_many_rooms" }).await;
            }
            let rx = self.ctx.engine.rooms.join(day);
            if !self.send(&ServerEvent::JoinedDay { day }).await {
                return false;
            }
            let snapshot = match self.ctx.engine.snapshot(day).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!("session {}: snapshot of {day} failed: {e}", self.ctx.session_id);
                    return self.send(&ServerEvent::Error { error: e.code() }).await;
                }
            };
            if !self.send(&ServerEvent::SlotsSnapshot(snapshot)).await {
                return false;
            }
            let forwarder = forward(
                rx,
                self.outbox.clone(),
                self.ctx.engine.clone(),
                day,
                self.ctx.session_id,
            );
            self.rooms.insert(day, forwarder);
            return true;
        }

        if !self.send(&ServerEvent::JoinedDay { day }).await {
            return false;
        }
        match self.ctx.engine.snapshot(day).await {
            Ok(snapshot) => self.send(&ServerEvent::SlotsSnapshot(snapshot)).await,
            Err(e) => self.send(&ServerEvent::Error { error: e.code() }).await,
        }
    }

    fn leave(&mut self, day: Day) {
        if let Some(forwarder) = self.rooms.remove(&day) {
            forwarder.abort();
        }
    }

    async fn hold(&self, slot_id: SlotId) -> HoldAck {
        match self
            .ctx
            .engine
            .acquire_for_session(slot_id, &self.ctx.holder, self.ctx.session_id)
            .await
        {
            Ok(outcome) => HoldAck::from_outcome(slot_id, outcome),
            Err(e) => {
                debug!("session {}: hold {slot_id} failed: {e}", self.ctx.session_id);
                HoldAck::rejected(slot_id, e.code())
            }
        }
    }

    /// Holder-scoped: the user may release a hold placed from any connection.
    async fn release(&self, slot_id: SlotId) -> ReleaseAck {
        let claimant = Claimant::holder(self.ctx.holder.clone());
        match self.ctx.engine.release(slot_id, &claimant).await {
            Ok(ReleaseOutcome::Released { .. }) => ReleaseAck {
                ok: true,
                slot_id,
                released: Some(true),
                error: None,
            },
            Ok(ReleaseOutcome::NoHold) => ReleaseAck {
                ok: true,
                slot_id,
                released: Some(false),
                error: None,
            },
            Ok(outcome @ ReleaseOutcome::NotOwner) => ReleaseAck {
                ok: false,
                slot_id,
                released: None,
                error: Some(outcome.reason()),
            },
            Err(e) => ReleaseAck {
                ok: false,
                slot_id,
                released: None,
                error: Some(e.code()),
            },
        }
    }

    async fn close(self) {
        for (day, forwarder) in self.rooms {
            forwarder.abort();
            self.ctx.engine.rooms.prune(day);
        }
        match self
            .ctx
            .engine
            .end_session(&self.ctx.holder, self.ctx.session_id)
            .await
        {
            Ok(Some(outcome)) => debug!(
                "session {}: disconnect cleanup {}",
                self.ctx.session_id,
                outcome.reason()
            ),
            Ok(None) => {}
            Err(e) => warn!("session {}: disconnect cleanup failed: {e}", self.ctx.session_id),
        }
        // Dropping the outbox lets the writer finish.
        drop(self.outbox);
    }
}

/// Pump one room into the outbox. A spectator that falls behind the room
/// buffer gets a fresh snapshot in place of the events it missed.
fn forward(
    mut rx: broadcast::Receiver<RoomEvent>,
    outbox: mpsc::Sender<Message>,
    engine: Arc<Engine>,
    day: Day,
    session_id: SessionId,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let encoded = match rx.recv().await {
                Ok(event) => serde_json::to_string(&event),
                Err(RecvError::Lagged(n)) => {
                    warn!("session {session_id} lagged, {n} events for {day} dropped; resyncing");
                    metrics::counter!(ROOM_LAGGED_TOTAL).increment(1);
                    match engine.snapshot(day).await {
                        Ok(snapshot) => serde_json::to_string(&ServerEvent::SlotsSnapshot(snapshot)),
                        Err(e) => {
                            warn!("session {session_id}: resync snapshot of {day} failed: {e}");
                            continue;
                        }
                    }
                }
                Err(RecvError::Closed) => break,
            };
            let text = match encoded {
                Ok(text) => text,
                Err(e) => {
                    warn!("unencodable room frame: {e}");
                    continue;
                }
            };
            if outbox.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    })
}
