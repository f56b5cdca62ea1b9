//! WebSocket connection lifecycle: handshake (token + device fingerprint,
//! with a step-up gate for unknown devices) → frame loop → cleanup.

use std::sync::Arc;

use {
    axum::extract::ws::{CloseFrame, Message, WebSocket},
    futures::{SinkExt, stream::StreamExt},
    tokio::sync::mpsc,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use {
    veil_common::{DeviceFingerprint, UserHash, now_ms},
    veil_protocol::{
        ClientFrame, ConnectParams, HANDSHAKE_TIMEOUT_MS, HeartbeatPolicy, MAX_PAYLOAD_BYTES,
        PROTOCOL_VERSION, ServerFrame, close_codes, error_codes,
    },
    veil_service_traits::DeviceCheck,
};

use crate::{
    rate_limit::SessionLimits,
    router,
    state::{GatewayState, Outbound, Session},
};

/// Drive a single WebSocket connection through its full lifecycle.
pub async fn handle_connection(socket: WebSocket, state: Arc<GatewayState>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Outbound>(state.config.limits.session_queue_cap);

    // Write loop: drains the bounded queue in order. FIFO per session falls
    // out of this single consumer.
    let write_handle = tokio::spawn(async move {
        while let Some(item) = rx.recv().await {
            match item {
                Outbound::Frame(json) => {
                    if ws_tx.send(Message::Text(json.into())).await.is_err() {
                        debug!("ws: write loop closed");
                        break;
                    }
                },
                Outbound::Close(code, reason) => {
                    let _ = ws_tx
                        .send(Message::Close(Some(CloseFrame {
                            code,
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                },
            }
        }
    });

    let close_early = |code: u16, reason: &str| {
        let _ = tx.try_send(Outbound::Close(code, reason.to_string()));
    };
    let send_early = |frame: &ServerFrame| {
        if let Ok(json) = serde_json::to_string(frame) {
            let _ = tx.try_send(Outbound::Frame(json));
        }
    };

    // ── Handshake ────────────────────────────────────────────────────────

    let params = match tokio::time::timeout(
        std::time::Duration::from_millis(HANDSHAKE_TIMEOUT_MS),
        wait_for_connect(&mut ws_rx),
    )
    .await
    {
        Ok(Some(params)) => params,
        Ok(None) => {
            warn!("ws: handshake failed");
            close_early(close_codes::PROTOCOL, error_codes::PROTOCOL_ERROR);
            let _ = write_handle.await;
            return;
        },
        Err(_) => {
            warn!("ws: handshake timeout");
            close_early(close_codes::PROTOCOL, error_codes::PROTOCOL_ERROR);
            let _ = write_handle.await;
            return;
        },
    };

    if params.protocol != PROTOCOL_VERSION {
        send_early(&ServerFrame::error(
            error_codes::PROTOCOL_ERROR,
            format!(
                "protocol mismatch: server={PROTOCOL_VERSION}, client={}",
                params.protocol
            ),
        ));
        close_early(close_codes::PROTOCOL, error_codes::PROTOCOL_ERROR);
        let _ = write_handle.await;
        return;
    }

    // ── Auth: token, then device fingerprint ─────────────────────────────

    let user_id = match state.services.auth.validate_token(&params.token).await {
        Ok(user_id) => user_id,
        Err(err) => {
            warn!(error = %err, "ws: token rejected");
            send_early(&ServerFrame::error(
                error_codes::AUTH_FAILED,
                "authentication failed",
            ));
            close_early(close_codes::AUTH, error_codes::AUTH_FAILED);
            let _ = write_handle.await;
            return;
        },
    };
    let user = state.user_hash(&user_id);
    let device = DeviceFingerprint::new(params.device_fp.clone());

    let device_check = match state.services.auth.check_device(&user, &device).await {
        Ok(check) => check,
        Err(err) => {
            warn!(error = %err, "ws: device check unavailable");
            send_early(&ServerFrame::error(
                error_codes::UPSTREAM_UNAVAILABLE,
                "authentication unavailable",
            ));
            close_early(close_codes::RECOVERABLE, error_codes::UPSTREAM_UNAVAILABLE);
            let _ = write_handle.await;
            return;
        },
    };

    if device_check == DeviceCheck::StepUpRequired
        && !step_up_gate(&state, &mut ws_rx, &send_early, &user, &device).await
    {
        close_early(close_codes::AUTH, error_codes::STEP_UP_REQUIRED);
        let _ = write_handle.await;
        return;
    }

    // ── Register & ack ───────────────────────────────────────────────────

    let session = Arc::new(Session::new(
        user.clone(),
        device.clone(),
        tx.clone(),
        CancellationToken::new(),
    ));
    state.connections.accept(Arc::clone(&session));

    session.send(&ServerFrame::Connected {
        protocol: PROTOCOL_VERSION,
        server_ts: now_ms(),
        heartbeat: HeartbeatPolicy {
            interval_seconds: state.config.heartbeat.interval_seconds,
            miss_threshold: state.config.heartbeat.miss_threshold,
        },
    });

    info!(
        conn = %session.conn_id,
        client = %params.client.name,
        platform = %params.client.platform,
        "ws: session established"
    );

    // ── Frame loop ───────────────────────────────────────────────────────

    let mut limits = SessionLimits::new(
        state.config.limits.frame_rate_per_second,
        state.config.limits.expensive_rate_per_minute,
    );
    let cancelled = session.cancelled();

    loop {
        let msg = tokio::select! {
            _ = cancelled.cancelled() => break,
            msg = ws_rx.next() => msg,
        };

        let text = match msg {
            Some(Ok(Message::Text(t))) => t.to_string(),
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                debug!(conn = %session.conn_id, error = %e, "ws: read error");
                break;
            },
        };

        if text.len() > MAX_PAYLOAD_BYTES {
            warn!(conn = %session.conn_id, size = text.len(), "ws: payload too large");
            session.send(&ServerFrame::error(
                error_codes::PROTOCOL_ERROR,
                "payload too large",
            ));
            session.close(close_codes::PROTOCOL, error_codes::PROTOCOL_ERROR);
            break;
        }

        // Validate on decode: an unknown type tag or malformed payload is a
        // protocol violation and terminates the session.
        let frame: ClientFrame = match serde_json::from_str(&text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(conn = %session.conn_id, error = %e, "ws: invalid frame");
                session.send(&ServerFrame::error(
                    error_codes::PROTOCOL_ERROR,
                    "invalid frame",
                ));
                session.close(close_codes::PROTOCOL, error_codes::PROTOCOL_ERROR);
                break;
            },
        };

        session.touch();

        if !limits.admit(frame.is_expensive()) {
            session.send(&ServerFrame::error(
                error_codes::RATE_LIMITED,
                "rate limit exceeded",
            ));
            continue;
        }

        match frame {
            ClientFrame::Ping { ts } => {
                session.send(&ServerFrame::Pong { ts });
            },
            ClientFrame::Connect(_) | ClientFrame::StepUp { .. } => {
                warn!(conn = %session.conn_id, "ws: handshake frame mid-session");
                session.close(close_codes::PROTOCOL, error_codes::PROTOCOL_ERROR);
                break;
            },
            other => router::dispatch(&state, &session, other).await,
        }
    }

    // ── Cleanup ──────────────────────────────────────────────────────────

    state
        .connections
        .remove(&session.user, &session.device, &session.conn_id);
    info!(
        conn = %session.conn_id,
        duration_secs = session.uptime().as_secs(),
        "ws: connection closed"
    );

    // Dropping every queue sender lets the write loop drain pending frames
    // (including a queued close code) and then exit on its own.
    drop(session);
    drop(tx);
    let _ = write_handle.await;
}

/// Wait for the first frame, which must be `connect`.
async fn wait_for_connect(
    rx: &mut futures::stream::SplitStream<WebSocket>,
) -> Option<ConnectParams> {
    while let Some(msg) = rx.next().await {
        let text = match msg {
            Ok(Message::Text(t)) => t.to_string(),
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        };
        return match serde_json::from_str::<ClientFrame>(&text) {
            Ok(ClientFrame::Connect(params)) => Some(params),
            _ => None,
        };
    }
    None
}

/// Step-up gate for an unknown device fingerprint: exactly one `step_up`
/// frame is accepted next; anything else — or a bad code — refuses the
/// connection. No other frame is processed in between.
async fn step_up_gate(
    state: &Arc<GatewayState>,
    ws_rx: &mut futures::stream::SplitStream<WebSocket>,
    send_early: &impl Fn(&ServerFrame),
    user: &UserHash,
    device: &DeviceFingerprint,
) -> bool {
    send_early(&ServerFrame::StepUpRequired {});
    info!(device = %device, "ws: step-up required for unknown device");

    let frame = match tokio::time::timeout(
        std::time::Duration::from_millis(HANDSHAKE_TIMEOUT_MS),
        ws_rx.next(),
    )
    .await
    {
        Ok(Some(Ok(Message::Text(t)))) => serde_json::from_str::<ClientFrame>(&t.to_string()).ok(),
        _ => None,
    };

    let Some(ClientFrame::StepUp { code }) = frame else {
        warn!(device = %device, "ws: expected step_up frame");
        return false;
    };

    match state.services.auth.verify_step_up(user, device, &code).await {
        Ok(true) => {
            if let Err(err) = state.services.auth.register_device(user, device).await {
                warn!(error = %err, "ws: failed to register device after step-up");
                return false;
            }
            info!(device = %device, "ws: step-up verified, device registered");
            true
        },
        Ok(false) => {
            warn!(device = %device, "ws: step-up code rejected");
            send_early(&ServerFrame::error(
                error_codes::STEP_UP_DENIED,
                "verification failed",
            ));
            false
        },
        Err(err) => {
            warn!(error = %err, "ws: step-up verification unavailable");
            false
        },
    }
}
