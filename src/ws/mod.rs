//! WebSocket orchestrator: upgrade guard, per-connection dispatch and
//! process-snapshot broadcasting.
//!
//! Every connection owns an outbound mpsc queue drained by a writer task;
//! dispatch sites and the broadcast forwarder only ever enqueue frames.
//! Sheet syncs run as spawned jobs whose progress events are pumped into
//! the process registry, the requesting socket and the broadcast channel.

use crate::audit::{self, AuditEntry, AuditLogger, AuditResult};
use crate::auth::{self, Claims};
use crate::bulk::{self, BulkContext};
use crate::config;
use crate::model::{BackgroundProcess, LogKind};
use crate::notify::{Mailer, SmsSender};
use crate::process::{ProcessManager, ProcessOwner};
use crate::sheets::clients::{self, EmployeeDirectory};
use crate::sheets::payments::{self, PaymentStore, PaymentsOutcome};
use crate::sheets::{ProgressEvent, SheetReader};
use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};

pub mod company;
pub mod messages;
pub mod rate_limit;

use messages::{
    BulkStartPayload, CompanyPayload, Envelope, SheetSyncPayload, ACTION_BULK_START,
    ACTION_BULK_SYNC, ACTION_CREATE_COMPANY, ACTION_PING, ACTION_SYNC_CLIENTS,
    ACTION_SYNC_PAYMENTS,
};
use rate_limit::RateLimiter;

const PROCESS_LABEL_CLIENTS: &str = "Sincronización de Empleados";
const PROCESS_LABEL_PAYMENTS: &str = "Sincronización de Pagos";

/// Everything a connection needs, built once in `main`.
pub struct WsDeps {
    pub server: config::Server,
    pub pacing: config::Bulk,
    pub manager: Arc<ProcessManager>,
    pub reader: Arc<dyn SheetReader>,
    pub store: Arc<dyn PaymentStore>,
    pub directory: Arc<dyn EmployeeDirectory>,
    pub mailer: Arc<dyn Mailer>,
    pub sms: Arc<dyn SmsSender>,
    pub audit: Arc<AuditLogger>,
    pub updates: broadcast::Sender<BackgroundProcess>,
}

/// Accept loop. Each connection runs on its own task.
pub async fn serve(listener: TcpListener, deps: Arc<WsDeps>) -> Result<()> {
    info!("websocket server listening");
    loop {
        let (stream, peer) = listener.accept().await?;
        let deps = Arc::clone(&deps);
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, peer, deps).await {
                debug!(?err, %peer, "connection ended");
            }
        });
    }
}

/// Origin must match an allow-list entry by exact scheme+host (+port).
/// Values that don't parse as URLs fall back to exact string comparison.
fn is_origin_allowed(origin: Option<&str>, allowed: &[String]) -> bool {
    let origin = match origin {
        Some(o) => o,
        None => return false,
    };
    match reqwest::Url::parse(origin) {
        Ok(url) => {
            let host = match url.host_str() {
                Some(h) => h,
                None => return allowed.iter().any(|a| a == origin),
            };
            let normalized = match url.port() {
                Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
                None => format!("{}://{}", url.scheme(), host),
            };
            allowed.iter().any(|a| a == &normalized)
        }
        Err(_) => allowed.iter().any(|a| a == origin),
    }
}

/// Bearer token from the `Authorization` header, else `?token=` query.
fn token_from_request(req: &Request) -> Option<String> {
    let header_token = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);
    if header_token.is_some() {
        return header_token;
    }
    req.uri().query().and_then(|query| {
        query.split('&').find_map(|pair| {
            pair.strip_prefix("token=")
                .filter(|t| !t.is_empty())
                .map(str::to_string)
        })
    })
}

fn reject(status: StatusCode) -> ErrorResponse {
    let mut resp = ErrorResponse::new(None);
    *resp.status_mut() = status;
    resp
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, deps: Arc<WsDeps>) -> Result<()> {
    let mut identity: Option<Claims> = None;
    let mut user_agent = String::from("unknown");
    let server_cfg = &deps.server;

    let ws = accept_hdr_async(stream, |req: &Request, resp: Response| {
        if let Some(ua) = req
            .headers()
            .get("user-agent")
            .and_then(|v| v.to_str().ok())
        {
            user_agent = ua.to_string();
        }

        let origin = req
            .headers()
            .get("origin")
            .and_then(|v| v.to_str().ok());
        if !is_origin_allowed(origin, &server_cfg.allowed_origins) {
            warn!(?origin, "upgrade rejected: origin not allowed");
            return Err(reject(StatusCode::FORBIDDEN));
        }

        match token_from_request(req) {
            Some(token) => match auth::verify_token(&token, &server_cfg.jwt_secret) {
                Ok(claims) => {
                    info!(user = claims.actor(), "token verified");
                    identity = Some(claims);
                    Ok(resp)
                }
                Err(err) if server_cfg.allow_unauthenticated_dev_identity => {
                    warn!(?err, "invalid token, falling back to dev identity");
                    identity = Some(auth::dev_identity());
                    Ok(resp)
                }
                Err(err) => {
                    warn!(?err, "upgrade rejected: token verification failed");
                    Err(reject(StatusCode::UNAUTHORIZED))
                }
            },
            None if server_cfg.allow_unauthenticated_dev_identity => {
                identity = Some(auth::dev_identity());
                Ok(resp)
            }
            None => {
                warn!("upgrade rejected: no token provided");
                Err(reject(StatusCode::UNAUTHORIZED))
            }
        }
    })
    .await?;

    let claims = match identity {
        Some(claims) => claims,
        // The callback sets an identity on every accepted upgrade.
        None => return Ok(()),
    };
    info!(%peer, user = claims.actor(), "connection upgraded");

    let (mut sink, mut inbound) = ws.split();
    let (out_tx, mut out_rx) = mpsc::channel::<String>(256);

    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            if sink.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    // Forward process snapshots from every job to this client. Lagged
    // receivers just skip intermediate snapshots.
    let mut updates_rx = deps.updates.subscribe();
    let forward_tx = out_tx.clone();
    let forwarder = tokio::spawn(async move {
        loop {
            match updates_rx.recv().await {
                Ok(snapshot) => {
                    if forward_tx
                        .send(messages::bulk_update_frame(&snapshot))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "broadcast receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut conn = Connection {
        deps: Arc::clone(&deps),
        claims,
        limiter: RateLimiter::new(Instant::now()),
        ip: peer.ip().to_string(),
        user_agent,
        out: out_tx,
    };

    // Initial process sync so dashboards render running jobs immediately.
    let _ = conn
        .out
        .send(messages::bulk_sync_frame(
            &deps.manager.get_all_active(),
            &deps.manager.get_recent_history(),
        ))
        .await;

    while let Some(msg) = inbound.next().await {
        match msg {
            Ok(Message::Text(text)) => conn.dispatch(&text).await,
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(err) => {
                debug!(?err, "read error");
                break;
            }
        }
    }

    forwarder.abort();
    drop(conn);
    let _ = writer.await;
    Ok(())
}

struct Connection {
    deps: Arc<WsDeps>,
    claims: Claims,
    limiter: RateLimiter,
    ip: String,
    user_agent: String,
    out: mpsc::Sender<String>,
}

impl Connection {
    async fn send(&self, frame: String) {
        let _ = self.out.send(frame).await;
    }

    fn publish(&self, snapshot: Option<BackgroundProcess>) {
        if let Some(snapshot) = snapshot {
            let _ = self.deps.updates.send(snapshot);
        }
    }

    fn owner(&self) -> ProcessOwner {
        ProcessOwner {
            name: self.claims.name.clone(),
            email: self.claims.email.clone(),
            sub: self.claims.sub.clone(),
        }
    }

    fn entry(&self, action: &str, result: AuditResult) -> AuditEntry {
        AuditEntry {
            user_id: self.claims.sub.clone(),
            email: self.claims.email.clone(),
            ip: Some(self.ip.clone()),
            user_agent: Some(self.user_agent.clone()),
            ..audit::entry(action, result)
        }
    }

    async fn dispatch(&mut self, raw: &str) {
        let envelope: Envelope = match serde_json::from_str::<serde_json::Value>(raw) {
            Err(_) => {
                self.send(messages::error_frame(
                    "invalid_json",
                    "El mensaje debe ser JSON válido.",
                ))
                .await;
                return;
            }
            Ok(value) => match serde_json::from_value(value) {
                Ok(envelope) => envelope,
                Err(_) => {
                    self.send(messages::error_frame(
                        "invalid_format",
                        "Debe incluir \"action\" como string.",
                    ))
                    .await;
                    return;
                }
            },
        };
        let action = envelope.action.as_str();

        if !self.limiter.allow(Instant::now(), false) {
            self.send(messages::error_frame(
                "rate_limited",
                "Demasiados mensajes en la ventana de tiempo.",
            ))
            .await;
            return;
        }

        if action == ACTION_PING {
            self.send(messages::pong_frame()).await;
            self.deps
                .audit
                .log(self.entry(action, AuditResult::Success))
                .await;
            return;
        }

        let sensitive = action == ACTION_SYNC_CLIENTS || action == ACTION_SYNC_PAYMENTS;
        if sensitive && !self.limiter.allow(Instant::now(), true) {
            self.send(messages::error_frame(
                "rate_limited",
                "Demasiadas acciones sensibles.",
            ))
            .await;
            let mut entry = self.entry(action, AuditResult::RateLimited);
            entry.error_message = Some("Demasiadas acciones sensibles.".into());
            self.deps.audit.log(entry).await;
            return;
        }

        match action {
            ACTION_SYNC_CLIENTS | ACTION_SYNC_PAYMENTS => {
                if !self.require_privilege(action).await {
                    return;
                }
                let payload: SheetSyncPayload =
                    match serde_json::from_value(envelope.payload.clone()) {
                        Ok(p) => p,
                        Err(_) => SheetSyncPayload {
                            sheet_id: String::new(),
                            sheet_name: String::new(),
                        },
                    };
                if !payload.is_complete() {
                    self.send(messages::error_frame(
                        "invalid_payload",
                        "Faltan sheetId o sheetName.",
                    ))
                    .await;
                    let mut entry = self.entry(action, AuditResult::Error);
                    entry.payload = Some(envelope.payload);
                    entry.error_message = Some("Faltan sheetId o sheetName.".into());
                    self.deps.audit.log(entry).await;
                    return;
                }
                if action == ACTION_SYNC_CLIENTS {
                    self.sync_clients(payload).await;
                } else {
                    self.sync_payments(payload).await;
                }
            }
            ACTION_CREATE_COMPANY => {
                if !self.require_privilege(action).await {
                    return;
                }
                let payload: CompanyPayload =
                    match serde_json::from_value(envelope.payload) {
                        Ok(p) => p,
                        Err(_) => CompanyPayload {
                            name: String::new(),
                            representante: String::new(),
                        },
                    };
                if !payload.is_complete() {
                    self.send(messages::error_frame(
                        "invalid_payload",
                        "Faltan datos de la empresa (name, representante).",
                    ))
                    .await;
                    return;
                }
                let mut entry = self.entry(action, AuditResult::Success);
                entry.payload = Some(json!({ "company": payload.name }));
                self.deps.audit.log(entry).await;
                tokio::spawn(company::run_company_creation(self.out.clone(), payload));
            }
            ACTION_BULK_START => {
                if !self.require_privilege_msg(action, "No tienes permisos.").await {
                    return;
                }
                let payload: BulkStartPayload = match serde_json::from_value(envelope.payload) {
                    Ok(p) => p,
                    Err(_) => {
                        self.send(messages::error_frame(
                            "invalid_payload",
                            "Faltan type o items.",
                        ))
                        .await;
                        return;
                    }
                };
                let process = self.deps.manager.start_process(
                    &payload.kind,
                    &self.owner(),
                    payload.items.len(),
                );
                self.publish(Some(process.clone()));

                let ctx = BulkContext {
                    manager: Arc::clone(&self.deps.manager),
                    mailer: Arc::clone(&self.deps.mailer),
                    sms: Arc::clone(&self.deps.sms),
                    pacing: self.deps.pacing.clone(),
                    updates: self.deps.updates.clone(),
                };
                let mut entry = self.entry(action, AuditResult::Success);
                entry.payload =
                    Some(json!({ "type": payload.kind.clone(), "items": payload.items.len() }));
                self.deps.audit.log(entry).await;
                tokio::spawn(bulk::run_bulk_action(
                    ctx,
                    process.id,
                    payload.kind,
                    payload.items,
                ));
            }
            ACTION_BULK_SYNC => {
                self.send(messages::bulk_sync_frame(
                    &self.deps.manager.get_all_active(),
                    &self.deps.manager.get_recent_history(),
                ))
                .await;
            }
            _ => {
                let message = format!("Acción no soportada: {action}");
                self.send(messages::error_frame("unknown_action", &message))
                    .await;
                let mut entry = self.entry(action, AuditResult::Error);
                entry.error_message = Some(message);
                self.deps.audit.log(entry).await;
            }
        }
    }

    async fn require_privilege(&self, action: &str) -> bool {
        self.require_privilege_msg(action, "No tienes permisos para esta acción.")
            .await
    }

    async fn require_privilege_msg(&self, action: &str, message: &str) -> bool {
        if self.claims.has_privilege() {
            return true;
        }
        self.send(messages::error_frame("forbidden", message)).await;
        let mut entry = self.entry(action, AuditResult::Forbidden);
        entry.error_message = Some(message.to_string());
        self.deps.audit.log(entry).await;
        false
    }

    /// Employee ingestion. Welcome mails go out as rows are created and
    /// count toward the same anti-spam batch as bulk sends.
    async fn sync_clients(&self, payload: SheetSyncPayload) {
        let action = ACTION_SYNC_CLIENTS;
        let (ev_tx, mut ev_rx) = mpsc::channel::<ProgressEvent>(64);

        let reader = Arc::clone(&self.deps.reader);
        let directory = Arc::clone(&self.deps.directory);
        let actor = self.claims.actor();
        let sheet_id = payload.sheet_id.clone();
        let sheet_name = payload.sheet_name.clone();
        let job = tokio::spawn(async move {
            clients::process_clients_sheet(
                reader.as_ref(),
                directory.as_ref(),
                &sheet_id,
                &sheet_name,
                &actor,
                ev_tx,
            )
            .await
        });

        let mut process_id: Option<String> = None;
        let mut sent_in_batch = 0usize;
        while let Some(event) = ev_rx.recv().await {
            match &event {
                ProgressEvent::Started { total_rows, .. } => {
                    let process = self.deps.manager.start_process(
                        PROCESS_LABEL_CLIENTS,
                        &self.owner(),
                        *total_rows,
                    );
                    process_id = Some(process.id.clone());
                    self.publish(Some(process));
                }
                ProgressEvent::Created {
                    row_number,
                    full_name,
                    email,
                    username,
                    password,
                } => {
                    if let Some(id) = &process_id {
                        self.publish(self.deps.manager.update_progress(
                            id,
                            row_number.saturating_sub(1),
                            None,
                        ));
                    }
                    if let (Some(email), Some(username), Some(password)) =
                        (email, username, password)
                    {
                        let outcome = self
                            .deps
                            .mailer
                            .send_welcome(username, email, full_name, password)
                            .await;
                        if !outcome.success {
                            warn!(email = %email, error = ?outcome.error, "welcome mail failed");
                        }
                        sent_in_batch += 1;
                        if sent_in_batch >= self.deps.pacing.batch_size {
                            let wait_minutes = self.deps.pacing.batch_wait_seconds / 60;
                            let wait_message = format!(
                                "⏳ Límite de batch alcanzado ({} correos). Esperando {} minutos para evitar bloqueos (Yahoo/Spam)...",
                                self.deps.pacing.batch_size, wait_minutes
                            );
                            if let Some(id) = &process_id {
                                self.publish(self.deps.manager.add_log(
                                    id,
                                    &wait_message,
                                    LogKind::Info,
                                ));
                            }
                            self.send(messages::info_frame(action, &wait_message)).await;
                            tokio::time::sleep(Duration::from_secs(
                                self.deps.pacing.batch_wait_seconds,
                            ))
                            .await;
                            sent_in_batch = 0;
                        }
                    }
                }
                ProgressEvent::Updated {
                    row_number,
                    message,
                    ..
                } => {
                    if let Some(id) = &process_id {
                        self.publish(self.deps.manager.update_progress(
                            id,
                            row_number.saturating_sub(1),
                            Some(message),
                        ));
                    }
                }
                ProgressEvent::NoEmail { row_number } => {
                    if let Some(id) = &process_id {
                        self.publish(self.deps.manager.update_progress(
                            id,
                            row_number.saturating_sub(1),
                            None,
                        ));
                    }
                }
                ProgressEvent::ProviderWarning { message, .. } => {
                    if let Some(id) = &process_id {
                        self.publish(self.deps.manager.add_log(id, message, LogKind::Info));
                    }
                }
                ProgressEvent::Error { message } => {
                    if let Some(id) = &process_id {
                        self.publish(self.deps.manager.add_log(id, message, LogKind::Error));
                    }
                }
                _ => {}
            }
            self.send(messages::progress_frame(action, &event)).await;
        }

        let outcome = match job.await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(?err, "client sync job panicked");
                self.send(messages::error_frame("internal_error", "Error interno."))
                    .await;
                let mut entry = self.entry(action, AuditResult::Error);
                entry.error_message = Some("Error interno.".into());
                self.deps.audit.log(entry).await;
                return;
            }
        };

        if let Some(id) = &process_id {
            self.deps
                .manager
                .finish_process(id, crate::model::ProcessStatus::Completed, None);
            self.publish(self.deps.manager.get_process(id));
        }
        self.send(messages::result_frame(action, &outcome)).await;

        let result = if outcome.success {
            AuditResult::Success
        } else {
            AuditResult::Error
        };
        let mut entry = self.entry(action, result);
        entry.payload = Some(json!({
            "sheetId": payload.sheet_id,
            "sheetName": payload.sheet_name,
        }));
        entry.error_message = outcome.error.clone();
        self.deps.audit.log(entry).await;
    }

    /// Payment ingestion.
    async fn sync_payments(&self, payload: SheetSyncPayload) {
        let action = ACTION_SYNC_PAYMENTS;
        let (ev_tx, mut ev_rx) = mpsc::channel::<ProgressEvent>(64);

        let reader = Arc::clone(&self.deps.reader);
        let store = Arc::clone(&self.deps.store);
        let actor = self.claims.actor();
        let sheet_id = payload.sheet_id.clone();
        let sheet_name = payload.sheet_name.clone();
        let delay = Duration::from_millis(self.deps.pacing.inter_row_delay_ms);
        let job = tokio::spawn(async move {
            payments::process_payments_sheet(
                reader.as_ref(),
                store.as_ref(),
                &sheet_id,
                &sheet_name,
                &actor,
                ev_tx,
                delay,
            )
            .await
        });

        let mut process_id: Option<String> = None;
        while let Some(event) = ev_rx.recv().await {
            match &event {
                ProgressEvent::Started { total_rows, .. } => {
                    let process = self.deps.manager.start_process(
                        PROCESS_LABEL_PAYMENTS,
                        &self.owner(),
                        *total_rows,
                    );
                    process_id = Some(process.id.clone());
                    self.publish(Some(process));
                }
                ProgressEvent::Created { row_number, .. } => {
                    if let Some(id) = &process_id {
                        self.publish(self.deps.manager.update_progress(
                            id,
                            row_number.saturating_sub(1),
                            None,
                        ));
                    }
                }
                ProgressEvent::Updated {
                    row_number,
                    message,
                    ..
                } => {
                    if let Some(id) = &process_id {
                        self.publish(self.deps.manager.update_progress(
                            id,
                            row_number.saturating_sub(1),
                            Some(message),
                        ));
                    }
                }
                ProgressEvent::Error { message } => {
                    if let Some(id) = &process_id {
                        self.publish(self.deps.manager.add_log(id, message, LogKind::Error));
                    }
                }
                _ => {}
            }
            self.send(messages::progress_frame(action, &event)).await;
        }

        let outcome: PaymentsOutcome = match job.await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(?err, "payment sync job panicked");
                self.send(messages::error_frame("internal_error", "Error interno."))
                    .await;
                let mut entry = self.entry(action, AuditResult::Error);
                entry.error_message = Some("Error interno.".into());
                self.deps.audit.log(entry).await;
                return;
            }
        };

        if let Some(id) = &process_id {
            self.deps
                .manager
                .finish_process(id, crate::model::ProcessStatus::Completed, None);
            self.publish(self.deps.manager.get_process(id));
        }
        self.send(messages::result_frame(action, &outcome)).await;

        let result = if outcome.success {
            AuditResult::Success
        } else {
            AuditResult::Error
        };
        let mut entry = self.entry(action, result);
        entry.payload = Some(json!({
            "sheetId": payload.sheet_id,
            "sheetName": payload.sheet_name,
        }));
        entry.error_message = outcome.error.clone();
        self.deps.audit.log(entry).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allowed() -> Vec<String> {
        vec![
            "https://cms.example.com.gt".to_string(),
            "http://localhost:3000".to_string(),
        ]
    }

    #[test]
    fn origin_matching_is_exact_on_scheme_and_host() {
        assert!(is_origin_allowed(
            Some("https://cms.example.com.gt"),
            &allowed()
        ));
        assert!(is_origin_allowed(Some("http://localhost:3000"), &allowed()));
        assert!(!is_origin_allowed(
            Some("http://cms.example.com.gt"),
            &allowed()
        ));
        assert!(!is_origin_allowed(Some("https://evil.example.com"), &allowed()));
        assert!(!is_origin_allowed(None, &allowed()));
    }

    #[test]
    fn origin_with_path_still_matches_by_host() {
        // Browsers send bare origins, but a trailing slash must not break it.
        assert!(is_origin_allowed(
            Some("https://cms.example.com.gt/"),
            &allowed()
        ));
    }

    #[test]
    fn token_prefers_authorization_header() {
        let req = Request::builder()
            .uri("ws://localhost/ws?token=querytoken")
            .header("authorization", "Bearer headertoken")
            .body(())
            .unwrap();
        assert_eq!(token_from_request(&req).as_deref(), Some("headertoken"));
    }

    #[test]
    fn token_falls_back_to_query() {
        let req = Request::builder()
            .uri("ws://localhost/ws?foo=1&token=abc123")
            .body(())
            .unwrap();
        assert_eq!(token_from_request(&req).as_deref(), Some("abc123"));
    }

    #[test]
    fn missing_token_is_none() {
        let req = Request::builder()
            .uri("ws://localhost/ws")
            .body(())
            .unwrap();
        assert_eq!(token_from_request(&req), None);

        let req = Request::builder()
            .uri("ws://localhost/ws?token=")
            .body(())
            .unwrap();
        assert_eq!(token_from_request(&req), None);
    }
}
