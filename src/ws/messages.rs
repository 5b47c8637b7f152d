//! Wire format of the WebSocket protocol.
//!
//! Inbound frames are an `{action, payload}` envelope; each action has a
//! typed payload struct that is deserialized and validated before any
//! work starts. Outbound frames are built here so every dispatch site
//! shares the same shapes. Action and field names match the dashboard
//! frontend verbatim.

use crate::model::{BackgroundProcess, BulkItem};
use crate::sheets::ProgressEvent;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const ACTION_PING: &str = "ping";
pub const ACTION_SYNC_CLIENTS: &str = "googleSheetsClients";
pub const ACTION_SYNC_PAYMENTS: &str = "googleSheetsPayments";
pub const ACTION_CREATE_COMPANY: &str = "create_company";
pub const ACTION_BULK_START: &str = "BULK_ACTION_START";
pub const ACTION_BULK_SYNC: &str = "BULK_ACTION_SYNC";
pub const ACTION_BULK_UPDATE: &str = "BULK_ACTION_UPDATE";

#[derive(Debug, Deserialize)]
pub struct Envelope {
    pub action: String,
    #[serde(default)]
    pub payload: Value,
}

/// Payload of both sheet-sync actions.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetSyncPayload {
    #[serde(default)]
    pub sheet_id: String,
    #[serde(default)]
    pub sheet_name: String,
}

impl SheetSyncPayload {
    pub fn is_complete(&self) -> bool {
        !self.sheet_id.trim().is_empty() && !self.sheet_name.trim().is_empty()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompanyPayload {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub representante: String,
}

impl CompanyPayload {
    pub fn is_complete(&self) -> bool {
        !self.name.trim().is_empty() && !self.representante.trim().is_empty()
    }
}

#[derive(Debug, Deserialize)]
pub struct BulkStartPayload {
    #[serde(rename = "type")]
    pub kind: String,
    pub items: Vec<BulkItem>,
}

pub fn error_frame(code: &str, message: &str) -> String {
    json!({ "ok": false, "error": code, "message": message }).to_string()
}

pub fn pong_frame() -> String {
    json!({ "ok": true, "action": "pong", "ts": Utc::now().timestamp_millis() }).to_string()
}

pub fn progress_frame(action: &str, event: &ProgressEvent) -> String {
    json!({ "ok": true, "action": action, "progress": event }).to_string()
}

/// Free-form informational progress (batch-pause notices and the like).
pub fn info_frame(action: &str, message: &str) -> String {
    json!({
        "ok": true,
        "action": action,
        "progress": { "type": "info", "message": message },
    })
    .to_string()
}

pub fn result_frame<T: Serialize>(action: &str, result: &T) -> String {
    json!({ "ok": true, "action": action, "result": result }).to_string()
}

pub fn bulk_sync_frame(active: &[BackgroundProcess], history: &[BackgroundProcess]) -> String {
    json!({
        "ok": true,
        "action": ACTION_BULK_SYNC,
        "payload": { "active": active, "history": history },
    })
    .to_string()
}

pub fn bulk_update_frame(process: &BackgroundProcess) -> String {
    json!({ "ok": true, "action": ACTION_BULK_UPDATE, "payload": process }).to_string()
}

pub fn company_progress_frame(step_id: usize, total_steps: usize, message: &str) -> String {
    json!({
        "action": "create_company_progress",
        "payload": {
            "stepId": step_id,
            "totalSteps": total_steps,
            "message": message,
            "timestamp": Utc::now().to_rfc3339(),
        },
    })
    .to_string()
}

pub fn company_complete_frame(name: &str, company_id: u32) -> String {
    json!({
        "action": "create_company_complete",
        "payload": {
            "success": true,
            "message": format!("Empresa {name} creada exitosamente."),
            "companyId": company_id,
        },
    })
    .to_string()
}

pub fn company_error_frame(message: &str) -> String {
    json!({
        "action": "create_company_error",
        "payload": { "message": message },
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_parses_with_and_without_payload() {
        let env: Envelope = serde_json::from_str(r#"{"action":"ping"}"#).unwrap();
        assert_eq!(env.action, "ping");
        assert!(env.payload.is_null());

        let env: Envelope = serde_json::from_str(
            r#"{"action":"googleSheetsPayments","payload":{"sheetId":"s1","sheetName":"Febrero 15 2025"}}"#,
        )
        .unwrap();
        let payload: SheetSyncPayload = serde_json::from_value(env.payload).unwrap();
        assert_eq!(payload.sheet_id, "s1");
        assert!(payload.is_complete());
    }

    #[test]
    fn sheet_sync_payload_requires_both_fields() {
        let payload: SheetSyncPayload =
            serde_json::from_value(json!({ "sheetId": "s1" })).unwrap();
        assert!(!payload.is_complete());
    }

    #[test]
    fn bulk_start_payload_parses_items() {
        let payload: BulkStartPayload = serde_json::from_value(json!({
            "type": "Enviar Boleta",
            "items": [
                { "CodEmployee": "E1", "Email": "e1@x.com", "Boleta": "Digital" },
            ],
        }))
        .unwrap();
        assert_eq!(payload.kind, "Enviar Boleta");
        assert_eq!(payload.items.len(), 1);
        assert_eq!(payload.items[0].cod_employee.as_deref(), Some("E1"));
    }

    #[test]
    fn frames_have_expected_shape() {
        let err: Value = serde_json::from_str(&error_frame("forbidden", "No tienes permisos."))
            .unwrap();
        assert_eq!(err["ok"], false);
        assert_eq!(err["error"], "forbidden");

        let pong: Value = serde_json::from_str(&pong_frame()).unwrap();
        assert_eq!(pong["action"], "pong");
        assert!(pong["ts"].is_i64());

        let progress: Value = serde_json::from_str(&progress_frame(
            ACTION_SYNC_PAYMENTS,
            &ProgressEvent::Finished,
        ))
        .unwrap();
        assert_eq!(progress["progress"]["type"], "finished");
    }

    #[test]
    fn company_frames_match_protocol() {
        let frame: Value =
            serde_json::from_str(&company_progress_frame(2, 8, "Leyendo plantillas...")).unwrap();
        assert_eq!(frame["action"], "create_company_progress");
        assert_eq!(frame["payload"]["stepId"], 2);
        assert_eq!(frame["payload"]["totalSteps"], 8);

        let done: Value = serde_json::from_str(&company_complete_frame("ACME", 42)).unwrap();
        assert_eq!(done["payload"]["companyId"], 42);
        assert!(done["payload"]["message"]
            .as_str()
            .unwrap()
            .contains("ACME"));
    }
}
