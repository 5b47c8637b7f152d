use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle of a tracked background job. Terminal states never revert.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Running,
    Completed,
    Failed,
}

impl ProcessStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProcessStatus::Running)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Info,
    Error,
    Success,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessLog {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: LogKind,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Success,
    Error,
}

/// Per-item outcome of a bulk job, independent of aggregate progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemOutcome {
    pub status: ItemStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Snapshot of one tracked background job, broadcast to dashboard clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundProcess {
    pub id: String,
    pub action: String,
    #[serde(rename = "userName")]
    pub user_name: String,
    #[serde(rename = "userEmail")]
    pub user_email: String,
    pub status: ProcessStatus,
    /// Always `round(100 * current / total)`, forced to 100 on finish.
    pub progress: u8,
    pub total: usize,
    pub current: usize,
    pub logs: Vec<ProcessLog>,
    #[serde(rename = "itemResults")]
    pub item_results: HashMap<String, ItemOutcome>,
    #[serde(rename = "startTime")]
    pub start_time: DateTime<Utc>,
    #[serde(rename = "endTime", skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

/// One dynamic payroll deduction extracted from a spreadsheet row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Deduccion {
    pub tipo: String,
    pub monto: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observaciones: Option<String>,
}

/// One processed payroll payment ("boleta") built from a spreadsheet row.
///
/// Persisted by the payment store keyed by `(cod_employee, sheet_name)`;
/// re-importing an unchanged sheet must not create duplicates.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PaymentRecord {
    pub sheet_name: String,
    pub payment_indicator: String,
    pub cod_employee: String,
    pub full_name: String,
    pub no_boleta: String,
    pub ui_authorization: String,
    pub pay_day: String,
    pub day: String,
    pub month: String,
    pub year: String,
    pub amount_days: String,
    pub biweekly_advance: String,
    pub total_overtime: String,
    pub bonus: String,
    pub bonus79: String,
    pub bonus14: String,
    pub billing: String,
    pub total_biweekly_to_pay: String,
    pub total_deductions: String,
    pub total: String,
    pub accreditation1: String,
    pub accreditation2: String,
    pub comments: String,
    pub deducciones: Vec<Deduccion>,
    pub user_who_creates: String,
}

/// Employee record auto-provisioned during client-sheet ingestion.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NewEmployee {
    pub cod_employee: String,
    pub full_name: String,
    pub email: String,
    pub password: String,
    pub rol: String,
    pub position: String,
    pub company: String,
    pub user_status: String,
    pub discharge_date: String,
    pub low_date: String,
    pub cdr: String,
    pub account: String,
    pub no_account: String,
    pub no_authorization: String,
    pub base_salary: String,
    pub total_vacations: String,
    pub vacation_deadline: String,
    pub saturdays_and_sundays: String,
    pub immediate_boss: String,
    pub dpi: String,
    pub igss: String,
    pub nit: String,
    pub level: String,
    pub corporate_numbers: String,
    pub user_who_creates: String,
}

/// One item of a `BULK_ACTION_START` payload. Field names follow the
/// frontend's PascalCase convention.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BulkItem {
    #[serde(rename = "CodEmployee", default)]
    pub cod_employee: Option<String>,
    #[serde(rename = "id", default)]
    pub id: Option<String>,
    #[serde(rename = "FullName", default)]
    pub full_name: Option<String>,
    #[serde(rename = "Name", default)]
    pub name: Option<String>,
    #[serde(rename = "Email", default)]
    pub email: Option<String>,
    #[serde(rename = "CorporateNumber", default)]
    pub corporate_number: Option<String>,
    #[serde(rename = "Username", default)]
    pub username: Option<String>,
    #[serde(rename = "Password", default)]
    pub password: Option<String>,
    #[serde(rename = "Day", default)]
    pub day: Option<String>,
    #[serde(rename = "Month", default)]
    pub month: Option<String>,
    #[serde(rename = "Year", default)]
    pub year: Option<String>,
    #[serde(rename = "PaymentIndicator", default)]
    pub payment_indicator: Option<String>,
    #[serde(rename = "UiAuthorization", default)]
    pub ui_authorization: Option<String>,
    /// Set once a payslip has been mailed; a non-empty value skips re-send.
    #[serde(rename = "SendDate", default)]
    pub send_date: Option<String>,
    /// Delivery modality for payslips ("Digital" is the only mailable one).
    #[serde(rename = "Boleta", default)]
    pub boleta: Option<String>,
}

impl BulkItem {
    /// Display name used in progress logs.
    pub fn display_name(&self, index: usize) -> String {
        self.full_name
            .clone()
            .or_else(|| self.name.clone())
            .unwrap_or_else(|| format!("Item {}", index + 1))
    }

    /// Stable key for the per-item outcome map.
    pub fn item_id(&self, index: usize) -> String {
        self.cod_employee
            .clone()
            .or_else(|| self.id.clone())
            .unwrap_or_else(|| format!("idx_{index}"))
    }
}
