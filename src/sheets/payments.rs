//! Payment ("boleta") ingestion from payroll spreadsheets.
//!
//! The sheet name selects a payment-type processor; each processor knows
//! which column must be non-empty for a row to count as a payment and how
//! to map the fixed columns. Dynamic deductions come from the analyzer.

use crate::codes;
use crate::model::PaymentRecord;
use crate::sheets::analyzer::{self, SheetStructure};
use crate::sheets::{ProgressEvent, SheetReader};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Result of persisting one boleta. The store is keyed by
/// `(cod_employee, sheet_name)`; `Existing` means the row was already
/// imported and nothing was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreStatus {
    Created,
    Existing,
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn insert_or_update(&self, record: &PaymentRecord) -> Result<StoreStatus>;
}

#[derive(Debug, serde::Serialize)]
pub struct PaymentsOutcome {
    pub success: bool,
    pub message: String,
    pub data: Vec<PaymentRecord>,
    /// Rejected rows, kept verbatim for the bad-payments report.
    #[serde(rename = "badPayments")]
    pub bad_payments: Vec<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PaymentKind {
    VendorProductivityBonus,
    ProductivityBonus,
    Bonus14,
    Aguinaldo,
    Biweekly,
}

impl PaymentKind {
    /// Longest keys first so "Bonificacion Productividad Vendedor" never
    /// falls through to a shorter match.
    fn for_sheet(sheet_name: &str) -> Self {
        if sheet_name.contains("Bonificacion Productividad Vendedor") {
            PaymentKind::VendorProductivityBonus
        } else if sheet_name.contains("Bono Productividad") {
            PaymentKind::ProductivityBonus
        } else if sheet_name.contains("Bono 14") {
            PaymentKind::Bonus14
        } else if sheet_name.contains("Aguinaldo") {
            PaymentKind::Aguinaldo
        } else {
            PaymentKind::Biweekly
        }
    }

    /// Column whose emptiness rejects the row before any extraction.
    fn check_index(self) -> usize {
        match self {
            PaymentKind::VendorProductivityBonus => 19,
            PaymentKind::ProductivityBonus => 2,
            PaymentKind::Bonus14 => 3,
            PaymentKind::Aguinaldo => 3,
            PaymentKind::Biweekly => 16,
        }
    }

    fn indicator(self) -> &'static str {
        match self {
            PaymentKind::VendorProductivityBonus => "productivityBonus",
            PaymentKind::ProductivityBonus => "productivityBonusPayments",
            PaymentKind::Bonus14 => "bonus-14-payment",
            PaymentKind::Aguinaldo => "aguinaldo-payment",
            PaymentKind::Biweekly => "biweekly-payment",
        }
    }
}

fn cell(row: &[String], index: usize) -> String {
    row.get(index).cloned().unwrap_or_default()
}

/// Type-specific fixed-column mapping. Deductions are extracted separately.
fn extract_fields(kind: PaymentKind, record: &mut PaymentRecord, row: &[String], structure: &SheetStructure) {
    record.cod_employee = cell(row, 0);
    record.full_name = cell(row, 1);

    match kind {
        PaymentKind::VendorProductivityBonus => {
            record.billing = cell(row, 2);
            record.total = cell(row, 19);
        }
        PaymentKind::ProductivityBonus => {
            record.total = cell(row, 2);
        }
        PaymentKind::Bonus14 => {
            record.amount_days = cell(row, 2);
            record.bonus14 = cell(row, 3);
            record.total = cell(row, 3);
        }
        PaymentKind::Aguinaldo => {
            record.amount_days = cell(row, 2);
            record.total = cell(row, 3);
        }
        PaymentKind::Biweekly => {
            record.amount_days = cell(row, 2);
            record.biweekly_advance = cell(row, 3);
            record.total_overtime = cell(row, 4);
            record.bonus = cell(row, 5);
            record.bonus79 = cell(row, 6);
            record.total_biweekly_to_pay = cell(row, 7);
            // The tail block floats right of the last deduction column.
            let base = structure
                .deduction_columns
                .last()
                .map(|c| c.index)
                .unwrap_or(15);
            record.total_deductions = cell(row, base + 1);
            record.total = cell(row, base + 2);
            record.accreditation1 = cell(row, base + 3);
            record.accreditation2 = cell(row, base + 4);
            record.comments = cell(row, base + 5);
        }
    }
}

/// Pay-period components pulled from the sheet name for the record body.
fn period_parts(sheet_name: &str) -> (String, String, String) {
    let parts: Vec<&str> = if sheet_name.contains("Aguinaldo") {
        vec!["Diciembre", "14"]
    } else if sheet_name.contains("Bono Productividad") {
        sheet_name.split(' ').skip(2).collect()
    } else {
        sheet_name.split(' ').collect()
    };

    let month = parts
        .first()
        .and_then(|p| codes::month_number(p))
        .unwrap_or_default()
        .to_string();
    let day = parts.get(1).map(|p| p.to_string()).unwrap_or_default();
    let year = parts
        .get(2)
        .map(|p| p.to_string())
        .unwrap_or_else(|| Utc::now().format("%Y").to_string());
    (day, month, year)
}

/// Process every row of a payment sheet.
///
/// Never returns an error: row-level problems land in `bad_payments` and
/// anything that aborts the whole run (an unreadable sheet, typically) is
/// reported through `success: false`.
pub async fn process_payments_sheet(
    reader: &dyn SheetReader,
    store: &dyn PaymentStore,
    spreadsheet_id: &str,
    sheet_name: &str,
    acting_user: &str,
    events: mpsc::Sender<ProgressEvent>,
    inter_row_delay: Duration,
) -> PaymentsOutcome {
    match run(
        reader,
        store,
        spreadsheet_id,
        sheet_name,
        acting_user,
        &events,
        inter_row_delay,
    )
    .await
    {
        Ok(outcome) => outcome,
        Err(err) => {
            warn!(?err, sheet_name, "payment sheet processing failed");
            let _ = events
                .send(ProgressEvent::Error {
                    message: err.to_string(),
                })
                .await;
            PaymentsOutcome {
                success: false,
                message: "Error al procesar los datos de la planilla".into(),
                data: Vec::new(),
                bad_payments: Vec::new(),
                error: Some(err.to_string()),
            }
        }
    }
}

async fn run(
    reader: &dyn SheetReader,
    store: &dyn PaymentStore,
    spreadsheet_id: &str,
    sheet_name: &str,
    acting_user: &str,
    events: &mpsc::Sender<ProgressEvent>,
    inter_row_delay: Duration,
) -> Result<PaymentsOutcome> {
    let range = format!("{}!A1:ZZ", sheet_name.trim());
    let sheet_data = reader
        .read_sheet(spreadsheet_id, &range)
        .await
        .context("no se pudo leer la hoja de cálculo")?;

    let mut rows_iter = sheet_data.into_iter();
    let headers = rows_iter.next().unwrap_or_default();
    let rows: Vec<Vec<String>> = rows_iter.collect();

    let structure = analyzer::analyze_structure(&headers);
    let validation = analyzer::validate_deduction_headers(&headers);
    for warning in &validation.warnings {
        warn!(sheet_name, warning, "suspicious deduction header");
    }

    let kind = PaymentKind::for_sheet(sheet_name);
    let check_index = kind.check_index();
    let (day, month, year) = period_parts(sheet_name);
    let pay_day = codes::pay_day_from_sheet_name(sheet_name, Utc::now());

    let _ = events
        .send(ProgressEvent::Started {
            sheet_name: sheet_name.to_string(),
            total_rows: rows.len(),
        })
        .await;

    let mut payment_history: Vec<PaymentRecord> = Vec::new();
    let mut bad_payments: Vec<Vec<String>> = Vec::new();

    for (index, row) in rows.iter().enumerate() {
        let row_number = index + 2; // data starts on sheet row 2

        // Validity gate comes before any extraction: an incomplete row
        // must never reach deduction parsing.
        if cell(row, check_index).trim().is_empty() {
            bad_payments.push(row.clone());
            continue;
        }

        let mut record = PaymentRecord {
            sheet_name: sheet_name.to_string(),
            payment_indicator: kind.indicator().to_string(),
            pay_day: pay_day.clone(),
            day: day.clone(),
            month: month.clone(),
            year: year.clone(),
            ui_authorization: codes::generate_authorization(),
            user_who_creates: acting_user.to_string(),
            ..PaymentRecord::default()
        };

        extract_fields(kind, &mut record, row, &structure);
        record.deducciones = analyzer::extract_deductions(row, &structure);
        record.no_boleta = codes::generate_no_boleta(&record.cod_employee, sheet_name, Utc::now());

        match store.insert_or_update(&record).await {
            Ok(StoreStatus::Created) => {
                let _ = events
                    .send(ProgressEvent::Created {
                        row_number,
                        full_name: record.full_name.clone(),
                        email: None,
                        username: None,
                        password: None,
                    })
                    .await;
                payment_history.push(record);
            }
            Ok(StoreStatus::Existing) => {
                let _ = events
                    .send(ProgressEvent::Updated {
                        row_number,
                        message: "Boleta ya registrada".into(),
                        full_name: record.full_name.clone(),
                    })
                    .await;
                payment_history.push(record);
            }
            Err(err) => {
                warn!(?err, row_number, "failed to persist boleta");
                let _ = events
                    .send(ProgressEvent::Error {
                        message: format!("Fila {row_number}: {err}"),
                    })
                    .await;
                bad_payments.push(row.clone());
            }
        }

        // Bounds burst load on the persistence layer.
        tokio::time::sleep(inter_row_delay).await;
    }

    if !bad_payments.is_empty() {
        info!(
            sheet_name,
            count = bad_payments.len(),
            "rows rejected as bad payments"
        );
    }

    let _ = events.send(ProgressEvent::Finished).await;

    Ok(PaymentsOutcome {
        success: true,
        message: "Pagos procesados correctamente".into(),
        data: payment_history,
        bad_payments,
        error: None,
    })
}
