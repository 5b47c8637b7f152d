//! End-to-end payment ingestion against in-memory reader and store:
//! validity gating, deduction extraction and idempotent re-import.

use anyhow::Result;
use async_trait::async_trait;
use planilla_sync::model::PaymentRecord;
use planilla_sync::sheets::payments::{
    process_payments_sheet, PaymentStore, StoreStatus,
};
use planilla_sync::sheets::{ProgressEvent, SheetReader};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

struct FixedSheet {
    rows: Vec<Vec<String>>,
}

#[async_trait]
impl SheetReader for FixedSheet {
    async fn read_sheet(&self, _spreadsheet_id: &str, _range: &str) -> Result<Vec<Vec<String>>> {
        Ok(self.rows.clone())
    }
}

#[derive(Default)]
struct MemStore {
    records: Mutex<HashMap<(String, String), PaymentRecord>>,
}

#[async_trait]
impl PaymentStore for MemStore {
    async fn insert_or_update(&self, record: &PaymentRecord) -> Result<StoreStatus> {
        let key = (record.cod_employee.clone(), record.sheet_name.clone());
        let mut map = self.records.lock().unwrap();
        let status = if map.contains_key(&key) {
            StoreStatus::Existing
        } else {
            StoreStatus::Created
        };
        map.insert(key, record.clone());
        Ok(status)
    }
}

fn row(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

/// Biweekly layout: eight fixed start columns, two deduction columns,
/// then the floating tail. "Total a recibir" lands on index 16, the
/// biweekly validity column.
fn biweekly_sheet() -> Vec<Vec<String>> {
    vec![
        row(&[
            "Codigo Empleado",
            "Nombres y Apellidos",
            "Cantidad/Dias",
            "Sueldo Orinario",
            "Sueldo Extraordinario",
            "Bonificación 37-2001",
            "Bonificación 79-89",
            "Total Devengado",
            "D Embargo",
            "DED Prestamo",
            "DESC IGSS",
            "D Farmacia",
            "D Almacen",
            "D Multas",
            "D Otros",
            "Total deducciones",
            "Total a recibir",
            "Acreditación #1",
            "Acreditación #2",
            "Comentarios",
        ]),
        row(&[
            "CELL-001",
            "Juan Pérez",
            "15",
            "2000",
            "0",
            "250",
            "0",
            "2250",
            "Q100",
            "50",
            "-30",
            "",
            "0",
            "",
            "",
            "180",
            "2070",
            "BI",
            "",
            "ok",
        ]),
        row(&[
            "CELL-002",
            "Ana López",
            "15",
            "1800",
            "0",
            "250",
            "0",
            "2050",
            "",
            "",
            "48.25",
            "",
            "",
            "",
            "",
            "48.25",
            "2001.75",
            "BAM",
            "",
            "",
        ]),
        // Missing total: rejected before extraction.
        row(&[
            "CELL-003",
            "Luis Sin Total",
            "15",
            "1500",
            "0",
            "250",
            "0",
            "1750",
            "",
            "",
            "",
            "",
            "",
            "",
            "",
            "",
            "",
            "",
            "",
            "",
        ]),
    ]
}

async fn drain(mut rx: mpsc::Receiver<ProgressEvent>) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn first_import_creates_and_rejects_incomplete_rows() {
    let reader = FixedSheet {
        rows: biweekly_sheet(),
    };
    let store = MemStore::default();
    let (tx, rx) = mpsc::channel(64);

    let outcome = process_payments_sheet(
        &reader,
        &store,
        "sheet-1",
        "Febrero 15 2025",
        "admin@example.com",
        tx,
        Duration::ZERO,
    )
    .await;
    let events = drain(rx).await;

    assert!(outcome.success);
    assert_eq!(outcome.data.len(), 2);
    assert_eq!(outcome.bad_payments.len(), 1);
    assert_eq!(outcome.bad_payments[0][1], "Luis Sin Total");

    assert!(matches!(
        events.first(),
        Some(ProgressEvent::Started { total_rows: 3, .. })
    ));
    let created = events
        .iter()
        .filter(|e| matches!(e, ProgressEvent::Created { .. }))
        .count();
    assert_eq!(created, 2);
    assert!(matches!(events.last(), Some(ProgressEvent::Finished)));

    // Deductions: positive kept, empty/zero skipped, negative folded to
    // a positive adjustment.
    let juan = &outcome.data[0];
    assert_eq!(juan.cod_employee, "CELL-001");
    let tipos: Vec<&str> = juan.deducciones.iter().map(|d| d.tipo.as_str()).collect();
    assert_eq!(tipos, vec!["Embargo", "Prestamo", "IGSS"]);
    assert_eq!(juan.deducciones[0].monto, 100.0);
    assert_eq!(juan.deducciones[2].monto, 30.0);
    assert!(juan.deducciones[2]
        .observaciones
        .as_deref()
        .unwrap()
        .contains("Ajuste negativo"));

    // Tail columns read from right of the last deduction column.
    assert_eq!(juan.total_deductions, "180");
    assert_eq!(juan.total, "2070");
    assert_eq!(juan.pay_day, "15/02/2025");
    assert_eq!(juan.payment_indicator, "biweekly-payment");
    assert!(!juan.no_boleta.is_empty());
    assert!(!juan.ui_authorization.is_empty());
}

#[tokio::test]
async fn second_import_is_idempotent() {
    let reader = FixedSheet {
        rows: biweekly_sheet(),
    };
    let store = MemStore::default();

    let (tx, rx) = mpsc::channel(64);
    process_payments_sheet(
        &reader,
        &store,
        "sheet-1",
        "Febrero 15 2025",
        "admin@example.com",
        tx,
        Duration::ZERO,
    )
    .await;
    drain(rx).await;
    assert_eq!(store.records.lock().unwrap().len(), 2);

    let (tx, rx) = mpsc::channel(64);
    let outcome = process_payments_sheet(
        &reader,
        &store,
        "sheet-1",
        "Febrero 15 2025",
        "admin@example.com",
        tx,
        Duration::ZERO,
    )
    .await;
    let events = drain(rx).await;

    // No new rows: every valid row reports as already registered.
    assert_eq!(store.records.lock().unwrap().len(), 2);
    let updated = events
        .iter()
        .filter(|e| matches!(e, ProgressEvent::Updated { .. }))
        .count();
    assert_eq!(updated, 2);
    assert!(!events
        .iter()
        .any(|e| matches!(e, ProgressEvent::Created { .. })));
    assert!(outcome.success);
}

struct FailingReader;

#[async_trait]
impl SheetReader for FailingReader {
    async fn read_sheet(&self, _spreadsheet_id: &str, _range: &str) -> Result<Vec<Vec<String>>> {
        anyhow::bail!("HTTP 503 from sheets API")
    }
}

#[tokio::test]
async fn unreadable_sheet_reports_failure_not_panic() {
    let store = MemStore::default();
    let (tx, rx) = mpsc::channel(64);

    let outcome = process_payments_sheet(
        &FailingReader,
        &store,
        "sheet-1",
        "Febrero 15 2025",
        "admin@example.com",
        tx,
        Duration::ZERO,
    )
    .await;
    let events = drain(rx).await;

    assert!(!outcome.success);
    assert!(outcome.error.is_some());
    assert!(events
        .iter()
        .any(|e| matches!(e, ProgressEvent::Error { .. })));
    assert!(store.records.lock().unwrap().is_empty());
}
