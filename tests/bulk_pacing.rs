//! Anti-spam batch pacing of the bulk send loop under paused time.

use async_trait::async_trait;
use planilla_sync::bulk::{run_bulk_action, BulkContext};
use planilla_sync::config;
use planilla_sync::model::{BulkItem, ItemStatus, ProcessStatus};
use planilla_sync::notify::{Mailer, SendOutcome, SmsSender};
use planilla_sync::process::{ProcessManager, ProcessOwner};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

#[derive(Default)]
struct CountingMailer {
    sent: Mutex<usize>,
}

#[async_trait]
impl Mailer for CountingMailer {
    async fn send_welcome(
        &self,
        _username: &str,
        _email: &str,
        _full_name: &str,
        _password: &str,
    ) -> SendOutcome {
        *self.sent.lock().unwrap() += 1;
        SendOutcome::ok(None)
    }

    async fn send_reset_password(
        &self,
        _email: &str,
        _full_name: &str,
        _password: &str,
    ) -> SendOutcome {
        SendOutcome::failed("unexpected")
    }

    async fn send_payslip(
        &self,
        _email: &str,
        _full_name: &str,
        _month: &str,
        _year: &str,
        _payment_indicator: &str,
        _ui_authorization: &str,
    ) -> SendOutcome {
        SendOutcome::failed("unexpected")
    }

    async fn send_cms_welcome(
        &self,
        _email: &str,
        _full_name: &str,
        _username: &str,
        _password: &str,
    ) -> SendOutcome {
        SendOutcome::failed("unexpected")
    }

    async fn send_ornato(&self, _email: &str, _full_name: &str, _year: &str) -> SendOutcome {
        SendOutcome::failed("unexpected")
    }
}

struct NoSms;

#[async_trait]
impl SmsSender for NoSms {
    async fn send_password(&self, _contact: &str, _password: &str) -> SendOutcome {
        SendOutcome::failed("unexpected")
    }
}

fn items(count: usize) -> Vec<BulkItem> {
    (1..=count)
        .map(|i| BulkItem {
            cod_employee: Some(format!("E{i}")),
            full_name: Some(format!("Empleado {i}")),
            email: Some(format!("e{i}@example.com")),
            ..Default::default()
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn twelve_items_pause_twice() {
    let mailer = Arc::new(CountingMailer::default());
    let (updates, _) = broadcast::channel(256);
    let ctx = BulkContext {
        manager: Arc::new(ProcessManager::new(Duration::from_secs(3600))),
        mailer: Arc::clone(&mailer) as Arc<dyn Mailer>,
        sms: Arc::new(NoSms),
        pacing: config::Bulk {
            batch_size: 5,
            batch_wait_seconds: 300,
            inter_row_delay_ms: 0,
            inter_item_delay_ms: 500,
        },
        updates,
    };

    let items = items(12);
    let process = ctx.manager.start_process(
        "Correo de Bienvenida",
        &ProcessOwner {
            name: Some("Admin".into()),
            email: Some("admin@example.com".into()),
            sub: None,
        },
        items.len(),
    );

    let started = tokio::time::Instant::now();
    run_bulk_action(
        ctx.clone(),
        process.id.clone(),
        "Correo de Bienvenida".into(),
        items,
    )
    .await;
    let elapsed = started.elapsed();

    assert_eq!(*mailer.sent.lock().unwrap(), 12);

    let snap = ctx.manager.get_process(&process.id).unwrap();
    assert_eq!(snap.status, ProcessStatus::Completed);
    assert_eq!(snap.progress, 100);
    assert!(snap
        .item_results
        .values()
        .all(|r| r.status == ItemStatus::Success));

    // Pauses after items 5 and 10 only; item 12 is last, so no third.
    let pauses = snap
        .logs
        .iter()
        .filter(|l| l.message.contains("Límite de batch alcanzado"))
        .count();
    assert_eq!(pauses, 2);

    // Paused virtual time: 12 inter-item delays plus two batch waits.
    let expected = Duration::from_millis(12 * 500) + Duration::from_secs(2 * 300);
    assert!(elapsed >= expected, "elapsed {elapsed:?} < {expected:?}");
    assert!(elapsed < expected + Duration::from_secs(5));
}
