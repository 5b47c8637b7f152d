//! Bulk send jobs driven from `BULK_ACTION_START`.
//!
//! One job walks a list of items and sends a mail or SMS per item,
//! recording every outcome in the process registry and pacing email
//! sends in batches so the upstream providers do not flag us as spam.

use crate::codes;
use crate::config;
use crate::model::{BackgroundProcess, BulkItem, ItemStatus, LogKind};
use crate::notify::{Mailer, SendOutcome, SmsSender};
use crate::process::ProcessManager;
use chrono::{Datelike, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Action labels accepted in `BULK_ACTION_START` payloads. The labels are
/// user-facing and arrive verbatim from the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkKind {
    Welcome,
    ResetPassword,
    SmsPassword,
    CmsWelcome,
    Payslip,
    Ornato,
}

impl BulkKind {
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "Correo de Bienvenida" => Some(Self::Welcome),
            "Restablecer Contraseña (Correo)" => Some(Self::ResetPassword),
            "Enviar Contraseña (SMS)" => Some(Self::SmsPassword),
            "WELCOME_CMS" => Some(Self::CmsWelcome),
            "Enviar Boleta" | "Enviar Boletas a Todos" => Some(Self::Payslip),
            "BOLETO_ORNATO" => Some(Self::Ornato),
            _ => None,
        }
    }

    /// Email sends count toward the anti-spam batch; SMS does not.
    fn is_email(&self) -> bool {
        !matches!(self, Self::SmsPassword)
    }
}

/// Outcome of one item's dispatch. Skips are first-class so the pacing
/// loop never has to sniff error strings.
enum StepResult {
    Sent(SendOutcome),
    Skipped(String),
}

/// Shared services a bulk job needs. Cheap to clone per spawned job.
#[derive(Clone)]
pub struct BulkContext {
    pub manager: Arc<ProcessManager>,
    pub mailer: Arc<dyn Mailer>,
    pub sms: Arc<dyn SmsSender>,
    pub pacing: config::Bulk,
    pub updates: broadcast::Sender<BackgroundProcess>,
}

impl BulkContext {
    fn publish(&self, snapshot: Option<BackgroundProcess>) {
        if let Some(snapshot) = snapshot {
            let _ = self.updates.send(snapshot);
        }
    }
}

async fn dispatch(ctx: &BulkContext, kind: BulkKind, item: &BulkItem, index: usize) -> StepResult {
    let name = item.display_name(index);
    let contact = item.email.clone().unwrap_or_default();

    match kind {
        BulkKind::Welcome => {
            let username = item
                .cod_employee
                .clone()
                .unwrap_or_else(|| item.item_id(index));
            StepResult::Sent(
                ctx.mailer
                    .send_welcome(&username, &contact, &name, &codes::generate_password())
                    .await,
            )
        }
        BulkKind::ResetPassword => StepResult::Sent(
            ctx.mailer
                .send_reset_password(&contact, &name, &codes::generate_password())
                .await,
        ),
        BulkKind::SmsPassword => {
            let phone = item.corporate_number.clone().unwrap_or_default();
            if phone.trim().is_empty() {
                return StepResult::Sent(SendOutcome::failed("No tiene número corporativo"));
            }
            StepResult::Sent(
                ctx.sms
                    .send_password(&phone, &codes::generate_password())
                    .await,
            )
        }
        BulkKind::CmsWelcome => {
            let username = item.username.clone().unwrap_or_else(|| contact.clone());
            let password = item
                .password
                .clone()
                .unwrap_or_else(codes::generate_password);
            StepResult::Sent(
                ctx.mailer
                    .send_cms_welcome(&contact, &name, &username, &password)
                    .await,
            )
        }
        BulkKind::Payslip => {
            if item
                .send_date
                .as_deref()
                .is_some_and(|d| !d.trim().is_empty())
            {
                return StepResult::Skipped("Ya fue enviado anteriormente".into());
            }
            let boleta = item.boleta.clone().unwrap_or_default();
            if boleta != "Digital" {
                return StepResult::Skipped(format!(
                    "Este empleado {name} recibe su boleta: ({boleta})"
                ));
            }
            StepResult::Sent(
                ctx.mailer
                    .send_payslip(
                        &contact,
                        &name,
                        item.month.as_deref().unwrap_or_default(),
                        item.year.as_deref().unwrap_or_default(),
                        item.payment_indicator.as_deref().unwrap_or_default(),
                        item.ui_authorization.as_deref().unwrap_or_default(),
                    )
                    .await,
            )
        }
        BulkKind::Ornato => {
            let year = item
                .year
                .clone()
                .filter(|y| !y.trim().is_empty())
                .unwrap_or_else(|| Utc::now().year().to_string());
            StepResult::Sent(ctx.mailer.send_ornato(&contact, &name, &year).await)
        }
    }
}

/// Execute one bulk job end to end. The caller has already registered the
/// process (`process_id`) and broadcast its initial snapshot.
pub async fn run_bulk_action(
    ctx: BulkContext,
    process_id: String,
    type_label: String,
    items: Vec<BulkItem>,
) {
    let kind = BulkKind::parse(&type_label);
    let mut sent_in_batch = 0usize;
    let total = items.len();

    for (index, item) in items.iter().enumerate() {
        // Throttle so the SMTP/SMS side is never hammered.
        tokio::time::sleep(Duration::from_millis(ctx.pacing.inter_item_delay_ms)).await;

        let name = item.display_name(index);
        let item_id = item.item_id(index);

        let has_contact = item
            .email
            .as_deref()
            .is_some_and(|e| !e.trim().is_empty());
        if !has_contact {
            ctx.publish(ctx.manager.update_item_status(
                &process_id,
                &item_id,
                ItemStatus::Error,
                Some("No tiene email".into()),
            ));
            ctx.publish(ctx.manager.add_log(
                &process_id,
                &format!("❌ Error procesando {name}: No tiene email."),
                LogKind::Error,
            ));
            continue;
        }

        let step = match kind {
            Some(kind) => dispatch(&ctx, kind, item, index).await,
            None => StepResult::Sent(SendOutcome::failed(format!(
                "Tipo de acción no soportado: {type_label}"
            ))),
        };

        // Anti-spam pacing: skipped items never count, failed sends do.
        let was_skipped = matches!(step, StepResult::Skipped(_));
        if kind.is_some_and(|k| k.is_email()) && !was_skipped {
            sent_in_batch += 1;
            if sent_in_batch >= ctx.pacing.batch_size && index < total - 1 {
                let wait_minutes = ctx.pacing.batch_wait_seconds / 60;
                ctx.publish(ctx.manager.add_log(
                    &process_id,
                    &format!(
                        "⏳ Límite de batch alcanzado ({} correos). Esperando {} minutos para evitar bloqueos (Yahoo/Spam)...",
                        ctx.pacing.batch_size, wait_minutes
                    ),
                    LogKind::Info,
                ));
                tokio::time::sleep(Duration::from_secs(ctx.pacing.batch_wait_seconds)).await;
                sent_in_batch = 0;
            }
        }

        match step {
            StepResult::Sent(outcome) if outcome.success => {
                ctx.manager
                    .update_item_status(&process_id, &item_id, ItemStatus::Success, None);
                ctx.publish(ctx.manager.update_progress(
                    &process_id,
                    index + 1,
                    Some(&format!("✅ Enviado {type_label} a {name}.")),
                ));
            }
            StepResult::Sent(outcome) => {
                let error = outcome.error.unwrap_or_else(|| "Error desconocido".into());
                ctx.manager.update_item_status(
                    &process_id,
                    &item_id,
                    ItemStatus::Error,
                    Some(error.clone()),
                );
                ctx.publish(ctx.manager.add_log(
                    &process_id,
                    &format!("❌ Error enviando a {name}: {error}"),
                    LogKind::Error,
                ));
            }
            StepResult::Skipped(reason) => {
                ctx.manager.update_item_status(
                    &process_id,
                    &item_id,
                    ItemStatus::Error,
                    Some(reason.clone()),
                );
                ctx.publish(ctx.manager.add_log(
                    &process_id,
                    &format!("❌ Error enviando a {name}: {reason}"),
                    LogKind::Error,
                ));
            }
        }
    }

    ctx.manager
        .finish_process(&process_id, crate::model::ProcessStatus::Completed, None);
    ctx.publish(ctx.manager.add_log(
        &process_id,
        &format!("🏁 Proceso \"{type_label}\" finalizado para {total} elementos."),
        LogKind::Success,
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ProcessOwner;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingMailer {
        sent: Mutex<Vec<String>>,
        fail_for: Option<String>,
    }

    impl RecordingMailer {
        fn record(&self, what: String) -> SendOutcome {
            self.sent.lock().unwrap().push(what.clone());
            match &self.fail_for {
                Some(needle) if what.contains(needle.as_str()) => {
                    SendOutcome::failed("smtp rechazó el mensaje")
                }
                _ => SendOutcome::ok(Some("mid".into())),
            }
        }
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send_welcome(
            &self,
            username: &str,
            email: &str,
            _full_name: &str,
            _password: &str,
        ) -> SendOutcome {
            self.record(format!("welcome:{username}:{email}"))
        }

        async fn send_reset_password(
            &self,
            email: &str,
            _full_name: &str,
            _password: &str,
        ) -> SendOutcome {
            self.record(format!("reset:{email}"))
        }

        async fn send_payslip(
            &self,
            email: &str,
            _full_name: &str,
            month: &str,
            year: &str,
            indicator: &str,
            auth: &str,
        ) -> SendOutcome {
            self.record(format!("boleta:{email}:{month}/{year}:{indicator}:{auth}"))
        }

        async fn send_cms_welcome(
            &self,
            email: &str,
            _full_name: &str,
            username: &str,
            _password: &str,
        ) -> SendOutcome {
            self.record(format!("cms:{username}:{email}"))
        }

        async fn send_ornato(&self, email: &str, _full_name: &str, year: &str) -> SendOutcome {
            self.record(format!("ornato:{email}:{year}"))
        }
    }

    struct NoSms;

    #[async_trait]
    impl SmsSender for NoSms {
        async fn send_password(&self, contact: &str, _password: &str) -> SendOutcome {
            SendOutcome::failed(format!("sms to {contact} not expected"))
        }
    }

    fn pacing(batch_size: usize) -> config::Bulk {
        config::Bulk {
            batch_size,
            batch_wait_seconds: 300,
            inter_row_delay_ms: 0,
            inter_item_delay_ms: 0,
        }
    }

    fn context(mailer: Arc<RecordingMailer>, batch_size: usize) -> BulkContext {
        let (updates, _) = broadcast::channel(64);
        BulkContext {
            manager: Arc::new(ProcessManager::new(Duration::from_secs(3600))),
            mailer,
            sms: Arc::new(NoSms),
            pacing: pacing(batch_size),
            updates,
        }
    }

    fn payslip_item(cod: &str, email: &str, boleta: &str, send_date: &str) -> BulkItem {
        BulkItem {
            cod_employee: Some(cod.into()),
            full_name: Some(format!("Empleado {cod}")),
            email: Some(email.into()),
            month: Some("Marzo".into()),
            year: Some("2025".into()),
            payment_indicator: Some("PI1".into()),
            ui_authorization: Some("UA1".into()),
            send_date: if send_date.is_empty() {
                None
            } else {
                Some(send_date.into())
            },
            boleta: Some(boleta.into()),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn payslip_skips_do_not_send() {
        let mailer = Arc::new(RecordingMailer::default());
        let ctx = context(Arc::clone(&mailer), 5);
        let p = ctx
            .manager
            .start_process("Enviar Boleta", &ProcessOwner::default(), 3);

        let items = vec![
            payslip_item("E1", "e1@x.com", "Digital", "2025-01-01"),
            payslip_item("E2", "e2@x.com", "Física", ""),
            payslip_item("E3", "e3@x.com", "Digital", ""),
        ];
        run_bulk_action(ctx.clone(), p.id.clone(), "Enviar Boleta".into(), items).await;

        assert_eq!(mailer.sent.lock().unwrap().len(), 1);
        let snap = ctx.manager.get_process(&p.id).unwrap();
        assert_eq!(
            snap.item_results["E1"].message.as_deref(),
            Some("Ya fue enviado anteriormente")
        );
        assert!(snap.item_results["E2"]
            .message
            .as_deref()
            .unwrap()
            .contains("recibe su boleta"));
        assert_eq!(snap.item_results["E3"].status, ItemStatus::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn batch_pause_after_each_full_batch_but_not_after_last() {
        let mailer = Arc::new(RecordingMailer::default());
        let ctx = context(Arc::clone(&mailer), 2);
        let items: Vec<BulkItem> = (1..=4)
            .map(|i| BulkItem {
                cod_employee: Some(format!("E{i}")),
                full_name: Some(format!("Empleado {i}")),
                email: Some(format!("e{i}@x.com")),
                ..Default::default()
            })
            .collect();
        let p = ctx.manager.start_process(
            "Correo de Bienvenida",
            &ProcessOwner::default(),
            items.len(),
        );

        run_bulk_action(
            ctx.clone(),
            p.id.clone(),
            "Correo de Bienvenida".into(),
            items,
        )
        .await;

        let snap = ctx.manager.get_process(&p.id).unwrap();
        let pauses = snap
            .logs
            .iter()
            .filter(|l| l.message.contains("Límite de batch alcanzado"))
            .count();
        // After item 2 only. Item 4 is the last one, so no trailing pause.
        assert_eq!(pauses, 1);
        assert_eq!(mailer.sent.lock().unwrap().len(), 4);
        assert_eq!(snap.status, crate::model::ProcessStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_count_toward_batch_and_progress_stalls() {
        let mailer = Arc::new(RecordingMailer {
            fail_for: Some("e2@x.com".into()),
            ..Default::default()
        });
        let ctx = context(Arc::clone(&mailer), 5);
        let items: Vec<BulkItem> = (1..=3)
            .map(|i| BulkItem {
                cod_employee: Some(format!("E{i}")),
                email: Some(format!("e{i}@x.com")),
                ..Default::default()
            })
            .collect();
        let p = ctx.manager.start_process(
            "Correo de Bienvenida",
            &ProcessOwner::default(),
            items.len(),
        );

        run_bulk_action(
            ctx.clone(),
            p.id.clone(),
            "Correo de Bienvenida".into(),
            items,
        )
        .await;

        let snap = ctx.manager.get_process(&p.id).unwrap();
        assert_eq!(snap.item_results["E2"].status, ItemStatus::Error);
        // Progress only advances on successes; the last success was item 3.
        assert_eq!(snap.current, 3);
        assert_eq!(snap.status, crate::model::ProcessStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_email_is_reported_without_sending() {
        let mailer = Arc::new(RecordingMailer::default());
        let ctx = context(Arc::clone(&mailer), 5);
        let items = vec![BulkItem {
            cod_employee: Some("E1".into()),
            full_name: Some("Sin Correo".into()),
            ..Default::default()
        }];
        let p =
            ctx.manager
                .start_process("Correo de Bienvenida", &ProcessOwner::default(), 1);

        run_bulk_action(
            ctx.clone(),
            p.id.clone(),
            "Correo de Bienvenida".into(),
            items,
        )
        .await;

        assert!(mailer.sent.lock().unwrap().is_empty());
        let snap = ctx.manager.get_process(&p.id).unwrap();
        assert_eq!(
            snap.item_results["E1"].message.as_deref(),
            Some("No tiene email")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_type_fails_every_item() {
        let mailer = Arc::new(RecordingMailer::default());
        let ctx = context(Arc::clone(&mailer), 5);
        let items = vec![BulkItem {
            cod_employee: Some("E1".into()),
            email: Some("e1@x.com".into()),
            ..Default::default()
        }];
        let p = ctx
            .manager
            .start_process("Telegrama", &ProcessOwner::default(), 1);

        run_bulk_action(ctx.clone(), p.id.clone(), "Telegrama".into(), items).await;

        let snap = ctx.manager.get_process(&p.id).unwrap();
        assert!(snap.item_results["E1"]
            .message
            .as_deref()
            .unwrap()
            .contains("Tipo de acción no soportado"));
    }
}
