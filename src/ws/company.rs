//! Stepped company provisioning job.
//!
//! Walks a fixed sequence of provisioning steps and streams one progress
//! frame per step to the requesting socket, then a completion frame. The
//! heavy per-tenant schema work happens in the database tier; this job
//! owns the orchestration and the client-visible progress contract.

use crate::ws::messages::{self, CompanyPayload};
use rand::Rng;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

struct Step {
    id: usize,
    label: &'static str,
    delay: Duration,
}

const STEPS: [Step; 8] = [
    Step {
        id: 1,
        label: "Inicializando creación de empresa...",
        delay: Duration::from_millis(1000),
    },
    Step {
        id: 2,
        label: "Leyendo plantillas de definición...",
        delay: Duration::from_millis(1000),
    },
    Step {
        id: 3,
        label: "Procesando esquema dinámico...",
        delay: Duration::from_millis(1000),
    },
    Step {
        id: 4,
        label: "Generando tablas principales...",
        delay: Duration::ZERO,
    },
    Step {
        id: 5,
        label: "Creando índices y optimizaciones...",
        delay: Duration::ZERO,
    },
    Step {
        id: 6,
        label: "Creando procedimientos almacenados...",
        delay: Duration::ZERO,
    },
    Step {
        id: 7,
        label: "Configurando triggers de auditoría...",
        delay: Duration::ZERO,
    },
    Step {
        id: 8,
        label: "Finalizando configuración...",
        delay: Duration::from_millis(1000),
    },
];

/// Per-tenant object suffix derived from the company name.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect::<String>()
        .to_lowercase()
}

/// Run the provisioning sequence, streaming frames to `outbound`.
pub async fn run_company_creation(outbound: mpsc::Sender<String>, payload: CompanyPayload) {
    let suffix = sanitize_name(&payload.name);
    info!(
        company = payload.name,
        representante = payload.representante,
        suffix,
        "company provisioning started"
    );

    for step in &STEPS {
        let frame = messages::company_progress_frame(step.id, STEPS.len(), step.label);
        if outbound.send(frame).await.is_err() {
            // Client went away; nothing left to report to.
            return;
        }
        tokio::time::sleep(step.delay).await;
    }

    let company_id = rand::thread_rng().gen_range(0..1000);
    let _ = outbound
        .send(messages::company_complete_frame(&payload.name, company_id))
        .await;
    info!(company = payload.name, company_id, "company provisioning finished");
}
