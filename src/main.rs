use anyhow::Result;
use clap::Parser;
use planilla_sync::audit::AuditLogger;
use planilla_sync::notify::{HttpMailer, HttpSms, Mailer, SmsSender};
use planilla_sync::process::ProcessManager;
use planilla_sync::sheets::clients::EmployeeDirectory;
use planilla_sync::sheets::payments::PaymentStore;
use planilla_sync::sheets::{SheetReader, SheetsClient};
use planilla_sync::store::FileStore;
use planilla_sync::ws::{self, WsDeps};
use planilla_sync::config;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::info;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;

    let manager = Arc::new(ProcessManager::new(Duration::from_secs(
        cfg.process.retention_seconds,
    )));
    manager.spawn_sweeper(Duration::from_secs(cfg.process.sweep_interval_seconds));

    let store = Arc::new(FileStore::open(&cfg.storage.data_dir).await?);
    let payment_store: Arc<dyn PaymentStore> = store.clone();
    let directory: Arc<dyn EmployeeDirectory> = store;
    let reader: Arc<dyn SheetReader> = Arc::new(SheetsClient::new(
        &cfg.sheets.base_url,
        cfg.sheets.token.clone(),
    )?);
    let mailer: Arc<dyn Mailer> = Arc::new(HttpMailer::new(&cfg.mail)?);
    let sms: Arc<dyn SmsSender> = Arc::new(HttpSms::new(&cfg.sms)?);
    let audit = Arc::new(AuditLogger::new(
        &cfg.audit.log_dir,
        cfg.audit.max_file_bytes,
        cfg.audit.max_rotated_files,
    ));

    // Process snapshots fan out to every connected dashboard.
    let (updates, _) = broadcast::channel(256);

    let deps = Arc::new(WsDeps {
        server: cfg.server.clone(),
        pacing: cfg.bulk.clone(),
        manager,
        reader,
        store: payment_store,
        directory,
        mailer,
        sms,
        audit,
        updates,
    });

    let listener = TcpListener::bind(&cfg.server.bind_addr).await?;
    info!(addr = %cfg.server.bind_addr, "starting payroll sync service");
    ws::serve(listener, deps).await
}
