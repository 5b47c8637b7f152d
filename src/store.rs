//! Local JSON persistence for imported boletas and auto-provisioned
//! employees.
//!
//! Payments are keyed by `(cod_employee, sheet_name)`, which is what
//! makes re-importing an unchanged sheet idempotent. Maps are held in
//! memory and flushed whole to disk after every mutation; the files are
//! small and the write path is serialized by the map locks.

use crate::model::{NewEmployee, PaymentRecord};
use crate::sheets::clients::EmployeeDirectory;
use crate::sheets::payments::{PaymentStore, StoreStatus};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::info;

const PAYMENTS_FILE: &str = "payments.json";
const EMPLOYEES_FILE: &str = "employees.json";

pub struct FileStore {
    payments_file: PathBuf,
    employees_file: PathBuf,
    payments: Mutex<HashMap<String, PaymentRecord>>,
    employees: Mutex<HashMap<String, NewEmployee>>,
}

fn payment_key(cod_employee: &str, sheet_name: &str) -> String {
    format!("{cod_employee}::{sheet_name}")
}

async fn load_map<T: DeserializeOwned>(path: &Path) -> Result<HashMap<String, T>> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => serde_json::from_str(&content)
            .with_context(|| format!("corrupt store file {}", path.display())),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
        Err(err) => Err(err).with_context(|| format!("cannot read {}", path.display())),
    }
}

async fn persist_map<T: Serialize>(path: &Path, map: &HashMap<String, T>) -> Result<()> {
    let content = serde_json::to_string_pretty(map).context("serialize store map")?;
    // Write-then-rename so a crash never leaves a truncated file behind.
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, content)
        .await
        .with_context(|| format!("cannot write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("cannot replace {}", path.display()))?;
    Ok(())
}

impl FileStore {
    pub async fn open(data_dir: impl AsRef<Path>) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        tokio::fs::create_dir_all(data_dir)
            .await
            .with_context(|| format!("cannot create data dir {}", data_dir.display()))?;

        let payments_file = data_dir.join(PAYMENTS_FILE);
        let employees_file = data_dir.join(EMPLOYEES_FILE);
        let payments = load_map(&payments_file).await?;
        let employees = load_map(&employees_file).await?;
        info!(
            payments = payments.len(),
            employees = employees.len(),
            dir = %data_dir.display(),
            "store opened"
        );

        Ok(Self {
            payments_file,
            employees_file,
            payments: Mutex::new(payments),
            employees: Mutex::new(employees),
        })
    }
}

#[async_trait]
impl PaymentStore for FileStore {
    async fn insert_or_update(&self, record: &PaymentRecord) -> Result<StoreStatus> {
        let key = payment_key(&record.cod_employee, &record.sheet_name);
        let mut map = self.payments.lock().await;
        let status = if map.contains_key(&key) {
            StoreStatus::Existing
        } else {
            StoreStatus::Created
        };
        map.insert(key, record.clone());
        persist_map(&self.payments_file, &map).await?;
        Ok(status)
    }
}

#[async_trait]
impl EmployeeDirectory for FileStore {
    async fn create_employee(&self, employee: &NewEmployee) -> Result<()> {
        let mut map = self.employees.lock().await;
        map.insert(employee.cod_employee.clone(), employee.clone());
        persist_map(&self.employees_file, &map).await
    }
}
