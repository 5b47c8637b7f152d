//! In-memory registry of long-running background jobs.
//!
//! The manager is an explicitly constructed service (no global state):
//! `main` builds one `Arc<ProcessManager>` and hands clones to the
//! WebSocket orchestrator and the bulk loops. Mutations come from
//! concurrent job tasks, so the job map sits behind a mutex; every
//! method takes `&self` and returns cloned snapshots.

use crate::model::{
    BackgroundProcess, ItemOutcome, ItemStatus, LogKind, ProcessLog, ProcessStatus,
};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::info;

/// Identity attached to a job for dashboard display.
#[derive(Debug, Clone, Default)]
pub struct ProcessOwner {
    pub name: Option<String>,
    pub email: Option<String>,
    pub sub: Option<String>,
}

pub struct ProcessManager {
    processes: Mutex<HashMap<String, BackgroundProcess>>,
    retention: Duration,
    seq: AtomicU64,
}

impl ProcessManager {
    pub fn new(retention: std::time::Duration) -> Self {
        Self {
            processes: Mutex::new(HashMap::new()),
            retention: Duration::from_std(retention).unwrap_or_else(|_| Duration::hours(1)),
            seq: AtomicU64::new(0),
        }
    }

    /// Register a new running job and return its initial snapshot.
    pub fn start_process(
        &self,
        action: &str,
        owner: &ProcessOwner,
        total: usize,
    ) -> BackgroundProcess {
        let now = Utc::now();
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let id = format!("proc_{}_{}", now.timestamp_millis(), seq);

        let user_name = owner
            .name
            .clone()
            .or_else(|| owner.email.clone())
            .or_else(|| owner.sub.clone())
            .unwrap_or_else(|| "Unknown User".into());
        let user_email = owner
            .email
            .clone()
            .or_else(|| owner.sub.clone())
            .unwrap_or_else(|| "unknown".into());

        let mut process = BackgroundProcess {
            id: id.clone(),
            action: action.to_string(),
            user_name,
            user_email,
            status: ProcessStatus::Running,
            progress: 0,
            total,
            current: 0,
            logs: Vec::new(),
            item_results: HashMap::new(),
            start_time: now,
            end_time: None,
        };
        process.logs.push(ProcessLog {
            timestamp: now,
            message: format!("Proceso iniciado: \"{action}\" para {total} elementos."),
            kind: LogKind::Info,
        });

        info!(id, action, total, "background process started");
        self.processes
            .lock()
            .expect("process registry poisoned")
            .insert(id, process.clone());
        process
    }

    /// Advance aggregate progress. `current` never decreases; reaching
    /// `total` completes the job.
    pub fn update_progress(
        &self,
        id: &str,
        current: usize,
        message: Option<&str>,
    ) -> Option<BackgroundProcess> {
        let finished = {
            let mut map = self.processes.lock().expect("process registry poisoned");
            let process = map.get_mut(id)?;
            process.current = process.current.max(current);
            process.progress = if process.total == 0 {
                100
            } else {
                (((process.current as f64 / process.total as f64) * 100.0).round() as u8).min(100)
            };
            if let Some(message) = message {
                process.logs.push(ProcessLog {
                    timestamp: Utc::now(),
                    message: message.to_string(),
                    kind: LogKind::Info,
                });
            }
            process.status == ProcessStatus::Running && process.current >= process.total
        };
        if finished {
            return self.finish_process(id, ProcessStatus::Completed, None);
        }
        self.get_process(id)
    }

    /// Record one item's outcome, independent of aggregate progress.
    pub fn update_item_status(
        &self,
        id: &str,
        item_id: &str,
        status: ItemStatus,
        message: Option<String>,
    ) -> Option<BackgroundProcess> {
        let mut map = self.processes.lock().expect("process registry poisoned");
        let process = map.get_mut(id)?;
        process
            .item_results
            .insert(item_id.to_string(), ItemOutcome { status, message });
        Some(process.clone())
    }

    pub fn add_log(&self, id: &str, message: &str, kind: LogKind) -> Option<BackgroundProcess> {
        let mut map = self.processes.lock().expect("process registry poisoned");
        let process = map.get_mut(id)?;
        process.logs.push(ProcessLog {
            timestamp: Utc::now(),
            message: message.to_string(),
            kind,
        });
        Some(process.clone())
    }

    /// Terminal transition. A job that already finished is left untouched.
    pub fn finish_process(
        &self,
        id: &str,
        status: ProcessStatus,
        final_message: Option<&str>,
    ) -> Option<BackgroundProcess> {
        let mut map = self.processes.lock().expect("process registry poisoned");
        let process = map.get_mut(id)?;
        if process.status.is_terminal() {
            return Some(process.clone());
        }
        process.status = status;
        process.end_time = Some(Utc::now());
        process.progress = 100;

        let kind = if status == ProcessStatus::Completed {
            LogKind::Success
        } else {
            LogKind::Error
        };
        let message = final_message.map(str::to_string).unwrap_or_else(|| {
            if status == ProcessStatus::Completed {
                "Proceso finalizado exitosamente.".into()
            } else {
                "Proceso fallido.".into()
            }
        });
        process.logs.push(ProcessLog {
            timestamp: Utc::now(),
            message,
            kind,
        });
        info!(id, ?status, "background process finished");
        Some(process.clone())
    }

    pub fn get_process(&self, id: &str) -> Option<BackgroundProcess> {
        self.processes
            .lock()
            .expect("process registry poisoned")
            .get(id)
            .cloned()
    }

    pub fn get_all_active(&self) -> Vec<BackgroundProcess> {
        self.processes
            .lock()
            .expect("process registry poisoned")
            .values()
            .filter(|p| p.status == ProcessStatus::Running)
            .cloned()
            .collect()
    }

    /// Finished jobs whose end time is within the retention window,
    /// newest-first by start time.
    pub fn get_recent_history(&self) -> Vec<BackgroundProcess> {
        let now = Utc::now();
        let mut history: Vec<BackgroundProcess> = self
            .processes
            .lock()
            .expect("process registry poisoned")
            .values()
            .filter(|p| p.status.is_terminal())
            .filter(|p| match p.end_time {
                Some(end) => now - end < self.retention,
                None => false,
            })
            .cloned()
            .collect();
        history.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        history
    }

    /// Evict terminal jobs whose end time fell out of the retention window.
    pub fn sweep(&self, now: DateTime<Utc>) {
        let mut map = self.processes.lock().expect("process registry poisoned");
        map.retain(|_, p| match (p.status.is_terminal(), p.end_time) {
            (true, Some(end)) => now - end <= self.retention,
            _ => true,
        });
    }

    /// Spawn the periodic eviction task. Runs for the life of the process.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: std::time::Duration) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately
            loop {
                ticker.tick().await;
                manager.sweep(Utc::now());
            }
        });
    }
}
