//! Payroll spreadsheet sync service: WebSocket orchestration over sheet
//! ingestion, background-process tracking, bulk notifications and audit.

pub mod audit;
pub mod auth;
pub mod bulk;
pub mod codes;
pub mod config;
pub mod model;
pub mod notify;
pub mod process;
pub mod sheets;
pub mod store;
pub mod ws;
