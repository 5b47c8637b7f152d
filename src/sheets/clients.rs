//! Employee auto-provisioning from client spreadsheets.
//!
//! Rows are partitioned by email: missing, invalid, duplicate within the
//! run, or accepted (and auto-created in the directory). Every outcome is
//! streamed as a progress event; a near-miss on a known mail provider is
//! reported as an advisory warning only.

use crate::codes;
use crate::model::NewEmployee;
use crate::sheets::{ProgressEvent, SheetReader};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::warn;

#[async_trait]
pub trait EmployeeDirectory: Send + Sync {
    /// Create an employee record. Duplicate suppression is the caller's
    /// responsibility; the directory does not guarantee idempotency.
    async fn create_employee(&self, employee: &NewEmployee) -> Result<()>;
}

static EMAIL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}$").expect("valid email pattern")
});

const EMAIL_HEADER_CANDIDATES: [&str; 6] = [
    "correo",
    "correo electrónico",
    "correo electronico",
    "email",
    "e-mail",
    "mail",
];
const EMAIL_HEADER_PARTIALS: [&str; 3] = ["correo", "email", "mail"];

const NAME_HEADER_CANDIDATES: [&str; 8] = [
    "nombre",
    "nombres",
    "nombre completo",
    "full name",
    "fullname",
    "name",
    "cliente",
    "usuario",
];
const NAME_HEADER_PARTIALS: [&str; 3] = ["nombre", "name", "cliente"];

const KNOWN_PROVIDERS: [&str; 5] = ["gmail", "hotmail", "outlook", "yahoo", "icloud"];

/// Sheet column header for each provisioned employee field.
const COL_COD_EMPLOYEE: &str = "Codigo de empleado";
const COL_FULL_NAME: &str = "Nombres Y Apellidos";
const COL_DISCHARGE_DATE: &str = "Fecha De Ingreso";
const COL_LOW_DATE: &str = "Fecha De Baja";
const COL_CORPORATE_NUMBERS: &str = "Números Corporativos";
const COL_USER_STATUS: &str = "Estatus";
const COL_ROL: &str = "Rol";
const COL_POSITION: &str = "Puesto";
const COL_CDR: &str = "CDR";
const COL_ACCOUNT: &str = "Cuenta";
const COL_NO_ACCOUNT: &str = "No. Cuenta";
const COL_BASE_SALARY: &str = "Salario Central";
const COL_TOTAL_VACATIONS: &str = "Total de Vacaciones";
const COL_VACATION_DEADLINE: &str = "Corte Vacaciones";
const COL_SATURDAYS_AND_SUNDAYS: &str = "Sabados y Domingos";
const COL_IMMEDIATE_BOSS: &str = "Jefe Inmediato";
const COL_DPI: &str = "DPI";
const COL_IGSS: &str = "IGSS";
const COL_NIT: &str = "NIT";
const COL_COMPANY: &str = "Empresa";
const COL_LEVEL: &str = "Nivel";

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowRef {
    pub row_number: usize,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateRef {
    pub row_number: usize,
    pub email: String,
    pub first_row_number: usize,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedRow {
    pub row_number: usize,
    pub email: String,
    pub full_name: String,
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientsOutcome {
    pub success: bool,
    pub sheet_name: String,
    pub processed_by: String,
    pub total_rows: usize,
    pub invalid_emails: Vec<RowRef>,
    pub duplicate_emails: Vec<DuplicateRef>,
    pub no_emails: Vec<usize>,
    pub created: Vec<CreatedRow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

pub fn is_valid_email(normalized: &str) -> bool {
    !normalized.is_empty() && EMAIL_PATTERN.is_match(normalized)
}

/// Locate a header by exact candidate match, falling back to a substring
/// scan. Returns the column index.
fn find_header(headers: &[String], candidates: &[&str], partials: &[&str]) -> Option<usize> {
    let lower: Vec<String> = headers.iter().map(|h| h.trim().to_lowercase()).collect();
    for candidate in candidates {
        if let Some(idx) = lower.iter().position(|h| h == candidate) {
            return Some(idx);
        }
    }
    lower
        .iter()
        .position(|h| partials.iter().any(|p| h.contains(p)))
}

/// Classic edit distance over lowercase characters.
fn string_distance(a: &str, b: &str) -> usize {
    let s1: Vec<char> = a.to_lowercase().chars().collect();
    let s2: Vec<char> = b.to_lowercase().chars().collect();
    let mut prev: Vec<usize> = (0..=s2.len()).collect();
    for i in 1..=s1.len() {
        let mut curr = vec![0usize; s2.len() + 1];
        curr[0] = i;
        for j in 1..=s2.len() {
            let cost = usize::from(s1[i - 1] != s2[j - 1]);
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        prev = curr;
    }
    prev[s2.len()]
}

/// Two adjacent letters swapped, nothing else changed.
fn is_transposition(a: &str, b: &str) -> bool {
    let a: Vec<char> = a.to_lowercase().chars().collect();
    let b: Vec<char> = b.to_lowercase().chars().collect();
    if a.len() != b.len() {
        return false;
    }
    let diffs: Vec<usize> = (0..a.len()).filter(|&k| a[k] != b[k]).collect();
    diffs.len() == 2
        && diffs[1] == diffs[0] + 1
        && a[diffs[0]] == b[diffs[1]]
        && a[diffs[1]] == b[diffs[0]]
}

/// Detect a close-but-wrong mail provider ("gmial", "hotmial", ...).
/// Returns `(found, expected)` when the domain token is one typo away
/// from a known provider and shares its first letter.
pub fn check_provider_spelling(email: &str) -> Option<(String, String)> {
    let domain = email.split('@').nth(1).unwrap_or("");
    let provider = domain.split('.').next().unwrap_or("");
    if provider.is_empty() || KNOWN_PROVIDERS.contains(&provider) {
        return None;
    }

    let provider_first = provider.chars().next()?.to_lowercase().next()?;
    let mut best: Option<(&str, usize)> = None;
    for expected in KNOWN_PROVIDERS {
        let dist = string_distance(provider, expected);
        let close_enough = dist <= 1
            || is_transposition(provider, expected)
            || (dist <= 2 && provider.chars().count() >= 5);
        let expected_first = expected.chars().next().unwrap_or_default();
        if close_enough && provider_first == expected_first {
            match best {
                Some((_, best_dist)) if dist >= best_dist => {}
                _ => best = Some((expected, dist)),
            }
        }
    }
    best.map(|(expected, _)| (provider.to_string(), expected.to_string()))
}

fn named_cell(row: &[String], index_by_header: &HashMap<String, usize>, header: &str) -> String {
    index_by_header
        .get(header)
        .and_then(|&i| row.get(i))
        .cloned()
        .unwrap_or_default()
}

fn or_default(value: String, fallback: &str) -> String {
    if value.trim().is_empty() {
        fallback.to_string()
    } else {
        value
    }
}

/// Process every row of a client sheet, auto-provisioning employees for
/// accepted emails. Row classification is a total partition: each data row
/// lands in exactly one of no_email / invalid / duplicate / created.
pub async fn process_clients_sheet(
    reader: &dyn SheetReader,
    directory: &dyn EmployeeDirectory,
    spreadsheet_id: &str,
    sheet_name: &str,
    acting_user: &str,
    events: mpsc::Sender<ProgressEvent>,
) -> ClientsOutcome {
    match run(reader, directory, spreadsheet_id, sheet_name, acting_user, &events).await {
        Ok(outcome) => outcome,
        Err(err) => {
            warn!(?err, sheet_name, "client sheet processing failed");
            let _ = events
                .send(ProgressEvent::Error {
                    message: err.to_string(),
                })
                .await;
            ClientsOutcome {
                success: false,
                sheet_name: sheet_name.to_string(),
                processed_by: acting_user.to_string(),
                total_rows: 0,
                invalid_emails: Vec::new(),
                duplicate_emails: Vec::new(),
                no_emails: Vec::new(),
                created: Vec::new(),
                error: Some(err.to_string()),
            }
        }
    }
}

async fn run(
    reader: &dyn SheetReader,
    directory: &dyn EmployeeDirectory,
    spreadsheet_id: &str,
    sheet_name: &str,
    acting_user: &str,
    events: &mpsc::Sender<ProgressEvent>,
) -> Result<ClientsOutcome> {
    let range = format!("{}!A1:ZZ", sheet_name.trim());
    let sheet_data = reader
        .read_sheet(spreadsheet_id, &range)
        .await
        .context("no se pudo leer la hoja de cálculo")?;

    let mut rows_iter = sheet_data.into_iter();
    let headers = rows_iter.next().unwrap_or_default();
    let rows: Vec<Vec<String>> = rows_iter.collect();

    let index_by_header: HashMap<String, usize> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| (h.clone(), i))
        .collect();
    let email_col = find_header(&headers, &EMAIL_HEADER_CANDIDATES, &EMAIL_HEADER_PARTIALS);
    let name_col = find_header(&headers, &NAME_HEADER_CANDIDATES, &NAME_HEADER_PARTIALS);

    let _ = events
        .send(ProgressEvent::Started {
            sheet_name: sheet_name.to_string(),
            total_rows: rows.len(),
        })
        .await;

    let mut outcome = ClientsOutcome {
        success: true,
        sheet_name: sheet_name.to_string(),
        processed_by: acting_user.to_string(),
        total_rows: rows.len(),
        invalid_emails: Vec::new(),
        duplicate_emails: Vec::new(),
        no_emails: Vec::new(),
        created: Vec::new(),
        error: None,
    };

    // First occurrence of each normalized email wins.
    let mut seen_emails: HashMap<String, usize> = HashMap::new();

    for (index, row) in rows.iter().enumerate() {
        let row_number = index + 2;

        let email = match email_col {
            Some(col) => normalize_email(row.get(col).map(String::as_str).unwrap_or("")),
            // No email header at all: every row is a no-email row.
            None => String::new(),
        };

        if email.is_empty() {
            outcome.no_emails.push(row_number);
            let _ = events.send(ProgressEvent::NoEmail { row_number }).await;
            continue;
        }

        if !is_valid_email(&email) {
            outcome.invalid_emails.push(RowRef {
                row_number,
                email: email.clone(),
            });
            let _ = events
                .send(ProgressEvent::InvalidEmail {
                    row_number,
                    email,
                })
                .await;
            continue;
        }

        if let Some(&first_row_number) = seen_emails.get(&email) {
            outcome.duplicate_emails.push(DuplicateRef {
                row_number,
                email: email.clone(),
                first_row_number,
            });
            let _ = events
                .send(ProgressEvent::DuplicateEmail {
                    row_number,
                    email,
                    first_row_number,
                })
                .await;
            continue;
        }
        seen_emails.insert(email.clone(), row_number);

        let full_name = name_col
            .and_then(|col| row.get(col))
            .filter(|v| !v.trim().is_empty())
            .cloned()
            .unwrap_or_else(|| "Usuario".to_string());

        let cod_employee = named_cell(row, &index_by_header, COL_COD_EMPLOYEE);
        if cod_employee.trim().is_empty() {
            // No employee code: nothing to provision, but the email still
            // claims its slot in the seen-set.
            continue;
        }

        let password = codes::generate_password();
        let employee = NewEmployee {
            cod_employee: cod_employee.clone(),
            full_name: or_default(
                named_cell(row, &index_by_header, COL_FULL_NAME),
                &full_name,
            ),
            email: email.clone(),
            password: password.clone(),
            rol: or_default(named_cell(row, &index_by_header, COL_ROL), "Colaborador"),
            position: named_cell(row, &index_by_header, COL_POSITION),
            company: or_default(named_cell(row, &index_by_header, COL_COMPANY), "Cellus"),
            user_status: or_default(
                named_cell(row, &index_by_header, COL_USER_STATUS),
                "Activo",
            ),
            discharge_date: or_default(
                named_cell(row, &index_by_header, COL_DISCHARGE_DATE),
                &Utc::now().to_rfc3339(),
            ),
            low_date: named_cell(row, &index_by_header, COL_LOW_DATE),
            cdr: named_cell(row, &index_by_header, COL_CDR),
            account: named_cell(row, &index_by_header, COL_ACCOUNT),
            no_account: named_cell(row, &index_by_header, COL_NO_ACCOUNT),
            no_authorization: codes::generate_unique_id(),
            base_salary: named_cell(row, &index_by_header, COL_BASE_SALARY),
            total_vacations: named_cell(row, &index_by_header, COL_TOTAL_VACATIONS),
            vacation_deadline: named_cell(row, &index_by_header, COL_VACATION_DEADLINE),
            saturdays_and_sundays: named_cell(row, &index_by_header, COL_SATURDAYS_AND_SUNDAYS),
            immediate_boss: named_cell(row, &index_by_header, COL_IMMEDIATE_BOSS),
            dpi: named_cell(row, &index_by_header, COL_DPI),
            igss: named_cell(row, &index_by_header, COL_IGSS),
            nit: named_cell(row, &index_by_header, COL_NIT),
            level: named_cell(row, &index_by_header, COL_LEVEL),
            corporate_numbers: named_cell(row, &index_by_header, COL_CORPORATE_NUMBERS),
            user_who_creates: acting_user.to_string(),
        };

        match directory.create_employee(&employee).await {
            Ok(()) => {
                outcome.created.push(CreatedRow {
                    row_number,
                    email: email.clone(),
                    full_name: full_name.clone(),
                });
                let _ = events
                    .send(ProgressEvent::Created {
                        row_number,
                        full_name: full_name.clone(),
                        email: Some(email.clone()),
                        username: Some(cod_employee),
                        password: Some(password),
                    })
                    .await;
            }
            Err(err) => {
                warn!(?err, email, "failed to auto-create employee");
                let _ = events
                    .send(ProgressEvent::Error {
                        message: format!("Error al auto-crear empleado {email}: {err}"),
                    })
                    .await;
            }
        }

        if let Some((found, expected)) = check_provider_spelling(&email) {
            let _ = events
                .send(ProgressEvent::ProviderWarning {
                    row_number,
                    message: format!(
                        "Posible error en proveedor \"{found}\" en fila {row_number}. ¿Quisiste decir \"{expected}\"?"
                    ),
                })
                .await;
        }
    }

    let _ = events.send(ProgressEvent::Finished).await;
    Ok(outcome)
}
