//! Reference-code and credential generators.
//!
//! `NoBoleta` numbers are deterministic given a timestamp: they encode
//! year/month/day, a 5-character alphabetic transliteration of the payment
//! type label, the time of day and the employee code. Authorization codes
//! and passwords are random.

use chrono::{DateTime, Datelike, Timelike, Utc};
use rand::Rng;

const CODE_CHARS: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const PASSWORD_CHARS: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789!@#$%^&*()_-+=[]{}|;:,.<>?";

/// Spanish month name to two-digit month. `Bono` and `Aguinaldo` appear in
/// sheet names where a month would be and map to their pay months.
pub fn month_number(name: &str) -> Option<&'static str> {
    Some(match name {
        "Enero" => "01",
        "Febrero" => "02",
        "Marzo" => "03",
        "Abril" => "04",
        "Mayo" => "05",
        "Junio" => "06",
        "Julio" | "Bono" => "07",
        "Agosto" => "08",
        "Septiembre" => "09",
        "Octubre" => "10",
        "Noviembre" => "11",
        "Diciembre" | "Aguinaldo" => "12",
        _ => return None,
    })
}

fn random_sections(sections: &[usize]) -> String {
    let mut rng = rand::thread_rng();
    let mut out = String::new();
    for (i, &len) in sections.iter().enumerate() {
        for _ in 0..len {
            out.push(CODE_CHARS[rng.gen_range(0..CODE_CHARS.len())] as char);
        }
        if i < sections.len() - 1 {
            out.push('-');
        }
    }
    out
}

/// Unique authorization code attached to every generated boleta.
pub fn generate_authorization() -> String {
    random_sections(&[6, 4, 2, 4, 3, 9])
}

/// Grouped unique id used as `NoAuthorization` on provisioned employees.
pub fn generate_unique_id() -> String {
    format!("CELLUS-{}", random_sections(&[7, 5, 5, 5, 3, 10]))
}

/// Temporary 8-character password for welcome/reset flows.
pub fn generate_password() -> String {
    let mut rng = rand::thread_rng();
    (0..8)
        .map(|_| PASSWORD_CHARS[rng.gen_range(0..PASSWORD_CHARS.len())] as char)
        .collect()
}

/// Letters a..z become their 1-based alphabet position, concatenated and
/// truncated to 5 characters. Non-letters are dropped.
fn alpha_code(text: &str) -> String {
    let mut out = String::new();
    for c in text.to_lowercase().chars() {
        if c.is_ascii_lowercase() {
            out.push_str(&((c as u8 - b'a' + 1).to_string()));
        }
    }
    out.truncate(5);
    out
}

/// Build the deterministic `NoBoleta` reference for one employee row.
///
/// The sheet name carries the pay period ("Enero 15 2025", "Aguinaldo 2024",
/// "Bono Productividad Enero 15 2025", ...); missing parts fall back to the
/// supplied timestamp.
pub fn generate_no_boleta(cod_employee: &str, sheet_name: &str, now: DateTime<Utc>) -> String {
    let parts: Vec<&str> = sheet_name.split(' ').collect();
    let now_day = format!("{:02}", now.day());
    let now_month = format!("{:02}", now.month());
    let now_year = now.year().to_string();

    let mut cod = cod_employee.to_string();
    let mut day = parts.get(1).map(|s| s.to_string()).unwrap_or(now_day.clone());
    let mut month = parts
        .first()
        .and_then(|s| month_number(s))
        .map(str::to_string)
        .unwrap_or(now_month.clone());
    let mut year = parts.get(2).map(|s| s.to_string()).unwrap_or(now_year.clone());
    let mut text = "";

    // Legacy employee codes come prefixed ("CELL - 001").
    if cod_employee.contains("CELL") {
        cod = cod_employee
            .split('-')
            .nth(1)
            .map(|s| s.trim().to_string())
            .unwrap_or_default();
        text = "CELL";
    }

    if sheet_name.contains("Super") {
        month = parts
            .get(1)
            .and_then(|s| month_number(s))
            .map(str::to_string)
            .unwrap_or(now_month.clone());
        day = parts.get(2).map(|s| s.to_string()).unwrap_or(now_day.clone());
        text = "Super";
    }

    if sheet_name.contains("Bono 14") {
        month = "07".into();
        day = now_day.clone();
        text = "Bono 14";
    }

    if sheet_name.contains("Bonificacion Productividad Vendedor") {
        month = parts
            .get(3)
            .and_then(|s| month_number(s))
            .map(str::to_string)
            .unwrap_or(now_month.clone());
        day = parts.get(4).map(|s| s.to_string()).unwrap_or(now_day.clone());
        year = parts.get(5).map(|s| s.to_string()).unwrap_or(now_year.clone());
        text = "Bonificacion Productividad Vendedor";
    }

    if sheet_name.contains("Bono Productividad") {
        month = parts
            .get(2)
            .and_then(|s| month_number(s))
            .map(str::to_string)
            .unwrap_or(now_month.clone());
        day = parts.get(3).map(|s| s.to_string()).unwrap_or(now_day.clone());
        year = parts.get(4).map(|s| s.to_string()).unwrap_or(now_year);
        text = "Bono Productividad";
    }

    if sheet_name.contains("Aguinaldo") {
        month = "12".into();
        day = now_day;
        text = "Aguinaldo";
    }

    let hhmmss = format!("{:02}{:02}{:02}", now.hour(), now.minute(), now.second());
    format!("{year}{month}{day}{}{hhmmss}{cod}", alpha_code(text))
}

/// Derive the pay day (`DD/MM/YYYY`) from the sheet name, falling back to
/// the supplied timestamp when the name carries no date.
pub fn pay_day_from_sheet_name(sheet_name: &str, now: DateTime<Utc>) -> String {
    let parts: Vec<&str> = sheet_name.split(' ').collect();
    let fmt = |day: &str, month: &str, year: &str| format!("{:0>2}/{month}/{year}", day);

    if sheet_name.contains("Aguinaldo") {
        if let Some(year) = parts.get(1) {
            return fmt("14", "12", year);
        }
    }

    if sheet_name.contains("Bono 14") {
        if let Some(year) = parts.get(2) {
            return fmt("14", "07", year);
        }
    }

    if sheet_name.contains("Bonificacion Productividad Vendedor") {
        if let (Some(month), Some(day), Some(year)) = (
            parts.get(3).and_then(|s| month_number(s)),
            parts.get(4),
            parts.get(5),
        ) {
            return fmt(day, month, year);
        }
    }

    if sheet_name.contains("Bono Productividad") {
        if let (Some(month), Some(day), Some(year)) = (
            parts.get(2).and_then(|s| month_number(s)),
            parts.get(3),
            parts.get(4),
        ) {
            return fmt(day, month, year);
        }
    }

    if let (Some(month), Some(day), Some(year)) = (
        parts.first().and_then(|s| month_number(s)),
        parts.get(1),
        parts.get(2),
    ) {
        return fmt(day, month, year);
    }

    format!("{:02}/{:02}/{}", now.day(), now.month(), now.year())
}
