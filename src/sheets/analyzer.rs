//! Header-row classifier for payroll sheets.
//!
//! Payroll exports carry a fixed block of columns at the start (employee
//! code through total earned) and at the end (total deductions through
//! comments). Everything in between is free-form; columns naming a
//! deduction are recognized by prefix convention so a sheet can add new
//! deduction types without any schema change here.

use crate::model::Deduccion;

/// Prefixes that mark a column as a deduction.
const DEDUCTION_PREFIXES: [&str; 4] = ["D ", "DED ", "DESC ", "DEDUCCION "];

/// Columns always present before the deduction block.
const FIXED_START_COLUMNS: [&str; 8] = [
    "Codigo Empleado",
    "Nombres y Apellidos",
    "Cantidad/Dias",
    "Sueldo Orinario",
    "Sueldo Extraordinario",
    "Bonificación 37-2001",
    "Bonificación 79-89",
    "Total Devengado",
];

/// Columns always present after the deduction block.
const FIXED_END_COLUMNS: [&str; 5] = [
    "Total deducciones",
    "Total a recibir",
    "Acreditación #1",
    "Acreditación #2",
    "Comentarios",
];

/// Headers containing these words usually name a deduction; used only for
/// advisory validation of unprefixed columns.
const SUSPICIOUS_WORDS: [&str; 9] = [
    "igss", "isr", "prestamo", "embargo", "anticipo", "tsh", "banco", "judicial", "descuento",
];

#[derive(Debug, Clone, PartialEq)]
pub struct DeductionColumn {
    pub name: String,
    pub index: usize,
    pub clean_name: String,
}

/// Derived per header row, immutable after analysis.
#[derive(Debug, Clone)]
pub struct SheetStructure {
    pub fixed_columns_start: Vec<String>,
    pub fixed_columns_end: Vec<String>,
    pub deduction_columns: Vec<DeductionColumn>,
}

#[derive(Debug, Clone)]
pub struct HeaderValidation {
    pub valid: bool,
    pub warnings: Vec<String>,
    pub suggestions: Vec<String>,
}

fn is_deduction_column(header: &str) -> bool {
    let trimmed = header.trim();
    DEDUCTION_PREFIXES.iter().any(|p| trimmed.starts_with(p))
}

/// Strip the recognized prefix, if any.
pub fn clean_deduction_name(header: &str) -> String {
    let trimmed = header.trim();
    for prefix in DEDUCTION_PREFIXES {
        if let Some(rest) = trimmed.strip_prefix(prefix) {
            return rest.trim().to_string();
        }
    }
    trimmed.to_string()
}

/// Classify a header row into fixed bounds and dynamic deduction columns.
///
/// Deductions are only recognized strictly between the last fixed-start
/// header and the first fixed-end header. With no end header the scan runs
/// to the end of the row; with no start header it begins at column 0.
/// Unprefixed columns between the bounds are not treated as deductions;
/// `validate_deduction_headers` flags the suspicious ones separately.
pub fn analyze_structure(headers: &[String]) -> SheetStructure {
    let normalized: Vec<String> = headers
        .iter()
        .map(|h| h.trim().to_lowercase())
        .collect();

    let start_vocab: Vec<String> = FIXED_START_COLUMNS
        .iter()
        .map(|c| c.to_lowercase())
        .collect();
    let end_vocab: Vec<String> = FIXED_END_COLUMNS.iter().map(|c| c.to_lowercase()).collect();

    let last_start_index = normalized
        .iter()
        .enumerate()
        .filter(|(_, h)| start_vocab.contains(h))
        .map(|(i, _)| i)
        .max();

    let first_end_index = normalized
        .iter()
        .position(|h| end_vocab.contains(h))
        .unwrap_or(headers.len());

    let scan_from = last_start_index.map(|i| i + 1).unwrap_or(0);

    let mut deduction_columns = Vec::new();
    for (i, header) in headers.iter().enumerate() {
        if i < scan_from || i >= first_end_index {
            continue;
        }
        let trimmed = header.trim();
        if is_deduction_column(trimmed) {
            deduction_columns.push(DeductionColumn {
                name: trimmed.to_string(),
                index: i,
                clean_name: clean_deduction_name(trimmed),
            });
        }
    }

    SheetStructure {
        fixed_columns_start: FIXED_START_COLUMNS.iter().map(|s| s.to_string()).collect(),
        fixed_columns_end: FIXED_END_COLUMNS.iter().map(|s| s.to_string()).collect(),
        deduction_columns,
    }
}

/// Pull the dynamic deductions out of one data row.
///
/// Cell values are stripped of currency symbols, commas and whitespace
/// before parsing. Zero and unparsable values are skipped; negative values
/// are kept as positive amounts annotated as adjustments.
pub fn extract_deductions(row: &[String], structure: &SheetStructure) -> Vec<Deduccion> {
    let mut deducciones = Vec::new();

    for col in &structure.deduction_columns {
        let raw = row.get(col.index).map(String::as_str).unwrap_or("0");
        let cleaned: String = raw
            .chars()
            .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
            .collect();

        let monto: f64 = match cleaned.parse() {
            Ok(v) => v,
            Err(_) => continue,
        };

        if monto > 0.0 {
            deducciones.push(Deduccion {
                tipo: col.clean_name.clone(),
                monto,
                observaciones: Some(format!(
                    "Columna: \"{}\" (índice {})",
                    col.name,
                    col.index + 1
                )),
            });
        } else if monto < 0.0 {
            deducciones.push(Deduccion {
                tipo: col.clean_name.clone(),
                monto: monto.abs(),
                observaciones: Some(format!("Ajuste negativo de columna: \"{}\"", col.name)),
            });
        }
    }

    deducciones
}

/// Advisory check: headers that look like deductions but carry no
/// recognized prefix. Never blocks ingestion.
pub fn validate_deduction_headers(headers: &[String]) -> HeaderValidation {
    let mut warnings = Vec::new();
    let mut suggestions = Vec::new();

    for (index, header) in headers.iter().enumerate() {
        let normalized = header.trim().to_lowercase();
        let seems_like_deduction = SUSPICIOUS_WORDS.iter().any(|w| normalized.contains(w));
        if seems_like_deduction && !is_deduction_column(header) {
            warnings.push(format!(
                "Columna \"{}\" (índice {}) parece ser una deducción pero no tiene prefijo",
                header,
                index + 1
            ));
            suggestions.push(format!("Renombrar \"{header}\" a \"D {header}\""));
        }
    }

    HeaderValidation {
        valid: warnings.is_empty(),
        warnings,
        suggestions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn payroll_headers() -> Vec<String> {
        headers(&[
            "Codigo Empleado",
            "Nombres y Apellidos",
            "Cantidad/Dias",
            "Sueldo Orinario",
            "Sueldo Extraordinario",
            "Bonificación 37-2001",
            "Bonificación 79-89",
            "Total Devengado",
            "D Embargo",
            "DESC IGSS",
            "Total deducciones",
            "Total a recibir",
            "Acreditación #1",
            "Acreditación #2",
            "Comentarios",
        ])
    }

    #[test]
    fn classifies_full_payroll_header() {
        let structure = analyze_structure(&payroll_headers());
        assert_eq!(
            structure.deduction_columns,
            vec![
                DeductionColumn {
                    name: "D Embargo".into(),
                    index: 8,
                    clean_name: "Embargo".into()
                },
                DeductionColumn {
                    name: "DESC IGSS".into(),
                    index: 9,
                    clean_name: "IGSS".into()
                },
            ]
        );
    }

    #[test]
    fn extracts_deductions_from_row() {
        let structure = analyze_structure(&payroll_headers());
        let row = headers(&[
            "001",
            "Juan Pérez",
            "15",
            "1000",
            "0",
            "0",
            "0",
            "1000",
            "50",
            "30",
            "80",
            "920",
            "",
            "",
            "",
        ]);
        let deducciones = extract_deductions(&row, &structure);
        assert_eq!(deducciones.len(), 2);
        assert_eq!(deducciones[0].tipo, "Embargo");
        assert_eq!(deducciones[0].monto, 50.0);
        assert_eq!(deducciones[1].tipo, "IGSS");
        assert_eq!(deducciones[1].monto, 30.0);
    }

    #[test]
    fn indices_disjoint_from_fixed_blocks_and_increasing() {
        let structure = analyze_structure(&payroll_headers());
        let mut previous = None;
        for col in &structure.deduction_columns {
            assert!(col.index > 7, "deduction inside fixed start block");
            assert!(col.index < 10, "deduction inside fixed end block");
            if let Some(prev) = previous {
                assert!(col.index > prev);
            }
            previous = Some(col.index);
        }
    }

    #[test]
    fn missing_end_block_scans_to_row_end() {
        let hs = headers(&["Codigo Empleado", "Total Devengado", "D Prestamo", "DED ISR"]);
        let structure = analyze_structure(&hs);
        assert_eq!(
            structure
                .deduction_columns
                .iter()
                .map(|c| c.index)
                .collect::<Vec<_>>(),
            vec![2, 3]
        );
    }

    #[test]
    fn missing_start_block_scans_from_zero() {
        let hs = headers(&["D Embargo", "Total deducciones"]);
        let structure = analyze_structure(&hs);
        assert_eq!(structure.deduction_columns.len(), 1);
        assert_eq!(structure.deduction_columns[0].index, 0);
    }

    #[test]
    fn unprefixed_columns_between_bounds_are_ignored() {
        let hs = headers(&["Total Devengado", "Prestamo Banco", "D Embargo", "Total a recibir"]);
        let structure = analyze_structure(&hs);
        assert_eq!(structure.deduction_columns.len(), 1);
        assert_eq!(structure.deduction_columns[0].name, "D Embargo");
    }

    #[test]
    fn header_matching_is_case_insensitive() {
        let hs = headers(&["CODIGO EMPLEADO", "total devengado", "D ISR", "TOTAL A RECIBIR"]);
        let structure = analyze_structure(&hs);
        assert_eq!(structure.deduction_columns.len(), 1);
        assert_eq!(structure.deduction_columns[0].index, 2);
    }

    #[test]
    fn negative_values_become_positive_adjustments() {
        let structure = analyze_structure(&headers(&["Total Devengado", "D Ajuste"]));
        let row = headers(&["1000", "-25.50"]);
        let deducciones = extract_deductions(&row, &structure);
        assert_eq!(deducciones.len(), 1);
        assert_eq!(deducciones[0].monto, 25.50);
        assert!(deducciones[0]
            .observaciones
            .as_deref()
            .unwrap()
            .contains("Ajuste negativo"));
    }

    #[test]
    fn zero_and_unparsable_values_are_skipped() {
        let structure = analyze_structure(&headers(&["Total Devengado", "D IGSS", "DED ISR"]));
        let row = headers(&["1000", "0", "n/a"]);
        assert!(extract_deductions(&row, &structure).is_empty());
    }

    #[test]
    fn currency_symbols_and_commas_are_stripped() {
        let structure = analyze_structure(&headers(&["Total Devengado", "D Prestamo"]));
        let row = headers(&["1000", "Q1,250.75"]);
        let deducciones = extract_deductions(&row, &structure);
        assert_eq!(deducciones[0].monto, 1250.75);
    }

    #[test]
    fn short_row_yields_no_deductions() {
        let structure = analyze_structure(&payroll_headers());
        let row = headers(&["001", "Juan"]);
        assert!(extract_deductions(&row, &structure).is_empty());
    }

    #[test]
    fn clean_name_strips_each_prefix() {
        assert_eq!(clean_deduction_name("D Embargo de salario"), "Embargo de salario");
        assert_eq!(clean_deduction_name("DED ISR"), "ISR");
        assert_eq!(clean_deduction_name("DESC IGSS"), "IGSS");
        assert_eq!(clean_deduction_name("DEDUCCION Préstamo"), "Préstamo");
        assert_eq!(clean_deduction_name("Sin Prefijo"), "Sin Prefijo");
    }

    #[test]
    fn advisory_warnings_for_unprefixed_suspicious_headers() {
        let hs = headers(&["Codigo Empleado", "Embargo Judicial", "D IGSS"]);
        let validation = validate_deduction_headers(&hs);
        assert!(!validation.valid);
        assert_eq!(validation.warnings.len(), 1);
        assert!(validation.warnings[0].contains("Embargo Judicial"));
        assert!(validation.suggestions[0].contains("D Embargo Judicial"));
    }

    #[test]
    fn prefixed_suspicious_headers_pass_validation() {
        let hs = headers(&["D Embargo", "DESC IGSS"]);
        assert!(validate_deduction_headers(&hs).valid);
    }
}
