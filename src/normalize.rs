//! Canonicalisation of ledger rows coming from spreadsheets, user edits and keyed imports.

use crate::schema::{CellValue, LedgerRow, RawLedgerRow, DEFAULT_ROW_NAME};
use log::debug;
use rand::Rng;
use std::collections::BTreeMap;

/// Coerces a cell into an amount. Anything unparseable or non-finite becomes `0.0`.
pub fn coerce_number(value: &CellValue) -> f64 {
    match value {
        CellValue::Number(n) if n.is_finite() => *n,
        CellValue::Text(text) => parse_number_text(text),
        _ => 0.0,
    }
}

/// Parses a textual amount written with `.` as thousands separator and `,` as decimal separator.
pub fn parse_number_text(text: &str) -> f64 {
    let cleaned: String = text
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '.')
        .map(|c| if c == ',' { '.' } else { c })
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();

    match cleaned.parse::<f64>() {
        Ok(n) if n.is_finite() => n,
        _ => 0.0,
    }
}

/// Lowercases, strips Spanish accents and drops every non-alphanumeric character.
pub fn normalize_header(text: &str) -> String {
    text.trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'á' => 'a',
            'é' => 'e',
            'í' => 'i',
            'ó' => 'o',
            'ú' | 'ü' => 'u',
            'ñ' => 'n',
            other => other,
        })
        .filter(|c| c.is_alphanumeric())
        .collect()
}

pub fn generate_row_id() -> String {
    format!("row-{:08x}", rand::thread_rng().gen::<u32>())
}

fn clean_name(name: &str) -> String {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        DEFAULT_ROW_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// Normalizes an already-typed row. Returns `None` when the code is blank.
///
/// A missing row id is derived from the row position (`row-<index + 1>`), so normalizing
/// the same input twice yields the same ids.
pub fn normalize_ledger_row(row: &LedgerRow, index: usize) -> Option<LedgerRow> {
    let code = row.code.trim();
    if code.is_empty() {
        return None;
    }

    let row_id = match row.row_id.trim() {
        "" => format!("row-{}", index + 1),
        id => id.to_string(),
    };

    Some(LedgerRow {
        row_id,
        is_new: row.is_new,
        exclude_from_analysis: row.exclude_from_analysis,
        code: code.to_string(),
        name: clean_name(&row.name),
        sid: finite_or_zero(row.sid),
        sia: finite_or_zero(row.sia),
        cargos: finite_or_zero(row.cargos),
        abonos: finite_or_zero(row.abonos),
        sfd: finite_or_zero(row.sfd),
        sfa: finite_or_zero(row.sfa),
    })
}

pub fn normalize_ledger_rows(rows: &[LedgerRow]) -> Vec<LedgerRow> {
    rows.iter()
        .enumerate()
        .filter_map(|(index, row)| normalize_ledger_row(row, index))
        .collect()
}

/// Normalizes a loosely typed row. A missing row id is replaced with a fresh random one.
pub fn normalize_raw_row(raw: &RawLedgerRow) -> Option<LedgerRow> {
    let code = raw.code.as_text().trim().to_string();
    if code.is_empty() {
        return None;
    }

    let row_id = raw
        .row_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .unwrap_or_else(generate_row_id);

    Some(LedgerRow {
        row_id,
        is_new: raw.is_new,
        exclude_from_analysis: raw.exclude_from_analysis,
        code,
        name: clean_name(&raw.name.as_text()),
        sid: coerce_number(&raw.sid),
        sia: coerce_number(&raw.sia),
        cargos: coerce_number(&raw.cargos),
        abonos: coerce_number(&raw.abonos),
        sfd: coerce_number(&raw.sfd),
        sfa: coerce_number(&raw.sfa),
    })
}

/// The eight canonical trial-balance columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LedgerField {
    Code,
    Name,
    Sid,
    Sia,
    Cargos,
    Abonos,
    Sfd,
    Sfa,
}

impl LedgerField {
    pub const ALL: [LedgerField; 8] = [
        LedgerField::Code,
        LedgerField::Name,
        LedgerField::Sid,
        LedgerField::Sia,
        LedgerField::Cargos,
        LedgerField::Abonos,
        LedgerField::Sfd,
        LedgerField::Sfa,
    ];

    /// Maps a free-form column header onto a canonical field through known aliases.
    pub fn from_header(header: &str) -> Option<Self> {
        match normalize_header(header).as_str() {
            "codigo" | "codigocuenta" | "cuenta" | "code" => Some(LedgerField::Code),
            "nombre" | "descripcion" | "name" | "concepto" => Some(LedgerField::Name),
            "sid" | "saldoinicialdeudor" | "saldoinicialdebe" => Some(LedgerField::Sid),
            "sia" | "saldoinicialacreedor" | "saldoinicialhaber" => Some(LedgerField::Sia),
            "cargos" | "debe" | "movimientodebe" => Some(LedgerField::Cargos),
            "abonos" | "haber" | "movimientohaber" => Some(LedgerField::Abonos),
            "sfd" | "saldofinaldeudor" | "saldofinaldebe" => Some(LedgerField::Sfd),
            "sfa" | "saldofinalacreedor" | "saldofinalhaber" => Some(LedgerField::Sfa),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct KeyedImport {
    pub rows: Vec<LedgerRow>,
    /// Canonical fields that no record supplied under any alias.
    pub missing_fields: Vec<LedgerField>,
}

const ROW_ID_KEYS: [&str; 3] = ["_rowId", "rowId", "id"];

/// Imports header-keyed records (JSON objects, CSV with headers) into canonical rows.
///
/// Records without a code are skipped. Row ids come from `_rowId`/`rowId`/`id` when present,
/// otherwise from the record position.
pub fn normalize_keyed_records(records: &[BTreeMap<String, CellValue>]) -> KeyedImport {
    let mut seen_fields = Vec::new();
    let mut rows = Vec::new();

    for (index, record) in records.iter().enumerate() {
        let mut raw = RawLedgerRow::default();

        for (key, value) in record {
            let Some(field) = LedgerField::from_header(key) else {
                continue;
            };
            if !seen_fields.contains(&field) {
                seen_fields.push(field);
            }
            let slot = match field {
                LedgerField::Code => &mut raw.code,
                LedgerField::Name => &mut raw.name,
                LedgerField::Sid => &mut raw.sid,
                LedgerField::Sia => &mut raw.sia,
                LedgerField::Cargos => &mut raw.cargos,
                LedgerField::Abonos => &mut raw.abonos,
                LedgerField::Sfd => &mut raw.sfd,
                LedgerField::Sfa => &mut raw.sfa,
            };
            *slot = value.clone();
        }

        let row_id = ROW_ID_KEYS
            .iter()
            .filter_map(|key| record.get(*key))
            .map(CellValue::as_text)
            .map(|id| id.trim().to_string())
            .find(|id| !id.is_empty())
            .unwrap_or_else(|| format!("row-{}", index + 1));
        raw.row_id = Some(row_id);

        if let Some(row) = normalize_raw_row(&raw) {
            rows.push(row);
        }
    }

    let missing_fields: Vec<LedgerField> = LedgerField::ALL
        .into_iter()
        .filter(|f| !seen_fields.contains(f))
        .collect();

    debug!(
        "Keyed import produced {} rows from {} records; missing fields: {:?}",
        rows.len(),
        records.len(),
        missing_fields
    );

    KeyedImport {
        rows,
        missing_fields,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coerce_spanish_amounts() {
        assert_eq!(coerce_number(&CellValue::from("1.234,56")), 1234.56);
        assert_eq!(coerce_number(&CellValue::from("-45,2")), -45.2);
        assert_eq!(coerce_number(&CellValue::from(" 12 500 ")), 12500.0);
        assert_eq!(coerce_number(&CellValue::from("$ 1.000,00 MXN")), 1000.0);
    }

    #[test]
    fn test_coerce_degrades_to_zero() {
        assert_eq!(coerce_number(&CellValue::from("")), 0.0);
        assert_eq!(coerce_number(&CellValue::Empty), 0.0);
        assert_eq!(coerce_number(&CellValue::from("abc")), 0.0);
        assert_eq!(coerce_number(&CellValue::from("1-2")), 0.0);
        assert_eq!(coerce_number(&CellValue::Number(f64::NAN)), 0.0);
        assert_eq!(coerce_number(&CellValue::Number(f64::INFINITY)), 0.0);
        assert_eq!(coerce_number(&CellValue::Bool(true)), 0.0);
    }

    #[test]
    fn test_numeric_cells_pass_through() {
        assert_eq!(coerce_number(&CellValue::Number(1234.5)), 1234.5);
        assert_eq!(coerce_number(&CellValue::Number(-7.0)), -7.0);
    }

    #[test]
    fn test_normalize_header() {
        assert_eq!(normalize_header("  Cuenta "), "cuenta");
        assert_eq!(normalize_header("Nombre de la Cuenta"), "nombredelacuenta");
        assert_eq!(normalize_header("Descripción"), "descripcion");
        assert_eq!(normalize_header("AÑO"), "ano");
        assert_eq!(normalize_header("Saldo Inicial (Deudor)"), "saldoinicialdeudor");
    }

    #[test]
    fn test_normalize_ledger_row_is_idempotent() {
        let row = LedgerRow {
            row_id: String::new(),
            is_new: false,
            exclude_from_analysis: true,
            code: "  101-001 ".to_string(),
            name: "   ".to_string(),
            sid: f64::NAN,
            sia: 0.0,
            cargos: 5.0,
            abonos: 0.0,
            sfd: 5.0,
            sfa: 0.0,
        };

        let once = normalize_ledger_row(&row, 4).unwrap();
        assert_eq!(once.row_id, "row-5");
        assert_eq!(once.code, "101-001");
        assert_eq!(once.name, DEFAULT_ROW_NAME);
        assert_eq!(once.sid, 0.0);
        assert!(once.exclude_from_analysis);

        let twice = normalize_ledger_row(&once, 9).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_blank_codes_are_dropped() {
        let rows = vec![
            LedgerRow::new("row-1", "   ", "Vacia"),
            LedgerRow::new("row-2", "102", "Bancos"),
        ];
        let normalized = normalize_ledger_rows(&rows);
        assert_eq!(normalized.len(), 1);
        assert_eq!(normalized[0].row_id, "row-2");
    }

    #[test]
    fn test_raw_row_without_id_gets_random_id() {
        let raw = RawLedgerRow {
            code: CellValue::Number(101.0),
            sfd: CellValue::from("1.500,00"),
            ..Default::default()
        };
        let row = normalize_raw_row(&raw).unwrap();
        assert!(row.row_id.starts_with("row-"));
        assert_eq!(row.row_id.len(), 12);
        assert_eq!(row.code, "101");
        assert_eq!(row.name, DEFAULT_ROW_NAME);
        assert_eq!(row.sfd, 1500.0);
    }

    #[test]
    fn test_header_aliases() {
        assert_eq!(LedgerField::from_header("Código Cuenta"), Some(LedgerField::Code));
        assert_eq!(LedgerField::from_header("Concepto"), Some(LedgerField::Name));
        assert_eq!(LedgerField::from_header("Saldo Final Haber"), Some(LedgerField::Sfa));
        assert_eq!(LedgerField::from_header("Debe"), Some(LedgerField::Cargos));
        assert_eq!(LedgerField::from_header("Notas"), None);
    }

    #[test]
    fn test_keyed_records_import() {
        let mut first = BTreeMap::new();
        first.insert("Cuenta".to_string(), CellValue::from("101-001-0001"));
        first.insert("Descripción".to_string(), CellValue::from("Caja"));
        first.insert("Saldo Final Deudor".to_string(), CellValue::Number(82900.95));

        let mut second = BTreeMap::new();
        second.insert("Cuenta".to_string(), CellValue::Empty);
        second.insert("Descripción".to_string(), CellValue::from("Separador"));

        let mut third = BTreeMap::new();
        third.insert("id".to_string(), CellValue::from("custom-7"));
        third.insert("Cuenta".to_string(), CellValue::from("201-001"));
        third.insert("Haber".to_string(), CellValue::from("10,5"));

        let import = normalize_keyed_records(&[first, second, third]);
        assert_eq!(import.rows.len(), 2);
        assert_eq!(import.rows[0].row_id, "row-1");
        assert_eq!(import.rows[0].sfd, 82900.95);
        assert_eq!(import.rows[1].row_id, "custom-7");
        assert_eq!(import.rows[1].abonos, 10.5);
        assert_eq!(
            import.missing_fields,
            vec![
                LedgerField::Sid,
                LedgerField::Sia,
                LedgerField::Cargos,
                LedgerField::Sfa
            ]
        );
    }
}
