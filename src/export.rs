//! Three-sheet xlsx export of a conversion: row detail, PGC balance and control metrics.
//!
//! Sheets are assembled as plain cell rows first and then written with `umya-spreadsheet`.

use crate::engine::{ConversionResult, ConvertedRow};
use crate::error::{ConversionError, Result};
use log::info;
use std::io::Cursor;
use std::path::Path;
use umya_spreadsheet::Spreadsheet;

pub const DETAIL_SHEET: &str = "Mapeo_Detalle";
pub const AGGREGATE_SHEET: &str = "Balanza_PGC";
pub const VALIDATION_SHEET: &str = "Validaciones";

const DETAIL_HEADERS: [&str; 21] = [
    "_rowId",
    "code",
    "name",
    "sid",
    "sia",
    "cargos",
    "abonos",
    "sfd",
    "sfa",
    "pgcCode",
    "pgcName",
    "grupo",
    "subgrupo",
    "mappingSource",
    "saldo",
    "saldoEur",
    "displayMXN",
    "displayEUR",
    "manualMappingApplied",
    "isSummaryLine",
    "excludeFromAnalysis",
];

const AGGREGATE_HEADERS: [&str; 7] = [
    "pgcCode", "pgcName", "grupo", "subgrupo", "totalMXN", "totalEUR", "lineas",
];

#[derive(Debug, Clone, PartialEq)]
enum Cell {
    Text(String),
    Number(f64),
    Bool(bool),
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::Text(value.to_string())
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Cell::Number(value)
    }
}

impl From<bool> for Cell {
    fn from(value: bool) -> Self {
        Cell::Bool(value)
    }
}

struct Sheet {
    name: &'static str,
    rows: Vec<Vec<Cell>>,
}

impl Sheet {
    fn with_headers(name: &'static str, headers: &[&str]) -> Self {
        Self {
            name,
            rows: vec![headers.iter().map(|h| Cell::from(*h)).collect()],
        }
    }

    fn write_into(&self, book: &mut Spreadsheet) -> Result<()> {
        let worksheet = book
            .new_sheet(self.name)
            .map_err(|e| ConversionError::Export(format!("sheet {}: {}", self.name, e)))?;

        for (r, row) in self.rows.iter().enumerate() {
            for (c, cell) in row.iter().enumerate() {
                let coordinate = (c as u32 + 1, r as u32 + 1);
                match cell {
                    Cell::Text(text) => {
                        worksheet
                            .get_cell_mut(coordinate)
                            .set_value_string(sheet_text(text));
                    }
                    Cell::Number(n) if n.is_finite() => {
                        worksheet.get_cell_mut(coordinate).set_value_number(*n);
                    }
                    // NaN and infinities have no xlsx representation; the cell stays empty.
                    Cell::Number(_) => {}
                    Cell::Bool(b) => {
                        worksheet.get_cell_mut(coordinate).set_value_bool(*b);
                    }
                }
            }
        }
        Ok(())
    }
}

/// Drops control characters XML 1.0 cannot carry. Tabs and line breaks are kept.
fn sheet_text(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_control() || matches!(c, '\t' | '\n' | '\r'))
        .collect()
}

fn detail_row(row: &ConvertedRow) -> Vec<Cell> {
    let source = match serde_json::to_value(row.mapping.source) {
        Ok(serde_json::Value::String(s)) => s,
        _ => String::new(),
    };

    vec![
        Cell::from(row.row.row_id.as_str()),
        Cell::from(row.row.code.as_str()),
        Cell::from(row.row.name.as_str()),
        Cell::from(row.row.sid),
        Cell::from(row.row.sia),
        Cell::from(row.row.cargos),
        Cell::from(row.row.abonos),
        Cell::from(row.row.sfd),
        Cell::from(row.row.sfa),
        Cell::from(row.mapping.pgc_code.as_str()),
        Cell::from(row.mapping.pgc_name.as_str()),
        Cell::from(row.mapping.grupo.as_str()),
        Cell::from(row.mapping.subgrupo.as_str()),
        Cell::Text(source),
        Cell::from(row.saldo),
        Cell::from(row.saldo_eur),
        Cell::from(row.display_mxn),
        Cell::from(row.display_eur),
        Cell::from(row.manual_mapping_applied),
        Cell::from(row.is_summary_line),
        Cell::from(row.exclude_from_analysis),
    ]
}

fn build_sheets(result: &ConversionResult) -> Vec<Sheet> {
    let mut detail = Sheet::with_headers(DETAIL_SHEET, &DETAIL_HEADERS);
    detail
        .rows
        .extend(result.converted_data.iter().map(detail_row));

    let mut aggregate = Sheet::with_headers(AGGREGATE_SHEET, &AGGREGATE_HEADERS);
    aggregate.rows.extend(result.pgc_aggregated.iter().map(|line| {
        vec![
            Cell::from(line.pgc_code.as_str()),
            Cell::from(line.pgc_name.as_str()),
            Cell::from(line.grupo.as_str()),
            Cell::from(line.subgrupo.as_str()),
            Cell::from(line.total_mxn),
            Cell::from(line.total_eur),
            Cell::from(line.details.len() as f64),
        ]
    }));

    let metadata = &result.metadata;
    let mut validation = Sheet::with_headers(VALIDATION_SHEET, &["Control", "Valor"]);
    validation.rows.extend(
        [
            ("Lineas totales", metadata.row_count as f64),
            ("Lineas analizadas", metadata.analyzed_row_count as f64),
            ("Sin mapear", metadata.unmapped_count as f64),
            ("Cobertura %", metadata.mapped_coverage_pct),
            (
                "Dif. balanza final",
                result.validations.trial_balance_final_difference,
            ),
        ]
        .into_iter()
        .map(|(label, value)| vec![Cell::from(label), Cell::from(value)]),
    );

    vec![detail, aggregate, validation]
}

/// Serializes a conversion into xlsx bytes with the sheets `Mapeo_Detalle`, `Balanza_PGC`
/// and `Validaciones`, in that order.
pub fn export_conversion_xlsx(result: &ConversionResult) -> Result<Vec<u8>> {
    let mut book = umya_spreadsheet::new_file_empty_worksheet();
    for sheet in build_sheets(result) {
        sheet.write_into(&mut book)?;
    }

    let mut buffer = Cursor::new(Vec::new());
    umya_spreadsheet::writer::xlsx::write_writer(&book, &mut buffer)
        .map_err(|e| ConversionError::Export(e.to_string()))?;

    let bytes = buffer.into_inner();
    info!(
        "Exported conversion workbook: {} detail rows, {} PGC lines ({} bytes)",
        result.converted_data.len(),
        result.pgc_aggregated.len(),
        bytes.len()
    );
    Ok(bytes)
}

pub fn write_conversion_xlsx(result: &ConversionResult, path: &Path) -> Result<()> {
    let bytes = export_conversion_xlsx(result)?;
    std::fs::write(path, bytes)?;
    Ok(())
}
