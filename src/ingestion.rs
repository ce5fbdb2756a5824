use crate::error::{ConversionError, Result};
use crate::normalize::{coerce_number, normalize_header, normalize_keyed_records, KeyedImport};
use crate::schema::{CellValue, LedgerRow, DEFAULT_ROW_NAME};
use calamine::{open_workbook_auto_from_rs, Data, Reader};
use log::{debug, info};
use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::Path;

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const OLE_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Columns holding the account code and name; every later column is numeric.
const TEXT_COLUMNS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    /// Office Open XML (and OpenDocument, which shares the zip container)
    Xlsx,
    /// Legacy BIFF workbook
    Xls,
    Csv,
}

impl InputFormat {
    pub fn detect(bytes: &[u8]) -> Result<Self> {
        if bytes.starts_with(ZIP_MAGIC) {
            return Ok(InputFormat::Xlsx);
        }
        if bytes.starts_with(OLE_MAGIC) {
            return Ok(InputFormat::Xls);
        }
        if bytes.contains(&0) {
            return Err(ConversionError::UnsupportedFormat(
                "binary content is neither an xlsx/ods nor an xls workbook".to_string(),
            ));
        }
        Ok(InputFormat::Csv)
    }
}

/// Cell grid of the first sheet, values only. Index 0 is the first row and column of the
/// sheet's used range, not necessarily `A1`.
pub fn read_first_sheet(bytes: &[u8]) -> Result<Vec<Vec<CellValue>>> {
    match InputFormat::detect(bytes)? {
        InputFormat::Xlsx | InputFormat::Xls => read_workbook_sheet(bytes),
        InputFormat::Csv => read_csv_sheet(bytes),
    }
}

fn read_workbook_sheet(bytes: &[u8]) -> Result<Vec<Vec<CellValue>>> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or(ConversionError::EmptyWorkbook)??;

    let grid: Vec<Vec<CellValue>> = range
        .rows()
        .map(|row| row.iter().map(cell_from_data).collect())
        .collect();

    let (first_row, first_col) = range.start().unwrap_or((0, 0));
    debug!(
        "Read {} rows from the first worksheet (used range starts at row {}, column {})",
        grid.len(),
        first_row + 1,
        first_col + 1
    );
    Ok(grid)
}

fn cell_from_data(data: &Data) -> CellValue {
    match data {
        Data::Int(i) => CellValue::Number(*i as f64),
        Data::Float(f) => CellValue::Number(*f),
        Data::String(s) => CellValue::Text(s.clone()),
        Data::Bool(b) => CellValue::Bool(*b),
        Data::DateTime(dt) => CellValue::Number(dt.as_f64()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => CellValue::Text(s.clone()),
        Data::Error(_) | Data::Empty => CellValue::Empty,
    }
}

fn sniff_delimiter(text: &str) -> u8 {
    let first_line = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    let semicolons = first_line.matches(';').count();
    let commas = first_line.matches(',').count();
    if semicolons > commas {
        b';'
    } else {
        b','
    }
}

fn csv_cell(text: &str, column: usize) -> CellValue {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return CellValue::Empty;
    }
    if column >= TEXT_COLUMNS {
        // Plain decimals win, so `1.500` is 1.5. Only unparseable text goes through `1.234,56` coercion.
        if let Ok(n) = trimmed.parse::<f64>() {
            return CellValue::Number(n);
        }
    }
    CellValue::Text(text.to_string())
}

fn read_csv_sheet(bytes: &[u8]) -> Result<Vec<Vec<CellValue>>> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let delimiter = sniff_delimiter(&String::from_utf8_lossy(bytes));

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(bytes);

    let mut grid = Vec::new();
    for record in reader.byte_records() {
        let record = record?;
        let cells = record
            .iter()
            .enumerate()
            .map(|(column, field)| csv_cell(&String::from_utf8_lossy(field), column))
            .collect();
        grid.push(cells);
    }

    debug!(
        "Read {} CSV records using delimiter '{}'",
        grid.len(),
        delimiter as char
    );
    Ok(grid)
}

fn cell_at(row: &[CellValue], index: usize) -> &CellValue {
    row.get(index).unwrap_or(&CellValue::Empty)
}

fn code_of(row: &[CellValue]) -> String {
    cell_at(row, 0).as_text().trim().to_string()
}

fn is_header_row(row: &[CellValue]) -> bool {
    normalize_header(&cell_at(row, 0).as_text()) == "cuenta"
        && normalize_header(&cell_at(row, 1).as_text()).contains("nombre")
}

fn build_row(ordinal: usize, code: String, cells: &[CellValue]) -> LedgerRow {
    let name = match cell_at(cells, 1).as_text().trim() {
        "" => DEFAULT_ROW_NAME.to_string(),
        n => n.to_string(),
    };

    LedgerRow::new(format!("row-{}", ordinal), code, name)
        .with_initial(coerce_number(cell_at(cells, 2)), coerce_number(cell_at(cells, 3)))
        .with_movements(coerce_number(cell_at(cells, 4)), coerce_number(cell_at(cells, 5)))
        .with_final(coerce_number(cell_at(cells, 6)), coerce_number(cell_at(cells, 7)))
}

fn scan_after_header(grid: &[Vec<CellValue>], header_index: usize) -> Vec<LedgerRow> {
    let data = &grid[header_index + 1..];
    let start = data
        .iter()
        .position(|row| !code_of(row).is_empty())
        .unwrap_or(data.len());

    let mut rows = Vec::new();
    for cells in &data[start..] {
        let code = code_of(cells);
        if code.is_empty() || !code.chars().any(|c| c.is_ascii_digit()) {
            continue;
        }
        rows.push(build_row(rows.len() + 1, code, cells));
    }
    rows
}

fn scan_all_rows(grid: &[Vec<CellValue>]) -> Vec<LedgerRow> {
    let mut rows = Vec::new();
    for cells in grid {
        let code = code_of(cells);
        if code.is_empty() {
            continue;
        }
        rows.push(build_row(rows.len() + 1, code, cells));
    }
    rows
}

/// Extracts ledger rows from a first-sheet cell grid.
///
/// Looks for a `Cuenta | Nombre...` header and reads the rows after it, keeping only codes
/// that contain a digit. Without a header, or when that scan finds nothing, every row with a
/// non-blank first cell is taken.
pub fn extract_ledger_rows(grid: &[Vec<CellValue>]) -> Vec<LedgerRow> {
    if let Some(header_index) = grid.iter().position(|row| is_header_row(row)) {
        debug!("Trial balance header found at row {}", header_index + 1);
        let rows = scan_after_header(grid, header_index);
        if !rows.is_empty() {
            return rows;
        }
    }

    debug!("No usable header row; falling back to a plain scan of the first column");
    scan_all_rows(grid)
}

/// Parses raw spreadsheet bytes (xlsx, xls, ods or csv) into ledger rows with `row-<n>` ids.
pub fn parse_workbook(bytes: &[u8]) -> Result<Vec<LedgerRow>> {
    let grid = read_first_sheet(bytes)?;
    let rows = extract_ledger_rows(&grid);
    info!("Parsed {} ledger rows from workbook", rows.len());
    Ok(rows)
}

pub fn parse_workbook_file(path: &Path) -> Result<Vec<LedgerRow>> {
    let bytes = std::fs::read(path)?;
    parse_workbook(&bytes)
}

/// Imports a JSON array of header-keyed objects, e.g. `[{"Cuenta": "101", "Saldo Final Deudor": 5}]`.
pub fn parse_keyed_json(bytes: &[u8]) -> Result<KeyedImport> {
    let records: Vec<BTreeMap<String, CellValue>> = serde_json::from_slice(bytes)?;
    Ok(normalize_keyed_records(&records))
}

/// Demonstration trial balance covering cash, banks, customers, suppliers, VAT, equity,
/// revenue, payroll and exchange differences. One row (`203-003-0003`) has no mapping.
pub fn sample_ledger() -> Vec<LedgerRow> {
    let rows: [(&str, &str, [f64; 6]); 12] = [
        ("101-001-0001", "Caja y Efectivo", [82900.95, 0.0, 0.0, 0.0, 82900.95, 0.0]),
        ("102-001-0001", "BBVA Bancomer M.N. 3810", [269952.85, 0.0, 1247509.6, 1405442.13, 112020.32, 0.0]),
        ("102-002-0001", "BBVA Bancomer USD 6344", [743947.94, 0.0, 1228050.96, 1646992.78, 325006.12, 0.0]),
        ("104-001-0001", "Duetto Research, Inc.", [21137.07, 0.0, 0.0, 0.0, 21137.07, 0.0]),
        ("201-001-0000", "Proveedores Nacional (varios)", [0.0, 283254.54, 259148.68, 323377.05, 0.0, 347482.91]),
        ("203-003-0003", "Paraty Hoteles Espana", [0.0, 4473166.34, 0.0, 88951.14, 0.0, 4562117.48]),
        ("208-001-0000", "IVA por pagar", [0.0, 171173.6, 165656.0, 141381.9, 0.0, 146899.5]),
        ("301-001-0001", "Paraty Hoteles S.L", [0.0, 49500.0, 0.0, 0.0, 0.0, 49500.0]),
        ("401-001-0000", "Ventas 16%", [0.0, 0.0, 0.0, 1355730.16, 0.0, 1355730.16]),
        ("601-000-0001", "Sueldos y salarios", [0.0, 0.0, 312154.27, 0.0, 312154.27, 0.0]),
        ("701-002-0000", "Perdida cambiaria", [0.0, 0.0, 120491.28, 0.0, 120491.28, 0.0]),
        ("702-002-0000", "Utilidad cambiaria", [0.0, 0.0, 0.0, 7544.04, 0.0, 7544.04]),
    ];

    rows.iter()
        .enumerate()
        .map(|(i, (code, name, [sid, sia, cargos, abonos, sfd, sfa]))| {
            LedgerRow::new(format!("row-{}", i + 1), *code, *name)
                .with_initial(*sid, *sia)
                .with_movements(*cargos, *abonos)
                .with_final(*sfd, *sfa)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_format() {
        assert_eq!(InputFormat::detect(b"PK\x03\x04rest").unwrap(), InputFormat::Xlsx);
        assert_eq!(
            InputFormat::detect(&[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1, 0]).unwrap(),
            InputFormat::Xls
        );
        assert_eq!(InputFormat::detect(b"Cuenta;Nombre\n").unwrap(), InputFormat::Csv);
        assert!(InputFormat::detect(&[0x00, 0x01, 0x02]).is_err());
    }

    #[test]
    fn test_header_driven_scan() {
        let csv = "Balanza de comprobacion;;;;;;;\n\
                   ;;;;;;;\n\
                   Cuenta;Nombre de la cuenta;SID;SIA;Cargos;Abonos;SFD;SFA\n\
                   ;;;;;;;\n\
                   101-001-0001;Caja;100,50;0;0;0;100,50;0\n\
                   Total Activo;;;;;;;\n\
                   201-001-0000;  ;0;1.250,00;0;0;0;1.250,00\n";
        let rows = parse_workbook(csv.as_bytes()).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].row_id, "row-1");
        assert_eq!(rows[0].code, "101-001-0001");
        assert_eq!(rows[0].sid, 100.5);
        assert_eq!(rows[1].row_id, "row-2");
        assert_eq!(rows[1].name, DEFAULT_ROW_NAME);
        assert_eq!(rows[1].sfa, 1250.0);
    }

    #[test]
    fn test_fallback_scan_without_header() {
        let csv = "Caja,Efectivo,10,0,0,0,10,0\n,,,,,,,\n102,Bancos,5,0,0,0,5,0\n";
        let rows = parse_workbook(csv.as_bytes()).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].code, "Caja");
        assert_eq!(rows[1].row_id, "row-2");
        assert_eq!(rows[1].sfd, 5.0);
    }

    #[test]
    fn test_header_without_data_falls_back() {
        let grid = vec![
            vec![CellValue::from("Cuenta"), CellValue::from("Nombre")],
            vec![CellValue::from("Caja"), CellValue::from("Efectivo"), CellValue::Number(3.0)],
        ];
        let rows = extract_ledger_rows(&grid);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].code, "Cuenta");
        assert_eq!(rows[1].code, "Caja");
        assert_eq!(rows[1].sid, 3.0);
    }

    #[test]
    fn test_short_rows_default_to_zero() {
        let grid = vec![vec![CellValue::Number(101.0)]];
        let rows = extract_ledger_rows(&grid);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].code, "101");
        assert_eq!(rows[0].name, DEFAULT_ROW_NAME);
        assert_eq!(rows[0].sfa, 0.0);
    }

    #[test]
    fn test_csv_with_bom_and_quoted_fields() {
        let csv = "\u{feff}Cuenta,Nombre,SID,SIA,Cargos,Abonos,SFD,SFA\n\
                   104-001-0001,\"Duetto Research, Inc.\",21137.07,0,0,0,21137.07,0\n";
        let rows = parse_workbook(csv.as_bytes()).unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "Duetto Research, Inc.");
        assert_eq!(rows[0].sfd, 21137.07);
    }

    #[test]
    fn test_plain_decimal_csv_cells_are_numbers() {
        let csv = "Cuenta;Nombre;SID;SIA;Cargos;Abonos;SFD;SFA\n\
                   101-001;Caja;1.500;0;0;0;1.234,56;0\n";
        let rows = parse_workbook(csv.as_bytes()).unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].sid, 1.5);
        assert_eq!(rows[0].sfd, 1234.56);
    }

    fn xlsx_with_cells(cells: &[(&str, CellValue)]) -> Vec<u8> {
        let mut book = umya_spreadsheet::new_file_empty_worksheet();
        let sheet = book.new_sheet("Balanza").unwrap();
        for (coordinate, value) in cells {
            let cell = sheet.get_cell_mut(*coordinate);
            match value {
                CellValue::Number(n) => {
                    cell.set_value_number(*n);
                }
                other => {
                    cell.set_value_string(other.as_text());
                }
            }
        }
        let mut buffer = Cursor::new(Vec::new());
        umya_spreadsheet::writer::xlsx::write_writer(&book, &mut buffer).unwrap();
        buffer.into_inner()
    }

    #[test]
    fn test_xlsx_header_outside_column_a() {
        let bytes = xlsx_with_cells(&[
            ("B3", CellValue::from("Cuenta")),
            ("C3", CellValue::from("Nombre")),
            ("B4", CellValue::from("101-001")),
            ("C4", CellValue::from("Caja")),
            ("D4", CellValue::Number(5.0)),
            ("I4", CellValue::Number(1234.56)),
        ]);
        assert_eq!(InputFormat::detect(&bytes).unwrap(), InputFormat::Xlsx);

        let rows = parse_workbook(&bytes).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].code, "101-001");
        assert_eq!(rows[0].name, "Caja");
        assert_eq!(rows[0].sid, 5.0);
        assert_eq!(rows[0].sfa, 1234.56);
    }

    #[test]
    fn test_xlsx_header_in_column_a() {
        let bytes = xlsx_with_cells(&[
            ("A1", CellValue::from("Balanza de comprobacion")),
            ("A3", CellValue::from("Cuenta")),
            ("B3", CellValue::from("Nombre de la cuenta")),
            ("A4", CellValue::from("102-001-0001")),
            ("B4", CellValue::from("Bancos")),
            ("G4", CellValue::Number(250.0)),
        ]);

        let rows = parse_workbook(&bytes).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].row_id, "row-1");
        assert_eq!(rows[0].sfd, 250.0);
    }

    #[test]
    fn test_keyed_json_import() {
        let json = br#"[{"Cuenta": "101-001", "Nombre": "Caja", "SFD": "1.000,00"}, {"Cuenta": ""}]"#;
        let import = parse_keyed_json(json).unwrap();
        assert_eq!(import.rows.len(), 1);
        assert_eq!(import.rows[0].sfd, 1000.0);
        assert_eq!(import.missing_fields.len(), 5);
    }

    #[test]
    fn test_sample_ledger_shape() {
        let rows = sample_ledger();
        assert_eq!(rows.len(), 12);
        assert_eq!(rows[0].row_id, "row-1");
        assert_eq!(rows[11].code, "702-002-0000");
        assert_eq!(rows[5].saldo(), -4562117.48);
    }
}
