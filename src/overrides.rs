use crate::error::{ConversionError, Result};
use crate::normalize::{coerce_number, generate_row_id, normalize_raw_row};
use crate::schema::{
    CellValue, LedgerRow, ManualMapping, ManualMappings, RawLedgerRow, DEFAULT_ROW_NAME,
    KNOWN_GROUPS,
};
use log::{debug, warn};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// An ordered batch of user corrections to one period's rows and manual mappings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
pub struct RowEdits {
    #[schemars(description = "Edits applied in order. Later edits see the effect of earlier ones.")]
    #[serde(default)]
    pub edits: Vec<RowEdit>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RowEdit {
    /// Append a row. It is flagged as new; a missing or clashing id is replaced.
    AddRow { row: RawLedgerRow },

    /// Remove a row and any manual mapping attached to it.
    DeleteRow {
        #[serde(alias = "rowId")]
        row_id: String,
    },

    /// Toggle the user exclusion flag.
    SetExcluded {
        #[serde(alias = "rowId")]
        row_id: String,
        excluded: bool,
    },

    /// Overwrite individual fields. Numeric values go through the usual coercion.
    /// A code that ends up blank removes the row.
    UpdateRow {
        #[serde(alias = "rowId")]
        row_id: String,
        #[serde(default)]
        code: Option<String>,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        sid: Option<CellValue>,
        #[serde(default)]
        sia: Option<CellValue>,
        #[serde(default)]
        cargos: Option<CellValue>,
        #[serde(default)]
        abonos: Option<CellValue>,
        #[serde(default)]
        sfd: Option<CellValue>,
        #[serde(default)]
        sfa: Option<CellValue>,
    },

    /// Assign a manual PGC mapping. A mapping with no meaningful field clears it instead.
    SetMapping {
        #[serde(alias = "rowId")]
        row_id: String,
        mapping: ManualMapping,
    },

    ClearMapping {
        #[serde(alias = "rowId")]
        row_id: String,
    },
}

/// Rows and manual mappings after a batch of edits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditedPeriod {
    pub rows: Vec<LedgerRow>,
    pub manual_mappings: ManualMappings,
}

impl RowEdits {
    pub fn new(edits: Vec<RowEdit>) -> Self {
        Self { edits }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Applies the edits to copies of `rows` and `manual_mappings`; the inputs are untouched.
    /// Fails on the first edit that references an unknown row id.
    pub fn apply(&self, rows: &[LedgerRow], manual_mappings: &ManualMappings) -> Result<EditedPeriod> {
        let mut period = EditedPeriod {
            rows: rows.to_vec(),
            manual_mappings: manual_mappings.clone(),
        };

        for edit in &self.edits {
            apply_single_edit(&mut period, edit)?;
        }

        debug!(
            "Applied {} edits: {} rows, {} manual mappings",
            self.edits.len(),
            period.rows.len(),
            period.manual_mappings.len()
        );
        Ok(period)
    }
}

fn apply_single_edit(period: &mut EditedPeriod, edit: &RowEdit) -> Result<()> {
    match edit {
        RowEdit::AddRow { row } => {
            let Some(mut new_row) = normalize_raw_row(row) else {
                debug!("Ignoring added row without an account code");
                return Ok(());
            };
            if period.rows.iter().any(|r| r.row_id == new_row.row_id) {
                new_row.row_id = generate_row_id();
            }
            new_row.is_new = true;
            period.rows.push(new_row);
        }

        RowEdit::DeleteRow { row_id } => {
            let index = find_row(&period.rows, row_id)?;
            period.rows.remove(index);
            period.manual_mappings.remove(row_id);
        }

        RowEdit::SetExcluded { row_id, excluded } => {
            let index = find_row(&period.rows, row_id)?;
            period.rows[index].exclude_from_analysis = *excluded;
        }

        RowEdit::UpdateRow {
            row_id,
            code,
            name,
            sid,
            sia,
            cargos,
            abonos,
            sfd,
            sfa,
        } => {
            let index = find_row(&period.rows, row_id)?;
            let row = &mut period.rows[index];

            if let Some(name) = name {
                row.name = match name.trim() {
                    "" => DEFAULT_ROW_NAME.to_string(),
                    n => n.to_string(),
                };
            }
            for (slot, value) in [
                (&mut row.sid, sid),
                (&mut row.sia, sia),
                (&mut row.cargos, cargos),
                (&mut row.abonos, abonos),
                (&mut row.sfd, sfd),
                (&mut row.sfa, sfa),
            ] {
                if let Some(value) = value {
                    *slot = coerce_number(value);
                }
            }

            if let Some(code) = code {
                let code = code.trim();
                if code.is_empty() {
                    debug!("Row '{}' lost its account code and is removed", row_id);
                    period.rows.remove(index);
                    period.manual_mappings.remove(row_id);
                } else {
                    row.code = code.to_string();
                }
            }
        }

        RowEdit::SetMapping { row_id, mapping } => {
            find_row(&period.rows, row_id)?;
            if mapping.is_active() {
                let grupo = mapping.grupo.trim();
                if !grupo.is_empty() && !KNOWN_GROUPS.contains(&grupo) {
                    warn!(
                        "Manual mapping for row '{}' uses unknown group '{}'; it will not appear in the statements",
                        row_id, grupo
                    );
                }
                period
                    .manual_mappings
                    .insert(row_id.clone(), mapping.clone());
            } else {
                period.manual_mappings.remove(row_id);
            }
        }

        RowEdit::ClearMapping { row_id } => {
            find_row(&period.rows, row_id)?;
            period.manual_mappings.remove(row_id);
        }
    }

    Ok(())
}

fn find_row(rows: &[LedgerRow], row_id: &str) -> Result<usize> {
    rows.iter()
        .position(|r| r.row_id == row_id)
        .ok_or_else(|| ConversionError::RowNotFound(row_id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_rows() -> Vec<LedgerRow> {
        vec![
            LedgerRow::new("row-1", "101-001", "Caja").with_final(100.0, 0.0),
            LedgerRow::new("row-2", "201-001", "Proveedores").with_final(0.0, 100.0),
        ]
    }

    #[test]
    fn test_edits_from_json() {
        let json = r#"{
            "edits": [
                {"action": "add_row", "row": {"code": "102-001", "name": "Bancos", "sfd": "1.500,00"}},
                {"action": "set_excluded", "row_id": "row-1", "excluded": true},
                {"action": "update_row", "rowId": "row-2", "sfa": 120, "name": "  "},
                {"action": "set_mapping", "row_id": "row-2", "mapping": {"pgc": "410", "grupo": "Pasivo Corriente"}}
            ]
        }"#;
        let edits = RowEdits::from_json_str(json).unwrap();
        let period = edits.apply(&base_rows(), &ManualMappings::new()).unwrap();

        assert_eq!(period.rows.len(), 3);
        assert!(period.rows[0].exclude_from_analysis);
        assert_eq!(period.rows[1].sfa, 120.0);
        assert_eq!(period.rows[1].name, DEFAULT_ROW_NAME);
        assert!(period.rows[2].is_new);
        assert_eq!(period.rows[2].sfd, 1500.0);
        assert_eq!(period.manual_mappings["row-2"].pgc, "410");
    }

    #[test]
    fn test_apply_does_not_mutate_inputs() {
        let rows = base_rows();
        let mut mappings = ManualMappings::new();
        mappings.insert("row-1".to_string(), ManualMapping::new("570", "Caja", "Activo Corriente", ""));

        let edits = RowEdits::new(vec![RowEdit::DeleteRow {
            row_id: "row-1".to_string(),
        }]);
        let period = edits.apply(&rows, &mappings).unwrap();

        assert_eq!(period.rows.len(), 1);
        assert!(period.manual_mappings.is_empty());
        assert_eq!(rows.len(), 2);
        assert_eq!(mappings.len(), 1);
    }

    #[test]
    fn test_unknown_row_is_an_error() {
        let edits = RowEdits::new(vec![RowEdit::SetExcluded {
            row_id: "row-99".to_string(),
            excluded: true,
        }]);
        let err = edits.apply(&base_rows(), &ManualMappings::new()).unwrap_err();
        assert!(matches!(err, ConversionError::RowNotFound(id) if id == "row-99"));
    }

    #[test]
    fn test_inactive_mapping_clears_existing_one() {
        let mut mappings = ManualMappings::new();
        mappings.insert("row-2".to_string(), ManualMapping::new("400", "", "", ""));

        let edits = RowEdits::new(vec![RowEdit::SetMapping {
            row_id: "row-2".to_string(),
            mapping: ManualMapping::new("SIN MAPEO", "", "Sin clasificar", " "),
        }]);
        let period = edits.apply(&base_rows(), &mappings).unwrap();
        assert!(period.manual_mappings.is_empty());
    }

    #[test]
    fn test_blank_code_update_removes_row() {
        let mut mappings = ManualMappings::new();
        mappings.insert("row-1".to_string(), ManualMapping::new("570", "", "", ""));

        let edits = RowEdits::new(vec![RowEdit::UpdateRow {
            row_id: "row-1".to_string(),
            code: Some("   ".to_string()),
            name: None,
            sid: None,
            sia: None,
            cargos: None,
            abonos: None,
            sfd: None,
            sfa: None,
        }]);
        let period = edits.apply(&base_rows(), &mappings).unwrap();
        assert_eq!(period.rows.len(), 1);
        assert_eq!(period.rows[0].row_id, "row-2");
        assert!(period.manual_mappings.is_empty());
    }

    #[test]
    fn test_added_row_with_clashing_id_gets_new_id() {
        let edits = RowEdits::new(vec![
            RowEdit::AddRow {
                row: RawLedgerRow {
                    row_id: Some("row-1".to_string()),
                    code: CellValue::from("105"),
                    ..Default::default()
                },
            },
            RowEdit::AddRow {
                row: RawLedgerRow::default(),
            },
        ]);
        let period = edits.apply(&base_rows(), &ManualMappings::new()).unwrap();

        assert_eq!(period.rows.len(), 3);
        assert_ne!(period.rows[2].row_id, "row-1");
        assert_eq!(period.rows[2].code, "105");
    }

    #[test]
    fn test_clear_mapping() {
        let mut mappings = ManualMappings::new();
        mappings.insert("row-1".to_string(), ManualMapping::new("570", "", "", ""));
        let edits = RowEdits::new(vec![RowEdit::ClearMapping {
            row_id: "row-1".to_string(),
        }]);
        let period = edits.apply(&base_rows(), &mappings).unwrap();
        assert!(period.manual_mappings.is_empty());
    }
}
