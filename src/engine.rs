use crate::balancer::{AccountingBalancer, BalanceSheet};
use crate::chart_of_accounts::MappingTable;
use crate::error::{ConversionError, Result};
use crate::normalize::normalize_ledger_rows;
use crate::pnl::ProfitAndLoss;
use crate::resolver::{MappingResolver, MappingSource, ResolvedMapping};
use crate::schema::{
    is_credit_nature, LedgerRow, ManualMappings, PeriodDescriptor, BALANCE_TOLERANCE,
};
use crate::summary::SummaryDetector;
use log::{debug, info, warn};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// A ledger row after mapping, currency conversion and summary detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConvertedRow {
    #[serde(flatten)]
    pub row: LedgerRow,
    #[serde(flatten)]
    pub mapping: ResolvedMapping,
    /// `sfd - sfa` in MXN
    pub saldo: f64,
    pub saldo_eur: f64,
    /// Saldo with the sign flipped for credit-nature groups
    #[serde(rename = "displayMXN")]
    pub display_mxn: f64,
    #[serde(rename = "displayEUR")]
    pub display_eur: f64,
    pub manual_mapping_applied: bool,
    pub is_summary_line: bool,
    /// The row's own exclusion flag OR'd with `is_summary_line`
    pub exclude_from_analysis: bool,
}

impl ConvertedRow {
    pub fn is_unmapped(&self) -> bool {
        self.mapping.is_unmapped()
    }
}

/// One PGC account with the display amounts of every analyzed row resolved to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedLine {
    pub pgc_code: String,
    pub pgc_name: String,
    pub grupo: String,
    pub subgrupo: String,
    #[serde(rename = "totalMXN")]
    pub total_mxn: f64,
    #[serde(rename = "totalEUR")]
    pub total_eur: f64,
    pub details: Vec<ConvertedRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub exchange_rate: f64,
    pub row_count: usize,
    pub analyzed_row_count: usize,
    pub summary_excluded_count: usize,
    pub unmapped_count: usize,
    pub manual_mapping_count: usize,
    pub mapped_coverage_pct: f64,
    pub period: Option<PeriodDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Validations {
    /// `Σsid - Σsia` over analyzed rows
    pub trial_balance_initial_difference: f64,
    /// `Σsfd - Σsfa` over analyzed rows
    pub trial_balance_final_difference: f64,
    pub unmapped_rows: Vec<ConvertedRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConversionResult {
    pub metadata: Metadata,
    pub converted_data: Vec<ConvertedRow>,
    pub pgc_aggregated: Vec<AggregatedLine>,
    pub balance_sheet: BalanceSheet,
    pub pnl: ProfitAndLoss,
    pub validations: Validations,
}

/// Whether a conversion may be persisted as an approved period.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SaveReadiness {
    Ready,
    NoAnalyzedRows,
    UnmappedRows(usize),
    TrialBalanceMismatch(f64),
}

impl SaveReadiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, SaveReadiness::Ready)
    }

    pub fn message(&self) -> &'static str {
        match self {
            SaveReadiness::Ready => "Listo para guardar",
            SaveReadiness::NoAnalyzedRows => "No hay lineas analizadas",
            SaveReadiness::UnmappedRows(_) => "Hay lineas sin mapear",
            SaveReadiness::TrialBalanceMismatch(_) => "La balanza final no cuadra",
        }
    }

    /// `Ok(())` when ready, otherwise a `SaveRejected` error carrying the reason.
    pub fn ensure_ready(&self) -> Result<()> {
        match self {
            SaveReadiness::Ready => Ok(()),
            SaveReadiness::UnmappedRows(count) => Err(ConversionError::SaveRejected(format!(
                "{} ({} lineas)",
                self.message(),
                count
            ))),
            SaveReadiness::TrialBalanceMismatch(difference) => Err(
                ConversionError::SaveRejected(format!("{} ({:.2})", self.message(), difference)),
            ),
            SaveReadiness::NoAnalyzedRows => {
                Err(ConversionError::SaveRejected(self.message().to_string()))
            }
        }
    }
}

impl ConversionResult {
    pub fn save_readiness(&self) -> SaveReadiness {
        self.save_readiness_with_tolerance(BALANCE_TOLERANCE)
    }

    pub fn save_readiness_with_tolerance(&self, tolerance: f64) -> SaveReadiness {
        if self.metadata.analyzed_row_count == 0 {
            return SaveReadiness::NoAnalyzedRows;
        }
        if self.metadata.unmapped_count > 0 {
            return SaveReadiness::UnmappedRows(self.metadata.unmapped_count);
        }
        let difference = self.validations.trial_balance_final_difference;
        if difference.abs() > tolerance {
            return SaveReadiness::TrialBalanceMismatch(difference);
        }
        SaveReadiness::Ready
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

pub fn validate_exchange_rate(rate: f64) -> Result<f64> {
    if rate.is_finite() && rate > 0.0 {
        Ok(rate)
    } else {
        Err(ConversionError::InvalidExchangeRate(rate))
    }
}

/// Runs the conversion pipeline against one mapping table.
///
/// Conversion is a pure function of its inputs: the same rows, rate, manual mappings and
/// period always produce the same result.
pub struct ConversionEngine<'a> {
    resolver: MappingResolver<'a>,
    tolerance: f64,
}

impl<'a> ConversionEngine<'a> {
    pub fn new(table: &'a MappingTable) -> Self {
        Self {
            resolver: MappingResolver::new(table),
            tolerance: BALANCE_TOLERANCE,
        }
    }

    /// Absolute MXN difference tolerated before the balance sheet gets a plug line.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// MXN amounts are multiplied by `exchange_rate` to obtain EUR.
    pub fn convert(
        &self,
        rows: &[LedgerRow],
        exchange_rate: f64,
        manual_mappings: &ManualMappings,
        period: Option<PeriodDescriptor>,
    ) -> ConversionResult {
        let rows = normalize_ledger_rows(rows);
        warn_unknown_mappings(&rows, manual_mappings);

        let detector = SummaryDetector::new(&rows);
        let converted_data: Vec<ConvertedRow> = rows
            .iter()
            .map(|row| self.convert_row(row, exchange_rate, manual_mappings, &detector))
            .collect();

        let analyzed: Vec<&ConvertedRow> = converted_data
            .iter()
            .filter(|r| !r.exclude_from_analysis)
            .collect();

        let pgc_aggregated = aggregate_by_pgc(&analyzed);
        let balance_sheet = AccountingBalancer::new(self.tolerance).build(&pgc_aggregated);
        let pnl = ProfitAndLoss::build(&pgc_aggregated);

        let unmapped_rows: Vec<ConvertedRow> = analyzed
            .iter()
            .filter(|r| r.is_unmapped())
            .map(|r| (*r).clone())
            .collect();

        let validations = Validations {
            trial_balance_initial_difference: column_total(&analyzed, |r| r.sid)
                - column_total(&analyzed, |r| r.sia),
            trial_balance_final_difference: column_total(&analyzed, |r| r.sfd)
                - column_total(&analyzed, |r| r.sfa),
            unmapped_rows,
        };

        let analyzed_row_count = analyzed.len();
        let unmapped_count = validations.unmapped_rows.len();
        let mapped_coverage_pct = if analyzed_row_count == 0 {
            0.0
        } else {
            (analyzed_row_count - unmapped_count) as f64 / analyzed_row_count as f64 * 100.0
        };

        let metadata = Metadata {
            exchange_rate,
            row_count: converted_data.len(),
            analyzed_row_count,
            summary_excluded_count: converted_data.iter().filter(|r| r.is_summary_line).count(),
            unmapped_count,
            manual_mapping_count: converted_data
                .iter()
                .filter(|r| r.manual_mapping_applied)
                .count(),
            mapped_coverage_pct,
            period,
        };

        info!(
            "Converted {} rows ({} analyzed, {} summary lines, {} unmapped, coverage {:.1}%)",
            metadata.row_count,
            metadata.analyzed_row_count,
            metadata.summary_excluded_count,
            metadata.unmapped_count,
            metadata.mapped_coverage_pct
        );

        ConversionResult {
            metadata,
            converted_data,
            pgc_aggregated,
            balance_sheet,
            pnl,
            validations,
        }
    }

    fn convert_row(
        &self,
        row: &LedgerRow,
        exchange_rate: f64,
        manual_mappings: &ManualMappings,
        detector: &SummaryDetector,
    ) -> ConvertedRow {
        let mapping = self
            .resolver
            .resolve_row(&row.code, manual_mappings.get(&row.row_id));

        let saldo = row.saldo();
        let display_mxn = if is_credit_nature(&mapping.grupo) {
            -saldo
        } else {
            saldo
        };
        let is_summary_line = detector.is_summary(&row.code);

        ConvertedRow {
            saldo,
            saldo_eur: saldo * exchange_rate,
            display_mxn,
            display_eur: display_mxn * exchange_rate,
            manual_mapping_applied: mapping.source == MappingSource::Manual,
            is_summary_line,
            exclude_from_analysis: row.exclude_from_analysis || is_summary_line,
            mapping,
            row: row.clone(),
        }
    }
}

fn column_total(rows: &[&ConvertedRow], field: impl Fn(&LedgerRow) -> f64) -> f64 {
    rows.iter().map(|r| field(&r.row)).sum()
}

fn warn_unknown_mappings(rows: &[LedgerRow], manual_mappings: &ManualMappings) {
    let ids: HashSet<&str> = rows.iter().map(|r| r.row_id.as_str()).collect();
    for row_id in manual_mappings.keys() {
        if !ids.contains(row_id.as_str()) {
            warn!("Manual mapping for unknown row id '{}' is ignored", row_id);
        }
    }
}

/// Groups analyzed rows by PGC code, ascending. The first row seen for a code supplies its
/// name and groups.
pub fn aggregate_by_pgc(rows: &[&ConvertedRow]) -> Vec<AggregatedLine> {
    let mut by_code: BTreeMap<&str, AggregatedLine> = BTreeMap::new();

    for row in rows {
        let line = by_code
            .entry(row.mapping.pgc_code.as_str())
            .or_insert_with(|| AggregatedLine {
                pgc_code: row.mapping.pgc_code.clone(),
                pgc_name: row.mapping.pgc_name.clone(),
                grupo: row.mapping.grupo.clone(),
                subgrupo: row.mapping.subgrupo.clone(),
                total_mxn: 0.0,
                total_eur: 0.0,
                details: Vec::new(),
            });
        line.total_mxn += row.display_mxn;
        line.total_eur += row.display_eur;
        line.details.push((*row).clone());
    }

    debug!("Aggregated analyzed rows into {} PGC lines", by_code.len());
    by_code.into_values().collect()
}

/// Convenience wrapper around [`ConversionEngine::convert`] with the default tolerance.
pub fn convert_rows(
    table: &MappingTable,
    rows: &[LedgerRow],
    exchange_rate: f64,
    manual_mappings: &ManualMappings,
    period: Option<PeriodDescriptor>,
) -> ConversionResult {
    ConversionEngine::new(table).convert(rows, exchange_rate, manual_mappings, period)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{
        AccountMapping, ManualMapping, UNCLASSIFIED, UNMAPPED_PGC_CODE,
    };

    fn table() -> MappingTable {
        MappingTable::from_entries([
            ("101", AccountMapping::new("570", "Caja", "Activo Corriente", "Efectivo y equivalentes")),
            ("201", AccountMapping::new("400", "Proveedores", "Pasivo Corriente", "Acreedores comerciales")),
            ("401", AccountMapping::new("705", "Prestaciones de servicios", "Ingresos", "Importe neto cifra negocios")),
            ("601", AccountMapping::new("640", "Sueldos y salarios", "Gastos", "Gastos de personal")),
        ])
    }

    fn convert(rows: &[LedgerRow]) -> ConversionResult {
        convert_rows(&table(), rows, 0.05, &ManualMappings::new(), None)
    }

    #[test]
    fn test_sign_convention() {
        let result = convert(&[
            LedgerRow::new("row-1", "101-001", "Caja").with_final(100.0, 0.0),
            LedgerRow::new("row-2", "201-001", "Proveedores").with_final(100.0, 0.0),
        ]);

        assert_eq!(result.converted_data[0].display_mxn, 100.0);
        assert_eq!(result.converted_data[1].saldo, 100.0);
        assert_eq!(result.converted_data[1].display_mxn, -100.0);
        assert_eq!(result.converted_data[1].display_eur, -5.0);
        assert_eq!(result.converted_data[1].saldo_eur, 5.0);
    }

    #[test]
    fn test_summary_lines_are_excluded_from_totals() {
        let result = convert(&[
            LedgerRow::new("row-1", "101-000", "Caja total").with_final(300.0, 0.0),
            LedgerRow::new("row-2", "101-001", "Caja chica").with_final(100.0, 0.0),
            LedgerRow::new("row-3", "101-002", "Caja general").with_final(200.0, 0.0),
        ]);

        assert!(result.converted_data[0].is_summary_line);
        assert!(result.converted_data[0].exclude_from_analysis);
        assert_eq!(result.metadata.row_count, 3);
        assert_eq!(result.metadata.analyzed_row_count, 2);
        assert_eq!(result.metadata.summary_excluded_count, 1);
        assert_eq!(result.pgc_aggregated.len(), 1);
        assert_eq!(result.pgc_aggregated[0].total_mxn, 300.0);
        assert_eq!(result.pgc_aggregated[0].details.len(), 2);
        assert_eq!(result.validations.trial_balance_final_difference, 300.0);
    }

    #[test]
    fn test_user_exclusion_flag() {
        let result = convert(&[
            LedgerRow::new("row-1", "101-001", "Caja").with_final(100.0, 0.0).excluded(),
            LedgerRow::new("row-2", "999-001", "Desconocida").with_final(5.0, 0.0).excluded(),
        ]);

        assert_eq!(result.metadata.analyzed_row_count, 0);
        assert_eq!(result.metadata.unmapped_count, 0);
        assert_eq!(result.metadata.mapped_coverage_pct, 0.0);
        assert!(!result.converted_data[0].is_summary_line);
        assert!(result.pgc_aggregated.is_empty());
        assert_eq!(result.save_readiness(), SaveReadiness::NoAnalyzedRows);
    }

    #[test]
    fn test_coverage_and_unmapped_rows() {
        let mut rows = Vec::new();
        for i in 0..7 {
            rows.push(LedgerRow::new(format!("m-{}", i), format!("101-01{}", i), "Caja"));
        }
        for i in 0..3 {
            rows.push(LedgerRow::new(format!("u-{}", i), format!("999-01{}", i), "Otra"));
        }

        let result = convert(&rows);
        assert_eq!(result.metadata.analyzed_row_count, 10);
        assert_eq!(result.metadata.unmapped_count, 3);
        assert_eq!(result.metadata.mapped_coverage_pct, 70.0);
        assert_eq!(result.validations.unmapped_rows.len(), 3);
        assert!(result
            .validations
            .unmapped_rows
            .iter()
            .all(|r| r.mapping.pgc_code == UNMAPPED_PGC_CODE));
        assert_eq!(result.save_readiness(), SaveReadiness::UnmappedRows(3));
    }

    #[test]
    fn test_manual_mapping_overrides_and_counts() {
        let rows = vec![
            LedgerRow::new("row-1", "999-001", "Deudores varios").with_final(50.0, 0.0),
            LedgerRow::new("row-2", "101-001", "Caja").with_final(50.0, 0.0),
        ];
        let mut manual = ManualMappings::new();
        manual.insert(
            "row-1".to_string(),
            ManualMapping::new("440", "Deudores", "Activo Corriente", "Deudores comerciales"),
        );
        manual.insert("row-2".to_string(), ManualMapping::new("", "", "Ingresos", ""));
        manual.insert("row-404".to_string(), ManualMapping::new("570", "", "", ""));

        let result = convert_rows(&table(), &rows, 0.05, &manual, None);
        assert_eq!(result.metadata.manual_mapping_count, 2);
        assert_eq!(result.converted_data[0].mapping.pgc_code, "440");
        assert_eq!(result.converted_data[1].mapping.pgc_code, UNMAPPED_PGC_CODE);
        assert_eq!(result.converted_data[1].mapping.grupo, "Ingresos");
        assert_eq!(result.converted_data[1].mapping.subgrupo, UNCLASSIFIED);
        assert_eq!(result.converted_data[1].display_mxn, -50.0);
        assert_eq!(result.metadata.unmapped_count, 1);
    }

    #[test]
    fn test_aggregation_order_and_first_seen_names() {
        let rows = vec![
            LedgerRow::new("row-1", "601-001", "Sueldos").with_final(10.0, 0.0),
            LedgerRow::new("row-2", "101-001", "Caja").with_final(20.0, 0.0),
            LedgerRow::new("row-3", "401-001", "Ventas").with_final(0.0, 30.0),
        ];
        let mut manual = ManualMappings::new();
        manual.insert(
            "row-2".to_string(),
            ManualMapping::new("640", "Otro nombre", "Gastos", "Gastos de personal"),
        );

        let result = convert_rows(&table(), &rows, 0.05, &manual, None);
        let codes: Vec<&str> = result.pgc_aggregated.iter().map(|l| l.pgc_code.as_str()).collect();
        assert_eq!(codes, vec!["640", "705"]);
        assert_eq!(result.pgc_aggregated[0].pgc_name, "Sueldos y salarios");
        assert_eq!(result.pgc_aggregated[0].total_mxn, 30.0);
        assert_eq!(result.pnl.gastos_mx, 30.0);
        assert_eq!(result.pnl.ingresos_mx, 30.0);
        assert_eq!(result.pnl.resultado_explotacion_mx, 0.0);
    }

    #[test]
    fn test_empty_input() {
        let result = convert(&[]);
        assert_eq!(result.metadata.row_count, 0);
        assert_eq!(result.metadata.mapped_coverage_pct, 0.0);
        assert_eq!(result.balance_sheet.total_activo_mxn, 0.0);
        assert_eq!(result.balance_sheet.difference_mxn, 0.0);
        assert!(result.balance_sheet.auto_result_line.is_none());
        assert_eq!(result.pnl.resultado_antes_impuestos_mx, 0.0);
        assert_eq!(result.validations.trial_balance_initial_difference, 0.0);
    }

    #[test]
    fn test_rows_with_blank_codes_are_dropped() {
        let result = convert(&[
            LedgerRow::new("row-1", "  ", "Separador"),
            LedgerRow::new("", "101-001", "Caja"),
        ]);
        assert_eq!(result.metadata.row_count, 1);
        assert_eq!(result.converted_data[0].row.row_id, "row-2");
    }

    #[test]
    fn test_save_readiness() {
        let balanced = convert(&[
            LedgerRow::new("row-1", "101-001", "Caja").with_final(100.0, 0.0),
            LedgerRow::new("row-2", "201-001", "Proveedores").with_final(0.0, 100.0),
        ]);
        assert!(balanced.save_readiness().is_ready());
        assert_eq!(balanced.save_readiness().message(), "Listo para guardar");
        assert!(balanced.save_readiness().ensure_ready().is_ok());

        let unbalanced = convert(&[
            LedgerRow::new("row-1", "101-001", "Caja").with_final(100.0, 0.0),
            LedgerRow::new("row-2", "201-001", "Proveedores").with_final(0.0, 90.0),
        ]);
        assert_eq!(
            unbalanced.save_readiness(),
            SaveReadiness::TrialBalanceMismatch(10.0)
        );
        assert_eq!(unbalanced.save_readiness().message(), "La balanza final no cuadra");
        assert!(unbalanced.save_readiness().ensure_ready().is_err());
    }

    #[test]
    fn test_convert_is_deterministic() {
        let rows = vec![
            LedgerRow::new("row-1", "101-001", "Caja").with_final(10.5, 0.0),
            LedgerRow::new("row-2", "201-000", "Proveedores").with_final(0.0, 4.0),
            LedgerRow::new("row-3", "201-001", "Proveedor A").with_final(0.0, 4.0),
        ];
        let period = PeriodDescriptor::new(2024, 6).ok();
        let a = convert_rows(&table(), &rows, 0.05, &ManualMappings::new(), period);
        let b = convert_rows(&table(), &rows, 0.05, &ManualMappings::new(), period);

        assert_eq!(a.to_json().unwrap(), b.to_json().unwrap());
        assert_eq!(a.metadata.period, period);
    }

    #[test]
    fn test_validate_exchange_rate() {
        assert_eq!(validate_exchange_rate(0.046).unwrap(), 0.046);
        assert!(validate_exchange_rate(0.0).is_err());
        assert!(validate_exchange_rate(-1.0).is_err());
        assert!(validate_exchange_rate(f64::NAN).is_err());
    }
}
