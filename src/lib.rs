//! # NIF to PGC Converter
//!
//! Converts Mexican trial-balance exports (NIF chart of accounts) into Spanish PGC financial
//! statements: a balance sheet and a profit-and-loss statement, with every amount in MXN and
//! converted to EUR.
//!
//! ## Core Concepts
//!
//! - **Ledger rows**: one account line of the trial balance (code, name, opening, movements, closing)
//! - **Mapping table**: NIF account prefixes to PGC accounts, resolved by longest prefix
//! - **Manual mappings**: per-row overrides that always win over the table
//! - **Summary lines**: roll-up rows (`xxx-000-0000`) excluded from analysis to avoid double counting
//! - **Plug line**: a synthetic equity line that closes an unbalanced balance sheet
//!
//! ## Example
//!
//! ```rust,ignore
//! use nif_pgc_converter::*;
//!
//! let table = MappingTable::builtin()?;
//! let bytes = std::fs::read("balanza_marzo.xlsx")?;
//! let period = PeriodDescriptor::new(2024, 3)?;
//!
//! let result = convert_workbook(&bytes, &table, 0.046, &ManualMappings::new(), Some(period))?;
//! println!("Activo: {}", format_amount(result.balance_sheet.total_activo_eur));
//! result.save_readiness().ensure_ready()?;
//! ```

pub mod balancer;
pub mod chart_of_accounts;
pub mod config;
pub mod engine;
pub mod error;
pub mod export;
pub mod ingestion;
pub mod normalize;
pub mod overrides;
pub mod pnl;
pub mod resolver;
pub mod schema;
pub mod store;
pub mod summary;
pub mod utils;

pub use balancer::{build_balance_sheet, AccountingBalancer, BalanceSheet, GroupTotals};
pub use chart_of_accounts::{MappingMetadata, MappingTable};
pub use config::ConverterConfig;
pub use engine::{
    aggregate_by_pgc, convert_rows, validate_exchange_rate, AggregatedLine, ConversionEngine,
    ConversionResult, ConvertedRow, Metadata, SaveReadiness, Validations,
};
pub use error::{ConversionError, Result};
pub use export::{export_conversion_xlsx, write_conversion_xlsx};
pub use ingestion::*;
pub use normalize::{normalize_keyed_records, normalize_ledger_rows, KeyedImport, LedgerField};
pub use overrides::*;
pub use pnl::{PnlSectionTotals, ProfitAndLoss};
pub use resolver::{find_mapping, MappingResolver, MappingSource, ResolvedMapping};
pub use schema::*;
pub use store::{
    PeriodRecord, PeriodRepository, PeriodSummary, SavePeriodRequest, SqlitePeriodStore,
    StoredPeriod,
};
pub use summary::{is_summary_line, SummaryDetector};
pub use utils::*;

use log::debug;

/// A mapping table plus the balance tolerance, ready to convert any number of periods.
pub struct TrialBalanceConverter {
    table: MappingTable,
    tolerance: f64,
}

impl TrialBalanceConverter {
    pub fn new(table: MappingTable) -> Self {
        Self {
            table,
            tolerance: BALANCE_TOLERANCE,
        }
    }

    pub fn from_config(config: &ConverterConfig) -> Result<Self> {
        config.validate()?;
        let table = config.mapping_table()?;
        debug!("Mapping table loaded with {} entries", table.len());
        Ok(Self {
            table,
            tolerance: config.balance_tolerance,
        })
    }

    pub fn table(&self) -> &MappingTable {
        &self.table
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Runs the pipeline over already-parsed rows after checking the exchange rate.
    pub fn convert(
        &self,
        rows: &[LedgerRow],
        exchange_rate: f64,
        manual_mappings: &ManualMappings,
        period: Option<PeriodDescriptor>,
    ) -> Result<ConversionResult> {
        let exchange_rate = validate_exchange_rate(exchange_rate)?;
        Ok(ConversionEngine::new(&self.table)
            .with_tolerance(self.tolerance)
            .convert(rows, exchange_rate, manual_mappings, period))
    }
}

/// Parses a workbook (xlsx, xls or CSV) and converts it in one step.
pub fn convert_workbook(
    bytes: &[u8],
    table: &MappingTable,
    exchange_rate: f64,
    manual_mappings: &ManualMappings,
    period: Option<PeriodDescriptor>,
) -> Result<ConversionResult> {
    let exchange_rate = validate_exchange_rate(exchange_rate)?;
    let rows = parse_workbook(bytes)?;
    Ok(convert_rows(
        table,
        &rows,
        exchange_rate,
        manual_mappings,
        period,
    ))
}
