use crate::error::Result;
use crate::utils::{build_period_key, validate_month};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// PGC code reported for rows that resolve to no mapping.
pub const UNMAPPED_PGC_CODE: &str = "SIN MAPEO";
pub const UNMAPPED_PGC_NAME: &str = "Sin equivalencia PGC";
pub const UNCLASSIFIED: &str = "Sin clasificar";
pub const DEFAULT_ROW_NAME: &str = "Sin descripcion";

/// MXN amounts are multiplied by this rate to obtain EUR.
pub const DEFAULT_EXCHANGE_RATE: f64 = 0.046;

/// Absolute MXN difference above which the balance sheet or the trial balance counts as unbalanced.
pub const BALANCE_TOLERANCE: f64 = 0.01;

/// Groups whose natural balance is a credit; their `sfd - sfa` balance is sign-flipped for display.
pub const CREDIT_NATURE_GROUPS: [&str; 5] = [
    "Pasivo Corriente",
    "Pasivo No Corriente",
    "Patrimonio Neto",
    "Ingresos",
    "Ingresos Financieros",
];

pub const KNOWN_GROUPS: [&str; 10] = [
    UNCLASSIFIED,
    "Activo No Corriente",
    "Activo Corriente",
    "Patrimonio Neto",
    "Pasivo No Corriente",
    "Pasivo Corriente",
    "Ingresos",
    "Ingresos Financieros",
    "Gastos",
    "Gastos Financieros",
];

pub fn is_credit_nature(grupo: &str) -> bool {
    CREDIT_NATURE_GROUPS.contains(&grupo)
}

/// A loosely typed spreadsheet or JSON cell.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum CellValue {
    #[default]
    Empty,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl CellValue {
    /// Text rendering used for codes and names. Whole numbers render without a fractional part.
    pub fn as_text(&self) -> String {
        match self {
            CellValue::Empty => String::new(),
            CellValue::Bool(b) => b.to_string(),
            CellValue::Number(n) => {
                if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    n.to_string()
                }
            }
            CellValue::Text(s) => s.clone(),
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::Text(value)
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Number(value)
    }
}

fn default_row_name() -> String {
    DEFAULT_ROW_NAME.to_string()
}

/// One trial-balance line in canonical form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LedgerRow {
    #[serde(rename = "_rowId", alias = "rowId", default)]
    pub row_id: String,

    #[serde(rename = "_isNew", default)]
    pub is_new: bool,

    #[serde(rename = "_excludeFromAnalysis", default)]
    pub exclude_from_analysis: bool,

    /// Dash-segmented hierarchical account code, e.g. `100-001-000`.
    pub code: String,

    #[serde(default = "default_row_name")]
    pub name: String,

    /// Initial debit balance
    #[serde(default)]
    pub sid: f64,
    /// Initial credit balance
    #[serde(default)]
    pub sia: f64,
    /// Period debits
    #[serde(default)]
    pub cargos: f64,
    /// Period credits
    #[serde(default)]
    pub abonos: f64,
    /// Final debit balance
    #[serde(default)]
    pub sfd: f64,
    /// Final credit balance
    #[serde(default)]
    pub sfa: f64,
}

impl LedgerRow {
    pub fn new(row_id: impl Into<String>, code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            row_id: row_id.into(),
            is_new: false,
            exclude_from_analysis: false,
            code: code.into(),
            name: name.into(),
            sid: 0.0,
            sia: 0.0,
            cargos: 0.0,
            abonos: 0.0,
            sfd: 0.0,
            sfa: 0.0,
        }
    }

    pub fn with_initial(mut self, sid: f64, sia: f64) -> Self {
        self.sid = sid;
        self.sia = sia;
        self
    }

    pub fn with_movements(mut self, cargos: f64, abonos: f64) -> Self {
        self.cargos = cargos;
        self.abonos = abonos;
        self
    }

    pub fn with_final(mut self, sfd: f64, sfa: f64) -> Self {
        self.sfd = sfd;
        self.sfa = sfa;
        self
    }

    pub fn excluded(mut self) -> Self {
        self.exclude_from_analysis = true;
        self
    }

    /// Net final balance, `sfd - sfa`.
    pub fn saldo(&self) -> f64 {
        self.sfd - self.sfa
    }
}

/// A row as it arrives from user edits or keyed imports, before numeric coercion.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct RawLedgerRow {
    #[serde(rename = "_rowId", alias = "rowId", alias = "id", default)]
    pub row_id: Option<String>,
    #[serde(rename = "_isNew", default)]
    pub is_new: bool,
    #[serde(rename = "_excludeFromAnalysis", default)]
    pub exclude_from_analysis: bool,
    #[serde(default)]
    pub code: CellValue,
    #[serde(default)]
    pub name: CellValue,
    #[serde(default)]
    pub sid: CellValue,
    #[serde(default)]
    pub sia: CellValue,
    #[serde(default)]
    pub cargos: CellValue,
    #[serde(default)]
    pub abonos: CellValue,
    #[serde(default)]
    pub sfd: CellValue,
    #[serde(default)]
    pub sfa: CellValue,
}

/// A user-supplied PGC assignment for one row, keyed by row id in [`ManualMappings`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ManualMapping {
    #[serde(default, alias = "pgcCode")]
    pub pgc: String,
    #[serde(default)]
    pub pgc_name: String,
    #[serde(default)]
    pub grupo: String,
    #[serde(default)]
    pub subgrupo: String,
}

impl ManualMapping {
    pub fn new(
        pgc: impl Into<String>,
        pgc_name: impl Into<String>,
        grupo: impl Into<String>,
        subgrupo: impl Into<String>,
    ) -> Self {
        Self {
            pgc: pgc.into(),
            pgc_name: pgc_name.into(),
            grupo: grupo.into(),
            subgrupo: subgrupo.into(),
        }
    }

    /// True when at least one field carries a non-blank, non-sentinel value.
    pub fn is_active(&self) -> bool {
        is_set(&self.pgc, UNMAPPED_PGC_CODE)
            || is_set(&self.pgc_name, UNMAPPED_PGC_NAME)
            || is_set(&self.grupo, UNCLASSIFIED)
            || is_set(&self.subgrupo, UNCLASSIFIED)
    }
}

fn is_set(value: &str, sentinel: &str) -> bool {
    let trimmed = value.trim();
    !trimmed.is_empty() && trimmed != sentinel
}

pub type ManualMappings = BTreeMap<String, ManualMapping>;

/// Static reference entry: NIF account prefix to PGC account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AccountMapping {
    pub pgc: String,
    pub pgc_name: String,
    pub grupo: String,
    pub subgrupo: String,
}

impl AccountMapping {
    pub fn new(
        pgc: impl Into<String>,
        pgc_name: impl Into<String>,
        grupo: impl Into<String>,
        subgrupo: impl Into<String>,
    ) -> Self {
        Self {
            pgc: pgc.into(),
            pgc_name: pgc_name.into(),
            grupo: grupo.into(),
            subgrupo: subgrupo.into(),
        }
    }
}

/// Month and year a conversion belongs to. Carried through the pipeline untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
pub struct PeriodDescriptor {
    pub month: u32,
    pub year: i32,
}

impl PeriodDescriptor {
    pub fn new(year: i32, month: u32) -> Result<Self> {
        validate_month(year, month)?;
        Ok(Self { month, year })
    }

    /// Persistence key, `"<year>-<zero-padded month>"`.
    pub fn key(&self) -> String {
        build_period_key(self.year, self.month)
    }
}

impl fmt::Display for PeriodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}/{}", self.month, self.year)
    }
}

/// The five balance-sheet groups, in presentation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
pub enum BalanceGroup {
    #[serde(rename = "Activo No Corriente")]
    ActivoNoCorriente,
    #[serde(rename = "Activo Corriente")]
    ActivoCorriente,
    #[serde(rename = "Patrimonio Neto")]
    PatrimonioNeto,
    #[serde(rename = "Pasivo No Corriente")]
    PasivoNoCorriente,
    #[serde(rename = "Pasivo Corriente")]
    PasivoCorriente,
}

impl BalanceGroup {
    pub const ALL: [BalanceGroup; 5] = [
        BalanceGroup::ActivoNoCorriente,
        BalanceGroup::ActivoCorriente,
        BalanceGroup::PatrimonioNeto,
        BalanceGroup::PasivoNoCorriente,
        BalanceGroup::PasivoCorriente,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            BalanceGroup::ActivoNoCorriente => "Activo No Corriente",
            BalanceGroup::ActivoCorriente => "Activo Corriente",
            BalanceGroup::PatrimonioNeto => "Patrimonio Neto",
            BalanceGroup::PasivoNoCorriente => "Pasivo No Corriente",
            BalanceGroup::PasivoCorriente => "Pasivo Corriente",
        }
    }

    /// Exact-match lookup; any other group name is not part of the balance sheet.
    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|g| g.label() == label)
    }
}

/// The nine P&L sections, in presentation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
pub enum PnlSection {
    #[serde(rename = "Importe neto cifra negocios")]
    CifraNegocios,
    #[serde(rename = "Otros ingresos de explotacion")]
    OtrosIngresosExplotacion,
    #[serde(rename = "Gastos de personal")]
    GastosPersonal,
    #[serde(rename = "Servicios exteriores")]
    ServiciosExteriores,
    #[serde(rename = "Tributos")]
    Tributos,
    #[serde(rename = "Amortizaciones")]
    Amortizaciones,
    #[serde(rename = "Gastos excepcionales")]
    GastosExcepcionales,
    #[serde(rename = "Resultado financiero")]
    ResultadoFinanciero,
    #[serde(rename = "Otros resultados")]
    OtrosResultados,
}

impl PnlSection {
    pub const ALL: [PnlSection; 9] = [
        PnlSection::CifraNegocios,
        PnlSection::OtrosIngresosExplotacion,
        PnlSection::GastosPersonal,
        PnlSection::ServiciosExteriores,
        PnlSection::Tributos,
        PnlSection::Amortizaciones,
        PnlSection::GastosExcepcionales,
        PnlSection::ResultadoFinanciero,
        PnlSection::OtrosResultados,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            PnlSection::CifraNegocios => "Importe neto cifra negocios",
            PnlSection::OtrosIngresosExplotacion => "Otros ingresos de explotacion",
            PnlSection::GastosPersonal => "Gastos de personal",
            PnlSection::ServiciosExteriores => "Servicios exteriores",
            PnlSection::Tributos => "Tributos",
            PnlSection::Amortizaciones => "Amortizaciones",
            PnlSection::GastosExcepcionales => "Gastos excepcionales",
            PnlSection::ResultadoFinanciero => "Resultado financiero",
            PnlSection::OtrosResultados => "Otros resultados",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.label() == label)
    }
}
