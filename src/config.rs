use crate::chart_of_accounts::MappingTable;
use crate::error::{ConversionError, Result};
use crate::schema::{BALANCE_TOLERANCE, DEFAULT_EXCHANGE_RATE};
use log::debug;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DATABASE_FILE_NAME: &str = "contabilidad.db";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ConverterConfig {
    #[schemars(description = "SQLite file holding saved periods. Parent directories are created on first use.")]
    pub database_path: PathBuf,

    #[schemars(
        description = "Optional JSON file mapping NIF account prefixes to PGC accounts. The embedded table is used when absent."
    )]
    pub mapping_file: Option<PathBuf>,

    #[schemars(description = "MXN to EUR rate used when none is given on the command line. EUR = MXN * rate.")]
    pub default_exchange_rate: f64,

    #[schemars(
        description = "Absolute MXN difference tolerated before the balance sheet gets a plug line and before a save is rejected."
    )]
    pub balance_tolerance: f64,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            database_path: Path::new("data").join(DATABASE_FILE_NAME),
            mapping_file: None,
            default_exchange_rate: DEFAULT_EXCHANGE_RATE,
            balance_tolerance: BALANCE_TOLERANCE,
        }
    }
}

impl ConverterConfig {
    /// Defaults, then the optional JSON file, then the process environment.
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let mut config = match config_file {
            Some(path) => Self::from_json_file(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        debug!("Loaded configuration from {}", path.display());
        Ok(serde_json::from_str(&json)?)
    }

    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Applies `DATA_DIR`, `DB_PATH`, `MAPPING_FILE` and `EXCHANGE_RATE` from `lookup`.
    /// `DB_PATH` wins over `DATA_DIR` when both are set.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(dir) = value("DATA_DIR") {
            self.database_path = Path::new(dir.trim()).join(DATABASE_FILE_NAME);
        }
        if let Some(path) = value("DB_PATH") {
            self.database_path = PathBuf::from(path.trim());
        }
        if let Some(path) = value("MAPPING_FILE") {
            self.mapping_file = Some(PathBuf::from(path.trim()));
        }
        if let Some(rate) = value("EXCHANGE_RATE") {
            self.default_exchange_rate = rate.trim().parse().map_err(|_| {
                ConversionError::InvalidConfig(format!("EXCHANGE_RATE is not a number: {}", rate))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.default_exchange_rate.is_finite() && self.default_exchange_rate > 0.0) {
            return Err(ConversionError::InvalidExchangeRate(
                self.default_exchange_rate,
            ));
        }
        if !(self.balance_tolerance.is_finite() && self.balance_tolerance > 0.0) {
            return Err(ConversionError::InvalidConfig(format!(
                "balance_tolerance must be a positive number, got {}",
                self.balance_tolerance
            )));
        }
        Ok(())
    }

    pub fn mapping_table(&self) -> Result<MappingTable> {
        MappingTable::load(self.mapping_file.as_deref())
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(ConverterConfig)
    }

    pub fn schema_as_json() -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&Self::generate_json_schema())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ConverterConfig::default();
        assert_eq!(config.database_path, Path::new("data/contabilidad.db"));
        assert!(config.mapping_file.is_none());
        assert_eq!(config.default_exchange_rate, 0.046);
        assert_eq!(config.balance_tolerance, 0.01);
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: ConverterConfig =
            serde_json::from_str(r#"{"default_exchange_rate": 0.05}"#).unwrap();
        assert_eq!(config.default_exchange_rate, 0.05);
        assert_eq!(config.balance_tolerance, BALANCE_TOLERANCE);
    }

    #[test]
    fn test_environment_overrides() {
        let mut config = ConverterConfig::default();
        config
            .apply_overrides(lookup(&[
                ("DATA_DIR", "/srv/conversion"),
                ("MAPPING_FILE", "/etc/mapeo.json"),
                ("EXCHANGE_RATE", " 0.052 "),
            ]))
            .unwrap();

        assert_eq!(config.database_path, Path::new("/srv/conversion/contabilidad.db"));
        assert_eq!(config.mapping_file.as_deref(), Some(Path::new("/etc/mapeo.json")));
        assert_eq!(config.default_exchange_rate, 0.052);

        config
            .apply_overrides(lookup(&[("DATA_DIR", "/a"), ("DB_PATH", "/b/periodos.db")]))
            .unwrap();
        assert_eq!(config.database_path, Path::new("/b/periodos.db"));
    }

    #[test]
    fn test_bad_exchange_rate_in_environment() {
        let mut config = ConverterConfig::default();
        let err = config
            .apply_overrides(lookup(&[("EXCHANGE_RATE", "abc")]))
            .unwrap_err();
        assert!(matches!(err, ConversionError::InvalidConfig(_)));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ConverterConfig {
            default_exchange_rate: -1.0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConversionError::InvalidExchangeRate(_))
        ));

        config.default_exchange_rate = 0.05;
        config.balance_tolerance = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_schema_generation() {
        let schema = ConverterConfig::schema_as_json().unwrap();
        assert!(schema.contains("database_path"));
        assert!(schema.contains("balance_tolerance"));
    }
}
