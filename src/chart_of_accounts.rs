use crate::error::{ConversionError, Result};
use crate::schema::AccountMapping;
use log::{debug, info};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

const BUILTIN_MAPPING_JSON: &str = include_str!("../data/account_mapping.json");

/// Read-only NIF prefix to PGC lookup table.
///
/// Keys are exact account codes or dash-joined prefixes (`"102-001"`, `"101"`). The table is
/// built once and then shared by reference with the conversion pipeline.
#[derive(Debug, Clone, Default)]
pub struct MappingTable {
    entries: HashMap<String, AccountMapping>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingMetadata {
    pub total_mappings: usize,
    /// Number of table entries per `grupo`
    pub groups: BTreeMap<String, usize>,
}

impl MappingTable {
    /// The table shipped with the crate.
    pub fn builtin() -> Result<Self> {
        Self::from_json_str(BUILTIN_MAPPING_JSON)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let raw: BTreeMap<String, AccountMapping> = serde_json::from_str(json)?;
        let mut entries = HashMap::with_capacity(raw.len());

        for (key, mapping) in raw {
            let key = key.trim();
            if key.is_empty() {
                return Err(ConversionError::MappingTable(
                    "mapping keys must be non-empty account codes".to_string(),
                ));
            }
            if mapping.pgc.trim().is_empty() {
                return Err(ConversionError::MappingTable(format!(
                    "entry '{}' has an empty PGC code",
                    key
                )));
            }
            entries.insert(key.to_string(), mapping);
        }

        debug!("Loaded account mapping table with {} entries", entries.len());
        Ok(Self { entries })
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let table = Self::from_json_str(&json)?;
        info!(
            "Loaded {} account mappings from {}",
            table.len(),
            path.display()
        );
        Ok(table)
    }

    /// Uses the external file when one is configured, the built-in table otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_path(path),
            None => Self::builtin(),
        }
    }

    pub fn from_entries<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, AccountMapping)>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(k, v)| (k.into().trim().to_string(), v))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&AccountMapping> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries ordered by key.
    pub fn sorted_entries(&self) -> Vec<(&str, &AccountMapping)> {
        let mut entries: Vec<(&str, &AccountMapping)> = self
            .entries
            .iter()
            .map(|(k, v)| (k.as_str(), v))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries
    }

    pub fn metadata(&self) -> MappingMetadata {
        let mut groups = BTreeMap::new();
        for mapping in self.entries.values() {
            *groups.entry(mapping.grupo.clone()).or_insert(0) += 1;
        }
        MappingMetadata {
            total_mappings: self.entries.len(),
            groups,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        let ordered: BTreeMap<&str, &AccountMapping> =
            self.entries.iter().map(|(k, v)| (k.as_str(), v)).collect();
        Ok(serde_json::to_string_pretty(&ordered)?)
    }

    pub fn to_csv(&self) -> Result<String> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(["Cuenta NIF", "Cta PGC", "Nombre PGC", "Grupo", "Subgrupo"])?;

        for (key, mapping) in self.sorted_entries() {
            writer.write_record([
                key,
                mapping.pgc.as_str(),
                mapping.pgc_name.as_str(),
                mapping.grupo.as_str(),
                mapping.subgrupo.as_str(),
            ])?;
        }

        let bytes = writer
            .into_inner()
            .map_err(|e| ConversionError::IoError(e.into_error()))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn to_markdown(&self) -> String {
        let mut by_group: BTreeMap<&str, Vec<(&str, &AccountMapping)>> = BTreeMap::new();
        for (key, mapping) in self.sorted_entries() {
            by_group
                .entry(mapping.grupo.as_str())
                .or_default()
                .push((key, mapping));
        }

        let mut output = String::new();
        output.push_str("# Mapeo NIF - PGC\n\n");
        output.push_str(&format!("**Entradas:** {}\n\n", self.len()));

        for (group, entries) in by_group {
            output.push_str(&format!("## {}\n\n", group));
            for (key, mapping) in entries {
                output.push_str(&format!(
                    "- `{}` → {} {} _({})_\n",
                    key, mapping.pgc, mapping.pgc_name, mapping.subgrupo
                ));
            }
            output.push('\n');
        }

        output
    }
}
