use crate::chart_of_accounts::MappingTable;
use crate::schema::{
    AccountMapping, ManualMapping, UNCLASSIFIED, UNMAPPED_PGC_CODE, UNMAPPED_PGC_NAME,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MappingSource {
    Automatic,
    Manual,
    Unmapped,
}

/// The PGC assignment a row ends up with after manual and automatic resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedMapping {
    pub pgc_code: String,
    pub pgc_name: String,
    pub grupo: String,
    pub subgrupo: String,
    #[serde(rename = "mappingSource")]
    pub source: MappingSource,
}

impl ResolvedMapping {
    pub fn unmapped() -> Self {
        Self {
            pgc_code: UNMAPPED_PGC_CODE.to_string(),
            pgc_name: UNMAPPED_PGC_NAME.to_string(),
            grupo: UNCLASSIFIED.to_string(),
            subgrupo: UNCLASSIFIED.to_string(),
            source: MappingSource::Unmapped,
        }
    }

    pub fn from_account(mapping: &AccountMapping) -> Self {
        Self {
            pgc_code: mapping.pgc.clone(),
            pgc_name: mapping.pgc_name.clone(),
            grupo: mapping.grupo.clone(),
            subgrupo: mapping.subgrupo.clone(),
            source: MappingSource::Automatic,
        }
    }

    /// Takes all four fields from the manual mapping. Blank fields fall back to the
    /// unmapped sentinels, never to the automatic mapping.
    pub fn from_manual(manual: &ManualMapping) -> Self {
        Self {
            pgc_code: or_sentinel(&manual.pgc, UNMAPPED_PGC_CODE),
            pgc_name: or_sentinel(&manual.pgc_name, UNMAPPED_PGC_NAME),
            grupo: or_sentinel(&manual.grupo, UNCLASSIFIED),
            subgrupo: or_sentinel(&manual.subgrupo, UNCLASSIFIED),
            source: MappingSource::Manual,
        }
    }

    pub fn is_unmapped(&self) -> bool {
        self.pgc_code == UNMAPPED_PGC_CODE
    }
}

fn or_sentinel(value: &str, sentinel: &str) -> String {
    match value.trim() {
        "" => sentinel.to_string(),
        v => v.to_string(),
    }
}

/// Lookup keys for a code, most specific first: the full code, then the dash-joined
/// leading segments from longest to shortest. Empty segments are skipped.
pub fn candidate_keys(code: &str) -> Vec<String> {
    let code = code.trim();
    if code.is_empty() {
        return Vec::new();
    }

    let parts: Vec<&str> = code.split('-').filter(|p| !p.is_empty()).collect();
    let mut candidates = vec![code.to_string()];

    for len in (1..=parts.len()).rev() {
        let candidate = parts[..len].join("-");
        if !candidates.contains(&candidate) {
            candidates.push(candidate);
        }
    }

    candidates
}

/// Longest-prefix lookup of `code` in `table`.
pub fn find_mapping<'t>(table: &'t MappingTable, code: &str) -> Option<&'t AccountMapping> {
    candidate_keys(code)
        .iter()
        .find_map(|candidate| table.get(candidate))
}

pub struct MappingResolver<'a> {
    table: &'a MappingTable,
}

impl<'a> MappingResolver<'a> {
    pub fn new(table: &'a MappingTable) -> Self {
        Self { table }
    }

    pub fn resolve(&self, code: &str) -> ResolvedMapping {
        find_mapping(self.table, code)
            .map(ResolvedMapping::from_account)
            .unwrap_or_else(ResolvedMapping::unmapped)
    }

    /// An active manual mapping replaces automatic resolution wholesale.
    pub fn resolve_row(&self, code: &str, manual: Option<&ManualMapping>) -> ResolvedMapping {
        match manual {
            Some(manual) if manual.is_active() => ResolvedMapping::from_manual(manual),
            _ => self.resolve(code),
        }
    }
}
