use crate::engine::AggregatedLine;
use crate::schema::{BalanceGroup, BALANCE_TOLERANCE};
use log::warn;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const PLUG_PGC_CODE: &str = "129";
pub const PLUG_PGC_NAME: &str = "Resultado del periodo pendiente de cierre";
pub const PLUG_SUBGRUPO: &str = "Fondos propios";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GroupTotals {
    pub group: BalanceGroup,
    pub items: Vec<AggregatedLine>,
    #[serde(rename = "totalMXN")]
    pub total_mxn: f64,
    #[serde(rename = "totalEUR")]
    pub total_eur: f64,
}

impl GroupTotals {
    fn empty(group: BalanceGroup) -> Self {
        Self {
            group,
            items: Vec::new(),
            total_mxn: 0.0,
            total_eur: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BalanceSheet {
    /// The five groups in presentation order.
    pub groups: Vec<GroupTotals>,
    #[serde(rename = "totalActivoMXN")]
    pub total_activo_mxn: f64,
    #[serde(rename = "totalPasivoPNMXN")]
    pub total_pasivo_pn_mxn: f64,
    #[serde(rename = "totalActivoEUR")]
    pub total_activo_eur: f64,
    #[serde(rename = "totalPasivoPNEUR")]
    pub total_pasivo_pn_eur: f64,
    #[serde(rename = "differenceMXN")]
    pub difference_mxn: f64,
    #[serde(rename = "differenceEUR")]
    pub difference_eur: f64,
    /// Synthetic plug in Patrimonio Neto, present only when the sheet is out of balance.
    /// It feeds the adjusted totals and nothing else.
    #[serde(rename = "autoResultLine")]
    pub auto_result_line: Option<AggregatedLine>,
    #[serde(rename = "adjustedTotalPasivoPNMXN")]
    pub adjusted_total_pasivo_pn_mxn: f64,
    #[serde(rename = "adjustedTotalPasivoPNEUR")]
    pub adjusted_total_pasivo_pn_eur: f64,
    #[serde(rename = "adjustedDifferenceMXN")]
    pub adjusted_difference_mxn: f64,
    #[serde(rename = "adjustedDifferenceEUR")]
    pub adjusted_difference_eur: f64,
}

impl BalanceSheet {
    pub fn group(&self, group: BalanceGroup) -> Option<&GroupTotals> {
        self.groups.iter().find(|g| g.group == group)
    }

    fn group_total(&self, group: BalanceGroup) -> (f64, f64) {
        self.group(group)
            .map(|g| (g.total_mxn, g.total_eur))
            .unwrap_or((0.0, 0.0))
    }

    pub fn needs_plug(&self) -> bool {
        self.auto_result_line.is_some()
    }
}

pub struct AccountingBalancer {
    tolerance: f64,
}

impl Default for AccountingBalancer {
    fn default() -> Self {
        Self::new(BALANCE_TOLERANCE)
    }
}

impl AccountingBalancer {
    pub fn new(tolerance: f64) -> Self {
        Self { tolerance }
    }

    /// Buckets aggregated lines into the five balance groups and reconciles the totals.
    /// Lines of any other `grupo` (P&L groups, `Sin clasificar`) are left out of this view.
    pub fn build(&self, aggregated: &[AggregatedLine]) -> BalanceSheet {
        let mut groups: Vec<GroupTotals> =
            BalanceGroup::ALL.into_iter().map(GroupTotals::empty).collect();

        for line in aggregated {
            let Some(group) = BalanceGroup::from_label(&line.grupo) else {
                continue;
            };
            if let Some(bucket) = groups.iter_mut().find(|g| g.group == group) {
                bucket.total_mxn += line.total_mxn;
                bucket.total_eur += line.total_eur;
                bucket.items.push(line.clone());
            }
        }

        let mut sheet = BalanceSheet {
            groups,
            total_activo_mxn: 0.0,
            total_pasivo_pn_mxn: 0.0,
            total_activo_eur: 0.0,
            total_pasivo_pn_eur: 0.0,
            difference_mxn: 0.0,
            difference_eur: 0.0,
            auto_result_line: None,
            adjusted_total_pasivo_pn_mxn: 0.0,
            adjusted_total_pasivo_pn_eur: 0.0,
            adjusted_difference_mxn: 0.0,
            adjusted_difference_eur: 0.0,
        };
        self.reconcile(&mut sheet);
        sheet
    }

    fn reconcile(&self, sheet: &mut BalanceSheet) {
        let (anc_mxn, anc_eur) = sheet.group_total(BalanceGroup::ActivoNoCorriente);
        let (ac_mxn, ac_eur) = sheet.group_total(BalanceGroup::ActivoCorriente);
        let (pn_mxn, pn_eur) = sheet.group_total(BalanceGroup::PatrimonioNeto);
        let (pnc_mxn, pnc_eur) = sheet.group_total(BalanceGroup::PasivoNoCorriente);
        let (pc_mxn, pc_eur) = sheet.group_total(BalanceGroup::PasivoCorriente);

        sheet.total_activo_mxn = anc_mxn + ac_mxn;
        sheet.total_activo_eur = anc_eur + ac_eur;
        sheet.total_pasivo_pn_mxn = pn_mxn + pnc_mxn + pc_mxn;
        sheet.total_pasivo_pn_eur = pn_eur + pnc_eur + pc_eur;
        sheet.difference_mxn = sheet.total_activo_mxn - sheet.total_pasivo_pn_mxn;
        sheet.difference_eur = sheet.total_activo_eur - sheet.total_pasivo_pn_eur;

        sheet.auto_result_line = self.plug_line(sheet.difference_mxn, sheet.difference_eur);
        sheet.adjusted_total_pasivo_pn_mxn = sheet.total_pasivo_pn_mxn;
        sheet.adjusted_total_pasivo_pn_eur = sheet.total_pasivo_pn_eur;

        if let Some(plug) = &sheet.auto_result_line {
            warn!(
                "Balance sheet out of balance by {:.2} MXN; applying plug line {}",
                plug.total_mxn, PLUG_PGC_CODE
            );
            sheet.adjusted_total_pasivo_pn_mxn += plug.total_mxn;
            sheet.adjusted_total_pasivo_pn_eur += plug.total_eur;
        }

        sheet.adjusted_difference_mxn = sheet.total_activo_mxn - sheet.adjusted_total_pasivo_pn_mxn;
        sheet.adjusted_difference_eur = sheet.total_activo_eur - sheet.adjusted_total_pasivo_pn_eur;
    }

    /// The plug carries the full difference, so adding it to Pasivo + PN closes the gap.
    pub fn plug_line(&self, difference_mxn: f64, difference_eur: f64) -> Option<AggregatedLine> {
        if difference_mxn.abs() <= self.tolerance {
            return None;
        }

        Some(AggregatedLine {
            pgc_code: PLUG_PGC_CODE.to_string(),
            pgc_name: PLUG_PGC_NAME.to_string(),
            grupo: BalanceGroup::PatrimonioNeto.label().to_string(),
            subgrupo: PLUG_SUBGRUPO.to_string(),
            total_mxn: difference_mxn,
            total_eur: difference_eur,
            details: Vec::new(),
        })
    }
}

pub fn build_balance_sheet(aggregated: &[AggregatedLine]) -> BalanceSheet {
    AccountingBalancer::default().build(aggregated)
}
