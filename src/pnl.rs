use crate::engine::AggregatedLine;
use crate::schema::PnlSection;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PnlSectionTotals {
    pub section: PnlSection,
    pub items: Vec<AggregatedLine>,
    #[serde(rename = "totalMXN")]
    pub total_mxn: f64,
    #[serde(rename = "totalEUR")]
    pub total_eur: f64,
}

/// Profit and loss statement built from the `subgrupo` of each aggregated line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProfitAndLoss {
    pub sections: Vec<PnlSectionTotals>,
    pub ingresos_mx: f64,
    pub gastos_mx: f64,
    pub resultado_explotacion_mx: f64,
    pub resultado_financiero_mx: f64,
    pub otros_resultados_mx: f64,
    pub resultado_antes_impuestos_mx: f64,
    pub ingresos_eur: f64,
    pub gastos_eur: f64,
    pub resultado_explotacion_eur: f64,
    pub resultado_financiero_eur: f64,
    pub otros_resultados_eur: f64,
    pub resultado_antes_impuestos_eur: f64,
}

const INGRESOS: [PnlSection; 2] = [
    PnlSection::CifraNegocios,
    PnlSection::OtrosIngresosExplotacion,
];

const GASTOS: [PnlSection; 5] = [
    PnlSection::GastosPersonal,
    PnlSection::ServiciosExteriores,
    PnlSection::Tributos,
    PnlSection::Amortizaciones,
    PnlSection::GastosExcepcionales,
];

impl ProfitAndLoss {
    pub fn build(aggregated: &[AggregatedLine]) -> Self {
        let mut sections: Vec<PnlSectionTotals> = PnlSection::ALL
            .into_iter()
            .map(|section| PnlSectionTotals {
                section,
                items: Vec::new(),
                total_mxn: 0.0,
                total_eur: 0.0,
            })
            .collect();

        for line in aggregated {
            let Some(section) = PnlSection::from_label(&line.subgrupo) else {
                continue;
            };
            if let Some(bucket) = sections.iter_mut().find(|s| s.section == section) {
                bucket.total_mxn += line.total_mxn;
                bucket.total_eur += line.total_eur;
                bucket.items.push(line.clone());
            }
        }

        let sum = |which: &[PnlSection]| -> (f64, f64) {
            sections
                .iter()
                .filter(|s| which.contains(&s.section))
                .fold((0.0, 0.0), |(mxn, eur), s| (mxn + s.total_mxn, eur + s.total_eur))
        };

        let (ingresos_mx, ingresos_eur) = sum(&INGRESOS);
        let (gastos_mx, gastos_eur) = sum(&GASTOS);
        let (resultado_financiero_mx, resultado_financiero_eur) =
            sum(&[PnlSection::ResultadoFinanciero]);
        let (otros_resultados_mx, otros_resultados_eur) = sum(&[PnlSection::OtrosResultados]);

        let resultado_explotacion_mx = ingresos_mx - gastos_mx;
        let resultado_explotacion_eur = ingresos_eur - gastos_eur;

        Self {
            sections,
            ingresos_mx,
            gastos_mx,
            resultado_explotacion_mx,
            resultado_financiero_mx,
            otros_resultados_mx,
            resultado_antes_impuestos_mx: resultado_explotacion_mx
                + resultado_financiero_mx
                + otros_resultados_mx,
            ingresos_eur,
            gastos_eur,
            resultado_explotacion_eur,
            resultado_financiero_eur,
            otros_resultados_eur,
            resultado_antes_impuestos_eur: resultado_explotacion_eur
                + resultado_financiero_eur
                + otros_resultados_eur,
        }
    }

    pub fn section(&self, section: PnlSection) -> Option<&PnlSectionTotals> {
        self.sections.iter().find(|s| s.section == section)
    }
}
