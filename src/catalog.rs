//! Cost catalog: operation kind -> credit cost
//!
//! The catalog is a closed table. Every [`OperationKind`] must have a cost
//! when the catalog is built, otherwise startup fails. There is no fallback
//! default cost.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::db::models::TransactionType;
use crate::error::LedgerError;

/// Billable operations offered by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Descriptive,
    Cronbach,
    Omega,
    Correlation,
    Ttest,
    Anova,
    ChiSquare,
    MannWhitney,
    KruskalWallis,
    Wilcoxon,
    Regression,
    Efa,
    Cfa,
    Sem,
    ExportPdf,
    ExportCsv,
    AiInterpretation,
}

impl OperationKind {
    pub const ALL: [OperationKind; 17] = [
        OperationKind::Descriptive,
        OperationKind::Cronbach,
        OperationKind::Omega,
        OperationKind::Correlation,
        OperationKind::Ttest,
        OperationKind::Anova,
        OperationKind::ChiSquare,
        OperationKind::MannWhitney,
        OperationKind::KruskalWallis,
        OperationKind::Wilcoxon,
        OperationKind::Regression,
        OperationKind::Efa,
        OperationKind::Cfa,
        OperationKind::Sem,
        OperationKind::ExportPdf,
        OperationKind::ExportCsv,
        OperationKind::AiInterpretation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Descriptive => "descriptive",
            OperationKind::Cronbach => "cronbach",
            OperationKind::Omega => "omega",
            OperationKind::Correlation => "correlation",
            OperationKind::Ttest => "ttest",
            OperationKind::Anova => "anova",
            OperationKind::ChiSquare => "chi_square",
            OperationKind::MannWhitney => "mann_whitney",
            OperationKind::KruskalWallis => "kruskal_wallis",
            OperationKind::Wilcoxon => "wilcoxon",
            OperationKind::Regression => "regression",
            OperationKind::Efa => "efa",
            OperationKind::Cfa => "cfa",
            OperationKind::Sem => "sem",
            OperationKind::ExportPdf => "export_pdf",
            OperationKind::ExportCsv => "export_csv",
            OperationKind::AiInterpretation => "ai_interpretation",
        }
    }

    /// Ledger transaction type billed for this operation
    pub fn transaction_type(&self) -> TransactionType {
        match self {
            OperationKind::Cfa | OperationKind::Sem => TransactionType::SemCfaSpend,
            OperationKind::ExportPdf | OperationKind::ExportCsv => TransactionType::ExportSpend,
            OperationKind::AiInterpretation => TransactionType::AiInterpretationSpend,
            _ => TransactionType::AnalysisSpend,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OperationKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| LedgerError::UnknownOperation(s.to_string()))
    }
}

/// Default prices, in credits
pub fn default_cost_table() -> BTreeMap<String, i64> {
    OperationKind::ALL
        .iter()
        .map(|kind| {
            let cost = match kind {
                OperationKind::Descriptive | OperationKind::ExportCsv => 1,
                OperationKind::Cronbach
                | OperationKind::Omega
                | OperationKind::Correlation
                | OperationKind::Ttest
                | OperationKind::ChiSquare
                | OperationKind::MannWhitney
                | OperationKind::Wilcoxon => 2,
                OperationKind::Anova
                | OperationKind::KruskalWallis
                | OperationKind::Regression
                | OperationKind::ExportPdf => 3,
                OperationKind::Efa | OperationKind::AiInterpretation => 5,
                OperationKind::Cfa => 8,
                OperationKind::Sem => 10,
            };
            (kind.as_str().to_string(), cost)
        })
        .collect()
}

/// Validated, read-only cost table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CostCatalog {
    costs: BTreeMap<OperationKind, i64>,
}

impl CostCatalog {
    /// Build from a raw `name -> cost` table, rejecting unknown names,
    /// missing kinds and negative costs.
    pub fn from_table(table: &BTreeMap<String, i64>) -> Result<Self, LedgerError> {
        let mut costs = BTreeMap::new();

        for (name, &cost) in table {
            let kind: OperationKind = name
                .parse()
                .map_err(|_| LedgerError::Catalog(format!("Unknown operation kind in cost table: {}", name)))?;
            if cost < 0 {
                return Err(LedgerError::Catalog(format!(
                    "Cost for {} must be >= 0, got {}",
                    name, cost
                )));
            }
            costs.insert(kind, cost);
        }

        let missing: Vec<&str> = OperationKind::ALL
            .iter()
            .filter(|kind| !costs.contains_key(*kind))
            .map(|kind| kind.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(LedgerError::Catalog(format!(
                "No cost registered for: {}",
                missing.join(", ")
            )));
        }

        Ok(Self { costs })
    }

    pub fn cost(&self, kind: OperationKind) -> i64 {
        // Construction guarantees every kind is present.
        self.costs.get(&kind).copied().unwrap_or_default()
    }

    pub fn entries(&self) -> impl Iterator<Item = (OperationKind, i64)> + '_ {
        self.costs.iter().map(|(kind, cost)| (*kind, *cost))
    }
}

impl Default for CostCatalog {
    fn default() -> Self {
        let costs = default_cost_table()
            .into_iter()
            .filter_map(|(name, cost)| name.parse().ok().map(|kind| (kind, cost)))
            .collect();
        Self { costs }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table_is_complete() {
        let catalog = CostCatalog::from_table(&default_cost_table()).unwrap();
        assert_eq!(catalog, CostCatalog::default());
        assert_eq!(catalog.entries().count(), OperationKind::ALL.len());
        assert_eq!(catalog.cost(OperationKind::Sem), 10);
    }

    #[test]
    fn test_missing_kind_fails_fast() {
        let mut table = default_cost_table();
        table.remove("efa");
        let err = CostCatalog::from_table(&table).unwrap_err();
        assert!(err.to_string().contains("efa"));
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let mut table = default_cost_table();
        table.insert("tarot".to_string(), 1);
        assert!(matches!(
            CostCatalog::from_table(&table),
            Err(LedgerError::Catalog(_))
        ));
    }

    #[test]
    fn test_negative_cost_rejected() {
        let mut table = default_cost_table();
        table.insert("sem".to_string(), -1);
        assert!(CostCatalog::from_table(&table).is_err());
    }

    #[test]
    fn test_transaction_type_mapping() {
        assert_eq!(OperationKind::Cfa.transaction_type(), TransactionType::SemCfaSpend);
        assert_eq!(OperationKind::ExportPdf.transaction_type(), TransactionType::ExportSpend);
        assert_eq!(
            OperationKind::AiInterpretation.transaction_type(),
            TransactionType::AiInterpretationSpend
        );
        assert_eq!(OperationKind::Omega.transaction_type(), TransactionType::AnalysisSpend);
    }

    #[test]
    fn test_kind_round_trips_through_name() {
        assert_eq!("chi_square".parse::<OperationKind>().unwrap(), OperationKind::ChiSquare);
        assert!(matches!(
            "astrology".parse::<OperationKind>(),
            Err(LedgerError::UnknownOperation(_))
        ));
    }
}
