use crate::status::RunStatus;
use crate::taxonomy::ResultTable;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReportError {
    #[error("taxonomy declares no expected tests; pass percentage is undefined")]
    EmptyTaxonomy,
    #[error("test counts overflow while summing {component}/{subcomponent}")]
    Overflow {
        component: String,
        subcomponent: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRow {
    pub component: String,
    pub subcomponent: String,
    pub status: RunStatus,
    pub total: u64,
    pub passed: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub rows: Vec<ReportRow>,
    pub total_expected: u64,
    pub total_passed: u64,
    pub pass_percentage: f64,
}

pub fn aggregate(results: &ResultTable) -> Result<Report, ReportError> {
    let mut rows = Vec::new();
    let mut total_expected = 0u64;
    let mut total_passed = 0u64;

    for component in results.components() {
        for result in &component.subcomponents {
            let overflow = || ReportError::Overflow {
                component: component.name.clone(),
                subcomponent: result.name.clone(),
            };
            total_expected = total_expected
                .checked_add(result.expected_total)
                .ok_or_else(overflow)?;
            total_passed = total_passed
                .checked_add(result.passed)
                .ok_or_else(overflow)?;
            rows.push(ReportRow {
                component: component.name.clone(),
                subcomponent: result.name.clone(),
                status: result.run_status.clone(),
                total: result.expected_total,
                passed: result.passed,
            });
        }
    }

    if total_expected == 0 {
        return Err(ReportError::EmptyTaxonomy);
    }

    let pass_percentage = 100.0 * total_passed as f64 / total_expected as f64;
    Ok(Report {
        rows,
        total_expected,
        total_passed,
        pass_percentage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxonomy::Taxonomy;

    fn table(entries: &[(&str, &str, u64)]) -> ResultTable {
        let mut taxonomy = Taxonomy::default();
        let mut components: Vec<(&str, Vec<(String, u64)>)> = Vec::new();
        for (component, subcomponent, total) in entries {
            match components.iter_mut().find(|(name, _)| *name == *component) {
                Some((_, subs)) => subs.push((subcomponent.to_string(), *total)),
                None => components.push((*component, vec![(subcomponent.to_string(), *total)])),
            }
        }
        for (component, subs) in components {
            taxonomy.push_component(component, subs).expect("push");
        }
        ResultTable::seed(&taxonomy)
    }

    #[test]
    fn sums_passed_and_expected_across_components() {
        let mut results = table(&[("core", "a", 10), ("net", "b", 5)]);
        results.resolve("core", "a", RunStatus::terminal("UNSTABLE"), 8);
        results.resolve("net", "b", RunStatus::terminal("SUCCESS"), 5);

        let report = aggregate(&results).expect("aggregate");
        assert_eq!(report.total_passed, 13);
        assert_eq!(report.total_expected, 15);
        assert!((report.pass_percentage - 86.666_666).abs() < 1e-3);
    }

    #[test]
    fn rows_follow_table_order_and_keep_unresolved_entries() {
        let mut results = table(&[("core", "unit", 20), ("core", "lint", 4), ("net", "io", 3)]);
        results.resolve("core", "lint", RunStatus::terminal("SUCCESS"), 4);

        let report = aggregate(&results).expect("aggregate");
        let order: Vec<(&str, &str)> = report
            .rows
            .iter()
            .map(|row| (row.component.as_str(), row.subcomponent.as_str()))
            .collect();
        assert_eq!(order, vec![("core", "unit"), ("core", "lint"), ("net", "io")]);
        assert_eq!(report.rows[0].status, RunStatus::NotAvailable);
        assert_eq!(report.rows[0].passed, 0);
        assert_eq!(report.total_expected, 27);
    }

    #[test]
    fn oversized_counts_are_an_error_not_a_wrap() {
        let mut results = table(&[("core", "a", 20), ("core", "b", 20)]);
        results.resolve("core", "a", RunStatus::terminal("SUCCESS"), u64::MAX);
        results.resolve("core", "b", RunStatus::terminal("SUCCESS"), u64::MAX);

        assert_eq!(
            aggregate(&results),
            Err(ReportError::Overflow {
                component: "core".to_string(),
                subcomponent: "b".to_string(),
            })
        );
    }

    #[test]
    fn zero_expected_total_is_an_error() {
        let results = table(&[]);
        assert_eq!(aggregate(&results), Err(ReportError::EmptyTaxonomy));

        let results = table(&[("core", "unit", 0)]);
        assert_eq!(aggregate(&results), Err(ReportError::EmptyTaxonomy));
    }
}
