use crate::status::RunStatus;
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TaxonomyError {
    #[error("component {component:?} is not declared")]
    UnknownComponent { component: String },
    #[error("component {component:?} is declared twice")]
    DuplicateComponent { component: String },
    #[error("subcomponent {subcomponent:?} is declared twice under {component:?}")]
    DuplicateSubcomponent {
        component: String,
        subcomponent: String,
    },
    #[error("expected total for {component}/{subcomponent} is invalid: {reason}")]
    InvalidTotal {
        component: String,
        subcomponent: String,
        reason: String,
    },
}

/// Supplies the declared components and, per component, each subcomponent with the number of
/// tests it is expected to run.
pub trait TaxonomyLoader {
    fn load_components(&self) -> Result<Vec<String>, TaxonomyError>;

    fn load_subcomponents(&self, component: &str) -> Result<Vec<(String, u64)>, TaxonomyError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxonomyComponent {
    pub name: String,
    pub subcomponents: Vec<(String, u64)>,
}

/// Immutable component/subcomponent tree, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Taxonomy {
    components: Vec<TaxonomyComponent>,
}

impl Taxonomy {
    pub fn load(loader: &impl TaxonomyLoader) -> Result<Self, TaxonomyError> {
        let mut taxonomy = Self::default();
        for component in loader.load_components()? {
            let subcomponents = loader.load_subcomponents(&component)?;
            taxonomy.push_component(component, subcomponents)?;
        }
        Ok(taxonomy)
    }

    /// Subcomponent names are folded to lower case, matching how descriptions are decoded.
    pub fn push_component(
        &mut self,
        name: impl Into<String>,
        subcomponents: Vec<(String, u64)>,
    ) -> Result<(), TaxonomyError> {
        let name = name.into();
        if self.component(&name).is_some() {
            return Err(TaxonomyError::DuplicateComponent { component: name });
        }

        let mut seen = BTreeSet::new();
        let mut folded = Vec::with_capacity(subcomponents.len());
        for (subcomponent, expected_total) in subcomponents {
            let subcomponent = subcomponent.to_lowercase();
            if !seen.insert(subcomponent.clone()) {
                return Err(TaxonomyError::DuplicateSubcomponent {
                    component: name,
                    subcomponent,
                });
            }
            folded.push((subcomponent, expected_total));
        }

        self.components.push(TaxonomyComponent {
            name,
            subcomponents: folded,
        });
        Ok(())
    }

    pub fn components(&self) -> &[TaxonomyComponent] {
        &self.components
    }

    pub fn component(&self, name: &str) -> Option<&TaxonomyComponent> {
        self.components.iter().find(|component| component.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.components
            .iter()
            .all(|component| component.subcomponents.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubcomponentResult {
    pub name: String,
    pub run_status: RunStatus,
    pub expected_total: u64,
    pub passed: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentResults {
    pub name: String,
    pub subcomponents: Vec<SubcomponentResult>,
}

/// Why an update was or was not applied to the result table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    Applied,
    UnknownComponent,
    UnknownSubcomponent,
    AlreadyResolved,
}

/// Per-subcomponent results for one target build. Every entry starts as `NA` and can be
/// resolved exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultTable {
    components: Vec<ComponentResults>,
}

impl ResultTable {
    pub fn seed(taxonomy: &Taxonomy) -> Self {
        let components = taxonomy
            .components()
            .iter()
            .map(|component| ComponentResults {
                name: component.name.clone(),
                subcomponents: component
                    .subcomponents
                    .iter()
                    .map(|(name, expected_total)| SubcomponentResult {
                        name: name.clone(),
                        run_status: RunStatus::NotAvailable,
                        expected_total: *expected_total,
                        passed: 0,
                    })
                    .collect(),
            })
            .collect();
        Self { components }
    }

    pub fn components(&self) -> &[ComponentResults] {
        &self.components
    }

    pub fn get(&self, component: &str, subcomponent: &str) -> Option<&SubcomponentResult> {
        self.components
            .iter()
            .find(|entry| entry.name == component)?
            .subcomponents
            .iter()
            .find(|entry| entry.name == subcomponent)
    }

    pub fn resolved_count(&self) -> usize {
        self.components
            .iter()
            .flat_map(|component| component.subcomponents.iter())
            .filter(|result| result.run_status.is_available())
            .count()
    }

    /// Records the outcome for a subcomponent unless it already has one.
    pub fn resolve(
        &mut self,
        component: &str,
        subcomponent: &str,
        run_status: RunStatus,
        passed: u64,
    ) -> MatchOutcome {
        let Some(entry) = self
            .components
            .iter_mut()
            .find(|entry| entry.name == component)
        else {
            return MatchOutcome::UnknownComponent;
        };
        let Some(result) = entry
            .subcomponents
            .iter_mut()
            .find(|result| result.name == subcomponent)
        else {
            return MatchOutcome::UnknownSubcomponent;
        };
        if result.run_status.is_available() {
            return MatchOutcome::AlreadyResolved;
        }

        result.run_status = run_status;
        result.passed = passed;
        MatchOutcome::Applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    struct MapLoader(Vec<(String, Vec<(String, u64)>)>);

    impl TaxonomyLoader for MapLoader {
        fn load_components(&self) -> Result<Vec<String>, TaxonomyError> {
            Ok(self.0.iter().map(|(name, _)| name.clone()).collect())
        }

        fn load_subcomponents(
            &self,
            component: &str,
        ) -> Result<Vec<(String, u64)>, TaxonomyError> {
            self.0
                .iter()
                .find(|(name, _)| name == component)
                .map(|(_, subs)| subs.clone())
                .ok_or_else(|| TaxonomyError::UnknownComponent {
                    component: component.to_string(),
                })
        }
    }

    fn sample() -> Taxonomy {
        let loader = MapLoader(vec![
            (
                "core".to_string(),
                vec![("Unit".to_string(), 20), ("lint".to_string(), 4)],
            ),
            ("net".to_string(), vec![("sockets".to_string(), 7)]),
        ]);
        Taxonomy::load(&loader).expect("load taxonomy")
    }

    #[test]
    fn load_keeps_declaration_order_and_folds_subcomponents() {
        let taxonomy = sample();
        let names: Vec<&str> = taxonomy
            .components()
            .iter()
            .map(|component| component.name.as_str())
            .collect();
        assert_eq!(names, vec!["core", "net"]);
        assert_eq!(
            taxonomy.component("core").expect("core").subcomponents[0],
            ("unit".to_string(), 20)
        );
    }

    #[test]
    fn duplicate_subcomponent_after_folding_is_rejected() {
        let mut taxonomy = Taxonomy::default();
        let err = taxonomy
            .push_component(
                "core",
                vec![("unit".to_string(), 1), ("UNIT".to_string(), 2)],
            )
            .expect_err("duplicate");
        assert!(matches!(err, TaxonomyError::DuplicateSubcomponent { .. }));
    }

    #[test]
    fn seeded_table_starts_unavailable() {
        let table = ResultTable::seed(&sample());
        let unit = table.get("core", "unit").expect("unit");
        assert_eq!(unit.run_status, RunStatus::NotAvailable);
        assert_eq!(unit.expected_total, 20);
        assert_eq!(unit.passed, 0);
        assert_eq!(table.resolved_count(), 0);
    }

    #[test]
    fn resolve_is_first_writer_wins() {
        let mut table = ResultTable::seed(&sample());
        assert_eq!(
            table.resolve("core", "unit", RunStatus::terminal("FAILURE"), 3),
            MatchOutcome::Applied
        );
        assert_eq!(
            table.resolve("core", "unit", RunStatus::terminal("SUCCESS"), 20),
            MatchOutcome::AlreadyResolved
        );
        let unit = table.get("core", "unit").expect("unit");
        assert_eq!(unit.run_status.as_str(), "FAILURE");
        assert_eq!(unit.passed, 3);
    }

    #[test]
    fn resolve_reports_taxonomy_misses() {
        let mut table = ResultTable::seed(&sample());
        let before = table.clone();
        assert_eq!(
            table.resolve("storage", "unit", RunStatus::terminal("SUCCESS"), 1),
            MatchOutcome::UnknownComponent
        );
        assert_eq!(
            table.resolve("net", "unit", RunStatus::terminal("SUCCESS"), 1),
            MatchOutcome::UnknownSubcomponent
        );
        assert_eq!(table, before);
    }

    #[test]
    fn empty_components_make_an_empty_taxonomy() {
        let mut taxonomy = Taxonomy::default();
        assert!(taxonomy.is_empty());
        taxonomy
            .push_component("core", Vec::new())
            .expect("push empty component");
        assert!(taxonomy.is_empty());
    }
}
