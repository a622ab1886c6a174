//! Stage definitions.

use crate::errors::GraphError;
use serde::{Deserialize, Serialize};

/// Static definition of one analysis stage.
///
/// Definitions are immutable once a [`super::StageGraph`] has been built from them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDefinition {
    /// The unique stage identifier.
    pub id: String,
    /// Short human name.
    pub name: String,
    /// Long human name used in stage messages.
    #[serde(default)]
    pub full_name: String,
    /// What the stage analyses.
    #[serde(default)]
    pub description: String,
    /// Identifiers of the stages whose results this stage consumes, in order.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Key indicator names the stage is expected to produce.
    #[serde(default)]
    pub indicators: Vec<String>,
}

impl StageDefinition {
    /// Creates a new stage definition without dependencies.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: id.into(),
            full_name: name.clone(),
            name,
            description: String::new(),
            dependencies: Vec::new(),
            indicators: Vec::new(),
        }
    }

    /// Sets the dependencies.
    #[must_use]
    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Adds a dependency.
    #[must_use]
    pub fn with_dependency(mut self, dep: impl Into<String>) -> Self {
        let dep = dep.into();
        if !self.dependencies.contains(&dep) {
            self.dependencies.push(dep);
        }
        self
    }

    /// Sets the long name.
    #[must_use]
    pub fn with_full_name(mut self, full_name: impl Into<String>) -> Self {
        self.full_name = full_name.into();
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the key indicators.
    #[must_use]
    pub fn with_indicators(mut self, indicators: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.indicators = indicators.into_iter().map(Into::into).collect();
        self
    }

    /// Returns true if this stage declares `stage_id` as a dependency.
    #[must_use]
    pub fn depends_on(&self, stage_id: &str) -> bool {
        self.dependencies.iter().any(|d| d == stage_id)
    }

    /// Validates the definition in isolation.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::CyclicDependency`] if the stage depends on itself.
    pub fn validate(&self) -> Result<(), GraphError> {
        if self.depends_on(&self.id) {
            return Err(GraphError::cyclic(vec![self.id.clone(), self.id.clone()]));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_definition_creation() {
        let def = StageDefinition::new("BLOC5", "ODD")
            .with_full_name("Modeles durables et alignement ODD")
            .with_dependencies(["BLOC1", "BLOC2"])
            .with_indicators(["indice_odd"]);

        assert_eq!(def.id, "BLOC5");
        assert_eq!(def.dependencies, vec!["BLOC1", "BLOC2"]);
        assert!(def.depends_on("BLOC2"));
        assert!(!def.depends_on("BLOC3"));
        assert_eq!(def.indicators.len(), 1);
    }

    #[test]
    fn test_with_dependency_deduplicates() {
        let def = StageDefinition::new("S2", "two")
            .with_dependency("S1")
            .with_dependency("S1");
        assert_eq!(def.dependencies, vec!["S1"]);
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let def = StageDefinition::new("S1", "one").with_dependency("S1");
        assert_eq!(
            def.validate(),
            Err(GraphError::cyclic(vec!["S1".into(), "S1".into()]))
        );
    }

    #[test]
    fn test_full_name_defaults_to_name() {
        let def = StageDefinition::new("S1", "one");
        assert_eq!(def.full_name, "one");
    }
}
