//! Stage graph validation and phased execution planning.
//!
//! The plan is a layered topological sort: every phase holds the stages whose
//! dependencies were all placed in earlier phases. Stages of one phase have no
//! edges between them and run concurrently.

use super::StageDefinition;
use crate::errors::GraphError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

/// An ordered list of phases, each a set of stage identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExecutionPlan {
    phases: Vec<Vec<String>>,
}

impl ExecutionPlan {
    /// Returns the phases in execution order.
    #[must_use]
    pub fn phases(&self) -> &[Vec<String>] {
        &self.phases
    }

    /// Returns the number of phases.
    #[must_use]
    pub fn len(&self) -> usize {
        self.phases.len()
    }

    /// Returns true if the plan has no phases.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    /// Returns the phase at `index`.
    #[must_use]
    pub fn phase(&self, index: usize) -> Option<&[String]> {
        self.phases.get(index).map(Vec::as_slice)
    }

    /// Returns the index of the phase containing `stage_id`.
    #[must_use]
    pub fn phase_of(&self, stage_id: &str) -> Option<usize> {
        self.phases
            .iter()
            .position(|phase| phase.iter().any(|s| s == stage_id))
    }

    /// Returns the total number of planned stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.phases.iter().map(Vec::len).sum()
    }

    /// Returns the phases as sets, for order-insensitive comparison.
    #[must_use]
    pub fn as_sets(&self) -> Vec<BTreeSet<String>> {
        self.phases
            .iter()
            .map(|phase| phase.iter().cloned().collect())
            .collect()
    }
}

/// A validated, acyclic graph of stage definitions with its cached plan.
#[derive(Debug, Clone)]
pub struct StageGraph {
    /// Definitions in declaration order.
    stages: Vec<StageDefinition>,
    /// Position of each stage in `stages`.
    index: HashMap<String, usize>,
    /// Stages that exist upstream but were left out of this graph.
    excluded: BTreeSet<String>,
    /// The layered execution plan, computed once.
    plan: ExecutionPlan,
}

impl StageGraph {
    /// Validates the definitions and computes the execution plan.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownDependency`] if an edge targets an undefined
    /// stage and [`GraphError::CyclicDependency`] if the edges form a cycle.
    pub fn new(stages: Vec<StageDefinition>) -> Result<Self, GraphError> {
        Self::build(stages, BTreeSet::new())
    }

    fn build(stages: Vec<StageDefinition>, excluded: BTreeSet<String>) -> Result<Self, GraphError> {
        if stages.is_empty() {
            return Err(GraphError::Empty);
        }

        let mut index = HashMap::with_capacity(stages.len());
        for (position, def) in stages.iter().enumerate() {
            if index.insert(def.id.clone(), position).is_some() {
                return Err(GraphError::DuplicateStage {
                    stage: def.id.clone(),
                });
            }
        }

        for def in &stages {
            def.validate()?;
            for dep in &def.dependencies {
                if !index.contains_key(dep) && !excluded.contains(dep) {
                    return Err(GraphError::unknown_dependency(&def.id, dep));
                }
            }
        }

        let plan = layered_sort(&stages, &index)?;

        Ok(Self {
            stages,
            index,
            excluded,
            plan,
        })
    }

    /// Returns the cached execution plan.
    #[must_use]
    pub fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }

    /// Returns the definitions in declaration order.
    #[must_use]
    pub fn stages(&self) -> &[StageDefinition] {
        &self.stages
    }

    /// Returns the stage identifiers in declaration order.
    #[must_use]
    pub fn stage_ids(&self) -> Vec<String> {
        self.stages.iter().map(|s| s.id.clone()).collect()
    }

    /// Returns a stage definition.
    #[must_use]
    pub fn stage(&self, stage_id: &str) -> Option<&StageDefinition> {
        self.index.get(stage_id).map(|&i| &self.stages[i])
    }

    /// Returns true if the graph contains the stage.
    #[must_use]
    pub fn contains(&self, stage_id: &str) -> bool {
        self.index.contains_key(stage_id)
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns true if the graph has no stages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Returns true if `stage_id` is a known stage that was left out of this graph.
    #[must_use]
    pub fn is_excluded(&self, stage_id: &str) -> bool {
        self.excluded.contains(stage_id)
    }

    /// Builds a graph over a subset of the stages.
    ///
    /// Dependencies on stages outside the subset are kept on the definitions
    /// but ignored for scheduling; [`Self::is_excluded`] reports them.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownStage`] if a requested id is not in the graph
    /// and [`GraphError::Empty`] if the subset is empty.
    pub fn restricted_to<S: AsRef<str>>(&self, stage_ids: &[S]) -> Result<Self, GraphError> {
        let wanted: HashSet<&str> = stage_ids.iter().map(AsRef::as_ref).collect();
        for id in &wanted {
            if !self.contains(id) {
                return Err(GraphError::UnknownStage {
                    stage: (*id).to_string(),
                });
            }
        }

        let stages: Vec<StageDefinition> = self
            .stages
            .iter()
            .filter(|s| wanted.contains(s.id.as_str()))
            .cloned()
            .collect();

        let mut excluded = self.excluded.clone();
        excluded.extend(
            self.stages
                .iter()
                .filter(|s| !wanted.contains(s.id.as_str()))
                .map(|s| s.id.clone()),
        );

        Self::build(stages, excluded)
    }
}

/// Places stages into phases, repeatedly taking every stage whose in-graph
/// dependencies are already placed. Phases keep declaration order.
fn layered_sort(
    stages: &[StageDefinition],
    index: &HashMap<String, usize>,
) -> Result<ExecutionPlan, GraphError> {
    let mut placed: HashSet<&str> = HashSet::with_capacity(stages.len());
    let mut remaining: Vec<&StageDefinition> = stages.iter().collect();
    let mut phases = Vec::new();

    while !remaining.is_empty() {
        let (ready, blocked): (Vec<&StageDefinition>, Vec<&StageDefinition>) =
            remaining.into_iter().partition(|def| {
                def.dependencies
                    .iter()
                    .filter(|dep| index.contains_key(dep.as_str()))
                    .all(|dep| placed.contains(dep.as_str()))
            });

        if ready.is_empty() {
            return Err(GraphError::cyclic(find_cycle(&blocked, index)));
        }

        placed.extend(ready.iter().map(|def| def.id.as_str()));
        phases.push(ready.iter().map(|def| def.id.clone()).collect());
        remaining = blocked;
    }

    Ok(ExecutionPlan { phases })
}

/// Returns one cycle among `blocked` stages as a path whose first stage is
/// repeated at the end. Every blocked stage lies on or behind a cycle.
fn find_cycle(blocked: &[&StageDefinition], index: &HashMap<String, usize>) -> Vec<String> {
    let by_id: HashMap<&str, &StageDefinition> =
        blocked.iter().map(|def| (def.id.as_str(), *def)).collect();

    let Some(start) = blocked.first() else {
        return Vec::new();
    };

    // Walk blocked dependencies until a stage repeats.
    let mut path: Vec<&str> = vec![start.id.as_str()];
    let mut current = *start;
    loop {
        let next = current
            .dependencies
            .iter()
            .filter(|dep| index.contains_key(dep.as_str()))
            .find_map(|dep| by_id.get(dep.as_str()).copied());

        let Some(next) = next else {
            return path.into_iter().map(str::to_string).collect();
        };

        if let Some(pos) = path.iter().position(|id| *id == next.id) {
            let mut cycle: Vec<String> = path[pos..].iter().map(|s| (*s).to_string()).collect();
            cycle.push(next.id.clone());
            return cycle;
        }

        path.push(next.id.as_str());
        current = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn def(id: &str, deps: &[&str]) -> StageDefinition {
        StageDefinition::new(id, id).with_dependencies(deps.iter().copied())
    }

    fn sets(phases: &[&[&str]]) -> Vec<BTreeSet<String>> {
        phases
            .iter()
            .map(|p| p.iter().map(|s| (*s).to_string()).collect())
            .collect()
    }

    fn assert_plan_respects_edges(graph: &StageGraph) {
        let plan = graph.plan();
        assert_eq!(plan.stage_count(), graph.len());
        for stage in graph.stages() {
            let phase = plan.phase_of(&stage.id).unwrap();
            let occurrences = plan
                .phases()
                .iter()
                .flatten()
                .filter(|s| **s == stage.id)
                .count();
            assert_eq!(occurrences, 1, "{} placed more than once", stage.id);
            for dep in stage.dependencies.iter().filter(|d| graph.contains(d)) {
                assert!(plan.phase_of(dep).unwrap() < phase, "{dep} not before {}", stage.id);
            }
        }
    }

    #[test]
    fn test_four_stage_plan() {
        let graph = StageGraph::new(vec![
            def("S1", &[]),
            def("S2", &["S1"]),
            def("S3", &["S1"]),
            def("S4", &["S1", "S2"]),
        ])
        .unwrap();

        assert_eq!(graph.plan().as_sets(), sets(&[&["S1"], &["S2", "S3"], &["S4"]]));
        assert_plan_respects_edges(&graph);
    }

    #[test]
    fn test_declaration_order_does_not_matter() {
        let graph = StageGraph::new(vec![
            def("S4", &["S1", "S2"]),
            def("S3", &["S1"]),
            def("S2", &["S1"]),
            def("S1", &[]),
        ])
        .unwrap();

        assert_eq!(graph.plan().as_sets(), sets(&[&["S1"], &["S2", "S3"], &["S4"]]));
    }

    #[test]
    fn test_independent_roots_share_phase_zero() {
        let graph = StageGraph::new(vec![def("A", &[]), def("B", &[]), def("C", &["A"])]).unwrap();

        assert_eq!(graph.plan().as_sets(), sets(&[&["A", "B"], &["C"]]));
    }

    #[test]
    fn test_two_stage_cycle_detected() {
        let err = StageGraph::new(vec![def("A", &["B"]), def("B", &["A"])]).unwrap_err();

        match err {
            GraphError::CyclicDependency { cycle_path } => {
                assert_eq!(cycle_path.first(), cycle_path.last());
                assert!(cycle_path.contains(&"A".to_string()));
                assert!(cycle_path.contains(&"B".to_string()));
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_cycle_behind_valid_prefix() {
        let err = StageGraph::new(vec![
            def("root", &[]),
            def("tail", &["x"]),
            def("x", &["root", "y"]),
            def("y", &["z"]),
            def("z", &["x"]),
        ])
        .unwrap_err();

        let GraphError::CyclicDependency { cycle_path } = err else {
            panic!("expected cycle");
        };
        assert_eq!(cycle_path.len(), 4);
        assert_eq!(cycle_path.first(), cycle_path.last());
        assert!(!cycle_path.contains(&"tail".to_string()));
    }

    #[test]
    fn test_unknown_dependency() {
        let err = StageGraph::new(vec![def("S1", &[]), def("S2", &["S9"])]).unwrap_err();
        assert_eq!(err, GraphError::unknown_dependency("S2", "S9"));
    }

    #[test]
    fn test_duplicate_and_empty() {
        assert_eq!(
            StageGraph::new(vec![def("S1", &[]), def("S1", &[])]).unwrap_err(),
            GraphError::DuplicateStage { stage: "S1".into() }
        );
        assert_eq!(StageGraph::new(Vec::new()).unwrap_err(), GraphError::Empty);
    }

    #[test]
    fn test_restricted_graph_drops_excluded_edges() {
        let graph = StageGraph::new(vec![
            def("S1", &[]),
            def("S2", &["S1"]),
            def("S3", &["S1"]),
            def("S4", &["S1", "S2"]),
        ])
        .unwrap();

        let subset = graph.restricted_to(&["S1", "S4"]).unwrap();

        assert_eq!(subset.len(), 2);
        assert!(subset.is_excluded("S2"));
        assert!(!subset.is_excluded("S1"));
        assert_eq!(subset.plan().as_sets(), sets(&[&["S1"], &["S4"]]));
        assert_eq!(subset.stage("S4").unwrap().dependencies, vec!["S1", "S2"]);
    }

    #[test]
    fn test_restricted_graph_rejects_unknown_stage() {
        let graph = StageGraph::new(vec![def("S1", &[])]).unwrap();
        assert_eq!(
            graph.restricted_to(&["S7"]).unwrap_err(),
            GraphError::UnknownStage { stage: "S7".into() }
        );
    }

    #[test]
    fn test_generated_layered_graphs_respect_edges() {
        // Every stage i depends on the stages i-1 and i/2, which yields a mix of
        // chains and fan-in at various widths.
        for size in 1..24 {
            let defs: Vec<StageDefinition> = (0..size)
                .map(|i| {
                    let mut deps = Vec::new();
                    if i > 0 && i % 3 != 0 {
                        deps.push(format!("n{}", i - 1));
                    }
                    if i > 1 {
                        deps.push(format!("n{}", i / 2));
                    }
                    StageDefinition::new(format!("n{i}"), "node").with_dependencies(deps)
                })
                .collect();

            let graph = StageGraph::new(defs).unwrap();
            assert_plan_respects_edges(&graph);
        }
    }
}
