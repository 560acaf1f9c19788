//! Dependency Resolver
//!
//! Orders batch operations so every dependency executes before its
//! dependents. Edges come from explicit `depends_on` lists plus every
//! op-id referenced through `$ref:` tokens in parameter values. The
//! order is computed with Kahn's algorithm, stable by declaration order
//! on ties; a non-empty remainder after the queue drains is a cycle,
//! reported with an example path.

use std::collections::{BTreeMap, BTreeSet};

use crate::batch::plan::OperationSpec;
use crate::error::{AppResult, ApplicationError};

/// Validated dependency graph over a batch's operations
#[derive(Debug)]
pub struct DependencyResolver {
    /// Op ids in declaration order
    order: Vec<String>,
    /// id → direct dependencies
    dependencies: BTreeMap<String, BTreeSet<String>>,
    /// id → direct dependents
    dependents: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyResolver {
    /// Build the graph. Ids must already be normalized and unique; every
    /// dependency and `$ref` target must name an operation in the batch.
    pub fn new(operations: &[OperationSpec]) -> AppResult<Self> {
        let mut order = Vec::with_capacity(operations.len());
        let mut seen = BTreeSet::new();
        for spec in operations {
            if !seen.insert(spec.id.clone()) {
                return Err(ApplicationError::bad_request(format!(
                    "duplicate operation ids in batch: {}",
                    spec.id
                )));
            }
            order.push(spec.id.clone());
        }

        let mut dependencies: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut dependents: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for id in &order {
            dependencies.insert(id.clone(), BTreeSet::new());
            dependents.insert(id.clone(), BTreeSet::new());
        }

        for spec in operations {
            for dependency in spec.all_dependencies() {
                if dependency == spec.id {
                    return Err(ApplicationError::bad_request(format!(
                        "operation '{}' depends on itself",
                        spec.id
                    )));
                }
                if !seen.contains(&dependency) {
                    return Err(ApplicationError::bad_request(format!(
                        "operation '{}' depends on unknown operation '{}'",
                        spec.id, dependency
                    )));
                }
                dependencies
                    .get_mut(&spec.id)
                    .expect("id registered above")
                    .insert(dependency.clone());
                dependents
                    .get_mut(&dependency)
                    .expect("id registered above")
                    .insert(spec.id.clone());
            }
        }

        Ok(Self {
            order,
            dependencies,
            dependents,
        })
    }

    /// Topological execution order, stable by declaration order
    pub fn execution_order(&self) -> AppResult<Vec<String>> {
        let mut in_degree: BTreeMap<&str, usize> = self
            .order
            .iter()
            .map(|id| (id.as_str(), self.dependencies[id].len()))
            .collect();

        // Declaration order doubles as the tie-breaking queue order
        let mut ready: Vec<&str> = self
            .order
            .iter()
            .filter(|id| in_degree[id.as_str()] == 0)
            .map(|id| id.as_str())
            .collect();

        let mut sorted = Vec::with_capacity(self.order.len());
        while let Some(id) = ready.first().copied() {
            ready.remove(0);
            sorted.push(id.to_string());

            for dependent in &self.dependents[id] {
                let degree = in_degree.get_mut(dependent.as_str()).expect("known node");
                *degree -= 1;
                if *degree == 0 {
                    // Insert in declaration order to keep the sort stable
                    let position = self
                        .order
                        .iter()
                        .position(|o| o == dependent)
                        .expect("known node");
                    let insert_at = ready
                        .iter()
                        .position(|r| {
                            self.order.iter().position(|o| o == r).expect("known node")
                                > position
                        })
                        .unwrap_or(ready.len());
                    ready.insert(insert_at, dependent.as_str());
                }
            }
        }

        if sorted.len() != self.order.len() {
            let remaining: Vec<&String> = self
                .order
                .iter()
                .filter(|id| !sorted.contains(*id))
                .collect();
            let path = self.cycle_path(remaining[0]);
            return Err(ApplicationError::bad_request(format!(
                "circular dependency detected in batch: {}",
                path.join(" -> ")
            )));
        }

        Ok(sorted)
    }

    /// Walk dependencies from a node stuck in the cycle until one repeats
    fn cycle_path(&self, start: &str) -> Vec<String> {
        let mut path = vec![start.to_string()];
        let mut visited = BTreeSet::new();
        visited.insert(start.to_string());

        let mut current = start.to_string();
        loop {
            let next = self.dependencies[&current].iter().next().cloned();
            match next {
                Some(next) => {
                    path.push(next.clone());
                    if !visited.insert(next.clone()) {
                        return path;
                    }
                    current = next;
                }
                None => return path,
            }
        }
    }

    /// Direct dependencies of an operation
    pub fn dependencies_of(&self, id: &str) -> impl Iterator<Item = &String> {
        self.dependencies
            .get(id)
            .into_iter()
            .flat_map(|set| set.iter())
    }

    /// Every transitive dependency of an operation
    pub fn transitive_dependencies(&self, id: &str) -> BTreeSet<String> {
        let mut collected = BTreeSet::new();
        let mut stack: Vec<String> = self.dependencies_of(id).cloned().collect();
        while let Some(current) = stack.pop() {
            if collected.insert(current.clone()) {
                stack.extend(self.dependencies_of(&current).cloned());
            }
        }
        collected
    }
}
