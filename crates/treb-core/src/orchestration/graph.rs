//! Dependency graph validation and ranking.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::error::{Result, TrebError};

use super::plan::{Component, OrchestrationPlan};

/// A component with its topological rank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedComponent {
    pub component: Component,
    /// 0 for components without deps, otherwise 1 + max rank of its deps.
    pub rank: usize,
    /// Position in the plan document.
    pub declared_at: usize,
}

/// Components in execution order: rank ascending, ties by declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPlan {
    pub group: String,
    pub steps: Vec<PlannedComponent>,
}

impl ExecutionPlan {
    /// Validate `plan` and order it. Fails before anything runs on unknown deps,
    /// duplicate names or cycles.
    pub fn build(plan: &OrchestrationPlan) -> Result<Self> {
        let mut positions: BTreeMap<&str, usize> = BTreeMap::new();
        for (index, component) in plan.components.iter().enumerate() {
            if positions.insert(component.name.as_str(), index).is_some() {
                return Err(TrebError::validation(format!(
                    "component '{}' is declared twice",
                    component.name
                )));
            }
        }

        let count = plan.components.len();
        let mut in_degree = vec![0usize; count];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];
        for (index, component) in plan.components.iter().enumerate() {
            let unique: BTreeSet<&str> = component.deps.iter().map(String::as_str).collect();
            for dep in unique {
                let &dep_index = positions.get(dep).ok_or_else(|| {
                    TrebError::validation(format!(
                        "component '{}' depends on unknown component '{}'",
                        component.name, dep
                    ))
                })?;
                in_degree[index] += 1;
                dependents[dep_index].push(index);
            }
        }

        // Kahn's algorithm; the queue is seeded in declaration order.
        let mut ranks = vec![0usize; count];
        let mut queue: VecDeque<usize> = (0..count).filter(|&i| in_degree[i] == 0).collect();
        let mut visited = 0;
        while let Some(index) = queue.pop_front() {
            visited += 1;
            for &dependent in &dependents[index] {
                ranks[dependent] = ranks[dependent].max(ranks[index] + 1);
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    queue.push_back(dependent);
                }
            }
        }

        if visited < count {
            let members: Vec<&str> = plan
                .components
                .iter()
                .enumerate()
                .filter(|(i, _)| in_degree[*i] > 0)
                .map(|(_, c)| c.name.as_str())
                .collect();
            return Err(TrebError::validation(format!(
                "dependency cycle among components: {}",
                members.join(", ")
            )));
        }

        let mut steps: Vec<PlannedComponent> = plan
            .components
            .iter()
            .enumerate()
            .map(|(index, component)| PlannedComponent {
                component: component.clone(),
                rank: ranks[index],
                declared_at: index,
            })
            .collect();
        steps.sort_by_key(|s| (s.rank, s.declared_at));

        Ok(Self {
            group: plan.group.clone(),
            steps,
        })
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn rank_of(&self, name: &str) -> Option<usize> {
        self.steps
            .iter()
            .find(|s| s.component.name == name)
            .map(|s| s.rank)
    }

    /// Every component that depends on `name`, directly or not.
    pub fn transitive_dependents(&self, name: &str) -> BTreeSet<String> {
        let mut found = BTreeSet::new();
        let mut frontier = vec![name.to_string()];
        while let Some(current) = frontier.pop() {
            for step in &self.steps {
                if step.component.deps.contains(&current)
                    && found.insert(step.component.name.clone())
                {
                    frontier.push(step.component.name.clone());
                }
            }
        }
        found
    }
}
