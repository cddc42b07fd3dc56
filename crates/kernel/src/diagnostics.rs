//! Статическая диагностика kernel: компоненты, ждущие зависимостей, и циклы
//! в графе компонентов (DFS с recursion stack).

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use crate::description::Cardinality;
use crate::handler::{Handler, MissingDependency};

/// Граф "компонент → компоненты, которые могут удовлетворить его слоты"
#[derive(Debug, Default)]
pub struct DependencyGraph {
    dependencies: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_handlers(handlers: &[Arc<Handler>]) -> Self {
        let mut graph = Self::new();
        for handler in handlers {
            let name = handler.name();
            graph.dependencies.entry(name.to_string()).or_default();

            for slot in handler.description().dependencies() {
                let target = slot.target();
                let providers = handlers.iter().filter(|candidate| {
                    candidate.name() != name
                        && candidate.description().provides(&target)
                        && match (slot.cardinality(), slot.name_hint()) {
                            (Cardinality::Single, Some(hint)) => candidate.name() == hint,
                            _ => true,
                        }
                });
                for provider in providers {
                    graph.add_dependency(name, provider.name());
                }
            }
        }
        graph
    }

    pub fn add_dependency(&mut self, dependent: &str, dependency: &str) {
        self.dependencies
            .entry(dependent.to_string())
            .or_default()
            .insert(dependency.to_string());
        self.dependencies.entry(dependency.to_string()).or_default();
    }

    pub fn dependencies_of(&self, component: &str) -> Option<&BTreeSet<String>> {
        self.dependencies.get(component)
    }

    pub fn find_cycles(&self) -> Vec<Vec<String>> {
        let mut cycles = Vec::new();
        let mut visited = BTreeSet::new();
        let mut stack = BTreeSet::new();
        let mut path = Vec::new();

        for node in self.dependencies.keys() {
            if !visited.contains(node.as_str()) {
                self.visit(node, &mut visited, &mut stack, &mut path, &mut cycles);
            }
        }
        cycles
    }

    fn visit<'g>(
        &'g self,
        node: &'g str,
        visited: &mut BTreeSet<&'g str>,
        stack: &mut BTreeSet<&'g str>,
        path: &mut Vec<&'g str>,
        cycles: &mut Vec<Vec<String>>,
    ) {
        visited.insert(node);
        stack.insert(node);
        path.push(node);

        if let Some(neighbors) = self.dependencies.get(node) {
            for neighbor in neighbors {
                if !visited.contains(neighbor.as_str()) {
                    self.visit(neighbor, visited, stack, path, cycles);
                } else if stack.contains(neighbor.as_str()) {
                    if let Some(start) = path.iter().position(|candidate| *candidate == neighbor) {
                        let mut cycle: Vec<String> = path[start..].iter().map(|name| name.to_string()).collect();
                        cycle.push(neighbor.clone());
                        cycles.push(cycle);
                    }
                }
            }
        }

        stack.remove(node);
        path.pop();
    }

    /// Порядок создания: зависимости раньше зависимых; `None` при цикле
    pub fn creation_order(&self) -> Option<Vec<String>> {
        let mut remaining: BTreeMap<&str, usize> = self
            .dependencies
            .iter()
            .map(|(name, deps)| (name.as_str(), deps.len()))
            .collect();
        let mut ready: VecDeque<&str> = remaining
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(name, _)| *name)
            .collect();
        let mut order = Vec::with_capacity(remaining.len());

        while let Some(node) = ready.pop_front() {
            order.push(node.to_string());
            for (dependent, deps) in &self.dependencies {
                if deps.contains(node) {
                    if let Some(count) = remaining.get_mut(dependent.as_str()) {
                        *count -= 1;
                        if *count == 0 {
                            ready.push_back(dependent.as_str());
                        }
                    }
                }
            }
        }

        (order.len() == self.dependencies.len()).then_some(order)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WaitingComponent {
    pub component: String,
    pub missing: Vec<String>,
}

/// Отчёт `Kernel::diagnose`
#[derive(Debug, Clone, Default, Serialize)]
pub struct DiagnosticsReport {
    pub components: usize,
    pub waiting: Vec<WaitingComponent>,
    pub cycles: Vec<Vec<String>>,
    pub creation_order: Option<Vec<String>>,
}

impl DiagnosticsReport {
    pub(crate) fn collect(handlers: &[Arc<Handler>]) -> Self {
        let waiting = handlers
            .iter()
            .filter(|handler| !handler.is_valid())
            .map(|handler| WaitingComponent {
                component: handler.name().to_string(),
                missing: handler
                    .missing_dependencies()
                    .iter()
                    .map(MissingDependency::to_string)
                    .collect(),
            })
            .collect();

        let graph = DependencyGraph::from_handlers(handlers);
        Self {
            components: handlers.len(),
            waiting,
            cycles: graph.find_cycles(),
            creation_order: graph.creation_order(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.waiting.is_empty() && self.cycles.is_empty()
    }
}

impl fmt::Display for DiagnosticsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "components: {}", self.components)?;
        for waiting in &self.waiting {
            writeln!(f, "waiting: {} (missing {})", waiting.component, waiting.missing.join(", "))?;
        }
        for cycle in &self.cycles {
            writeln!(f, "cycle: {}", cycle.join(" -> "))?;
        }
        if self.is_healthy() {
            writeln!(f, "status: healthy")?;
        }
        Ok(())
    }
}
