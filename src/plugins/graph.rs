//! Dependency resolution into a registration order.
//!
//! # Algorithm
//! ```text
//! 1. index descriptors by name (duplicates rejected)
//! 2. every declared dependency must name an indexed descriptor
//! 3. depth-first from each descriptor in declaration order:
//!        Unvisited → InProgress → (visit deps in declared order) → Done, emit
//!    reaching an InProgress node means the stack above it is a cycle
//! ```
//!
//! Post-order emission places every plugin after its dependencies; walking
//! roots and edges in declaration order makes the result reproducible.

use std::collections::HashMap;

use crate::plugins::descriptor::PluginDescriptor;
use crate::plugins::error::PluginDependencyError;

/// Descriptors in an order where each follows all of its dependencies.
#[derive(Debug, Clone)]
pub struct RegistrationOrder {
    plugins: Vec<PluginDescriptor>,
}

impl RegistrationOrder {
    pub fn iter(&self) -> impl Iterator<Item = &PluginDescriptor> {
        self.plugins.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.plugins.iter().map(PluginDescriptor::name).collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

struct Traversal<'a> {
    descriptors: &'a [PluginDescriptor],
    index: HashMap<&'a str, usize>,
    marks: Vec<Mark>,
    stack: Vec<usize>,
    order: Vec<usize>,
}

impl Traversal<'_> {
    fn visit(&mut self, node: usize) -> Result<(), PluginDependencyError> {
        match self.marks[node] {
            Mark::Done => return Ok(()),
            Mark::InProgress => {
                let start = self
                    .stack
                    .iter()
                    .position(|&n| n == node)
                    .unwrap_or_default();
                let involved = self.stack[start..]
                    .iter()
                    .map(|&n| self.descriptors[n].name().to_string())
                    .collect();
                return Err(PluginDependencyError::Cycle { involved });
            }
            Mark::Unvisited => {}
        }

        self.marks[node] = Mark::InProgress;
        self.stack.push(node);

        let descriptors = self.descriptors;
        for dependency in descriptors[node].dependencies() {
            let next = self.index[dependency.as_str()];
            self.visit(next)?;
        }

        self.stack.pop();
        self.marks[node] = Mark::Done;
        self.order.push(node);
        Ok(())
    }
}

/// Compute a registration order for `descriptors`.
///
/// Fails on duplicate names, dependencies on unknown plugins, and cycles
/// (including a plugin depending on itself).
pub fn resolve(
    descriptors: Vec<PluginDescriptor>,
) -> Result<RegistrationOrder, PluginDependencyError> {
    let mut index = HashMap::with_capacity(descriptors.len());
    for (position, descriptor) in descriptors.iter().enumerate() {
        if index.insert(descriptor.name(), position).is_some() {
            return Err(PluginDependencyError::Duplicate {
                name: descriptor.name().to_string(),
            });
        }
    }

    for descriptor in &descriptors {
        if let Some(missing) = descriptor
            .dependencies()
            .iter()
            .find(|dep| !index.contains_key(dep.as_str()))
        {
            return Err(PluginDependencyError::Missing {
                plugin: descriptor.name().to_string(),
                name: missing.clone(),
            });
        }
    }

    let mut traversal = Traversal {
        descriptors: &descriptors,
        index,
        marks: vec![Mark::Unvisited; descriptors.len()],
        stack: Vec::new(),
        order: Vec::with_capacity(descriptors.len()),
    };
    for node in 0..descriptors.len() {
        traversal.visit(node)?;
    }

    let order = traversal.order;
    let mut slots: Vec<Option<PluginDescriptor>> = descriptors.into_iter().map(Some).collect();
    let plugins = order
        .into_iter()
        .filter_map(|position| slots[position].take())
        .collect();

    Ok(RegistrationOrder { plugins })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::error::DependencyErrorKind;

    fn plugin(name: &str, deps: &[&str]) -> PluginDescriptor {
        deps.iter()
            .fold(PluginDescriptor::new(name, |_| Ok(())), |d, dep| d.depends_on(*dep))
    }

    #[test]
    fn independent_plugins_keep_declaration_order() {
        let order = resolve(vec![plugin("c", &[]), plugin("a", &[]), plugin("b", &[])]).unwrap();
        assert_eq!(order.names(), vec!["c", "a", "b"]);
    }

    #[test]
    fn dependencies_come_first() {
        let order = resolve(vec![
            plugin("routes", &["auth", "db"]),
            plugin("auth", &["db"]),
            plugin("db", &[]),
        ])
        .unwrap();
        assert_eq!(order.names(), vec!["db", "auth", "routes"]);
    }

    #[test]
    fn diamond_registers_shared_dependency_once() {
        let order = resolve(vec![
            plugin("app", &["left", "right"]),
            plugin("left", &["base"]),
            plugin("right", &["base"]),
            plugin("base", &[]),
        ])
        .unwrap();
        assert_eq!(order.names(), vec!["base", "left", "right", "app"]);
    }

    #[test]
    fn cycle_names_its_members() {
        let err = resolve(vec![
            plugin("standalone", &[]),
            plugin("a", &["b"]),
            plugin("b", &["c"]),
            plugin("c", &["a"]),
        ])
        .unwrap_err();
        assert_eq!(err.kind(), DependencyErrorKind::Cycle);
        match err {
            PluginDependencyError::Cycle { involved } => {
                assert_eq!(involved, vec!["a", "b", "c"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn cycle_reported_from_entry_point_excludes_tail() {
        let err = resolve(vec![plugin("entry", &["x"]), plugin("x", &["y"]), plugin("y", &["x"])])
            .unwrap_err();
        assert_eq!(
            err,
            PluginDependencyError::Cycle {
                involved: vec!["x".into(), "y".into()]
            }
        );
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let err = resolve(vec![plugin("loop", &["loop"])]).unwrap_err();
        assert_eq!(
            err,
            PluginDependencyError::Cycle {
                involved: vec!["loop".into()]
            }
        );
    }

    #[test]
    fn missing_dependency_is_named() {
        let err = resolve(vec![plugin("users", &["db", "cache"]), plugin("db", &[])]).unwrap_err();
        assert_eq!(
            err,
            PluginDependencyError::Missing {
                plugin: "users".into(),
                name: "cache".into()
            }
        );
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let err = resolve(vec![plugin("db", &[]), plugin("db", &[])]).unwrap_err();
        assert_eq!(err.kind(), DependencyErrorKind::Duplicate);
    }
}
