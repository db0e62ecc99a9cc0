//! Domain-scoped role graph.
//!
//! Edges point from a member to the roles it holds. Graphs may contain
//! cycles; [`RoleGraph::closure`] tracks visited nodes so every traversal
//! terminates.
use std::collections::{HashMap, HashSet, VecDeque};

#[derive(Debug, Clone, Default)]
pub struct RoleGraph {
    edges: HashMap<String, Vec<String>>,
}

impl RoleGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, member: &str, role: &str) {
        let roles = self.edges.entry(member.to_string()).or_default();
        if !roles.iter().any(|existing| existing == role) {
            roles.push(role.to_string());
        }
    }

    pub fn direct_roles(&self, member: &str) -> &[String] {
        self.edges.get(member).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Every name reachable from `seeds`, seeds included.
    pub fn closure<'a, I>(&self, seeds: I) -> HashSet<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        for seed in seeds {
            if visited.insert(seed.to_string()) {
                queue.push_back(seed.to_string());
            }
        }
        while let Some(current) = queue.pop_front() {
            for role in self.direct_roles(&current) {
                if visited.insert(role.clone()) {
                    queue.push_back(role.clone());
                }
            }
        }
        visited
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closure_follows_chains() {
        let mut graph = RoleGraph::new();
        graph.add("alice", "editor");
        graph.add("editor", "viewer");
        graph.add("viewer", "guest");

        let closure = graph.closure(["alice"]);
        for name in ["alice", "editor", "viewer", "guest"] {
            assert!(closure.contains(name), "missing {name}");
        }
    }

    #[test]
    fn closure_terminates_on_cycles() {
        let mut graph = RoleGraph::new();
        graph.add("a", "b");
        graph.add("b", "c");
        graph.add("c", "a");
        graph.add("a", "a");

        let closure = graph.closure(["a"]);
        assert_eq!(closure.len(), 3);
    }

    #[test]
    fn duplicate_edges_are_collapsed() {
        let mut graph = RoleGraph::new();
        graph.add("alice", "admin");
        graph.add("alice", "admin");
        assert_eq!(graph.direct_roles("alice"), &["admin".to_string()]);
        assert!(graph.direct_roles("bob").is_empty());
    }

    #[test]
    fn closure_of_multiple_seeds() {
        let mut graph = RoleGraph::new();
        graph.add("ops", "viewer");
        let closure = graph.closure(["alice", "ops"]);
        assert!(closure.contains("alice"));
        assert!(closure.contains("viewer"));
    }
}
