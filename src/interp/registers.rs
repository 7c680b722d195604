//! The per-trial register file.
//!
//! A mapping from identifier to text value, insertion-ordered so snapshots
//! and reveals are deterministic. Values are never mutated in place;
//! reassignment replaces, and the interpreter journals the replaced value
//! for rollback.

use std::collections::HashMap;

/// Insertion-ordered string register file.
#[derive(Debug, Clone, Default)]
pub struct RegisterFile {
    order: Vec<String>,
    values: HashMap<String, String>,
}

impl RegisterFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears all bindings and loads the given ones in order. Called at
    /// round entry with the map prefix bindings.
    pub fn reset(&mut self, bindings: &[(String, String)]) {
        self.order.clear();
        self.values.clear();
        for (name, value) in bindings {
            self.set(name.clone(), value.clone());
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Binds `name`, returning the replaced value if there was one.
    pub fn set(&mut self, name: String, value: String) -> Option<String> {
        match self.values.insert(name.clone(), value) {
            Some(previous) => Some(previous),
            None => {
                self.order.push(name);
                None
            }
        }
    }

    /// Restores a binding to an earlier value (rollback path).
    pub fn restore(&mut self, name: &str, value: String) {
        self.values.insert(name.to_string(), value);
    }

    /// Removes a binding entirely (rollback of a first assignment).
    pub fn remove(&mut self, name: &str) {
        if self.values.remove(name).is_some() {
            self.order.retain(|n| n != name);
        }
    }

    /// Ordered snapshot of all bindings.
    pub fn snapshot(&self) -> Vec<(String, String)> {
        self.order
            .iter()
            .filter_map(|name| {
                self.values
                    .get(name)
                    .map(|value| (name.clone(), value.clone()))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
