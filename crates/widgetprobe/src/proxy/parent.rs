//! Ancestor lookup.

use super::ProxyObject;
use crate::query::{Filters, Query};
use crate::registry::TypeSelector;
use crate::result::{ProbeError, ProbeResult};

impl ProxyObject {
    /// The immediate parent, or this object again if it is the root
    ///
    /// # Errors
    ///
    /// Propagates query and transport errors
    pub fn get_parent(&self) -> ProbeResult<ProxyObject> {
        self.parent_at(1)
    }

    /// The nearest ancestor of type `type_name` (any type when empty) whose
    /// live properties match `filters`.
    ///
    /// With neither a type nor filters this is [`ProxyObject::get_parent`].
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::StateNotFound`] when no ancestor matches
    pub fn get_parent_by(
        &self,
        type_name: impl TypeSelector,
        filters: Filters,
    ) -> ProbeResult<ProxyObject> {
        let type_name = type_name.query_name();
        if type_name.is_empty() && filters.is_empty() {
            return self.get_parent();
        }
        let not_found = || {
            let name = (!type_name.is_empty()).then_some(type_name.as_str());
            ProbeError::not_found(name, &filters)
        };

        let parent_nodes = self.parent_nodes();
        if !type_name.is_empty() {
            if !parent_nodes.contains(&type_name) {
                return Err(not_found());
            }
            for (index, node) in parent_nodes.iter().enumerate().rev() {
                if *node == type_name {
                    let parent = self.parent_at(parent_nodes.len() - index)?;
                    if has_properties(&parent, &filters)? {
                        return Ok(parent);
                    }
                }
            }
        } else {
            let mut current: Option<ProxyObject> = None;
            for _ in 0..parent_nodes.len() {
                let parent = current.as_ref().unwrap_or(self).parent_at(1)?;
                if has_properties(&parent, &filters)? {
                    return Ok(parent);
                }
                current = Some(parent);
            }
        }
        Err(not_found())
    }

    /// Ancestor `level` steps up; 1 is the immediate parent
    fn parent_at(&self, level: usize) -> ProbeResult<ProxyObject> {
        let mut query: Query = self.query.clone();
        for _ in 0..level {
            query = query.select_parent()?;
        }
        self.execute_query(&query)?
            .into_iter()
            .next()
            .ok_or_else(|| ProbeError::not_found(None, &Filters::new()))
    }

    /// Type names of every ancestor, outermost first
    fn parent_nodes(&self) -> Vec<String> {
        let path = self.get_path();
        let mut nodes: Vec<String> = path
            .split('/')
            .filter(|node| !node.is_empty())
            .map(str::to_string)
            .collect();
        nodes.pop();
        nodes
    }
}

fn has_properties(object: &ProxyObject, filters: &Filters) -> ProbeResult<bool> {
    if filters.is_empty() {
        return Ok(true);
    }
    let properties = object.get_properties()?;
    Ok(filters.iter().all(|(key, expected)| {
        properties
            .get(key)
            .is_some_and(|actual| actual.matches(expected))
    }))
}
