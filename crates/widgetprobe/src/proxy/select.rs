//! Child and descendant selection.

use super::ProxyObject;
use crate::query::{Filters, WILDCARD};
use crate::registry::TypeSelector;
use crate::result::{ProbeError, ProbeResult};
use crate::value::PropertyValue;
use std::cmp::Ordering;
use std::time::Duration;

impl ProxyObject {
    /// Every direct child
    ///
    /// # Errors
    ///
    /// Propagates query and transport errors
    pub fn get_children(&self) -> ProbeResult<Vec<ProxyObject>> {
        let query = self.query.select_child(WILDCARD, Filters::new())?;
        self.execute_query(&query)
    }

    /// Direct children of one type, optionally filtered
    ///
    /// # Errors
    ///
    /// Propagates query and transport errors
    pub fn get_children_by_type(
        &self,
        desired_type: impl TypeSelector,
        filters: Filters,
    ) -> ProbeResult<Vec<ProxyObject>> {
        let query = self.query.select_child(&desired_type.query_name(), filters)?;
        self.execute_query(&query)
    }

    fn select(&self, type_name: &str, filters: Filters) -> ProbeResult<Vec<ProxyObject>> {
        let query = self.query.select_descendant(type_name, filters.clone())?;
        tracing::debug!(
            "Selecting object(s) of {} with attributes: {}",
            if type_name == WILDCARD {
                "any type".to_string()
            } else {
                format!("type {type_name}")
            },
            filters
        );
        self.execute_query(&query)
    }

    /// The one descendant matching `type_name` and `filters`.
    ///
    /// Pass `"*"` to match any type; a wildcard needs at least one filter.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::StateNotFound`] when nothing matches and
    /// [`ProbeError::MultipleMatches`] when more than one object does
    pub fn select_single(
        &self,
        type_name: impl TypeSelector,
        filters: Filters,
    ) -> ProbeResult<ProxyObject> {
        let type_name = type_name.query_name();
        let mut instances = self.select(&type_name, filters.clone())?;
        match instances.len() {
            0 => Err(ProbeError::not_found(Some(&type_name), &filters)),
            1 => Ok(instances.remove(0)),
            count => Err(ProbeError::MultipleMatches {
                query: self.query.select_descendant(&type_name, filters)?.to_string(),
                count,
            }),
        }
    }

    /// [`ProxyObject::select_single`], polled once a second for up to
    /// `timeout` seconds while nothing matches. A zero timeout tries once.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::WaitTimeout`] wrapping the last not-found error
    /// when time runs out; other errors are returned immediately
    pub fn wait_select_single(
        &self,
        type_name: impl TypeSelector,
        filters: Filters,
        timeout: u64,
    ) -> ProbeResult<ProxyObject> {
        let type_name = type_name.query_name();
        if timeout == 0 {
            return self.select_single(type_name.as_str(), filters);
        }
        let mut last = None;
        for _ in 0..timeout {
            match self.select_single(type_name.as_str(), filters.clone()) {
                Ok(object) => return Ok(object),
                Err(err) if err.is_not_found() => {
                    last = Some(err);
                    self.sleeper().sleep(Duration::from_secs(1));
                }
                Err(err) => return Err(err),
            }
        }
        let cause = last.unwrap_or_else(|| ProbeError::not_found(Some(&type_name), &filters));
        Err(ProbeError::WaitTimeout {
            message: cause.to_string(),
            seconds: timeout as f64,
            cause: Some(Box::new(cause)),
        })
    }

    /// Every descendant matching `type_name` and `filters`.
    ///
    /// With `sort_keys`, results are ordered by the tuple of those attribute
    /// values, first key most significant. Keys may be dotted to reach into
    /// structured values (`globalRect.x`). The sort is stable.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::InvalidArgument`] for an empty sort key and
    /// [`ProbeError::AttributeNotFound`] for one that does not resolve
    pub fn select_many(
        &self,
        type_name: impl TypeSelector,
        filters: Filters,
        sort_keys: Option<&[&str]>,
    ) -> ProbeResult<Vec<ProxyObject>> {
        let instances = self.select(&type_name.query_name(), filters)?;
        sort_by_keys(instances, sort_keys)
    }

    /// [`ProxyObject::select_many`], polled once a second for up to
    /// `timeout` seconds until at least `result_count` objects match
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::WaitTimeout`] if the count is never reached
    pub fn wait_select_many(
        &self,
        type_name: impl TypeSelector,
        filters: Filters,
        timeout: u64,
        result_count: usize,
        sort_keys: Option<&[&str]>,
    ) -> ProbeResult<Vec<ProxyObject>> {
        let type_name = type_name.query_name();
        for _ in 0..timeout.max(1) {
            let instances = self.select(&type_name, filters.clone())?;
            if instances.len() >= result_count {
                return sort_by_keys(instances, sort_keys);
            }
            if timeout > 0 {
                self.sleeper().sleep(Duration::from_secs(1));
            }
        }
        Err(ProbeError::WaitTimeout {
            message: "Failed to find the requested number of elements.".to_string(),
            seconds: timeout as f64,
            cause: None,
        })
    }

    pub(super) fn sleeper(&self) -> &crate::sleep::Sleeper {
        self.backend.context().sleeper()
    }

    /// Resolve a dotted attribute path against the cached state
    fn resolve_sort_key(&self, key: &str) -> ProbeResult<PropertyValue> {
        if key.is_empty() || key.split('.').any(str::is_empty) {
            return Err(ProbeError::invalid_argument(format!(
                "Invalid sort key '{key}'"
            )));
        }
        let mut parts = key.split('.');
        let first = parts.next().unwrap_or_default();
        let mut value = self.get(first)?;
        for part in parts {
            value = value.field(part).ok_or_else(|| ProbeError::AttributeNotFound {
                class_name: self.class_name().to_string(),
                name: key.to_string(),
            })?;
        }
        Ok(value)
    }
}

fn sort_by_keys(
    instances: Vec<ProxyObject>,
    sort_keys: Option<&[&str]>,
) -> ProbeResult<Vec<ProxyObject>> {
    let Some(keys) = sort_keys.filter(|keys| !keys.is_empty()) else {
        return Ok(instances);
    };
    if instances.len() < 2 {
        return Ok(instances);
    }
    let mut keyed = instances
        .into_iter()
        .map(|instance| -> ProbeResult<(Vec<PropertyValue>, ProxyObject)> {
            let values = {
                let _no_refresh = instance.no_automatic_refreshing();
                keys.iter()
                    .map(|key| instance.resolve_sort_key(key))
                    .collect::<ProbeResult<Vec<_>>>()?
            };
            Ok((values, instance))
        })
        .collect::<ProbeResult<Vec<_>>>()?;
    keyed.sort_by(|(a, _), (b, _)| compare_tuples(a, b));
    Ok(keyed.into_iter().map(|(_, instance)| instance).collect())
}

fn compare_tuples(a: &[PropertyValue], b: &[PropertyValue]) -> Ordering {
    a.iter()
        .zip(b)
        .map(|(x, y)| x.sort_cmp(y))
        .find(|ordering| ordering.is_ne())
        .unwrap_or(Ordering::Equal)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::super::tests::{root_of, sample_tree};
    use super::*;
    use crate::backend::Row;
    use crate::fake::FakeAddress;
    use crate::filters;
    use serde_json::json;
    use std::sync::Arc;

    fn ids(objects: &[ProxyObject]) -> Vec<i64> {
        objects.iter().map(ProxyObject::id).collect()
    }

    mod children_tests {
        use super::*;

        #[test]
        fn test_get_children() {
            let root = root_of(&sample_tree());
            let window = root.get_children().unwrap().remove(0);
            assert_eq!(window.class_name(), "Window");
            assert_eq!(ids(&window.get_children().unwrap()), vec![3, 4, 5]);
        }

        #[test]
        fn test_get_children_by_type() {
            let address = sample_tree();
            let root = root_of(&address);
            let window = root.get_children_by_type("Window", Filters::new()).unwrap().remove(0);
            let buttons = window
                .get_children_by_type("Button", filters! { "label" => "Cancel" })
                .unwrap();
            assert_eq!(ids(&buttons), vec![4]);
            assert_eq!(
                address.queries().last().unwrap(),
                b"/App/Window[id=2]/Button[label=\"Cancel\"]"
            );
        }
    }

    mod select_single_tests {
        use super::*;

        #[test]
        fn test_select_single() {
            let root = root_of(&sample_tree());
            let panel = root.select_single("Panel", Filters::new()).unwrap();
            assert_eq!(panel.id(), 5);
        }

        #[test]
        fn test_select_single_none() {
            let root = root_of(&sample_tree());
            let err = root.select_single("Slider", Filters::new()).unwrap_err();
            assert!(err.is_not_found());
            assert_eq!(err.to_string(), "Object not found with name 'Slider'.");
        }

        #[test]
        fn test_select_single_many() {
            let root = root_of(&sample_tree());
            let err = root.select_single("Button", Filters::new()).unwrap_err();
            assert!(matches!(err, ProbeError::MultipleMatches { count: 3, .. }));
        }

        #[test]
        fn test_wildcard_needs_filters() {
            let root = root_of(&sample_tree());
            let err = root.select_single("*", Filters::new()).unwrap_err();
            assert!(matches!(err, ProbeError::InvalidQuery { .. }));
            let visible = root.select_single("*", filters! { "visible" => false }).unwrap();
            assert_eq!(visible.id(), 5);
        }

        #[test]
        fn test_client_side_filter() {
            let root = root_of(&sample_tree());
            let err = root
                .select_single("Button", filters! { "label" => "\u{e9}" })
                .unwrap_err();
            assert!(err.is_not_found());
        }
    }

    mod wait_select_tests {
        use super::*;

        fn appearing_after(empty_polls: usize) -> Arc<FakeAddress> {
            let root = Row::new("/App", json!({"id": [0, 1]}));
            let dialog = Row::new("/App/Dialog", json!({"id": [0, 9]}));
            let mut responses = vec![vec![root]];
            responses.extend(std::iter::repeat_with(Vec::new).take(empty_polls));
            responses.push(vec![dialog]);
            Arc::new(FakeAddress::scripted(responses))
        }

        #[test]
        fn test_wait_select_single_consumes_one_second_per_miss() {
            let root = root_of(&appearing_after(3));
            let dialog = root.wait_select_single("Dialog", Filters::new(), 10).unwrap();
            assert_eq!(dialog.id(), 9);
            assert!((root.sleeper().total_secs_slept() - 3.0).abs() < f64::EPSILON);
        }

        #[test]
        fn test_wait_select_single_times_out() {
            let root = root_of(&appearing_after(20));
            let err = root.wait_select_single("Dialog", Filters::new(), 5).unwrap_err();
            assert!(err.is_timeout());
            assert!(err.is_not_found());
            assert_eq!(err.to_string(), "Object not found with name 'Dialog'.");
            assert!((root.sleeper().total_secs_slept() - 5.0).abs() < f64::EPSILON);
        }

        #[test]
        fn test_wait_select_single_zero_timeout_tries_once() {
            let root = root_of(&appearing_after(1));
            let err = root.wait_select_single("Dialog", Filters::new(), 0).unwrap_err();
            assert!(matches!(err, ProbeError::StateNotFound { .. }));
            assert!(root.sleeper().total_secs_slept() < f64::EPSILON);
        }

        #[test]
        fn test_wait_select_many_reaches_count() {
            let root = root_of(&appearing_after(2));
            let found = root
                .wait_select_many("Dialog", Filters::new(), 10, 1, None)
                .unwrap();
            assert_eq!(ids(&found), vec![9]);
            assert!((root.sleeper().total_secs_slept() - 2.0).abs() < f64::EPSILON);
        }

        #[test]
        fn test_wait_select_many_fails() {
            let root = root_of(&sample_tree());
            let err = root
                .wait_select_many("Button", Filters::new(), 3, 5, None)
                .unwrap_err();
            assert!(err.is_timeout());
            assert!(!err.is_not_found());
            assert_eq!(err.to_string(), "Failed to find the requested number of elements.");
        }
    }

    mod sort_tests {
        use super::*;

        #[test]
        fn test_select_many_unsorted_keeps_server_order() {
            let root = root_of(&sample_tree());
            let buttons = root.select_many("Button", Filters::new(), None).unwrap();
            assert_eq!(ids(&buttons), vec![3, 4, 6]);
        }

        #[test]
        fn test_select_many_sorted() {
            let root = root_of(&sample_tree());
            let buttons = root
                .select_many("Button", Filters::new(), Some(&["order"]))
                .unwrap();
            assert_eq!(ids(&buttons), vec![4, 3, 6]);
            let by_label = root
                .select_many("Button", Filters::new(), Some(&["label"]))
                .unwrap();
            assert_eq!(ids(&by_label), vec![4, 6, 3]);
        }

        #[test]
        fn test_dotted_sort_keys_and_stability() {
            let address = Arc::new(FakeAddress::tree(vec![
                Row::new("/App", json!({"id": [0, 1]})),
                Row::new("/App/Item", json!({"id": [0, 2], "globalRect": [1, 30, 0, 5, 5], "row": [0, 1]})),
                Row::new("/App/Item", json!({"id": [0, 3], "globalRect": [1, 10, 0, 5, 5], "row": [0, 1]})),
                Row::new("/App/Item", json!({"id": [0, 4], "globalRect": [1, 20, 0, 5, 5], "row": [0, 0]})),
                Row::new("/App/Item", json!({"id": [0, 5], "globalRect": [1, 10, 0, 5, 5], "row": [0, 1]})),
            ]));
            let root = root_of(&address);
            let items = root
                .select_many("Item", Filters::new(), Some(&["row", "globalRect.x"]))
                .unwrap();
            assert_eq!(ids(&items), vec![4, 3, 5, 2]);
        }

        #[test]
        fn test_sorting_does_not_refresh() {
            let address = sample_tree();
            let root = root_of(&address);
            let before = address.queries().len();
            root.select_many("Button", Filters::new(), Some(&["order"]))
                .unwrap();
            assert_eq!(address.queries().len(), before + 1);
        }

        #[test]
        fn test_invalid_sort_keys() {
            let root = root_of(&sample_tree());
            let err = root
                .select_many("Button", Filters::new(), Some(&["order."]))
                .unwrap_err();
            assert!(matches!(err, ProbeError::InvalidArgument { .. }));
            let err = root
                .select_many("Button", Filters::new(), Some(&["missing"]))
                .unwrap_err();
            assert!(matches!(err, ProbeError::AttributeNotFound { .. }));
        }
    }
}
