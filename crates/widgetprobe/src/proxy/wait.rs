//! Polling waits on a single object.

use super::ProxyObject;
use crate::query::FilterValue;
use crate::result::{ProbeError, ProbeResult};
use crate::value::PropertyValue;
use std::time::Duration;

impl ProxyObject {
    /// Block until the object disappears from the application, polling once
    /// a second for up to `timeout` seconds
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::WaitTimeout`] if the object is still present
    pub fn wait_until_destroyed(&self, timeout: u64) -> ProbeResult<()> {
        for _ in 0..timeout {
            match self.get_new_state() {
                Ok(_) => self.sleeper().sleep(Duration::from_secs(1)),
                Err(err) if err.is_not_found() => return Ok(()),
                Err(err) => return Err(err),
            }
        }
        Err(ProbeError::WaitTimeout {
            message: format!("Object was not destroyed after {timeout} seconds"),
            seconds: timeout as f64,
            cause: None,
        })
    }

    /// Block until attribute `name` equals `expected`
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::WaitTimeout`] if it never does within
    /// `timeout_secs`, [`ProbeError::AttributeNotFound`] for an unknown name
    pub fn wait_for(
        &self,
        name: &str,
        expected: impl Into<FilterValue>,
        timeout_secs: f64,
    ) -> ProbeResult<()> {
        let expected = expected.into();
        self.poll_attribute(name, timeout_secs, |actual| {
            if actual.matches(&expected) {
                Ok(())
            } else {
                Err(format!("{expected} != {actual}"))
            }
        })
    }

    /// Block until attribute `name` satisfies `predicate`
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::WaitTimeout`] if it never does within
    /// `timeout_secs`, [`ProbeError::AttributeNotFound`] for an unknown name
    pub fn wait_for_match<F>(&self, name: &str, timeout_secs: f64, predicate: F) -> ProbeResult<()>
    where
        F: Fn(&PropertyValue) -> bool,
    {
        self.poll_attribute(name, timeout_secs, |actual| {
            if predicate(actual) {
                Ok(())
            } else {
                Err(format!("{actual} did not match"))
            }
        })
    }

    fn poll_attribute<F>(&self, name: &str, timeout_secs: f64, check: F) -> ProbeResult<()>
    where
        F: Fn(&PropertyValue) -> Result<(), String>,
    {
        let mut failure = match check(&self.get(name)?) {
            Ok(()) => return Ok(()),
            Err(failure) => failure,
        };
        let mut time_left = timeout_secs;
        loop {
            let row = self.get_new_state()?;
            let wire = row
                .state
                .iter()
                .find(|(key, _)| key.replace('-', "_") == name)
                .map(|(_, wire)| wire)
                .ok_or_else(|| self.attribute_not_found(name))?;
            match check(&PropertyValue::from_wire(wire)?) {
                Ok(()) => {
                    self.replace_state(&row.state);
                    return Ok(());
                }
                Err(mismatch) => failure = mismatch,
            }
            if time_left >= 1.0 {
                self.sleeper().sleep(Duration::from_secs(1));
                time_left -= 1.0;
            } else {
                self.sleeper().sleep_secs(time_left);
                break;
            }
        }
        Err(ProbeError::WaitTimeout {
            message: format!(
                "After {:.1} seconds test on {}.{} failed: {}",
                timeout_secs,
                self.class_name(),
                name,
                failure
            ),
            seconds: timeout_secs,
            cause: None,
        })
    }

    /// Whether the object moves within `gap_interval` seconds
    ///
    /// # Errors
    ///
    /// See [`ProxyObject::shape`]
    pub fn is_moving(&self, gap_interval: f64) -> ProbeResult<bool> {
        let before = self.shape()?.position();
        self.sleeper().sleep_secs(gap_interval);
        let after = self.shape()?.position();
        Ok(before != after)
    }

    /// Block until the object stops moving.
    ///
    /// Checks up to `retry_attempts` times (at least once), each check
    /// sampling the position `retry_interval` seconds apart.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::WaitTimeout`] if the object is still moving
    pub fn wait_until_not_moving(&self, retry_attempts: u32, retry_interval: f64) -> ProbeResult<()> {
        let attempts = retry_attempts.max(1);
        for _ in 0..attempts {
            if !self.is_moving(retry_interval)? {
                return Ok(());
            }
        }
        let seconds = f64::from(attempts) * retry_interval;
        Err(ProbeError::WaitTimeout {
            message: format!("Object was still moving after {seconds} second(s)"),
            seconds,
            cause: None,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::super::tests::{root_of, sample_tree};
    use super::*;
    use crate::backend::Row;
    use crate::fake::FakeAddress;
    use serde_json::json;
    use std::sync::Arc;

    fn at(x: i64) -> Row {
        Row::new("/App", json!({"id": [0, 1], "globalRect": [1, x, 0, 10, 10]}))
    }

    mod destroyed_tests {
        use super::*;

        #[test]
        fn test_already_destroyed() {
            let address = sample_tree();
            let root = root_of(&address);
            address.remove_subtree("/App");
            root.wait_until_destroyed(10).unwrap();
            assert!(root.sleeper().total_secs_slept() < f64::EPSILON);
        }

        #[test]
        fn test_destroyed_after_polls() {
            let address = Arc::new(FakeAddress::scripted(vec![
                vec![at(0)],
                vec![at(0)],
                vec![at(0)],
                vec![],
            ]));
            let root = root_of(&address);
            root.wait_until_destroyed(10).unwrap();
            assert!((root.sleeper().total_secs_slept() - 2.0).abs() < f64::EPSILON);
        }

        #[test]
        fn test_never_destroyed() {
            let root = root_of(&sample_tree());
            let err = root.wait_until_destroyed(3).unwrap_err();
            assert_eq!(err.to_string(), "Object was not destroyed after 3 seconds");
            assert!(err.is_timeout());
        }
    }

    mod wait_for_tests {
        use super::*;

        #[test]
        fn test_wait_for_already_true() {
            let root = root_of(&sample_tree());
            root.wait_for("title", "Main", 10.0).unwrap();
            assert!(root.sleeper().total_secs_slept() < f64::EPSILON);
        }

        #[test]
        fn test_wait_for_change() {
            let title = |t: &str| Row::new("/App", json!({"id": [0, 1], "title": [0, t]}));
            let address = Arc::new(FakeAddress::scripted(vec![
                vec![title("a")],
                vec![title("a")],
                vec![title("a")],
                vec![title("b")],
            ]));
            let root = root_of(&address);
            root.wait_for("title", "b", 10.0).unwrap();
            assert!((root.sleeper().total_secs_slept() - 1.0).abs() < f64::EPSILON);
            let _no_refresh = root.no_automatic_refreshing();
            assert_eq!(root.get("title").unwrap().as_str(), Some("b"));
        }

        #[test]
        fn test_wait_for_times_out() {
            let root = root_of(&sample_tree());
            let err = root.wait_for("title", "Other", 2.5).unwrap_err();
            assert_eq!(
                err.to_string(),
                "After 2.5 seconds test on App.title failed: 'Other' != 'Main'"
            );
            assert!((root.sleeper().total_secs_slept() - 2.5).abs() < 1e-9);
        }

        #[test]
        fn test_wait_for_match() {
            let root = root_of(&sample_tree());
            let window = root.get_children().unwrap().remove(0);
            window
                .wait_for_match("globalRect", 1.0, |value| {
                    value.as_rectangle().is_some_and(|rect| rect.width == 640)
                })
                .unwrap();
        }
    }

    mod moving_tests {
        use super::*;

        #[test]
        fn test_is_moving() {
            let address = Arc::new(FakeAddress::scripted(vec![
                vec![at(0)],
                vec![at(0)],
                vec![at(5)],
                vec![at(5)],
            ]));
            let root = root_of(&address);
            assert!(root.is_moving(0.1).unwrap());
            assert!(!root.is_moving(0.1).unwrap());
        }

        #[test]
        fn test_wait_until_not_moving() {
            let address = Arc::new(FakeAddress::scripted(vec![
                vec![at(0)],
                vec![at(0)],
                vec![at(5)],
                vec![at(9)],
                vec![at(9)],
            ]));
            let root = root_of(&address);
            root.wait_until_not_moving(20, 0.5).unwrap();
        }

        #[test]
        fn test_wait_until_not_moving_gives_up() {
            let counter = std::sync::atomic::AtomicI64::new(0);
            let address = Arc::new(FakeAddress::from_fn(move |_| {
                let x = counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(vec![at(x)])
            }));
            let root = root_of(&address);
            let err = root.wait_until_not_moving(0, 0.5).unwrap_err();
            assert_eq!(err.to_string(), "Object was still moving after 0.5 second(s)");
        }
    }
}
