//! Qt extension: signals and slots.

use super::ProxyObject;
use crate::backend::QtInterface;
use crate::registry::Capability;
use crate::result::{ProbeError, ProbeResult};
use serde_json::Value;
use std::fmt;

impl ProxyObject {
    /// Qt signal and slot access for objects resolved with the Qt mixin
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::CapabilityUnavailable`] if the object's class
    /// lacks the Qt capability or the peer does not export the Qt interface
    pub fn qt(&self) -> ProbeResult<QtProxy<'_>> {
        let unavailable = || ProbeError::CapabilityUnavailable {
            class_name: self.class_name().to_string(),
            capability: Capability::Qt.to_string(),
        };
        if !self.class.has_capability(Capability::Qt) {
            return Err(unavailable());
        }
        let iface = self.backend.address().qt().ok_or_else(unavailable)?;
        Ok(QtProxy {
            object: self,
            iface,
        })
    }
}

/// Qt view of one proxy object
#[derive(Clone, Copy)]
pub struct QtProxy<'a> {
    object: &'a ProxyObject,
    iface: &'a dyn QtInterface,
}

impl<'a> QtProxy<'a> {
    /// Signal signatures the object exports, e.g. `clicked(bool)`
    ///
    /// # Errors
    ///
    /// Returns transport errors
    pub fn get_signals(&self) -> ProbeResult<Vec<String>> {
        Ok(self.iface.list_signals(self.object.id())?)
    }

    /// Slot and method signatures the object exports
    ///
    /// # Errors
    ///
    /// Returns transport errors
    pub fn get_slots(&self) -> ProbeResult<Vec<String>> {
        Ok(self.iface.list_methods(self.object.id())?)
    }

    /// Start counting emissions of `signal`
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::UnknownSignal`] if the object has no such signal
    pub fn watch_signal(&self, signal: &str) -> ProbeResult<QtSignalWatcher<'a>> {
        self.check_signal(signal)?;
        self.iface.register_signal_interest(self.object.id(), signal)?;
        Ok(QtSignalWatcher {
            qt: *self,
            signal: signal.to_string(),
        })
    }

    /// Emissions of `signal` since it was first watched
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::UnknownSignal`] if the object has no such signal
    pub fn get_signal_emissions(&self, signal: &str) -> ProbeResult<i64> {
        self.check_signal(signal)?;
        Ok(self.iface.get_signal_emissions(self.object.id(), signal)?)
    }

    /// Invoke a slot by full signature (`setText(QString)`) or bare name
    /// (`setText`)
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::InvalidArgument`] if no exported slot matches
    pub fn invoke_slot(&self, slot: &str, args: &[Value]) -> ProbeResult<()> {
        let slots = self.get_slots()?;
        let signature = slots
            .iter()
            .find(|candidate| {
                *candidate == slot || candidate.split('(').next() == Some(slot)
            })
            .ok_or_else(|| {
                ProbeError::invalid_argument(format!(
                    "Slot {slot:?} is not in the slot list of {slots:?}"
                ))
            })?;
        Ok(self.iface.invoke_method(self.object.id(), signature, args)?)
    }

    fn check_signal(&self, signal: &str) -> ProbeResult<()> {
        let valid = self.get_signals()?;
        if valid.iter().any(|name| name == signal) {
            Ok(())
        } else {
            Err(ProbeError::UnknownSignal {
                signal: signal.to_string(),
                valid,
            })
        }
    }
}

impl fmt::Debug for QtProxy<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QtProxy")
            .field("object", &self.object.id())
            .finish_non_exhaustive()
    }
}

/// Watches one signal of one object; created by [`QtProxy::watch_signal`]
#[derive(Debug, Clone)]
pub struct QtSignalWatcher<'a> {
    qt: QtProxy<'a>,
    signal: String,
}

impl QtSignalWatcher<'_> {
    /// Signal being watched
    #[must_use]
    pub fn signal_name(&self) -> &str {
        &self.signal
    }

    /// Emissions since watching started
    ///
    /// # Errors
    ///
    /// Returns transport errors
    pub fn num_emissions(&self) -> ProbeResult<i64> {
        self.qt.get_signal_emissions(&self.signal)
    }

    /// Whether the signal fired at least once
    ///
    /// # Errors
    ///
    /// Returns transport errors
    pub fn was_emitted(&self) -> ProbeResult<bool> {
        Ok(self.num_emissions()? > 0)
    }
}
