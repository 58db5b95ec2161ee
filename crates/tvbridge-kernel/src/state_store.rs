//! [`StateStore`] – last known value per channel, and the dedup gate.
//!
//! Both routers consult the same store, so a value that was just published
//! to the bus and comes back inbound is recognised and dropped, and a value
//! that was just commanded and comes back as a device event is not
//! republished.

use std::collections::HashMap;

use tvbridge_types::Channel;

/// Channel → most recently accepted value, regardless of direction.
#[derive(Debug, Default)]
pub struct StateStore {
    values: HashMap<Channel, String>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` and return `true` if it differs from the stored value
    /// (or nothing is stored yet).  Returns `false` and leaves the store
    /// untouched otherwise.
    pub fn try_accept(&mut self, channel: Channel, value: &str) -> bool {
        if self.values.get(&channel).is_some_and(|current| current == value) {
            return false;
        }
        self.values.insert(channel, value.to_string());
        true
    }

    pub fn get(&self, channel: Channel) -> Option<&str> {
        self.values.get(&channel).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
