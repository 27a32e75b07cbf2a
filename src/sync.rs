use crate::channels::{CHANNEL_COUNT, ChannelKey};
use crate::registers::Value;

/// The last value pushed downstream for one channel.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ChannelState {
    pub numeric: i64,
    pub text: String,
    pub timed_out: bool,
}

impl ChannelState {
    pub fn from_value(value: Value) -> Self {
        Self { numeric: value.numeric(), text: value.to_string(), timed_out: false }
    }
}

/// Whether an [`StateStore::apply`] call changed anything observable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// At least one of numeric, text or the timeout flag differs from the
    /// stored state; the caller forwards this to the sink.
    Emitted,
    /// Nothing observable changed; downstream I/O is skipped.
    Suppressed,
}

/// Our view of what the host platform last saw, per channel.
///
/// A fresh decode (or an optimistic command update) only makes it past this
/// store when it differs from the stored state. That keeps the host's device
/// history free of duplicate entries while reflecting every genuine change
/// exactly once.
pub struct StateStore {
    states: [Option<ChannelState>; CHANNEL_COUNT],
}

impl StateStore {
    pub fn new() -> Self {
        Self { states: [const { None }; CHANNEL_COUNT] }
    }

    pub fn get(&self, key: ChannelKey) -> Option<&ChannelState> {
        self.states[key as usize].as_ref()
    }

    /// Store `new` unconditionally; report whether it differed.
    pub fn apply(&mut self, key: ChannelKey, new: ChannelState) -> Applied {
        let slot = &mut self.states[key as usize];
        let changed = slot.as_ref() != Some(&new);
        *slot = Some(new);
        if changed { Applied::Emitted } else { Applied::Suppressed }
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

/// A state-update event, produced only for `Emitted` apply outcomes.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Update<'a> {
    pub channel: ChannelKey,
    pub numeric: i64,
    pub text: &'a str,
    pub timed_out: bool,
}

/// Where emitted updates go. The host platform side of this interface is
/// out of scope; the bundled CLI implements it as line-oriented output.
pub trait StateSink {
    fn push(&mut self, update: Update<'_>);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(numeric: i64, text: &str, timed_out: bool) -> ChannelState {
        ChannelState { numeric, text: text.to_string(), timed_out }
    }

    #[test]
    fn identical_apply_is_suppressed() {
        let mut store = StateStore::new();
        let key = ChannelKey::OutdoorTemp;
        assert_eq!(store.apply(key, state(0, "-5.0", false)), Applied::Emitted);
        assert_eq!(store.apply(key, state(0, "-5.0", false)), Applied::Suppressed);
    }

    #[test]
    fn any_field_difference_emits() {
        let mut store = StateStore::new();
        let key = ChannelKey::Eco;
        assert_eq!(store.apply(key, state(1, "1", false)), Applied::Emitted);
        assert_eq!(store.apply(key, state(0, "1", false)), Applied::Emitted);
        assert_eq!(store.apply(key, state(0, "0", false)), Applied::Emitted);
        assert_eq!(store.apply(key, state(0, "0", true)), Applied::Emitted);
        assert_eq!(store.apply(key, state(0, "0", true)), Applied::Suppressed);
    }

    #[test]
    fn store_is_updated_even_when_suppressed() {
        let mut store = StateStore::new();
        let key = ChannelKey::Mode;
        store.apply(key, state(20, "20", false));
        store.apply(key, state(20, "20", false));
        assert_eq!(store.get(key), Some(&state(20, "20", false)));
        assert!(store.get(ChannelKey::Auto).is_none());
    }
}
