//! The event environment: an ordered, append-only property bag.
//!
//! Modelled after the "dynamic property bag" design note: a handful of
//! `KEY=VALUE` pairs (typically well under 32), stored in one contiguous
//! buffer rather than a hash map of individually-allocated `String`s. A
//! linear scan over entries this small is faster than hashing, and the
//! single backing allocation mirrors the allocation pattern of the
//! original kernel-event env block worth preserving.

use std::ops::Range;

/// Upper bound on the total bytes of `key`+`value` text retained per event,
/// inherited from the source-adapter protocol's `HOTPLUG_BUFFER_SIZE`.
pub const ENV_BUFFER_SIZE: usize = 4096;

/// Upper bound on the number of entries retained per event, inherited from
/// the source-adapter protocol's `HOTPLUG_NUM_ENVP`.
pub const ENV_MAX_ENTRIES: usize = 128;

#[derive(Debug, Clone)]
struct EnvEntry {
    key: Range<usize>,
    value: Range<usize>,
}

/// An ordered mapping from environment key to value, backed by a single
/// string buffer.
///
/// Insertion order is preserved (useful for diagnostics/logging), keys are
/// unique per event, and lookups are a linear scan (see the module docs
/// for why that is the right tradeoff here).
#[derive(Debug, Clone, Default)]
pub struct EnvMap {
    buf: String,
    entries: Vec<EnvEntry>,
}

impl EnvMap {
    /// Returns the value for `key`, or `None` if absent.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| &self.buf[e.key.clone()] == key)
            .map(|e| &self.buf[e.value.clone()])
    }

    /// Returns `true` if `key` is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates `(key, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(move |e| (&self.buf[e.key.clone()], &self.buf[e.value.clone()]))
    }
}

/// Incrementally builds an [`EnvMap`] from a raw notification's property
/// list, enforcing the buffer-size and entry-count caps from the
/// source-adapter protocol.
///
/// On overflow, [`push`](Self::push) stops copying but what was already
/// captured is retained, matching the event-construction algorithm's
/// "on overflow, stop copying but keep what has been captured".
#[derive(Debug, Default)]
pub struct EnvMapBuilder {
    buf: String,
    entries: Vec<EnvEntry>,
    overflowed: bool,
}

impl EnvMapBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts to append one `key=value` pair.
    ///
    /// Returns `false` (and stops accepting further pairs) once the entry
    /// count or total byte budget would be exceeded.
    pub fn push(&mut self, key: &str, value: &str) -> bool {
        if self.overflowed {
            return false;
        }
        if self.entries.len() >= ENV_MAX_ENTRIES {
            self.overflowed = true;
            return false;
        }
        let added = key.len() + value.len();
        if self.buf.len() + added > ENV_BUFFER_SIZE {
            self.overflowed = true;
            return false;
        }

        let key_start = self.buf.len();
        self.buf.push_str(key);
        let key_end = self.buf.len();

        let value_start = self.buf.len();
        self.buf.push_str(value);
        let value_end = self.buf.len();

        self.entries.push(EnvEntry {
            key: key_start..key_end,
            value: value_start..value_end,
        });
        true
    }

    /// Whether a `push` call has already been rejected due to overflow.
    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    pub fn finish(self) -> EnvMap {
        EnvMap {
            buf: self.buf,
            entries: self.entries,
        }
    }
}
