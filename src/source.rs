//! The source adapter contract: the listener's only window onto the kernel.
//!
//! This crate does not assume a particular kernel delivery mechanism. It
//! assumes only in-order delivery per device and the four operations below.
//! A concrete implementation backed by the `udev` crate is provided as
//! [`crate::udev_source::UdevSource`] when the `udev-source` feature is
//! enabled (the default); hosts embedding this crate inside a larger
//! netlink multiplexer can implement [`UeventSource`] themselves instead.

use std::any::Any;
use std::io;

/// Outcome of one [`UeventSource::poll`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// At least one notification is ready to be `recv`'d.
    Ready,
    /// The timeout elapsed with nothing ready.
    Timeout,
    /// The underlying wait was interrupted by a signal; not fatal, retry.
    Interrupted,
}

/// An opaque, source-owned resource attached to one raw notification.
///
/// The contract is simply: release happens exactly once, whenever this
/// value is dropped. Because [`crate::event::Event`] owns its
/// `SourceHandle` by value (and a merge parent owns its absorbed
/// children's handles transitively through `merged`), Rust's ordinary
/// ownership rules are sufficient to satisfy "released exactly once across
/// the entire lifetime of the event, including absorbed merge children":
/// no extra bookkeeping is needed on top of `Drop`.
pub struct SourceHandle(Box<dyn Any + Send>);

impl SourceHandle {
    /// Wraps any droppable resource as a `SourceHandle`.
    pub fn new<T: Any + Send>(resource: T) -> Self {
        Self(Box::new(resource))
    }

    /// A handle that releases nothing; useful in tests and for sources that
    /// have no per-event resource to track.
    pub fn noop() -> Self {
        Self::new(())
    }
}

impl std::fmt::Debug for SourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SourceHandle(..)")
    }
}

/// One raw notification as delivered by the source adapter, before the
/// listener has validated and bounded it into an [`Event`](crate::event::Event).
pub struct RawUevent {
    /// The raw property list, in delivery order. May contain duplicate
    /// keys or be missing `ACTION`/`DEVPATH` entirely; validation is the
    /// listener's job (event construction, not the source adapter's).
    pub properties: Vec<(String, String)>,
    /// The per-event resource the source adapter wants released exactly
    /// once, whenever the notification (or the [`Event`](crate::event::Event)
    /// built from it) is finally dropped.
    pub handle: SourceHandle,
}

impl RawUevent {
    /// Convenience accessor used by event construction (first match wins,
    /// matching "walk the raw property list"; later duplicate keys, if
    /// any, do not overwrite earlier ones).
    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// The source adapter contract consumed by [`crate::listener::Listener`].
///
/// Implementations must deliver notifications for a single device in
/// emission order; the listener and dispatcher rely on that ordering for
/// their own ordering guarantees.
#[cfg_attr(feature = "mock", mockall::automock)]
pub trait UeventSource {
    /// Restricts delivery to a kernel subsystem/devtype pair (e.g.
    /// `"block"`/`"disk"`). Called once, before the first `poll`.
    fn subscribe(&mut self, subsystem: &str, devtype: &str) -> io::Result<()>;

    /// Blocks for at most `timeout_ms` milliseconds (`0` = return
    /// immediately, never negative) waiting for a notification to become
    /// available.
    fn poll(&mut self, timeout_ms: i32) -> io::Result<PollOutcome>;

    /// Returns the next buffered notification, or `None` if `poll` reported
    /// readiness spuriously (the transient "recv returning none" case from
    /// the error handling design: log and continue, not fatal).
    fn recv(&mut self) -> io::Result<Option<RawUevent>>;
}
