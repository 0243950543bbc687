//! [`Event`]: one kernel uevent as it flows through the pipeline.
//!
//! See the data-model invariants: exactly one owner at any instant (the
//! listener's staging list, the handoff queue, the dispatcher's working
//! snapshot, or a parent's `merged` list); `source_handle` releases exactly
//! once, which here just means `Event` owns it by value and `Drop` does the
//! rest, transitively through `merged`.

use crate::action::Action;
use crate::env::EnvMap;
use crate::source::SourceHandle;

/// One uevent, possibly with other events merged into it.
///
/// `devpath`/`action`/`env` are set at construction time and never change.
/// `kernel` is derived from `devpath` (the trailing path component) and
/// cached as a byte offset rather than a second owned string, so `Event`
/// has no internal lifetime, cheaper to move between the listener's
/// staging list, the handoff queue, and the dispatcher's snapshot than a
/// self-referential struct would be.
#[derive(Debug)]
pub struct Event {
    action: Action,
    devpath: Box<str>,
    /// Byte offset into `devpath` of the first character after its last
    /// `/`. `kernel()` slices `devpath` with it.
    kernel_start: usize,
    env: EnvMap,
    /// Resolved lazily by the dispatcher's prepare pass; `None` until then,
    /// and possibly still `None` afterward if the identifier key is absent.
    wwid: Option<Box<str>>,
    source_handle: SourceHandle,
    /// Child events absorbed by the merge pass, in absorption order.
    merged: Vec<Event>,
}

impl Event {
    /// Builds an event from its already-validated fields. `kernel()` is
    /// always a suffix of `devpath`, so construction goes through here
    /// rather than a `pub` struct literal.
    pub fn new(action: Action, devpath: Box<str>, env: EnvMap, source_handle: SourceHandle) -> Self {
        let kernel_start = devpath.rfind('/').map(|i| i + 1).unwrap_or(0);
        Self {
            action,
            devpath,
            kernel_start,
            env,
            wwid: None,
            source_handle,
            merged: Vec::new(),
        }
    }

    pub fn action(&self) -> &Action {
        &self.action
    }

    pub fn devpath(&self) -> &str {
        &self.devpath
    }

    /// The basename of `devpath`, e.g. `sdb` for `/devices/.../sdb`.
    pub fn kernel(&self) -> &str {
        &self.devpath[self.kernel_start..]
    }

    /// `true` for device-mapper events (`dm-*` kernel names). These are the
    /// multipath virtual devices themselves: never filtered by devnode
    /// rules, never absorbed by merge, and a merge barrier for earlier
    /// events in the same snapshot.
    pub fn is_dm(&self) -> bool {
        self.kernel().starts_with("dm-")
    }

    pub fn env(&self) -> &EnvMap {
        &self.env
    }

    pub fn wwid(&self) -> Option<&str> {
        self.wwid.as_deref()
    }

    /// Set by the dispatcher's prepare pass. The identifier is meant to be
    /// resolved exactly once per event, per the data model's "computed
    /// lazily... never recomputed afterward".
    pub fn set_wwid(&mut self, wwid: Option<Box<str>>) {
        self.wwid = wwid;
    }

    pub fn merged(&self) -> &[Event] {
        &self.merged
    }

    /// Absorbs `child` into this event's merge list, in the order the merge
    /// pass visits earlier events.
    pub fn absorb(&mut self, child: Event) {
        self.merged.push(child);
    }

    /// Drains the merged children, e.g. for the service pass to log/inspect
    /// before the parent (and its children) drop.
    pub fn into_merged(self) -> Vec<Event> {
        self.merged
    }
}
