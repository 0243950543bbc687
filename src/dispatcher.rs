//! The dispatcher: drains whole snapshots from the handoff queue and runs
//! prepare → filter → merge → service over each one.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::action::Action;
use crate::config::{filter_devnode, get_uid_attribute, ConfigStore, FilterVerdict};
use crate::event::Event;
use crate::queue::HandoffQueue;

/// The per-event reconfiguration callback. Implementors apply `event` to
/// higher-level multipath state; `0` (`Ok`-like) or any nonzero code may be
/// returned, matching the external `trigger_fn(event, ctx) -> 0 | nonzero`
/// contract (in Rust, `ctx` is simply whatever state the implementor
/// closes over).
#[cfg_attr(feature = "mock", mockall::automock)]
pub trait Trigger: Send {
    /// Returns `0` on success, nonzero on failure. A nonzero return is
    /// logged and otherwise ignored; it never aborts the snapshot.
    fn call(&mut self, event: &Event) -> i32;
}

impl<F> Trigger for F
where
    F: FnMut(&Event) -> i32 + Send,
{
    fn call(&mut self, event: &Event) -> i32 {
        self(event)
    }
}

/// Holds the dispatcher's trigger callback, settable and clearable from any
/// thread. Clearing the slot (plus signalling the handoff queue's
/// shutdown, see [`DispatcherHandle::shutdown`]) is how the dispatcher
/// thread is told to exit its loop, the Rust equivalent of "the trigger
/// callback reference is cleared".
pub struct TriggerSlot {
    trigger: Mutex<Option<Box<dyn Trigger>>>,
}

impl TriggerSlot {
    pub fn new(trigger: impl Trigger + 'static) -> Self {
        Self {
            trigger: Mutex::new(Some(Box::new(trigger))),
        }
    }

    fn call(&self, event: &Event) -> Option<i32> {
        let mut guard = self.trigger.lock().unwrap_or_else(|e| e.into_inner());
        guard.as_mut().map(|t| t.call(event))
    }

    fn clear(&self) {
        *self.trigger.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

/// A cloneable, `Send + Sync` reference to a running dispatcher, usable
/// from any thread to probe quiescence or request shutdown: the
/// replacement for the module-level globals (`servicing_uev`, the trigger
/// callback) the original C daemon used.
#[derive(Clone)]
pub struct DispatcherHandle {
    queue: Arc<HandoffQueue>,
    trigger: Arc<TriggerSlot>,
}

impl DispatcherHandle {
    /// Pipeline quiescence probe: `false` iff the handoff queue is empty
    /// and no service pass is currently running.
    pub fn is_busy(&self) -> bool {
        self.queue.is_busy()
    }

    /// Clears the trigger and wakes the dispatcher thread so it observes
    /// the cleared trigger and shutdown request, finishes its current
    /// snapshot (if any), and returns.
    pub fn shutdown(&self) {
        self.trigger.clear();
        self.queue.shutdown();
    }
}

/// Runs prepare → filter → merge → service over whole snapshots drained
/// from the handoff queue, until shutdown.
pub struct Dispatcher {
    queue: Arc<HandoffQueue>,
    config: Arc<ConfigStore>,
    trigger: Arc<TriggerSlot>,
}

impl Dispatcher {
    pub fn new(queue: Arc<HandoffQueue>, config: Arc<ConfigStore>, trigger: impl Trigger + 'static) -> Self {
        Self {
            queue,
            config,
            trigger: Arc::new(TriggerSlot::new(trigger)),
        }
    }

    /// A handle other threads can use to probe or shut this dispatcher
    /// down.
    pub fn handle(&self) -> DispatcherHandle {
        DispatcherHandle {
            queue: Arc::clone(&self.queue),
            trigger: Arc::clone(&self.trigger),
        }
    }

    /// Runs until the handoff queue reports shutdown with nothing left to
    /// deliver.
    pub fn run(&mut self) {
        loop {
            let snapshot = self.queue.drain();
            if snapshot.is_empty() {
                break;
            }
            let mut snapshot: Vec<Option<Event>> = snapshot.into_iter().map(Some).collect();

            {
                let config = self.config.get_config();
                prepare_pass(&mut snapshot, &config);
                filter_pass(&mut snapshot);
                if config.merging_enabled() {
                    merge_pass(&mut snapshot);
                }
            }

            self.service_pass(snapshot);
        }
    }

    fn service_pass(&self, snapshot: Vec<Option<Event>>) {
        for slot in snapshot {
            let Some(event) = slot else { continue };
            if let Some(code) = self.trigger.call(&event) {
                if code != 0 {
                    log::error!(
                        "trigger failed for kernel={} action={} (code {code})",
                        event.kernel(),
                        event.action(),
                    );
                }
            }
            // `event` drops here, releasing its source handle and (through
            // `merged`) every absorbed child's handle too.
        }
    }
}

/// Prepare pass (spec 4.4.1): reverse walk applying the devnode filter and
/// resolving `wwid` for every non-`dm-*` event.
fn prepare_pass(snapshot: &mut [Option<Event>], config: &crate::config::ConfigSnapshot) {
    for slot in snapshot.iter_mut().rev() {
        let Some(event) = slot.as_mut() else { continue };
        if event.is_dm() {
            continue;
        }

        if filter_devnode(&config.devnode_allow, &config.devnode_deny, event.kernel())
            == FilterVerdict::Reject
        {
            *slot = None;
            continue;
        }

        if config.merging_enabled() {
            let key = get_uid_attribute(config, event.kernel());
            let wwid = event.env().get(&key).map(|v| v.to_owned().into_boxed_str());
            event.set_wwid(wwid);
        }
    }
}

/// Filter pass (spec 4.4.2): for each `later` event (reverse order), drop
/// `earlier` events it subsumes.
fn filter_pass(snapshot: &mut [Option<Event>]) {
    for later_idx in (0..snapshot.len()).rev() {
        let Some(later) = snapshot[later_idx].as_ref() else { continue };
        let later_kernel = later.kernel().to_string();
        let later_action = later.action().clone();
        let later_is_dm = later.is_dm();

        for earlier_idx in 0..later_idx {
            let Some(earlier) = snapshot[earlier_idx].as_ref() else { continue };
            if earlier.kernel() != later_kernel {
                continue;
            }

            let remove_subsumption = later_action == Action::Remove && !later_is_dm;
            let change_before_add =
                earlier.action() == &Action::Change && later_action == Action::Add && !later_is_dm;

            if remove_subsumption || change_before_add {
                snapshot[earlier_idx] = None;
            }
        }
    }
}

/// Merge pass (spec 4.4.3): for each `later` event (reverse order), absorb
/// eligible `earlier` events into it until a merge barrier is hit.
fn merge_pass(snapshot: &mut [Option<Event>]) {
    for later_idx in (0..snapshot.len()).rev() {
        let is_dm_later = match snapshot[later_idx].as_ref() {
            Some(e) => e.is_dm(),
            None => continue,
        };
        if is_dm_later {
            // dm events never merge and are a barrier for earlier events,
            // but they are never merge *targets* either: nothing to do.
            continue;
        }

        let (later_wwid, later_action) = {
            let later = snapshot[later_idx].as_ref().unwrap();
            (later.wwid().map(str::to_owned), later.action().clone())
        };

        for earlier_idx in (0..later_idx).rev() {
            let Some(earlier) = snapshot[earlier_idx].as_ref() else { continue };
            let earlier_wwid = earlier.wwid().map(str::to_owned);
            let earlier_action = earlier.action().clone();
            let earlier_is_dm = earlier.is_dm();

            let stop = match (&earlier_wwid, &later_wwid) {
                (None, _) | (_, None) => true,
                (Some(ew), Some(lw)) => {
                    ew == lw
                        && earlier_action != later_action
                        && earlier_action != Action::Change
                        && later_action != Action::Change
                }
            };
            if stop {
                break;
            }

            let should_merge = earlier_wwid == later_wwid
                && earlier_action == later_action
                && earlier_action != Action::Change
                && !earlier_is_dm;

            if should_merge {
                let child = snapshot[earlier_idx].take().unwrap();
                snapshot[later_idx].as_mut().unwrap().absorb(child);
            }
        }
    }
}


#[cfg(all(test, feature = "mock"))]
mod mock_tests {
    use super::*;
    use crate::config::ConfigSnapshot;

    #[test]
    fn run_drains_until_shutdown_invoking_trigger_once_per_surviving_event() {
        let queue = Arc::new(HandoffQueue::new());
        let config = Arc::new(ConfigStore::new(ConfigSnapshot::default()));

        let mut batch = VecDeque::new();
        batch.push_back(Event::new(
            Action::Add,
            "/devices/.../sda".into(),
            crate::env::EnvMap::default(),
            crate::source::SourceHandle::noop(),
        ));
        queue.append_batch(batch);
        queue.shutdown();

        let mut mock = MockTrigger::new();
        mock.expect_call().times(1).returning(|_| 0);

        let mut dispatcher = Dispatcher::new(queue, config, mock);
        dispatcher.run();
    }

    #[test]
    fn nonzero_trigger_return_does_not_abort_the_rest_of_the_snapshot() {
        let queue = Arc::new(HandoffQueue::new());
        let config = Arc::new(ConfigStore::new(ConfigSnapshot::default()));

        let mut batch = VecDeque::new();
        batch.push_back(Event::new(
            Action::Add,
            "/devices/.../sda".into(),
            crate::env::EnvMap::default(),
            crate::source::SourceHandle::noop(),
        ));
        batch.push_back(Event::new(
            Action::Add,
            "/devices/.../sdb".into(),
            crate::env::EnvMap::default(),
            crate::source::SourceHandle::noop(),
        ));
        queue.append_batch(batch);
        queue.shutdown();

        let mut mock = MockTrigger::new();
        mock.expect_call().times(2).returning(|_| 1);

        let mut dispatcher = Dispatcher::new(queue, config, mock);
        dispatcher.run();
    }
}
