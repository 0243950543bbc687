//! The listener: drains the source adapter, performs adaptive burst
//! accumulation, and flushes staged events to the handoff queue.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::action::Action;
use crate::env::EnvMapBuilder;
use crate::error::Error;
use crate::event::Event;
use crate::queue::HandoffQueue;
use crate::source::{PollOutcome, RawUevent, UeventSource};

/// Idle poll timeout: how long the listener waits for the first event of a
/// new window before flushing (a no-op flush, since staging is empty).
pub const IDLE_TIMEOUT_MS: i32 = 30_000;

/// Burst-ending threshold on accumulated event count within a window.
pub const MAX_ACCUMULATION_COUNT: u32 = 2048;

/// Burst-ending threshold on elapsed window time.
pub const MAX_ACCUMULATION_TIME_MS: u64 = 30_000;

/// Burst continues while the arrival rate exceeds this many events/second.
pub const MIN_BURST_SPEED: u64 = 10;

/// Drains one [`UeventSource`] and hands batches to a [`HandoffQueue`].
pub struct Listener<S: UeventSource> {
    source: S,
    queue: Arc<HandoffQueue>,
}

impl<S: UeventSource> Listener<S> {
    pub fn new(source: S, queue: Arc<HandoffQueue>) -> Self {
        Self { source, queue }
    }

    /// Locks the process's memory pages in RAM via `mlockall`, so bursts
    /// under memory pressure don't get paged out mid-accumulation. Optional:
    /// the host calls this before `run()` if it wants the guarantee.
    #[cfg(target_os = "linux")]
    pub fn lock_memory(&self) -> std::io::Result<()> {
        use nix::sys::mman::{mlockall, MlockAllFlags};
        mlockall(MlockAllFlags::MCL_CURRENT | MlockAllFlags::MCL_FUTURE).map_err(std::io::Error::from)
    }

    /// Subscribes to block/disk uevents and runs the adaptive poll loop
    /// until a fatal source error or the source is closed out from under
    /// us (host-initiated shutdown, observed as a fatal recv/poll error).
    pub fn run(&mut self) -> Result<(), Error> {
        self.source.subscribe("block", "disk").map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::MissingSourceContext
            } else {
                Error::SourceConfiguration(e)
            }
        })?;

        let mut staging = std::collections::VecDeque::new();
        let mut events: u32 = 0;
        let mut window_start = Instant::now();
        let mut poll_timeout_ms = IDLE_TIMEOUT_MS;

        loop {
            match self.source.poll(poll_timeout_ms) {
                Ok(PollOutcome::Ready) => match self.source.recv() {
                    Ok(Some(raw)) => {
                        if let Some(event) = build_event(raw) {
                            staging.push_back(event);
                        }
                        events += 1;
                        poll_timeout_ms = next_poll_timeout(events, window_start.elapsed());
                    }
                    Ok(None) => {
                        log::debug!("source reported ready but recv() yielded nothing");
                    }
                    Err(e) => {
                        log::warn!("transient error receiving uevent, continuing: {e}");
                    }
                },
                Ok(PollOutcome::Interrupted) => {
                    // Loop without flushing: an interrupted wait carries no
                    // information about the staged burst.
                    continue;
                }
                Ok(PollOutcome::Timeout) => {
                    if !staging.is_empty() {
                        log::trace!("flushing {} staged event(s)", staging.len());
                        self.queue.append_batch(std::mem::take(&mut staging));
                    }
                    events = 0;
                    window_start = Instant::now();
                    poll_timeout_ms = IDLE_TIMEOUT_MS;
                }
                Err(e) => {
                    return Err(Error::FatalSource(e));
                }
            }
        }
    }
}

/// The burst rule (spec section on burst accumulation): given the events
/// accumulated so far in this window and how long the window has been
/// open, decides whether to keep accumulating (`1`ms poll) or flush
/// (`0`ms poll, i.e. check once more then fall through to the timeout arm).
fn next_poll_timeout(events: u32, elapsed: Duration) -> i32 {
    let elapsed_ms = elapsed.as_millis() as u64;

    if events > MAX_ACCUMULATION_COUNT {
        return 0;
    }
    if elapsed_ms == 0 {
        return 1;
    }
    if elapsed_ms > MAX_ACCUMULATION_TIME_MS {
        return 0;
    }
    // Cross-multiplied rather than divided, so the decision exactly matches
    // `events * 1000 > MIN_BURST_SPEED * elapsed_ms` with no rounding.
    if (events as u64) * 1000 > MIN_BURST_SPEED * elapsed_ms {
        1
    } else {
        0
    }
}

/// Builds an `Event` from one raw notification, per the event-construction
/// algorithm: copy properties into a bounded `EnvMap` (stopping, but
/// keeping what was captured, on overflow), then require `DEVPATH` and
/// `ACTION` to both be present in what was captured. Returns `None` (and
/// drops `raw`, releasing its source handle) otherwise.
fn build_event(raw: RawUevent) -> Option<Event> {
    let mut builder = EnvMapBuilder::new();
    for (key, value) in &raw.properties {
        if !builder.push(key, value) {
            break;
        }
    }
    let env = builder.finish();

    let devpath = env.get("DEVPATH")?.to_string();
    let action: Action = env
        .get("ACTION")?
        .parse()
        .expect("Action::from_str never fails");

    Some(Event::new(action, devpath.into_boxed_str(), env, raw.handle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_continues_while_fast() {
        // events * 1000 > 10 * elapsed_ms
        assert_eq!(next_poll_timeout(100, Duration::from_millis(1000)), 1);
    }

    #[test]
    fn burst_ends_when_slow() {
        assert_eq!(next_poll_timeout(5, Duration::from_millis(1000)), 0);
    }

    #[test]
    fn burst_ends_on_count_ceiling() {
        assert_eq!(next_poll_timeout(2049, Duration::from_millis(1)), 0);
    }

    #[test]
    fn burst_continues_with_zero_elapsed() {
        assert_eq!(next_poll_timeout(1, Duration::from_millis(0)), 1);
    }

    #[test]
    fn burst_ends_past_max_accumulation_time() {
        assert_eq!(next_poll_timeout(1000, Duration::from_millis(30_001)), 0);
    }

    #[test]
    fn burst_rule_matches_quantified_invariant() {
        // For a spread of (events, elapsed_ms) pairs within bounds, the
        // decision must equal `events * 1000 > 10 * elapsed_ms`.
        for events in [1u32, 9, 10, 11, 100, 2048] {
            for elapsed_ms in [1u64, 50, 999, 1000, 1001, 30_000] {
                let expect_continue = (events as u64) * 1000 > MIN_BURST_SPEED * elapsed_ms;
                let got = next_poll_timeout(events, Duration::from_millis(elapsed_ms));
                assert_eq!(got == 1, expect_continue, "events={events} elapsed_ms={elapsed_ms}");
            }
        }
    }

    #[test]
    fn build_event_requires_devpath_and_action() {
        use crate::source::SourceHandle;

        let raw = RawUevent {
            properties: vec![("ACTION".into(), "add".into())],
            handle: SourceHandle::noop(),
        };
        assert!(build_event(raw).is_none());

        let raw = RawUevent {
            properties: vec![
                ("ACTION".into(), "add".into()),
                ("DEVPATH".into(), "/devices/.../sdb".into()),
            ],
            handle: SourceHandle::noop(),
        };
        let event = build_event(raw).expect("has both required keys");
        assert_eq!(event.kernel(), "sdb");
        assert_eq!(event.action(), &Action::Add);
    }
}

#[cfg(all(test, feature = "mock"))]
mod mock_tests {
    use std::io;

    use mockall::Sequence;

    use super::*;
    use crate::source::{MockUeventSource, SourceHandle};

    #[test]
    fn run_flushes_staged_batch_on_timeout_then_propagates_fatal_error() {
        let mut mock = MockUeventSource::new();
        let mut seq = Sequence::new();

        mock.expect_subscribe()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        mock.expect_poll()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(PollOutcome::Ready));
        mock.expect_recv().times(1).in_sequence(&mut seq).returning(|| {
            Ok(Some(RawUevent {
                properties: vec![
                    ("ACTION".into(), "add".into()),
                    ("DEVPATH".into(), "/devices/.../sdb".into()),
                ],
                handle: SourceHandle::noop(),
            }))
        });
        mock.expect_poll()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(PollOutcome::Timeout));
        mock.expect_poll()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(io::Error::other("link down")));

        let queue = Arc::new(HandoffQueue::new());
        let mut listener = Listener::new(mock, Arc::clone(&queue));

        let err = listener.run().expect_err("source poll fails fatally");
        assert!(matches!(err, Error::FatalSource(_)));

        let drained = queue.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].kernel(), "sdb");
    }

    #[test]
    fn run_propagates_subscribe_failure_as_source_configuration_error() {
        let mut mock = MockUeventSource::new();
        mock.expect_subscribe()
            .times(1)
            .returning(|_, _| Err(io::Error::other("no such subsystem")));

        let queue = Arc::new(HandoffQueue::new());
        let mut listener = Listener::new(mock, queue);
        let err = listener.run().expect_err("subscribe fails");
        assert!(matches!(err, Error::SourceConfiguration(_)));
    }

    #[test]
    fn run_reports_missing_source_context_when_subscribe_fails_not_found() {
        let mut mock = MockUeventSource::new();
        mock.expect_subscribe().times(1).returning(|_, _| {
            Err(io::Error::new(io::ErrorKind::NotFound, "no udev context available"))
        });

        let queue = Arc::new(HandoffQueue::new());
        let mut listener = Listener::new(mock, queue);
        let err = listener.run().expect_err("subscribe fails");
        assert!(matches!(err, Error::MissingSourceContext));
    }
}
