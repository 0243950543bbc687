//! Error types for the listener and dispatcher entry points.
//!
//! Per the error handling design, only two kinds of failure are ever
//! surfaced to a caller: missing configuration context and a fatal,
//! unrecoverable source adapter error. Everything else (transient source
//! hiccups, per-event allocation failures, nonzero trigger returns) is
//! handled locally and only logged; see [`crate::listener`] and
//! [`crate::dispatcher`].

use std::io;

use thiserror::Error;

/// Fatal errors returned by [`crate::listener::Listener::run`] and
/// [`crate::dispatcher::Dispatcher::run`].
#[derive(Debug, Error)]
pub enum Error {
    /// `subscribe` could not obtain the underlying source context at all
    /// (e.g. `UdevSource` failed to open a udev/netlink context). Reported
    /// by [`crate::listener::Listener::run`] when `subscribe` fails with
    /// [`io::ErrorKind::NotFound`], which source adapters use to mean
    /// exactly this ("no context available"), as opposed to a
    /// configuration mistake in an otherwise-available context.
    #[error("no source context available")]
    MissingSourceContext,

    /// `subscribe` on the source adapter failed for a reason other than a
    /// missing context (e.g. an invalid subsystem/devtype pair).
    #[error("failed to configure source adapter: {0}")]
    SourceConfiguration(#[source] io::Error),

    /// `poll` on the source adapter returned an error other than
    /// interrupted. This ends the listener loop.
    #[error("fatal source error: {0}")]
    FatalSource(#[source] io::Error),
}
