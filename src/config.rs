//! The configuration store: a read-only snapshot of devnode filter rules
//! and identifier-attribute rules, acquired and released within a single
//! prepare pass.
//!
//! `ConfigHandle` is a thin scoped-access guard (a caller holds it for the
//! scope of one operation, and its drop releases access), except the
//! resource here is an `Arc` snapshot rather than a pinned borrow, since
//! the config store can be swapped out from under a running dispatcher
//! (e.g. on `SIGHUP`-triggered reload).

use std::ops::Deref;
use std::sync::{Arc, RwLock};

/// One devnode-filter or identifier rule pattern. Supports a single
/// trailing `*` wildcard (the subset `multipath.conf`'s `devnode`/
/// `blacklist` directives actually use), matching the glob style the
/// original config file's rule lists use.
fn glob_match(pattern: &str, value: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => value.starts_with(prefix),
        None => pattern == value,
    }
}

/// One identifier-attribute rule: kernel names matching `kernel_pattern`
/// resolve their `wwid` via `env_key`.
#[derive(Debug, Clone)]
pub struct IdentifierRule {
    pub kernel_pattern: String,
    pub env_key: String,
}

impl IdentifierRule {
    pub fn new(kernel_pattern: impl Into<String>, env_key: impl Into<String>) -> Self {
        Self {
            kernel_pattern: kernel_pattern.into(),
            env_key: env_key.into(),
        }
    }
}

/// The default identifier-attribute key used when no rule matches a kernel
/// name. Mirrors `multipath-tools`' fallback of reading the SCSI serial
/// attribute when no per-device-class override applies.
pub const DEFAULT_UID_ATTRIBUTE: &str = "ID_SERIAL";

/// Read-only configuration consulted by the dispatcher's prepare pass.
#[derive(Debug, Clone, Default)]
pub struct ConfigSnapshot {
    /// Block-device names the devnode filter accepts; empty means "accept
    /// everything not denied".
    pub devnode_allow: Vec<String>,
    /// Block-device names the devnode filter rejects outright, checked
    /// before `devnode_allow`.
    pub devnode_deny: Vec<String>,
    /// Identifier-attribute rules. A non-empty list means merging is
    /// enabled (spec's "possibly-empty list... non-empty means merging is
    /// enabled").
    pub identifier_rules: Vec<IdentifierRule>,
}

impl ConfigSnapshot {
    pub fn merging_enabled(&self) -> bool {
        !self.identifier_rules.is_empty()
    }
}

/// Outcome of [`filter_devnode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterVerdict {
    Accept,
    Reject,
}

/// Devnode allow/deny filter, consulted by the prepare pass for every
/// non-`dm-*` event. Deny rules take priority; when the allow list is
/// non-empty, a kernel name must also match it to be accepted.
pub fn filter_devnode(allow: &[String], deny: &[String], kernel: &str) -> FilterVerdict {
    if deny.iter().any(|pat| glob_match(pat, kernel)) {
        return FilterVerdict::Reject;
    }
    if allow.is_empty() || allow.iter().any(|pat| glob_match(pat, kernel)) {
        FilterVerdict::Accept
    } else {
        FilterVerdict::Reject
    }
}

/// Resolves the identifier-attribute environment key to use for `kernel`:
/// the env key of the first matching rule, or [`DEFAULT_UID_ATTRIBUTE`] if
/// none match.
pub fn get_uid_attribute(snapshot: &ConfigSnapshot, kernel: &str) -> String {
    snapshot
        .identifier_rules
        .iter()
        .find(|rule| glob_match(&rule.kernel_pattern, kernel))
        .map(|rule| rule.env_key.clone())
        .unwrap_or_else(|| DEFAULT_UID_ATTRIBUTE.to_string())
}

/// A scoped, read-only view of the current configuration. Acquired via
/// [`ConfigStore::get_config`] and released on drop (scoped acquisition
/// with guaranteed release on every exit path, as the prepare pass
/// requires).
pub struct ConfigHandle {
    snapshot: Arc<ConfigSnapshot>,
}

impl Deref for ConfigHandle {
    type Target = ConfigSnapshot;

    fn deref(&self) -> &Self::Target {
        &self.snapshot
    }
}

/// Holds the live, swappable configuration. Reads are lock-free after
/// acquisition (the handle holds its own `Arc` clone); writes replace the
/// whole snapshot atomically.
#[derive(Default)]
pub struct ConfigStore {
    current: RwLock<Arc<ConfigSnapshot>>,
}

impl ConfigStore {
    pub fn new(initial: ConfigSnapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
        }
    }

    /// Scoped acquisition: clones the current snapshot `Arc` under a brief
    /// read lock, then releases the lock. The returned handle keeps the
    /// snapshot alive (and consistent) for the remainder of the prepare
    /// pass even if `put_config` swaps in a new one concurrently.
    pub fn get_config(&self) -> ConfigHandle {
        let snapshot = self.current.read().unwrap_or_else(|e| e.into_inner()).clone();
        ConfigHandle { snapshot }
    }

    /// Atomically replaces the configuration, e.g. on a reload signal.
    pub fn put_config(&self, snapshot: ConfigSnapshot) {
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deny_takes_priority_over_allow() {
        let allow = vec!["sd*".to_string()];
        let deny = vec!["sdz".to_string()];
        assert_eq!(filter_devnode(&allow, &deny, "sda"), FilterVerdict::Accept);
        assert_eq!(filter_devnode(&allow, &deny, "sdz"), FilterVerdict::Reject);
    }

    #[test]
    fn empty_allow_list_accepts_everything_not_denied() {
        assert_eq!(filter_devnode(&[], &[], "sda"), FilterVerdict::Accept);
        assert_eq!(
            filter_devnode(&[], &["sda".to_string()], "sda"),
            FilterVerdict::Reject
        );
    }

    #[test]
    fn non_empty_allow_list_rejects_unmatched_names() {
        let allow = vec!["sd*".to_string()];
        assert_eq!(filter_devnode(&allow, &[], "vda"), FilterVerdict::Reject);
    }

    #[test]
    fn uid_attribute_falls_back_to_default() {
        let snap = ConfigSnapshot {
            identifier_rules: vec![IdentifierRule::new("sd*", "ID_WWN")],
            ..Default::default()
        };
        assert_eq!(get_uid_attribute(&snap, "sda"), "ID_WWN");
        assert_eq!(get_uid_attribute(&snap, "vda"), DEFAULT_UID_ATTRIBUTE);
    }

    #[test]
    fn merging_enabled_reflects_rule_presence() {
        assert!(!ConfigSnapshot::default().merging_enabled());
        let snap = ConfigSnapshot {
            identifier_rules: vec![IdentifierRule::new("sd*", "ID_WWN")],
            ..Default::default()
        };
        assert!(snap.merging_enabled());
    }

    #[test]
    fn store_round_trips_through_handle() {
        let store = ConfigStore::new(ConfigSnapshot::default());
        assert!(!store.get_config().merging_enabled());
        store.put_config(ConfigSnapshot {
            identifier_rules: vec![IdentifierRule::new("*", "ID_SERIAL")],
            ..Default::default()
        });
        assert!(store.get_config().merging_enabled());
    }
}
