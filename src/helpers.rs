//! Small infallible accessors over [`Event`], per the external-interfaces
//! helper list. None of these can fail: absent data is always reported as
//! a sentinel (`None`/`-1`/`false`), never an error, matching the
//! propagation policy that env accessors never raise to callers.

use crate::event::Event;

/// The fixed prefix `DM_UUID` carries for multipath device-mapper targets.
const MPATH_UUID_PREFIX: &str = "mpath-";

/// Looks up `key` in `event`'s environment.
pub fn get_env<'a>(event: &'a Event, key: &str) -> Option<&'a str> {
    event.env().get(key)
}

/// Looks up `key` and parses it as a non-negative integer, returning `-1`
/// if the key is absent or does not parse as one.
pub fn get_env_positive_int(event: &Event, key: &str) -> i64 {
    event
        .env()
        .get(key)
        .and_then(|v| v.parse::<i64>().ok())
        .filter(|n| *n >= 0)
        .unwrap_or(-1)
}

/// `true` iff `DM_UUID` is present and starts with the multipath UUID
/// prefix and has at least one character after it (i.e. the device-mapper
/// UUID actually names something, not just the bare prefix).
pub fn is_mpath(event: &Event) -> bool {
    match get_env(event, "DM_UUID") {
        Some(uuid) => match uuid.strip_prefix(MPATH_UUID_PREFIX) {
            Some(rest) => !rest.is_empty(),
            None => false,
        },
        None => false,
    }
}

/// Looks up `DM_<KEY>` style device-mapper environment entries (e.g.
/// `get_dm_str(event, "NAME")` reads `DM_NAME`), returning an owned copy
/// since callers typically stash it past the event's lifetime.
pub fn get_dm_str(event: &Event, key: &str) -> Option<String> {
    let full_key = format!("DM_{key}");
    get_env(event, &full_key).map(str::to_owned)
}
