//! [`Action`]: the kernel notification's `ACTION` field.
//!
//! This is an open set: the kernel may emit action strings this crate does
//! not know about. Only `add`, `change`, and `remove` carry algorithmic
//! meaning for filtering and merging (spec section on the filter/merge
//! passes); everything else is preserved verbatim via [`Action::Other`] so
//! callers can still inspect it.

use std::fmt;
use std::str::FromStr;

/// The action a uevent reports.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Action {
    Add,
    Change,
    Remove,
    Move,
    Online,
    Offline,
    Bind,
    Unbind,
    /// Any action string not recognised above, preserved verbatim.
    Other(Box<str>),
}

impl Action {
    /// `true` for any non-`add`/`change`/`remove` action. Those three are
    /// the only ones with meaning to the filter/merge passes.
    pub fn is_algorithmic(&self) -> bool {
        matches!(self, Action::Add | Action::Change | Action::Remove)
    }
}

impl FromStr for Action {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "add" => Action::Add,
            "change" => Action::Change,
            "remove" => Action::Remove,
            "move" => Action::Move,
            "online" => Action::Online,
            "offline" => Action::Offline,
            "bind" => Action::Bind,
            "unbind" => Action::Unbind,
            other => Action::Other(other.into()),
        })
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::Add => "add",
            Action::Change => "change",
            Action::Remove => "remove",
            Action::Move => "move",
            Action::Online => "online",
            Action::Offline => "offline",
            Action::Bind => "bind",
            Action::Unbind => "unbind",
            Action::Other(s) => s,
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_known_actions() {
        for s in ["add", "change", "remove", "move", "online", "offline", "bind", "unbind"] {
            let action: Action = s.parse().unwrap();
            assert_eq!(action.to_string(), s);
        }
    }

    #[test]
    fn preserves_unknown_actions() {
        let action: Action = "frobnicate".parse().unwrap();
        assert_eq!(action, Action::Other("frobnicate".into()));
        assert!(!action.is_algorithmic());
    }

    #[test]
    fn only_add_change_remove_are_algorithmic() {
        assert!(Action::Add.is_algorithmic());
        assert!(Action::Change.is_algorithmic());
        assert!(Action::Remove.is_algorithmic());
        assert!(!Action::Move.is_algorithmic());
    }
}
