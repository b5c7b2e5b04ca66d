//! IRC message origin types.
//!
//! The origin identifies who sent a message. Users appear as
//! `nick!user@host`; servers appear as a bare name, which lands in the
//! `nick` field since the two cannot be told apart reliably.

use std::str::FromStr;

/// Origin of a message, split into its three segments.
///
/// Any segment may be empty.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Default)]
pub struct Origin {
    /// Nickname, or server name for server-originated lines.
    pub nick: String,
    /// Username (ident).
    pub user: String,
    /// Hostname.
    pub host: String,
}

impl Origin {
    /// Split an origin string into `nick`, `user`, and `host`.
    ///
    /// The nick runs up to the first `!` or `@`, the user from `!` up to
    /// `@`, and the host is everything after `@`. This never fails.
    pub fn new_from_str(s: &str) -> Self {
        #[derive(Copy, Clone, Eq, PartialEq)]
        enum Part {
            Nick,
            User,
            Host,
        }

        let mut origin = Origin::default();
        let mut part = Part::Nick;

        for c in s.chars() {
            match c {
                '!' if part == Part::Nick => part = Part::User,
                '@' if part != Part::Host => part = Part::Host,
                _ => match part {
                    Part::Nick => &mut origin.nick,
                    Part::User => &mut origin.user,
                    Part::Host => &mut origin.host,
                }
                .push(c),
            }
        }

        origin
    }

    /// Create an origin from its components.
    pub fn new(nick: impl Into<String>, user: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            nick: nick.into(),
            user: user.into(),
            host: host.into(),
        }
    }

    /// The `user@host` part, as used for reply length budgeting.
    pub fn address(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

impl FromStr for Origin {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Origin::new_from_str(s))
    }
}

impl From<&str> for Origin {
    fn from(s: &str) -> Self {
        Origin::new_from_str(s)
    }
}
