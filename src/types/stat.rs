use std::fmt;

use crate::utils::human_bytes;

/// The drop listing returned by a `STAT` command.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct Stat {
    /// Number of messages in the maildrop, not counting those marked as deleted.
    pub count: u32,
    /// Size of the maildrop in octets.
    pub size: u64,
}

impl fmt::Display for Stat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} messages, total size {}",
            self.count,
            human_bytes(self.size)
        )
    }
}
