//! Message origin (`nick!user@host`) parsing and formatting.

mod serialize;
mod types;

pub use self::types::Origin;
