use std::fmt::{self, Display, Formatter};

use super::types::Message;

impl Message {
    /// Serialize to wire form without the line terminator.
    ///
    /// The final parameter is written in trailing form when it is empty,
    /// contains a space, or starts with `:`.
    pub fn to_line(&self) -> String {
        self.to_string()
    }
}

impl Display for Message {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if let Some(ref origin) = self.origin {
            write!(f, ":{} ", origin)?;
        }

        write!(f, "{}", self.command)?;

        let count = self.params.len();
        for (i, param) in self.params.iter().enumerate() {
            let last = i + 1 == count;
            if last && (param.is_empty() || param.contains(' ') || param.starts_with(':')) {
                write!(f, " :{}", param)?;
            } else {
                write!(f, " {}", param)?;
            }
        }

        Ok(())
    }
}
