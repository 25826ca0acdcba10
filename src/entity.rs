//! The demo payload served by [`ReplyServer`](crate::server::ReplyServer).

use core::fmt;

use serde::{Deserialize, Serialize};

/// A named remote entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    pub id: i64,
}

impl Entity {
    pub fn new(name: impl Into<String>, id: i64) -> Self {
        Self {
            name: name.into(),
            id,
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity(name={}, id={})", self.name, self.id)
    }
}
