use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! branded_id {
    ($name:ident, $prefix:expr) => {
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(format!("{}_{}", $prefix, Uuid::now_v7()))
            }

            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

branded_id!(MessageId, "msg");
branded_id!(ThreadId, "thread");
branded_id!(SessionId, "sess");

impl MessageId {
    /// Id for the message at `position` in a transcript. Transcript ids are
    /// the decimal arrival position, so they are unique and increase with
    /// every append.
    pub fn at_position(position: usize) -> Self {
        Self(position.to_string())
    }

    /// The arrival position encoded in a transcript-assigned id.
    pub fn position(&self) -> Option<usize> {
        self.0.parse().ok()
    }
}

impl From<&MessageId> for ThreadId {
    fn from(id: &MessageId) -> Self {
        ThreadId::from_raw(id.as_str())
    }
}

impl From<&ThreadId> for MessageId {
    fn from(id: &ThreadId) -> Self {
        MessageId::from_raw(id.as_str())
    }
}
