use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! branded_id {
    ($name:ident, $generate:expr) => {
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self($generate)
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
    };
}

// Session ids are opaque and frequently client-supplied, so generated ones
// are bare UUIDs rather than prefixed.
branded_id!(SessionId, Uuid::new_v4().to_string());
branded_id!(ToolCallId, format!("toolu_{}", Uuid::now_v7()));

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_session_ids_are_uuids() {
        let id = SessionId::new();
        assert!(Uuid::parse_str(id.as_str()).is_ok(), "got: {id}");
    }

    #[test]
    fn generated_session_ids_are_unique() {
        let ids: std::collections::HashSet<SessionId> = (0..100).map(|_| SessionId::new()).collect();
        assert_eq!(ids.len(), 100);
    }

    #[test]
    fn tool_call_id_has_prefix() {
        let id = ToolCallId::new();
        assert!(id.as_str().starts_with("toolu_"), "got: {id}");
    }

    #[test]
    fn from_raw_preserves_value() {
        let id = SessionId::from_raw("client-chosen-id");
        assert_eq!(id.as_str(), "client-chosen-id");
        assert_eq!(id.to_string(), "client-chosen-id");
    }

    #[test]
    fn serializes_transparently() {
        let id = SessionId::from_raw("abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), r#""abc""#);
        let parsed: SessionId = serde_json::from_str(r#""abc""#).unwrap();
        assert_eq!(parsed, id);
    }
}
