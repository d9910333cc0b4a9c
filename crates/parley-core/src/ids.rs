use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque string identifier. Generated ids are `<prefix>_<uuid v7>`, so ids
/// minted by one process sort by creation time.
macro_rules! chat_id {
    ($(#[$meta:meta])* $name:ident => $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn generate() -> Self {
                Self(format!(concat!($prefix, "_{}"), Uuid::now_v7()))
            }

            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

chat_id!(UserId => "user");
chat_id!(MessageId => "msg");
chat_id!(
    /// One push-channel socket. A user reconnecting gets a fresh one.
    ConnectionId => "conn"
);
chat_id!(
    /// Client-side handle for an optimistic send, never sent to the server.
    CorrelationId => "tmp"
);

impl UserId {
    /// Read a user id as a browser client sends it on the handshake query.
    /// Blank values and the literal `undefined` mean "no user".
    pub fn from_handshake(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        (!raw.is_empty() && raw != "undefined").then(|| Self::from_raw(raw))
    }
}
