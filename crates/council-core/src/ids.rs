use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Length of the hex prefix the backend keeps from its SHA-256 digests.
const DIGEST_PREFIX_LEN: usize = 16;

macro_rules! branded_id {
    ($name:ident) => {
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
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

branded_id!(ConversationId);
branded_id!(MessageId);
branded_id!(RequestId);

impl ConversationId {
    /// Conversation key the backend files a day's messages under.
    pub fn for_date(date: NaiveDate) -> Self {
        Self(digest_prefix(&date.format("%Y-%m-%d").to_string()))
    }

    pub fn today() -> Self {
        Self::for_date(Utc::now().date_naive())
    }
}

impl MessageId {
    /// Same derivation the backend applies when it writes a message, so a
    /// payload that arrives without an `id` still deduplicates correctly.
    pub fn derive(content: &str, timestamp: &str, actor_name: &str) -> Self {
        Self(digest_prefix(&format!("{content}{timestamp}{actor_name}")))
    }
}

impl RequestId {
    pub fn new() -> Self {
        Self(format!("req_{}", Uuid::now_v7()))
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

fn digest_prefix(input: &str) -> String {
    let mut hex = format!("{:x}", Sha256::digest(input.as_bytes()));
    hex.truncate(DIGEST_PREFIX_LEN);
    hex
}
