use serde::{Deserialize, Serialize};
use snafu::Snafu;

const MAX_ID_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Snafu)]
pub enum ParseId {
    #[snafu(display("missing {kind} id"))]
    Missing { kind: String },

    #[snafu(display("{kind} id `{text}` is malformed"))]
    Malformed { kind: String, text: String },
}

/// Accepts ids made of ascii alphanumerics, `-` and `_`, which covers uuids and slugs.
fn validate(kind: &str, text: &str) -> Result<String, ParseId> {
    let text = text.trim();

    if text.is_empty() {
        return MissingSnafu { kind }.fail();
    }

    let well_formed = text.len() <= MAX_ID_LEN
        && text
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

    if !well_formed {
        return MalformedSnafu { kind, text }.fail();
    }

    Ok(text.to_string())
}

/// Defines a string-backed identifier.
///
/// # Syntax
/// ```ignore
/// define_id!(Name, "kind");
/// ```
/// The generated type validates its content on parse and on deserialize.
macro_rules! define_id {
    ($name:ident, $kind:literal) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn parse(text: &str) -> Result<Self, ParseId> {
                validate($kind, text).map(Self)
            }

            /// Generates a fresh random id.
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::str::FromStr for $name {
            type Err = ParseId;

            fn from_str(input: &str) -> Result<Self, Self::Err> {
                Self::parse(input)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let text = String::deserialize(deserializer)?;
                Self::parse(&text).map_err(serde::de::Error::custom)
            }
        }
    };
}

define_id!(VideoId, "video");
define_id!(UserId, "user");
define_id!(CommentId, "comment");
