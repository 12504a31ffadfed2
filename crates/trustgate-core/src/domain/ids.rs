use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::IdError;

const MAX_ID_LEN: usize = 128;

fn validate(kind: &'static str, input: &str) -> Result<String, IdError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(IdError::Empty { kind });
    }

    let len = trimmed.chars().count();
    if len > MAX_ID_LEN {
        return Err(IdError::TooLong {
            kind,
            len,
            max: MAX_ID_LEN,
        });
    }

    for (index, ch) in trimmed.chars().enumerate() {
        let valid = ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.' | ':' | '/');
        if !valid {
            return Err(IdError::InvalidChar { kind, ch, index });
        }
    }

    Ok(trimmed.to_owned())
}

macro_rules! identifier {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn parse(input: &str) -> Result<Self, IdError> {
                validate($kind, input).map(Self)
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::parse(&value)
            }
        }

        impl TryFrom<&str> for $name {
            type Error = IdError;

            fn try_from(value: &str) -> Result<Self, Self::Error> {
                Self::parse(value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

identifier!(
    /// Identifier of a registered external source.
    SourceId,
    "source"
);

identifier!(
    /// Identifier of a logical oracle feed.
    FeedId,
    "feed"
);
