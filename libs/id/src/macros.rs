//! Macros for defining typed ID types.

/// Macro to define a typed ID with a mint prefix.
///
/// This generates a newtype wrapper around an owned string with:
/// - A `PREFIX` constant used when capstan mints a fresh ID
/// - `new()` to mint a fresh `{prefix}_{ulid}` ID
/// - `parse()` accepting any non-empty string, so identifiers assigned by
///   the external resource manager pass through untouched
/// - `Display`, `FromStr`, `AsRef<str>` implementations
/// - `Serialize` and `Deserialize` implementations
/// - `Ord`, `Hash`, and other standard traits
///
/// # Example
///
/// ```ignore
/// define_id!(TaskId, "task");
/// define_id!(OfferId, "offer");
///
/// let minted = TaskId::new();
/// let from_manager: OfferId = "OFFER-20140114-3941".parse()?;
/// ```
#[macro_export]
macro_rules! define_id {
    ($name:ident, $prefix:literal) => {
        /// A typed ID for this resource kind.
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(String);

        impl $name {
            /// The prefix used for IDs minted by capstan.
            pub const PREFIX: &'static str = $prefix;

            /// Mints a new ID with a fresh ULID.
            #[must_use]
            pub fn new() -> Self {
                Self(format!("{}_{}", Self::PREFIX, $crate::Ulid::new()))
            }

            /// Parses an ID from a string.
            ///
            /// Externally assigned identifiers are accepted verbatim; the
            /// only requirements are non-empty and no interior whitespace.
            pub fn parse(s: &str) -> Result<Self, $crate::IdError> {
                if s.is_empty() {
                    return Err($crate::IdError::Empty);
                }
                if s.chars().any(char::is_whitespace) {
                    return Err($crate::IdError::InvalidFormat {
                        message: format!("'{}' contains whitespace", s),
                    });
                }
                Ok(Self(s.to_string()))
            }

            /// Returns the ID as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Returns true if this ID was minted by capstan.
            #[must_use]
            pub fn is_minted(&self) -> bool {
                self.0
                    .strip_prefix(Self::PREFIX)
                    .and_then(|rest| rest.strip_prefix('_'))
                    .map(|ulid| ulid.parse::<$crate::Ulid>().is_ok())
                    .unwrap_or(false)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                Self::parse(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}
