//! Macros for defining identifier types.

/// Defines an opaque identifier newtype for an externally assigned id.
///
/// External systems (the metadata store, the compute cluster) own the
/// format of these identifiers, so the generated type only validates that
/// the value is non-empty after trimming. It provides:
/// - `parse()` returning [`IdError::Empty`](crate::IdError) for blank input
/// - `as_str()` and `Display`
/// - `FromStr`, `Serialize`, and `Deserialize` implementations
///
/// # Example
///
/// ```ignore
/// define_opaque_id!(AssemblyId);
///
/// let id = AssemblyId::parse("ASM1187677075917")?;
/// assert_eq!(id.as_str(), "ASM1187677075917");
/// ```
#[macro_export]
macro_rules! define_opaque_id {
    ($name:ident) => {
        /// An opaque, externally assigned identifier.
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(String);

        impl $name {
            /// Parses an identifier, rejecting empty or whitespace-only input.
            pub fn parse(s: &str) -> Result<Self, $crate::IdError> {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return Err($crate::IdError::Empty);
                }
                Ok(Self(trimmed.to_string()))
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
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
