use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident, $prefix:literal) => {
        $(#[$doc])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Fresh cryptographically random identifier.
            pub fn generate() -> Self {
                Self(format!("{}:{}", $prefix, uuid::Uuid::new_v4()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

string_id!(
    /// Identity of an agent, a human, or a service.
    PrincipalId,
    "prn"
);
string_id!(
    /// A scoped, time-bound permission grant.
    MandateId,
    "mnd"
);
string_id!(
    /// A versioned authority policy.
    PolicyId,
    "pol"
);
string_id!(
    /// A sealed Merkle batch.
    BatchId,
    "bat"
);
string_id!(
    /// A registered signing key.
    KeyId,
    "key"
);
string_id!(
    /// A gateway validator instance.
    ValidatorId,
    "val"
);
