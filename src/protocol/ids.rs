use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self::new(id)
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    }
}

string_id!(
    /// Unique id of an air-conditioning unit, as assigned by the cloud directory.
    DeviceUniqueId
);

string_id!(
    /// Id of a client on the message bus (e.g. this mobile client).
    DeviceId
);

string_id!(
    /// Opaque token linking an outgoing command to its confirmations.
    ///
    /// Only ever compared for equality.
    CorrelationId
);

impl CorrelationId {
    /// A fresh random id, formatted like a uuid with the last 8 characters dropped.
    pub fn random() -> Self {
        let bytes: [u8; 16] = rand::random();
        let hex = hex::encode(bytes);

        Self(format!("{}-{}-{}-{}-{}", &hex[0..8], &hex[8..12], &hex[12..16], &hex[16..20], &hex[20..24]))
    }
}
