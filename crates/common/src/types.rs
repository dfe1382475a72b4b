use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Externally shareable order identifier.
///
/// Rendered as a v4 UUID without hyphens (32 lowercase hex characters),
/// which is what users see and what every downstream message refers to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderCode(String);

impl OrderCode {
    /// Generates a fresh order code.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Wraps an existing code.
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// Returns the code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OrderCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for OrderCode {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for OrderCode {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for OrderCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Wraps a raw identifier.
            pub const fn new(id: i64) -> Self {
                Self(id)
            }

            /// Returns the raw identifier.
            pub const fn get(&self) -> i64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

numeric_id!(
    /// Identifier of the purchasing user.
    UserId
);

numeric_id!(
    /// Identifier of a sellable item (a product variant / SKU).
    ItemId
);

numeric_id!(
    /// Identifier of the product an item belongs to.
    ProductId
);

numeric_id!(
    /// Identifier of a limited-stock campaign (flash sale).
    ///
    /// Regular catalog stock lives under [`CampaignId::REGULAR`].
    CampaignId
);

impl CampaignId {
    /// Pseudo-campaign holding regular, non-promotional stock.
    pub const REGULAR: CampaignId = CampaignId(0);

    /// Returns true for the regular stock pool.
    pub fn is_regular(&self) -> bool {
        *self == Self::REGULAR
    }
}
