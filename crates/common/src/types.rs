use serde::{Deserialize, Serialize};

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Wraps a raw numeric identifier.
            pub const fn new(id: i64) -> Self {
                Self(id)
            }

            /// Returns the raw numeric identifier.
            pub const fn as_i64(&self) -> i64 {
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
    /// Server-generated identifier of an order.
    OrderId
);

numeric_id!(
    /// Server-generated identifier of an order line item.
    LineItemId
);

numeric_id!(
    /// Identifier of the customer that owns an order.
    CustomerId
);

numeric_id!(
    /// Catalog product reference.
    ProductId
);
