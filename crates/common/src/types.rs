use serde::{Deserialize, Serialize};

/// Customer reference used when a request does not name one.
pub const ANONYMOUS_CUSTOMER: &str = "anonymous";

/// Identifier of an order.
///
/// Assigned by the order store; identifiers are monotonically increasing, so
/// a larger id always belongs to a later order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(i64);

impl OrderId {
    /// Creates an order ID from its raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for OrderId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<OrderId> for i64 {
    fn from(id: OrderId) -> Self {
        id.0
    }
}

/// Opaque customer reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CustomerId(String);

impl CustomerId {
    /// Creates a customer ID from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The sentinel customer used when none is supplied.
    pub fn anonymous() -> Self {
        Self(ANONYMOUS_CUSTOMER.to_string())
    }

    /// Uses the given reference, or [`CustomerId::anonymous`] when it is
    /// missing or blank.
    pub fn or_anonymous(id: Option<&str>) -> Self {
        match id.map(str::trim) {
            Some(id) if !id.is_empty() => Self::new(id),
            _ => Self::anonymous(),
        }
    }

    /// Returns the customer ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CustomerId {
    fn default() -> Self {
        Self::anonymous()
    }
}

impl std::fmt::Display for CustomerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CustomerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Product identifier (SKU).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(String);

impl ProductId {
    /// Creates a new product ID from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the product ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProductId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ProductId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ProductId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for ProductId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_ids_order_by_value() {
        assert!(OrderId::new(1) < OrderId::new(2));
        assert_eq!(OrderId::from(7).as_i64(), 7);
    }

    #[test]
    fn order_id_serializes_as_bare_number() {
        let json = serde_json::to_string(&OrderId::new(42)).unwrap();
        assert_eq!(json, "42");
    }

    #[test]
    fn missing_or_blank_customer_is_anonymous() {
        assert_eq!(CustomerId::or_anonymous(None).as_str(), "anonymous");
        assert_eq!(CustomerId::or_anonymous(Some("  ")).as_str(), "anonymous");
        assert_eq!(CustomerId::or_anonymous(Some("cust-1")).as_str(), "cust-1");
    }

    #[test]
    fn product_id_serializes_as_string() {
        let json = serde_json::to_string(&ProductId::new("sku-7")).unwrap();
        assert_eq!(json, "\"sku-7\"");
    }
}
