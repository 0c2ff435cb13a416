//! Collaborator traits with HTTP and in-memory implementations.

use std::time::Duration;

use reqwest::Client;

pub mod inventory;
pub mod payment;
pub mod pricing;

pub use inventory::{
    HttpInventoryService, InMemoryInventoryService, InventoryService, ReservationItem,
};
pub use payment::{
    DEFAULT_PAYMENT_TIMEOUT, HttpPaymentService, InMemoryPaymentService, PaymentReceipt,
    PaymentService,
};
pub use pricing::{HttpPricingService, InMemoryPricingService, PricingService};

/// Timeout applied to catalog and inventory calls unless configured otherwise.
pub const DEFAULT_COLLABORATOR_TIMEOUT: Duration = Duration::from_secs(30);

fn http_client(timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder().timeout(timeout).build()
}

fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_joins_without_double_slash() {
        assert_eq!(
            endpoint("http://inventory:4002/", "reserve"),
            "http://inventory:4002/reserve"
        );
        assert_eq!(
            endpoint("http://inventory:4002", "release"),
            "http://inventory:4002/release"
        );
    }
}
