//! Strategy B: per-request auth headers.

use async_trait::async_trait;
use tracing::debug;

use super::{DeliverySnapshot, DeliveryStrategy};
use crate::Result;

/// Header naming the provider the token came from.
pub const PROVIDER_HEADER: &str = "X-Auth-Provider";
/// Header carrying the provider-shaped api key.
pub const TOKEN_HEADER: &str = "X-Auth-Token";

/// Header pair for one outgoing request.
pub fn auth_headers(provider_id: &str, api_key: &str) -> [(&'static str, String); 2] {
    [
        (PROVIDER_HEADER, provider_id.to_string()),
        (TOKEN_HEADER, api_key.to_string()),
    ]
}

/// Per-request header delivery.
///
/// The actual pull happens inside [`ConsumerClient`](crate::ConsumerClient)
/// just before each request, so tokens are never materialized anywhere at
/// sync time; `sync` only records that the active credential moved.
pub struct HeaderDelivery;

#[async_trait]
impl DeliveryStrategy for HeaderDelivery {
    fn name(&self) -> &'static str {
        "headers"
    }

    async fn sync(&self, snapshot: &DeliverySnapshot) -> Result<()> {
        debug!(
            active = snapshot.active.as_ref().map(|a| a.provider_id.as_str()),
            "header delivery will pick up the change on the next request"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_headers_shape() {
        let headers = auth_headers("anthropic", "sk-key");
        assert_eq!(headers[0], (PROVIDER_HEADER, "anthropic".to_string()));
        assert_eq!(headers[1], (TOKEN_HEADER, "sk-key".to_string()));
    }
}
