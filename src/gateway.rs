//! External payment processor, consumed through a narrow create-intent
//! interface.

use serde::Deserialize;

use crate::error::Error;

#[axum::async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Creates a payment intent for the given amount in minor units and
    /// returns the opaque client secret the frontend confirms with.
    async fn create_intent(&self, amount_minor_units: u64) -> Result<String, Error>;
}

#[derive(Clone)]
pub struct PaymentGateway(pub std::sync::Arc<dyn PaymentProcessor>);

impl std::ops::Deref for PaymentGateway {
    type Target = dyn PaymentProcessor;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

const STRIPE_INTENT_URL: &str = "https://api.stripe.com/v1/payment_intents";

pub struct StripeGateway {
    client: reqwest::Client,
    secret_key: String,
}

impl StripeGateway {
    pub fn new(secret_key: String) -> Result<Self, Error> {
        // bounded timeout so a stuck gateway call cannot hang a handler
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;

        Ok(Self { client, secret_key })
    }
}

#[derive(Deserialize)]
struct IntentResponse {
    client_secret: Option<String>,
}

#[axum::async_trait]
impl PaymentProcessor for StripeGateway {
    async fn create_intent(&self, amount_minor_units: u64) -> Result<String, Error> {
        let response = self
            .client
            .post(STRIPE_INTENT_URL)
            .basic_auth(&self.secret_key, None::<&str>)
            .form(&[
                ("amount", amount_minor_units.to_string()),
                ("currency", "usd".to_string()),
                ("automatic_payment_methods[enabled]", "true".to_string()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(%status, body, "payment intent creation failed");
            return Err(Error::Gateway(format!(
                "payment intent creation failed with status {status}"
            )));
        }

        response
            .json::<IntentResponse>()
            .await?
            .client_secret
            .ok_or_else(|| Error::Gateway("intent response missing client secret".to_string()))
    }
}

/// Deterministic gateway for tests and the in-memory backend.
pub struct StubGateway;

#[axum::async_trait]
impl PaymentProcessor for StubGateway {
    async fn create_intent(&self, amount_minor_units: u64) -> Result<String, Error> {
        Ok(format!("pi_stub_{amount_minor_units}_secret"))
    }
}

#[cfg(test)]
mod tests {
    use super::{PaymentProcessor, StubGateway};

    #[tokio::test]
    async fn test_stub_gateway() {
        let secret = StubGateway.create_intent(500).await.unwrap();
        assert_eq!(secret, "pi_stub_500_secret");
    }
}
