use async_trait::async_trait;
use anyhow::Result;
use serde::{Deserialize, Deserializer, Serialize};
use teletrade_db::models::payment::PaymentStatus;
use thiserror::Error;

pub mod nowpayments;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("no IPN secret configured")]
    MissingSecret,
    #[error("signature header missing")]
    MissingSignature,
    #[error("signature mismatch")]
    Mismatch,
}

#[derive(Debug, Clone, Serialize)]
pub struct InvoiceRequest {
    pub price_amount: f64,
    pub price_currency: String,
    pub order_id: String,
    pub order_description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipn_callback_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderInvoice {
    pub invoice_id: String,
    pub invoice_url: String,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Create an invoice with the given merchant key.
    async fn create_invoice(&self, api_key: &str, request: &InvoiceRequest) -> Result<ProviderInvoice>;

    /// Verify a callout signature over the raw request body.
    fn verify_signature(&self, payload: &[u8], signature: Option<&str>) -> Result<(), SignatureError>;

    fn map_status(&self, raw: &str) -> PaymentStatus;

    fn name(&self) -> &str;
}

/// Provider ids arrive as JSON numbers or strings.
pub(crate) fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(s) => s,
        RawId::Number(n) => n.to_string(),
    })
}

pub(crate) fn opt_id_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Wrapped(#[serde(deserialize_with = "id_string")] String);

    Ok(Option::<Wrapped>::deserialize(deserializer)?.map(|Wrapped(s)| s))
}
