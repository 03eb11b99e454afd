use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha512;
use teletrade_db::models::payment::PaymentStatus;

use super::{id_string, InvoiceRequest, PaymentProvider, ProviderInvoice, SignatureError};

pub const NOWPAYMENTS_API_URL: &str = "https://api.nowpayments.io/v1";

type HmacSha512 = Hmac<Sha512>;

pub struct NowPaymentsProvider {
    client: reqwest::Client,
    base_url: String,
    ipn_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InvoiceResponse {
    #[serde(deserialize_with = "id_string")]
    id: String,
    invoice_url: String,
}

impl NowPaymentsProvider {
    pub fn new(ipn_secret: Option<String>) -> Result<Self> {
        Self::with_base_url(NOWPAYMENTS_API_URL, ipn_secret)
    }

    pub fn with_base_url(base_url: &str, ipn_secret: Option<String>) -> Result<Self> {
        // reqwest is built without a bundled rustls provider.
        let _ = rustls::crypto::ring::default_provider().install_default();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            ipn_secret: ipn_secret.filter(|s| !s.trim().is_empty()),
        })
    }
}

/// NOWPayments status string to ledger status. Unknown values are PENDING.
pub fn map_payment_status(raw: &str) -> PaymentStatus {
    match raw.to_ascii_lowercase().as_str() {
        "waiting" | "pending" => PaymentStatus::Pending,
        "confirming" | "sending" => PaymentStatus::Confirming,
        "finished" | "confirmed" | "partially_paid" => PaymentStatus::Confirmed,
        "failed" => PaymentStatus::Failed,
        "expired" => PaymentStatus::Expired,
        "refunded" => PaymentStatus::Refunded,
        _ => PaymentStatus::Pending,
    }
}

#[async_trait]
impl PaymentProvider for NowPaymentsProvider {
    async fn create_invoice(&self, api_key: &str, request: &InvoiceRequest) -> Result<ProviderInvoice> {
        let resp = self
            .client
            .post(format!("{}/invoice", self.base_url))
            .header("x-api-key", api_key)
            .json(request)
            .send()
            .await
            .context("NOWPayments invoice request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("NOWPayments Error ({}): {}", status, body));
        }

        let invoice: InvoiceResponse = resp.json().await.context("Invalid NOWPayments invoice response")?;
        Ok(ProviderInvoice {
            invoice_id: invoice.id,
            invoice_url: invoice.invoice_url,
        })
    }

    fn verify_signature(&self, payload: &[u8], signature: Option<&str>) -> Result<(), SignatureError> {
        let secret = self.ipn_secret.as_deref().ok_or(SignatureError::MissingSecret)?;
        let sig = signature
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(SignatureError::MissingSignature)?;
        let expected = hex::decode(sig).map_err(|_| SignatureError::Mismatch)?;

        let mut mac = HmacSha512::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::Mismatch)?;
        mac.update(payload);
        mac.verify_slice(&expected).map_err(|_| SignatureError::Mismatch)
    }

    fn map_status(&self, raw: &str) -> PaymentStatus {
        map_payment_status(raw)
    }

    fn name(&self) -> &str {
        "nowpayments"
    }
}

/// Hex HMAC-SHA512 of `payload`, as NOWPayments sends it.
#[cfg(test)]
pub fn sign(secret: &str, payload: &[u8]) -> String {
    let mut mac = HmacSha512::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}
