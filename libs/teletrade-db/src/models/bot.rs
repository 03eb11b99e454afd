use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "bot_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BotStatus {
    Active,
    Paused,
    Deleted,
}

/// Encryption scheme a stored credential was written with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "credential_scheme", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CredentialScheme {
    #[sqlx(rename = "PLAINTEXT_V0")]
    #[serde(rename = "PLAINTEXT_V0")]
    PlaintextV0,
    #[sqlx(rename = "AES256_GCM_V1")]
    #[serde(rename = "AES256_GCM_V1")]
    Aes256GcmV1,
}

/// A credential exactly as persisted: the scheme tag travels with the value.
#[derive(Debug, Clone, Copy)]
pub struct StoredCredential<'a> {
    pub scheme: CredentialScheme,
    pub value: &'a str,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SellingBot {
    pub id: Uuid,
    pub client_id: Uuid,
    pub bot_username: Option<String>,
    #[serde(skip_serializing)]
    pub bot_token: String,
    pub bot_token_scheme: CredentialScheme,
    #[serde(skip_serializing)]
    pub payment_api_key: Option<String>,
    pub payment_api_key_scheme: Option<CredentialScheme>,
    pub linked_channel_id: Option<i64>,
    pub linked_channel_username: Option<String>,
    pub status: BotStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SellingBot {
    pub fn token(&self) -> StoredCredential<'_> {
        StoredCredential {
            scheme: self.bot_token_scheme,
            value: &self.bot_token,
        }
    }

    pub fn payment_key(&self) -> Option<StoredCredential<'_>> {
        match (&self.payment_api_key, self.payment_api_key_scheme) {
            (Some(value), Some(scheme)) => Some(StoredCredential { scheme, value }),
            _ => None,
        }
    }

    /// Channel access control only applies to bots with a linked channel.
    pub fn channel(&self) -> Option<i64> {
        self.linked_channel_id
    }
}
