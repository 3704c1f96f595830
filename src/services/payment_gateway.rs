/*!
 * # Payment gateway adapter
 *
 * The reconciliation engine talks to the payment provider through the
 * [`PaymentGateway`] trait: one call creates a hosted payment link, one call
 * reads back the state of a payment. [`PayOsGateway`] is the production REST
 * client; tests substitute their own implementation.
 */

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::config::PaymentConfig;
use crate::errors::ServiceError;

type HmacSha256 = Hmac<Sha256>;

/// Provider success code in the response envelope.
const SUCCESS_CODE: &str = "00";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Buyer {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentLinkRequest {
    pub order_code: i64,
    /// Integer amount charged by the provider
    pub amount: i64,
    pub description: String,
    pub return_url: String,
    pub cancel_url: String,
    pub buyer: Option<Buyer>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentLink {
    pub checkout_url: String,
    pub payment_link_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayPaymentStatus {
    Pending,
    Processing,
    Paid,
    Cancelled,
    Expired,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayTransaction {
    #[serde(default, alias = "reference")]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub transaction_date_time: Option<String>,
}

/// Payment state as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayPayment {
    pub order_code: i64,
    pub status: GatewayPaymentStatus,
    /// Amount the provider says was paid
    pub amount: i64,
    pub transactions: Vec<GatewayTransaction>,
}

impl GatewayPayment {
    pub fn is_paid(&self) -> bool {
        self.status == GatewayPaymentStatus::Paid
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_link(&self, request: PaymentLinkRequest) -> Result<PaymentLink, ServiceError>;

    async fn get_status(&self, order_code: i64) -> Result<GatewayPayment, ServiceError>;
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: String,
    #[serde(default)]
    desc: String,
    data: Option<T>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateLinkBody<'a> {
    order_code: i64,
    amount: i64,
    description: &'a str,
    return_url: &'a str,
    cancel_url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    buyer_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    buyer_email: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    buyer_phone: Option<&'a str>,
    signature: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateLinkData {
    checkout_url: String,
    #[serde(default)]
    payment_link_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PaymentStatusData {
    order_code: i64,
    #[serde(default)]
    amount: i64,
    #[serde(default)]
    amount_paid: i64,
    status: GatewayPaymentStatus,
    #[serde(default)]
    transactions: Vec<GatewayTransaction>,
}

/// REST client for a PayOS-style merchant API.
#[derive(Clone)]
pub struct PayOsGateway {
    client: reqwest::Client,
    base_url: Url,
    client_id: String,
    api_key: String,
    checksum_key: String,
}

impl std::fmt::Debug for PayOsGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayOsGateway")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl PayOsGateway {
    pub fn new(config: &PaymentConfig) -> Result<Self, ServiceError> {
        let base_url = Url::parse(&config.base_url).map_err(|e| {
            ServiceError::InternalError(format!("Invalid payment gateway URL: {}", e))
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                ServiceError::InternalError(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url,
            client_id: config.client_id.clone(),
            api_key: config.api_key.clone(),
            checksum_key: config.checksum_key.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ServiceError> {
        self.base_url
            .join(path)
            .map_err(|e| ServiceError::InternalError(format!("Invalid gateway path {}: {}", path, e)))
    }

    /// Signs the canonical, alphabetically ordered request fields.
    pub fn sign_request(&self, request: &PaymentLinkRequest) -> String {
        let canonical = format!(
            "amount={}&cancelUrl={}&description={}&orderCode={}&returnUrl={}",
            request.amount,
            request.cancel_url,
            request.description,
            request.order_code,
            request.return_url
        );
        hmac_hex(self.checksum_key.as_bytes(), canonical.as_bytes())
    }

    async fn read_envelope<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ServiceError> {
        let status = response.status();
        let envelope: Envelope<T> = response.json().await.map_err(|e| {
            ServiceError::GatewayError(format!("Unreadable gateway response ({}): {}", status, e))
        })?;

        if envelope.code != SUCCESS_CODE {
            warn!(code = %envelope.code, desc = %envelope.desc, "Gateway rejected request");
            return Err(ServiceError::GatewayError(format!(
                "{} (code {})",
                envelope.desc, envelope.code
            )));
        }

        envelope
            .data
            .ok_or_else(|| ServiceError::GatewayError("Gateway response has no data".to_string()))
    }
}

#[async_trait]
impl PaymentGateway for PayOsGateway {
    #[instrument(skip(self, request), fields(order_code = request.order_code, amount = request.amount))]
    async fn create_link(&self, request: PaymentLinkRequest) -> Result<PaymentLink, ServiceError> {
        let signature = self.sign_request(&request);
        let buyer = request.buyer.as_ref();
        let body = CreateLinkBody {
            order_code: request.order_code,
            amount: request.amount,
            description: &request.description,
            return_url: &request.return_url,
            cancel_url: &request.cancel_url,
            buyer_name: buyer.map(|b| b.name.as_str()),
            buyer_email: buyer.and_then(|b| b.email.as_deref()),
            buyer_phone: buyer.and_then(|b| b.phone.as_deref()),
            signature,
        };

        let response = self
            .client
            .post(self.endpoint("/v2/payment-requests")?)
            .header("x-client-id", &self.client_id)
            .header("x-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::GatewayError(format!("Payment link request failed: {}", e)))?;

        let data: CreateLinkData = Self::read_envelope(response).await?;
        debug!(checkout_url = %data.checkout_url, "Payment link issued");

        Ok(PaymentLink {
            checkout_url: data.checkout_url,
            payment_link_id: data.payment_link_id,
        })
    }

    #[instrument(skip(self))]
    async fn get_status(&self, order_code: i64) -> Result<GatewayPayment, ServiceError> {
        let response = self
            .client
            .get(self.endpoint(&format!("/v2/payment-requests/{}", order_code))?)
            .header("x-client-id", &self.client_id)
            .header("x-api-key", &self.api_key)
            .send()
            .await
            .map_err(|e| ServiceError::GatewayError(format!("Payment status request failed: {}", e)))?;

        let data: PaymentStatusData = Self::read_envelope(response).await?;
        let amount = if data.amount_paid > 0 {
            data.amount_paid
        } else {
            data.amount
        };

        Ok(GatewayPayment {
            order_code: data.order_code,
            status: data.status,
            amount,
            transactions: data.transactions,
        })
    }
}

/// Lowercase hex HMAC-SHA256 of `message` under `key`.
pub fn hmac_hex(key: &[u8], message: &[u8]) -> String {
    // HMAC accepts keys of any length, so construction cannot fail.
    let mut mac = match HmacSha256::new_from_slice(key) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time check of a hex HMAC-SHA256 signature.
pub fn verify_hmac_hex(key: &[u8], message: &[u8], signature_hex: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(key) else {
        return false;
    };
    mac.update(message);
    mac.verify_slice(&expected).is_ok()
}
