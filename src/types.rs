/*!
 * Request and receipt types for the capability entry points
 */

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use shield_core_resilience::CallOutcome;
use std::fmt;

/// Largest image accepted for analysis
pub const MAX_IMAGE_BYTES: usize = 20 * 1024 * 1024;

/// Longest idempotency key any supported provider accepts
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 255;

/// Currencies whose minor unit is the major unit
const ZERO_DECIMAL_CURRENCIES: &[&str] = &[
    "BIF", "CLP", "DJF", "GNF", "JPY", "KMF", "KRW", "MGA", "PYG", "RWF", "UGX", "VND", "VUV",
    "XAF", "XOF", "XPF",
];

// ---------------------------------------------------------------------------
// Email
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    #[serde(skip)]
    pub content: Vec<u8>,
}

impl Attachment {
    pub fn new(
        filename: impl Into<String>,
        content_type: impl Into<String>,
        content: Vec<u8>,
    ) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.into(),
            content,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EmailRequest {
    pub to: String,
    pub subject: String,
    /// Plain-text body
    pub body: String,
    #[serde(default)]
    pub html_body: Option<String>,
    /// Overrides the provider's configured sender
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl EmailRequest {
    pub fn new(to: impl Into<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            subject: subject.into(),
            body: body.into(),
            ..Default::default()
        }
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.to.trim().is_empty() {
            return Err(ValidationError::MissingField("to"));
        }
        validate_address("to", &self.to)?;
        if let Some(from) = &self.from {
            validate_address("from", from)?;
        }

        if self.subject.trim().is_empty() {
            return Err(ValidationError::MissingField("subject"));
        }
        if has_line_break(&self.subject) {
            return Err(ValidationError::invalid("subject", "must be a single line"));
        }

        if self.body.trim().is_empty() && self.html_body.as_deref().map_or(true, |h| h.trim().is_empty()) {
            return Err(ValidationError::MissingField("body"));
        }

        for attachment in &self.attachments {
            if attachment.filename.trim().is_empty() {
                return Err(ValidationError::MissingField("attachments.filename"));
            }
            if has_line_break(&attachment.filename) || attachment.filename.contains('"') {
                return Err(ValidationError::invalid(
                    "attachments.filename",
                    "must not contain quotes or line breaks",
                ));
            }
            if !attachment.content_type.contains('/') {
                return Err(ValidationError::invalid(
                    "attachments.content_type",
                    format!("'{}' is not a MIME type", attachment.content_type),
                ));
            }
        }

        Ok(())
    }
}

fn has_line_break(value: &str) -> bool {
    value.contains('\r') || value.contains('\n')
}

fn validate_address(field: &'static str, address: &str) -> Result<(), ValidationError> {
    let address = address.trim();
    if has_line_break(address) || address.contains(char::is_whitespace) {
        return Err(ValidationError::invalid(field, "must not contain whitespace"));
    }
    match address.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() && !domain.contains('@') => {
            Ok(())
        }
        _ => Err(ValidationError::invalid(
            field,
            format!("'{}' is not an email address", address),
        )),
    }
}

/// Delivery confirmation from the email capability
#[derive(Debug, Clone, Serialize)]
pub struct EmailReceipt {
    pub message_id: String,
    pub provider_used: String,
    pub fallback_used: bool,
    pub outcome: CallOutcome,
}

// ---------------------------------------------------------------------------
// Image analysis
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisOptions {
    #[serde(default)]
    pub detect_faces: bool,
    #[serde(default)]
    pub detect_text: bool,
    #[serde(default = "default_max_labels")]
    pub max_labels: u32,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            detect_faces: false,
            detect_text: false,
            max_labels: default_max_labels(),
        }
    }
}

fn default_max_labels() -> u32 {
    10
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ImageRequest {
    pub image: Vec<u8>,
    pub options: AnalysisOptions,
}

impl ImageRequest {
    pub fn new(image: Vec<u8>) -> Self {
        Self {
            image,
            options: AnalysisOptions::default(),
        }
    }

    pub fn with_options(mut self, options: AnalysisOptions) -> Self {
        self.options = options;
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.image.is_empty() {
            return Err(ValidationError::MissingField("image"));
        }
        if self.image.len() > MAX_IMAGE_BYTES {
            return Err(ValidationError::invalid(
                "image",
                format!("{} bytes exceeds the {} byte limit", self.image.len(), MAX_IMAGE_BYTES),
            ));
        }
        if self.options.max_labels == 0 || self.options.max_labels > 100 {
            return Err(ValidationError::invalid(
                "options.max_labels",
                "must be between 1 and 100",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub description: String,
    pub score: f32,
}

/// Provider-neutral analysis result
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ImageAnalysis {
    pub labels: Vec<Label>,
    pub explicit_content: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub faces: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Content fingerprint for duplicate matching, when the provider computes one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageReport {
    #[serde(flatten)]
    pub analysis: ImageAnalysis,
    pub provider_used: String,
    pub fallback_used: bool,
    pub outcome: CallOutcome,
}

// ---------------------------------------------------------------------------
// Payments
// ---------------------------------------------------------------------------

/// ISO 4217 currency code, upper-case
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    pub fn new(code: &str) -> Result<Self, ValidationError> {
        let code = code.trim();
        if code.is_empty() {
            return Err(ValidationError::MissingField("currency"));
        }
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ValidationError::invalid(
                "currency",
                format!("'{}' is not a three-letter ISO 4217 code", code),
            ));
        }
        Ok(Self(code.to_ascii_uppercase()))
    }

    pub fn code(&self) -> &str {
        &self.0
    }

    /// Number of decimal places in the currency's minor unit
    pub fn exponent(&self) -> u32 {
        if ZERO_DECIMAL_CURRENCIES.contains(&self.0.as_str()) {
            0
        } else {
            2
        }
    }
}

impl TryFrom<String> for Currency {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Currency::new(&value)
    }
}

impl From<Currency> for String {
    fn from(value: Currency) -> Self {
        value.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Amount in the currency's minor unit (cents for USD, yen for JPY)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    pub minor_units: i64,
    pub currency: Currency,
}

impl Money {
    pub fn from_minor(minor_units: i64, currency: Currency) -> Self {
        Self {
            minor_units,
            currency,
        }
    }

    /// Parse a decimal amount such as `"10.00"` or `"1500"`
    pub fn parse(amount: &str, currency: &str) -> Result<Self, ValidationError> {
        let currency = Currency::new(currency)?;
        let exponent = currency.exponent() as usize;
        let amount = amount.trim();
        if amount.is_empty() {
            return Err(ValidationError::MissingField("amount"));
        }

        let bad = || ValidationError::invalid("amount", format!("'{}' is not a valid amount", amount));
        let (whole, fraction) = amount.split_once('.').unwrap_or((amount, ""));
        if whole.is_empty()
            || !whole.chars().all(|c| c.is_ascii_digit())
            || !fraction.chars().all(|c| c.is_ascii_digit())
        {
            return Err(bad());
        }
        if fraction.len() > exponent {
            return Err(ValidationError::invalid(
                "amount",
                format!("{} allows at most {} decimal places", currency, exponent),
            ));
        }

        let padded = format!("{}{:0<width$}", whole, fraction, width = exponent);
        let minor_units = padded.parse::<i64>().map_err(|_| bad())?;
        Ok(Self {
            minor_units,
            currency,
        })
    }

    /// Decimal rendering in major units, e.g. `"10.00"`
    pub fn to_decimal_string(&self) -> String {
        let exponent = self.currency.exponent();
        if exponent == 0 {
            return self.minor_units.to_string();
        }
        let scale = 10i64.pow(exponent);
        let sign = if self.minor_units < 0 { "-" } else { "" };
        let abs = self.minor_units.unsigned_abs();
        format!(
            "{}{}.{:0width$}",
            sign,
            abs / scale as u64,
            abs % scale as u64,
            width = exponent as usize
        )
    }

    fn validate_positive(&self, field: &'static str) -> Result<(), ValidationError> {
        if self.minor_units <= 0 {
            return Err(ValidationError::invalid(field, "must be greater than zero"));
        }
        Ok(())
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.to_decimal_string(), self.currency)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeRequest {
    pub amount: Money,
    /// Provider-side customer or payment-method reference
    #[serde(default)]
    pub customer_ref: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Reused on every provider attempt; generated when absent
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

impl ChargeRequest {
    pub fn new(amount: Money) -> Self {
        Self {
            amount,
            customer_ref: None,
            description: None,
            idempotency_key: None,
        }
    }

    pub fn with_customer(mut self, customer_ref: impl Into<String>) -> Self {
        self.customer_ref = Some(customer_ref.into());
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.amount.validate_positive("amount")?;
        if let Some(customer) = &self.customer_ref {
            if customer.trim().is_empty() {
                return Err(ValidationError::invalid("customer_ref", "must not be blank"));
            }
        }
        if let Some(key) = &self.idempotency_key {
            validate_idempotency_key(key)?;
        }
        Ok(())
    }
}

fn validate_idempotency_key(key: &str) -> Result<(), ValidationError> {
    if key.trim().is_empty() || key.len() > MAX_IDEMPOTENCY_KEY_LEN || !key.is_ascii() {
        return Err(ValidationError::invalid(
            "idempotency_key",
            format!("must be 1-{} ASCII characters", MAX_IDEMPOTENCY_KEY_LEN),
        ));
    }
    Ok(())
}

/// What a payment provider receives for one charge attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentCharge {
    pub amount: Money,
    pub customer_ref: Option<String>,
    pub description: Option<String>,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentReceipt {
    pub transaction_id: String,
    pub provider_used: String,
    pub fallback_used: bool,
    pub idempotency_key: String,
    pub amount: Money,
    pub outcome: CallOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundRequest {
    /// Provider that captured the original charge
    pub provider: String,
    pub transaction_id: String,
    /// Partial refund amount; the full charge when absent
    #[serde(default)]
    pub amount: Option<Money>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

impl RefundRequest {
    pub fn new(provider: impl Into<String>, transaction_id: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            transaction_id: transaction_id.into(),
            amount: None,
            idempotency_key: None,
        }
    }

    pub fn with_amount(mut self, amount: Money) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.provider.trim().is_empty() {
            return Err(ValidationError::MissingField("provider"));
        }
        if self.transaction_id.trim().is_empty() {
            return Err(ValidationError::MissingField("transaction_id"));
        }
        if let Some(amount) = &self.amount {
            amount.validate_positive("amount")?;
        }
        if let Some(key) = &self.idempotency_key {
            validate_idempotency_key(key)?;
        }
        Ok(())
    }
}

/// What a payment provider receives for one refund attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRefund {
    pub transaction_id: String,
    pub amount: Option<Money>,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefundReceipt {
    pub refund_id: String,
    pub provider_used: String,
    pub idempotency_key: String,
    pub outcome: CallOutcome,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_requires_recipient_subject_and_body() {
        assert_eq!(
            EmailRequest::new("", "x", "y").validate(),
            Err(ValidationError::MissingField("to"))
        );
        assert_eq!(
            EmailRequest::new("a@b.com", " ", "y").validate(),
            Err(ValidationError::MissingField("subject"))
        );
        assert_eq!(
            EmailRequest::new("a@b.com", "x", "").validate(),
            Err(ValidationError::MissingField("body"))
        );
        assert!(EmailRequest::new("a@b.com", "x", "y").validate().is_ok());
    }

    #[test]
    fn test_email_rejects_header_injection() {
        let err = EmailRequest::new("a@b.com", "hi\r\nBcc: evil@x.com", "y")
            .validate()
            .unwrap_err();
        assert_eq!(err.field(), "subject");

        let err = EmailRequest::new("not-an-address", "x", "y").validate().unwrap_err();
        assert_eq!(err.field(), "to");
    }

    #[test]
    fn test_html_only_body_is_accepted() {
        let mut request = EmailRequest::new("a@b.com", "x", "");
        request.html_body = Some("<p>hi</p>".to_string());
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_money_parsing() {
        let usd = Money::parse("10.00", "usd").unwrap();
        assert_eq!(usd.minor_units, 1000);
        assert_eq!(usd.currency.code(), "USD");
        assert_eq!(usd.to_decimal_string(), "10.00");

        assert_eq!(Money::parse("10.5", "EUR").unwrap().minor_units, 1050);
        assert_eq!(Money::parse("7", "USD").unwrap().to_decimal_string(), "7.00");

        let yen = Money::parse("1500", "JPY").unwrap();
        assert_eq!(yen.minor_units, 1500);
        assert_eq!(yen.to_decimal_string(), "1500");

        assert!(Money::parse("1.234", "USD").is_err());
        assert!(Money::parse("1.5", "JPY").is_err());
        assert!(Money::parse("-3", "USD").is_err());
        assert!(Money::parse("abc", "USD").is_err());
        assert!(Money::parse("10", "US").is_err());
    }

    #[test]
    fn test_charge_rejects_non_positive_amount() {
        let zero = ChargeRequest::new(Money::parse("0.00", "USD").unwrap());
        assert_eq!(zero.validate().unwrap_err().field(), "amount");

        let ok = ChargeRequest::new(Money::parse("10.00", "USD").unwrap()).with_customer("cus_1");
        assert!(ok.validate().is_ok());

        let bad_key = ChargeRequest::new(Money::parse("1", "USD").unwrap())
            .with_idempotency_key("x".repeat(300));
        assert_eq!(bad_key.validate().unwrap_err().field(), "idempotency_key");
    }

    #[test]
    fn test_refund_requires_provider_and_transaction() {
        assert_eq!(
            RefundRequest::new("", "txn").validate(),
            Err(ValidationError::MissingField("provider"))
        );
        assert_eq!(
            RefundRequest::new("stripe", " ").validate(),
            Err(ValidationError::MissingField("transaction_id"))
        );
        assert!(RefundRequest::new("stripe", "pi_1").validate().is_ok());
    }

    #[test]
    fn test_image_limits() {
        assert_eq!(
            ImageRequest::new(Vec::new()).validate(),
            Err(ValidationError::MissingField("image"))
        );
        let request = ImageRequest::new(vec![0u8; 8]).with_options(AnalysisOptions {
            max_labels: 0,
            ..Default::default()
        });
        assert_eq!(request.validate().unwrap_err().field(), "options.max_labels");
    }
}
