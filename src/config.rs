/*!
 * Configuration types for Shield
 */

use crate::adapters::google_vision::GoogleVisionConfig;
use crate::adapters::local_analysis::LocalAnalysisConfig;
use crate::adapters::paypal::PayPalConfig;
use crate::adapters::sendgrid::SendGridConfig;
use crate::adapters::smtp::SmtpConfig;
use crate::adapters::stripe::StripeConfig;
use crate::error::{IntegrationError, Result};
use serde::{Deserialize, Serialize};
use shield_core_resilience::CircuitBreakerConfig;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// A named class of external operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Email,
    ImageAnalysis,
    Payment,
}

impl Capability {
    pub const ALL: [Capability; 3] = [
        Capability::Email,
        Capability::ImageAnalysis,
        Capability::Payment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Email => "email",
            Capability::ImageAnalysis => "image_analysis",
            Capability::Payment => "payment",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Concrete external provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Sendgrid,
    Smtp,
    GoogleVision,
    LocalAnalysis,
    Paypal,
    Stripe,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Sendgrid => "sendgrid",
            ProviderKind::Smtp => "smtp",
            ProviderKind::GoogleVision => "google_vision",
            ProviderKind::LocalAnalysis => "local_analysis",
            ProviderKind::Paypal => "paypal",
            ProviderKind::Stripe => "stripe",
        }
    }

    /// The capability this provider can serve
    pub fn capability(&self) -> Capability {
        match self {
            ProviderKind::Sendgrid | ProviderKind::Smtp => Capability::Email,
            ProviderKind::GoogleVision | ProviderKind::LocalAnalysis => Capability::ImageAnalysis,
            ProviderKind::Paypal | ProviderKind::Stripe => Capability::Payment,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sendgrid" => Ok(ProviderKind::Sendgrid),
            "smtp" => Ok(ProviderKind::Smtp),
            "google_vision" => Ok(ProviderKind::GoogleVision),
            "local_analysis" => Ok(ProviderKind::LocalAnalysis),
            "paypal" => Ok(ProviderKind::Paypal),
            "stripe" => Ok(ProviderKind::Stripe),
            other => Err(format!("unknown provider '{}'", other)),
        }
    }
}

/// Log level configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,

    /// Write JSON logs here instead of stdout
    #[serde(default)]
    pub file: Option<PathBuf>,
}

/// Background health probing
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Allow active probing; when false `health` reports breaker state only
    /// and `monitor` refuses to start
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_probe_interval")]
    pub probe_interval_secs: u64,

    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            probe_interval_secs: default_probe_interval(),
            probe_timeout_secs: default_probe_timeout(),
        }
    }
}

impl MonitorConfig {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.probe_timeout_secs).unwrap_or(Duration::ZERO)
    }
}

/// Per-provider credentials and endpoints; an absent table means "not configured"
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProvidersConfig {
    pub sendgrid: Option<SendGridConfig>,
    pub smtp: Option<SmtpConfig>,
    pub google_vision: Option<GoogleVisionConfig>,
    pub local_analysis: Option<LocalAnalysisConfig>,
    pub paypal: Option<PayPalConfig>,
    pub stripe: Option<StripeConfig>,
}

/// Chain and breaker policy for one capability
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CapabilityConfig {
    pub primary: ProviderKind,

    #[serde(default)]
    pub fallbacks: Vec<ProviderKind>,

    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,

    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,

    #[serde(default = "default_half_open_trials")]
    pub half_open_trials: u32,

    #[serde(default = "default_call_timeout")]
    pub call_timeout_seconds: f64,
}

impl CapabilityConfig {
    pub fn new(primary: ProviderKind, fallbacks: Vec<ProviderKind>) -> Self {
        Self {
            primary,
            fallbacks,
            failure_threshold: default_failure_threshold(),
            window_seconds: default_window_seconds(),
            cooldown_seconds: default_cooldown_seconds(),
            half_open_trials: default_half_open_trials(),
            call_timeout_seconds: default_call_timeout(),
        }
    }

    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            window: Duration::from_secs(self.window_seconds),
            cooldown: Duration::from_secs(self.cooldown_seconds),
            half_open_trials: self.half_open_trials,
        }
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.call_timeout_seconds).unwrap_or(Duration::ZERO)
    }

    /// Primary first, then fallbacks in declared order
    pub fn chain(&self) -> impl Iterator<Item = ProviderKind> + '_ {
        std::iter::once(self.primary).chain(self.fallbacks.iter().copied())
    }

    fn validate(&self, capability: Capability) -> Result<()> {
        let fail = |msg: String| Err(IntegrationError::Config(format!("[capabilities.{}] {}", capability, msg)));

        if self.fallbacks.is_empty() {
            return fail("at least one fallback provider is required".to_string());
        }

        let mut seen = HashSet::new();
        for provider in self.chain() {
            if provider.capability() != capability {
                return fail(format!(
                    "provider '{}' serves '{}', not '{}'",
                    provider,
                    provider.capability(),
                    capability
                ));
            }
            if !seen.insert(provider) {
                return fail(format!("provider '{}' is listed more than once", provider));
            }
        }

        if !(self.call_timeout_seconds.is_finite() && self.call_timeout_seconds > 0.0) {
            return fail("call_timeout_seconds must be greater than 0".to_string());
        }

        self.breaker_config()
            .validate()
            .map_err(|e| IntegrationError::Config(format!("[capabilities.{}] {}", capability, e)))
    }
}

/// Top-level configuration file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShieldConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub monitor: MonitorConfig,

    #[serde(default)]
    pub providers: ProvidersConfig,

    #[serde(default)]
    pub capabilities: BTreeMap<Capability, CapabilityConfig>,
}

impl ShieldConfig {
    /// Load and validate configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&contents)?;
        tracing::debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        let mut config: ShieldConfig = toml::from_str(contents)
            .map_err(|e| IntegrationError::Config(format!("Failed to parse config: {}", e)))?;
        config.providers.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Check every capability is present and its policy is usable
    pub fn validate(&self) -> Result<()> {
        for capability in Capability::ALL {
            let entry = self.capabilities.get(&capability).ok_or_else(|| {
                IntegrationError::Config(format!(
                    "missing [capabilities.{}] section; every capability needs a primary provider",
                    capability
                ))
            })?;
            entry.validate(capability)?;
        }

        if self.monitor.probe_interval_secs == 0 {
            return Err(IntegrationError::Config(
                "monitor.probe_interval_secs must be greater than 0".to_string(),
            ));
        }
        if !(self.monitor.probe_timeout_secs.is_finite() && self.monitor.probe_timeout_secs > 0.0) {
            return Err(IntegrationError::Config(
                "monitor.probe_timeout_secs must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn capability(&self, capability: Capability) -> Result<&CapabilityConfig> {
        self.capabilities.get(&capability).ok_or_else(|| {
            IntegrationError::Config(format!("missing [capabilities.{}] section", capability))
        })
    }
}

impl ProvidersConfig {
    /// Fill secrets the file leaves out from the environment
    fn apply_env(&mut self) {
        if let Some(sendgrid) = self.sendgrid.as_mut() {
            fill_secret(&mut sendgrid.api_key, "SENDGRID_API_KEY");
        }
        if let Some(smtp) = self.smtp.as_mut() {
            fill_secret(&mut smtp.password, "SMTP_PASSWORD");
        }
        if let Some(vision) = self.google_vision.as_mut() {
            fill_secret(&mut vision.api_key, "GOOGLE_VISION_API_KEY");
        }
        if let Some(paypal) = self.paypal.as_mut() {
            fill_secret(&mut paypal.client_secret, "PAYPAL_CLIENT_SECRET");
        }
        if let Some(stripe) = self.stripe.as_mut() {
            fill_secret(&mut stripe.secret_key, "STRIPE_SECRET_KEY");
        }
    }
}

fn fill_secret(slot: &mut Option<secrecy::SecretString>, var: &str) {
    if slot.is_none() {
        if let Ok(value) = std::env::var(var) {
            if !value.is_empty() {
                *slot = Some(secrecy::SecretString::new(value.into_boxed_str()));
            }
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_probe_interval() -> u64 {
    30
}

fn default_probe_timeout() -> f64 {
    5.0
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_window_seconds() -> u64 {
    60
}

fn default_cooldown_seconds() -> u64 {
    30
}

fn default_half_open_trials() -> u32 {
    1
}

fn default_call_timeout() -> f64 {
    10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [capabilities.email]
        primary = "sendgrid"
        fallbacks = ["smtp"]

        [capabilities.image_analysis]
        primary = "google_vision"
        fallbacks = ["local_analysis"]

        [capabilities.payment]
        primary = "paypal"
        fallbacks = ["stripe"]
        failure_threshold = 3
        call_timeout_seconds = 2.5
    "#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = ShieldConfig::from_toml(MINIMAL).unwrap();

        let email = config.capability(Capability::Email).unwrap();
        assert_eq!(email.failure_threshold, 5);
        assert_eq!(email.window_seconds, 60);
        assert_eq!(email.cooldown_seconds, 30);
        assert_eq!(email.half_open_trials, 1);
        assert_eq!(email.call_timeout(), Duration::from_secs(10));

        let payment = config.capability(Capability::Payment).unwrap();
        assert_eq!(payment.failure_threshold, 3);
        assert_eq!(payment.call_timeout(), Duration::from_millis(2500));
        assert_eq!(
            payment.chain().collect::<Vec<_>>(),
            vec![ProviderKind::Paypal, ProviderKind::Stripe]
        );

        assert!(config.monitor.enabled);
        assert_eq!(config.monitor.probe_interval(), Duration::from_secs(30));
        assert_eq!(config.logging.level, LogLevel::Info);
    }

    #[test]
    fn test_missing_capability_is_fatal() {
        let text = MINIMAL.replace("[capabilities.payment]", "[capabilities.unused]");
        // Unknown capability names fail to parse outright
        assert!(ShieldConfig::from_toml(&text).is_err());

        let without_payment: String = MINIMAL
            .lines()
            .take_while(|line| !line.contains("[capabilities.payment]"))
            .collect::<Vec<_>>()
            .join("\n");
        let err = ShieldConfig::from_toml(&without_payment).unwrap_err();
        assert!(err.to_string().contains("capabilities.payment"));
    }

    #[test]
    fn test_duplicate_provider_rejected() {
        let text = MINIMAL.replace(r#"fallbacks = ["smtp"]"#, r#"fallbacks = ["smtp", "sendgrid"]"#);
        let err = ShieldConfig::from_toml(&text).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_cross_capability_provider_rejected() {
        let text = MINIMAL.replace(r#"fallbacks = ["stripe"]"#, r#"fallbacks = ["smtp"]"#);
        let err = ShieldConfig::from_toml(&text).unwrap_err();
        assert!(err.to_string().contains("serves 'email'"));
    }

    #[test]
    fn test_zero_policy_values_rejected() {
        let text = MINIMAL.replace("failure_threshold = 3", "failure_threshold = 0");
        assert!(ShieldConfig::from_toml(&text).is_err());

        let text = MINIMAL.replace("call_timeout_seconds = 2.5", "call_timeout_seconds = 0.0");
        assert!(ShieldConfig::from_toml(&text).is_err());
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let text = MINIMAL.replace(r#"primary = "sendgrid""#, r#"primary = "mailgun""#);
        assert!(ShieldConfig::from_toml(&text).is_err());
    }

    #[test]
    fn test_provider_kind_parsing() {
        assert_eq!("Stripe".parse::<ProviderKind>().unwrap(), ProviderKind::Stripe);
        assert_eq!(ProviderKind::GoogleVision.capability(), Capability::ImageAnalysis);
        assert!("carrier_pigeon".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn test_log_level_conversion() {
        assert_eq!(LogLevel::Error.to_tracing_level(), tracing::Level::ERROR);
        assert_eq!(LogLevel::Trace.to_tracing_level(), tracing::Level::TRACE);
    }
}
