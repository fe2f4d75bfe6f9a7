//! Building a manager from a TOML config file with real adapters

use shield::{Capability, ImageRequest, IntegrationError, IntegrationManager, ShieldConfig};
use std::io::Write;
use tempfile::NamedTempFile;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_text(vision_url: &str, with_sendgrid_key: bool) -> String {
    let sendgrid_key = if with_sendgrid_key {
        "api_key = \"SG.test\""
    } else {
        ""
    };
    format!(
        r#"
        [logging]
        level = "debug"

        [monitor]
        probe_interval_secs = 15
        probe_timeout_secs = 2.0

        [providers.sendgrid]
        {sendgrid_key}
        from_address = "noreply@example.com"

        [providers.smtp]
        host = "127.0.0.1"
        port = 2525
        from_address = "noreply@example.com"

        [providers.google_vision]
        api_key = "vision-key"
        base_url = "{vision_url}"

        [providers.local_analysis]
        fingerprint = true

        [providers.paypal]
        client_id = "client"
        client_secret = "secret"
        sandbox = true

        [capabilities.email]
        primary = "sendgrid"
        fallbacks = ["smtp"]

        [capabilities.image_analysis]
        primary = "google_vision"
        fallbacks = ["local_analysis"]
        call_timeout_seconds = 5.0

        [capabilities.payment]
        primary = "paypal"
        fallbacks = ["stripe"]
        "#
    )
}

fn write_config(text: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(text.as_bytes()).unwrap();
    file
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let mut data = b"\x89PNG\r\n\x1a\n".to_vec();
    data.extend_from_slice(&13u32.to_be_bytes());
    data.extend_from_slice(b"IHDR");
    data.extend_from_slice(&width.to_be_bytes());
    data.extend_from_slice(&height.to_be_bytes());
    data.extend_from_slice(&[8, 6, 0, 0, 0]);
    data
}

#[tokio::test]
async fn test_fallback_without_credentials_is_left_out() {
    let file = write_config(&config_text("http://127.0.0.1:9", true));
    let config = ShieldConfig::from_file(file.path()).unwrap();

    let manager = IntegrationManager::from_config(&config).unwrap();

    assert_eq!(manager.providers(Capability::Email), vec!["sendgrid", "smtp"]);
    assert_eq!(
        manager.providers(Capability::ImageAnalysis),
        vec!["google_vision", "local_analysis"]
    );
    // Stripe has no secret key, so payments run on PayPal alone
    if std::env::var("STRIPE_SECRET_KEY").is_err() {
        assert_eq!(manager.providers(Capability::Payment), vec!["paypal"]);
    }
    assert_eq!(config.monitor.probe_interval().as_secs(), 15);
    assert!(!manager.is_monitoring());
}

#[tokio::test]
async fn test_primary_without_credentials_is_fatal() {
    if std::env::var("SENDGRID_API_KEY").is_ok() {
        return;
    }
    let file = write_config(&config_text("http://127.0.0.1:9", false));
    let config = ShieldConfig::from_file(file.path()).unwrap();

    let err = IntegrationManager::from_config(&config).err().unwrap();

    assert!(matches!(err, IntegrationError::Config(ref msg) if msg.contains("sendgrid")));
    assert_eq!(err.exit_code(), shield::error::EXIT_FATAL);
}

#[tokio::test]
async fn test_vision_outage_falls_back_to_local_analysis() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/images:annotate"))
        .respond_with(ResponseTemplate::new(503).set_body_string("backend unavailable"))
        .expect(1)
        .mount(&server)
        .await;

    let file = write_config(&config_text(&server.uri(), true));
    let config = ShieldConfig::from_file(file.path()).unwrap();
    let manager = IntegrationManager::from_config(&config).unwrap();

    let image = png(640, 480);
    let report = manager
        .analyze_image_reliably(ImageRequest::new(image.clone()))
        .await
        .unwrap();

    assert_eq!(report.provider_used, "local_analysis");
    assert!(report.fallback_used);
    let labels: Vec<_> = report
        .analysis
        .labels
        .iter()
        .map(|l| l.description.as_str())
        .collect();
    assert_eq!(labels, vec!["png", "landscape", "640x480"]);
    assert_eq!(
        report.analysis.fingerprint.as_deref(),
        Some(blake3::hash(&image).to_hex().as_str())
    );

    let failure = &report.outcome.attempts[0];
    assert_eq!(failure.provider, "google_vision");
    assert_eq!(manager.metrics()["google_vision"].failures, 1);
}

#[test]
fn test_missing_file_is_io_error() {
    let err = ShieldConfig::from_file(std::path::Path::new("/nonexistent/shield.toml")).unwrap_err();
    assert!(matches!(err, IntegrationError::Io(_) | IntegrationError::Config(_)));
    assert_eq!(err.exit_code(), shield::error::EXIT_FATAL);
}
