//! In-memory provider fakes shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use shield::adapters::{AdapterError, EmailAdapter, ImageAnalysisAdapter, PaymentAdapter};
use shield::types::{PaymentCharge, PaymentRefund};
use shield::{AnalysisOptions, EmailRequest, ImageAnalysis, Label};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How a fake answers calls and probes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Succeed,
    Fail,
    /// Never answers within any reasonable timeout
    Hang,
}

/// Shared bookkeeping for every fake
pub struct Fake {
    name: &'static str,
    behavior: Mutex<Behavior>,
    ping_behavior: Mutex<Behavior>,
    calls: AtomicUsize,
    pings: AtomicUsize,
    idempotency_keys: Mutex<Vec<String>>,
}

impl Fake {
    fn new(name: &'static str, behavior: Behavior) -> Self {
        Self {
            name,
            behavior: Mutex::new(behavior),
            ping_behavior: Mutex::new(Behavior::Succeed),
            calls: AtomicUsize::new(0),
            pings: AtomicUsize::new(0),
            idempotency_keys: Mutex::new(Vec::new()),
        }
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn set_ping_behavior(&self, behavior: Behavior) {
        *self.ping_behavior.lock().unwrap() = behavior;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    pub fn idempotency_keys(&self) -> Vec<String> {
        self.idempotency_keys.lock().unwrap().clone()
    }

    async fn respond(&self, behavior: Behavior) -> Result<(), AdapterError> {
        match behavior {
            Behavior::Succeed => Ok(()),
            Behavior::Fail => Err(AdapterError::Transport(format!("{} is down", self.name))),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
        }
    }

    async fn call(&self) -> Result<(), AdapterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let behavior = *self.behavior.lock().unwrap();
        self.respond(behavior).await
    }

    async fn probe(&self) -> Result<(), AdapterError> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        let behavior = *self.ping_behavior.lock().unwrap();
        self.respond(behavior).await
    }
}

pub struct FakeEmail(pub Fake);

impl FakeEmail {
    pub fn new(name: &'static str, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self(Fake::new(name, behavior)))
    }
}

#[async_trait]
impl EmailAdapter for FakeEmail {
    fn provider(&self) -> &str {
        self.0.name
    }

    async fn send(&self, request: &EmailRequest) -> Result<String, AdapterError> {
        self.0.call().await?;
        Ok(format!("{}-msg-{}", self.0.name, request.to))
    }

    async fn ping(&self) -> Result<(), AdapterError> {
        self.0.probe().await
    }
}

pub struct FakeImage(pub Fake);

impl FakeImage {
    pub fn new(name: &'static str, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self(Fake::new(name, behavior)))
    }
}

#[async_trait]
impl ImageAnalysisAdapter for FakeImage {
    fn provider(&self) -> &str {
        self.0.name
    }

    async fn analyze(
        &self,
        _image: &[u8],
        _options: &AnalysisOptions,
    ) -> Result<ImageAnalysis, AdapterError> {
        self.0.call().await?;
        Ok(ImageAnalysis {
            labels: vec![Label {
                description: "cat".to_string(),
                score: 0.97,
            }],
            explicit_content: false,
            faces: None,
            text: None,
            fingerprint: None,
        })
    }

    async fn ping(&self) -> Result<(), AdapterError> {
        self.0.probe().await
    }
}

pub struct FakePayment {
    pub fake: Fake,
    refunds: AtomicUsize,
}

impl FakePayment {
    pub fn new(name: &'static str, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            fake: Fake::new(name, behavior),
            refunds: AtomicUsize::new(0),
        })
    }

    pub fn refunds(&self) -> usize {
        self.refunds.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentAdapter for FakePayment {
    fn provider(&self) -> &str {
        self.fake.name
    }

    async fn charge(&self, charge: &PaymentCharge) -> Result<String, AdapterError> {
        self.fake
            .idempotency_keys
            .lock()
            .unwrap()
            .push(charge.idempotency_key.clone());
        self.fake.call().await?;
        Ok(format!("{}-txn-{}", self.fake.name, charge.amount.minor_units))
    }

    async fn refund(&self, refund: &PaymentRefund) -> Result<String, AdapterError> {
        self.refunds.fetch_add(1, Ordering::SeqCst);
        self.fake.call().await?;
        Ok(format!("{}-refund-{}", self.fake.name, refund.transaction_id))
    }

    async fn ping(&self) -> Result<(), AdapterError> {
        self.fake.probe().await
    }
}
