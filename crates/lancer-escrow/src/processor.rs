use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Processor-side state of a hold, as reported by `state()`. Used to
/// reconcile after an ambiguous outcome before any retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldState {
    /// The processor has no record of this reference
    Unknown,
    Held,
    Captured,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HoldMetadata {
    pub contract_id: String,
    pub client_id: String,
    pub developer_id: String,
}

/// Errors from the payment processor. `Ambiguous` means the call may or may
/// not have taken effect (timeout, dropped connection); callers must
/// reconcile via `state()` before retrying anything that moves money.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("payment processor rejected the call: {0}")]
    Declined(String),

    #[error("payment processor outcome unknown: {0}")]
    Ambiguous(String),
}

/// The external payment processor's hold/capture/cancel primitives. Each
/// call is idempotent when passed the same reference twice; the processor
/// must not double-charge.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn create_hold(
        &self,
        reference: &str,
        amount: f64,
        metadata: &HoldMetadata,
    ) -> Result<(), AdapterError>;

    async fn capture(&self, reference: &str) -> Result<(), AdapterError>;

    async fn cancel(&self, reference: &str) -> Result<(), AdapterError>;

    async fn state(&self, reference: &str) -> Result<HoldState, AdapterError>;
}

/// HTTP-backed processor client. The wire shape is the processor's, not
/// ours; request timeouts surface as `Ambiguous` because the call may have
/// landed.
pub struct HttpProcessor {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct HoldRequest<'a> {
    reference: &'a str,
    amount: f64,
    metadata: &'a HoldMetadata,
}

#[derive(Deserialize)]
struct StateResponse {
    state: HoldState,
}

impl HttpProcessor {
    pub fn new(base_url: String, timeout: std::time::Duration) -> Result<Self, AdapterError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AdapterError::Declined(format!("client build failed: {}", e)))?;
        Ok(Self { client, base_url })
    }

    async fn post(&self, path: &str, body: &impl Serialize) -> Result<(), AdapterError> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), path);
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(classify_send_error)?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(AdapterError::Declined(format!(
                "{} returned {}",
                path,
                resp.status()
            )))
        }
    }
}

/// Timeouts and connection drops after the request left the process are
/// ambiguous; everything else is a plain decline.
fn classify_send_error(e: reqwest::Error) -> AdapterError {
    if e.is_timeout() {
        AdapterError::Ambiguous(format!("request timed out: {}", e))
    } else {
        AdapterError::Declined(format!("request failed: {}", e))
    }
}

#[async_trait]
impl PaymentProcessor for HttpProcessor {
    async fn create_hold(
        &self,
        reference: &str,
        amount: f64,
        metadata: &HoldMetadata,
    ) -> Result<(), AdapterError> {
        self.post(
            "holds",
            &HoldRequest {
                reference,
                amount,
                metadata,
            },
        )
        .await
    }

    async fn capture(&self, reference: &str) -> Result<(), AdapterError> {
        self.post(&format!("holds/{}/capture", reference), &()).await
    }

    async fn cancel(&self, reference: &str) -> Result<(), AdapterError> {
        self.post(&format!("holds/{}/cancel", reference), &()).await
    }

    async fn state(&self, reference: &str) -> Result<HoldState, AdapterError> {
        let url = format!(
            "{}/holds/{}",
            self.base_url.trim_end_matches('/'),
            reference
        );
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(classify_send_error)?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(HoldState::Unknown);
        }
        if !resp.status().is_success() {
            return Err(AdapterError::Declined(format!(
                "state query returned {}",
                resp.status()
            )));
        }

        let body: StateResponse = resp
            .json()
            .await
            .map_err(|e| AdapterError::Declined(format!("bad state response: {}", e)))?;
        Ok(body.state)
    }
}

#[cfg(any(test, feature = "mock"))]
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Failure the mock injects on the next mutating call.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum InjectedFailure {
        /// Call is rejected and has no effect
        Decline,
        /// Call takes effect but reports an ambiguous outcome
        AmbiguousApplied,
        /// Call has no effect and reports an ambiguous outcome
        AmbiguousDropped,
    }

    /// In-memory processor with idempotent semantics and injectable
    /// failures, mirroring the contract in the trait docs.
    #[derive(Default)]
    pub struct MockProcessor {
        holds: Mutex<HashMap<String, HoldState>>,
        next_failure: Mutex<Option<InjectedFailure>>,
        calls: AtomicU32,
    }

    impl MockProcessor {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn fail_next(&self, failure: InjectedFailure) {
            *self.next_failure.lock().unwrap() = Some(failure);
        }

        /// Total mutating calls that reached the processor.
        pub fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }

        fn take_failure(&self) -> Option<InjectedFailure> {
            self.next_failure.lock().unwrap().take()
        }
    }

    #[async_trait]
    impl PaymentProcessor for MockProcessor {
        async fn create_hold(
            &self,
            reference: &str,
            _amount: f64,
            _metadata: &HoldMetadata,
        ) -> Result<(), AdapterError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.take_failure() {
                Some(InjectedFailure::Decline) => {
                    return Err(AdapterError::Declined("injected decline".into()));
                }
                Some(InjectedFailure::AmbiguousDropped) => {
                    return Err(AdapterError::Ambiguous("injected timeout".into()));
                }
                Some(InjectedFailure::AmbiguousApplied) => {
                    self.holds
                        .lock()
                        .unwrap()
                        .entry(reference.to_string())
                        .or_insert(HoldState::Held);
                    return Err(AdapterError::Ambiguous("injected timeout".into()));
                }
                None => {}
            }

            // Idempotent: re-holding an existing reference is a no-op
            self.holds
                .lock()
                .unwrap()
                .entry(reference.to_string())
                .or_insert(HoldState::Held);
            Ok(())
        }

        async fn capture(&self, reference: &str) -> Result<(), AdapterError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.take_failure() {
                Some(InjectedFailure::Decline) => {
                    return Err(AdapterError::Declined("injected decline".into()));
                }
                Some(InjectedFailure::AmbiguousDropped) => {
                    return Err(AdapterError::Ambiguous("injected timeout".into()));
                }
                Some(InjectedFailure::AmbiguousApplied) => {
                    self.holds
                        .lock()
                        .unwrap()
                        .insert(reference.to_string(), HoldState::Captured);
                    return Err(AdapterError::Ambiguous("injected timeout".into()));
                }
                None => {}
            }

            let mut holds = self.holds.lock().unwrap();
            match holds.get(reference) {
                Some(HoldState::Held) | Some(HoldState::Captured) => {
                    holds.insert(reference.to_string(), HoldState::Captured);
                    Ok(())
                }
                _ => Err(AdapterError::Declined("no capturable hold".into())),
            }
        }

        async fn cancel(&self, reference: &str) -> Result<(), AdapterError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(InjectedFailure::Decline) = self.take_failure() {
                return Err(AdapterError::Declined("injected decline".into()));
            }

            let mut holds = self.holds.lock().unwrap();
            match holds.get(reference) {
                Some(HoldState::Captured) => Err(AdapterError::Declined(
                    "hold already captured".into(),
                )),
                _ => {
                    holds.insert(reference.to_string(), HoldState::Cancelled);
                    Ok(())
                }
            }
        }

        async fn state(&self, reference: &str) -> Result<HoldState, AdapterError> {
            Ok(self
                .holds
                .lock()
                .unwrap()
                .get(reference)
                .copied()
                .unwrap_or(HoldState::Unknown))
        }
    }
}
