use std::sync::Arc;

use tracing::{info, warn};

use crate::processor::{AdapterError, HoldMetadata, HoldState, PaymentProcessor};

/// Idempotent escrow interface keyed by contract id. The processor
/// reference is a pure function of the contract id, so any retry of a
/// hold/capture/cancel for the same contract reuses the same reference and
/// cannot double-charge.
///
/// Ambiguous processor outcomes (timeouts) are resolved here with a
/// `state()` reconciliation read: if the state shows the call landed, the
/// operation is reported as a success; if it shows the call was dropped,
/// the ambiguity collapses into a plain failure the caller may retry.
#[derive(Clone)]
pub struct EscrowAdapter {
    processor: Arc<dyn PaymentProcessor>,
}

impl EscrowAdapter {
    pub fn new(processor: Arc<dyn PaymentProcessor>) -> Self {
        Self { processor }
    }

    /// Processor reference for a contract. Deterministic so retries are
    /// idempotent end to end.
    pub fn reference_for(contract_id: &str) -> String {
        format!("escrow-{}", contract_id)
    }

    /// Place a hold for the contract's agreed amount. Returns the processor
    /// reference to record on the contract row.
    pub async fn hold(
        &self,
        contract_id: &str,
        amount: f64,
        metadata: &HoldMetadata,
    ) -> Result<String, AdapterError> {
        let reference = Self::reference_for(contract_id);

        match self.processor.create_hold(&reference, amount, metadata).await {
            Ok(()) => {
                info!(contract_id, %reference, "escrow hold placed");
                Ok(reference)
            }
            Err(AdapterError::Ambiguous(msg)) => {
                warn!(contract_id, "ambiguous hold outcome, reconciling: {}", msg);
                match self.processor.state(&reference).await? {
                    HoldState::Held | HoldState::Captured => Ok(reference),
                    HoldState::Unknown => {
                        Err(AdapterError::Declined("hold was not recorded".into()))
                    }
                    HoldState::Cancelled => {
                        Err(AdapterError::Declined("hold was cancelled".into()))
                    }
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Capture the held funds.
    pub async fn capture(&self, contract_id: &str) -> Result<(), AdapterError> {
        let reference = Self::reference_for(contract_id);

        match self.processor.capture(&reference).await {
            Ok(()) => {
                info!(contract_id, %reference, "escrow captured");
                Ok(())
            }
            Err(AdapterError::Ambiguous(msg)) => {
                warn!(contract_id, "ambiguous capture outcome, reconciling: {}", msg);
                match self.processor.state(&reference).await? {
                    HoldState::Captured => Ok(()),
                    _ => Err(AdapterError::Declined("capture was not applied".into())),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Cancel an uncaptured hold (refund path).
    pub async fn cancel(&self, contract_id: &str) -> Result<(), AdapterError> {
        let reference = Self::reference_for(contract_id);

        match self.processor.cancel(&reference).await {
            Ok(()) => {
                info!(contract_id, %reference, "escrow cancelled");
                Ok(())
            }
            Err(AdapterError::Ambiguous(msg)) => {
                warn!(contract_id, "ambiguous cancel outcome, reconciling: {}", msg);
                match self.processor.state(&reference).await? {
                    HoldState::Cancelled | HoldState::Unknown => Ok(()),
                    _ => Err(AdapterError::Declined("cancel was not applied".into())),
                }
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::mock::{InjectedFailure, MockProcessor};

    fn metadata() -> HoldMetadata {
        HoldMetadata {
            contract_id: "c1".into(),
            client_id: "client".into(),
            developer_id: "dev".into(),
        }
    }

    #[tokio::test]
    async fn hold_is_idempotent_per_contract() {
        let processor = Arc::new(MockProcessor::new());
        let adapter = EscrowAdapter::new(processor.clone());

        let r1 = adapter.hold("c1", 450.0, &metadata()).await.unwrap();
        let r2 = adapter.hold("c1", 450.0, &metadata()).await.unwrap();

        assert_eq!(r1, r2);
        assert_eq!(processor.state(&r1).await.unwrap(), HoldState::Held);
    }

    #[tokio::test]
    async fn ambiguous_hold_that_landed_resolves_to_success() {
        let processor = Arc::new(MockProcessor::new());
        let adapter = EscrowAdapter::new(processor.clone());

        processor.fail_next(InjectedFailure::AmbiguousApplied);
        let reference = adapter.hold("c1", 450.0, &metadata()).await.unwrap();

        assert_eq!(processor.state(&reference).await.unwrap(), HoldState::Held);
    }

    #[tokio::test]
    async fn ambiguous_hold_that_dropped_resolves_to_failure() {
        let processor = Arc::new(MockProcessor::new());
        let adapter = EscrowAdapter::new(processor.clone());

        processor.fail_next(InjectedFailure::AmbiguousDropped);
        let err = adapter.hold("c1", 450.0, &metadata()).await.unwrap_err();

        assert!(matches!(err, AdapterError::Declined(_)));
        let reference = EscrowAdapter::reference_for("c1");
        assert_eq!(
            processor.state(&reference).await.unwrap(),
            HoldState::Unknown
        );
    }

    #[tokio::test]
    async fn capture_without_hold_is_declined() {
        let processor = Arc::new(MockProcessor::new());
        let adapter = EscrowAdapter::new(processor);

        let err = adapter.capture("c1").await.unwrap_err();
        assert!(matches!(err, AdapterError::Declined(_)));
    }

    #[tokio::test]
    async fn ambiguous_capture_that_landed_resolves_to_success() {
        let processor = Arc::new(MockProcessor::new());
        let adapter = EscrowAdapter::new(processor.clone());

        adapter.hold("c1", 450.0, &metadata()).await.unwrap();
        processor.fail_next(InjectedFailure::AmbiguousApplied);
        adapter.capture("c1").await.unwrap();

        let reference = EscrowAdapter::reference_for("c1");
        assert_eq!(
            processor.state(&reference).await.unwrap(),
            HoldState::Captured
        );
    }

    #[tokio::test]
    async fn cancel_after_capture_is_declined() {
        let processor = Arc::new(MockProcessor::new());
        let adapter = EscrowAdapter::new(processor);

        adapter.hold("c1", 450.0, &metadata()).await.unwrap();
        adapter.capture("c1").await.unwrap();

        let err = adapter.cancel("c1").await.unwrap_err();
        assert!(matches!(err, AdapterError::Declined(_)));
    }
}
