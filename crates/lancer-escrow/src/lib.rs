pub mod adapter;
pub mod processor;

pub use adapter::EscrowAdapter;
pub use processor::{AdapterError, HoldMetadata, HoldState, HttpProcessor, PaymentProcessor};

#[cfg(any(test, feature = "mock"))]
pub use processor::mock::MockProcessor;
