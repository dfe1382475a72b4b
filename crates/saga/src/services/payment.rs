//! Payment service trait and in-memory implementation.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use common::OrderCode;
use tokio::sync::Mutex;

use crate::error::SagaError;

/// Payment record operations. Provider details live behind this trait.
#[async_trait]
pub trait PaymentService: Send + Sync {
    /// Cancels the payment record of an order. Cancelling an order with no
    /// payment record is not an error.
    async fn cancel_payment(&self, order_code: &OrderCode) -> Result<(), SagaError>;
}

#[derive(Debug, Default)]
struct InMemoryPaymentState {
    cancelled: HashSet<OrderCode>,
    fail_on_cancel: bool,
}

/// In-memory payment service for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentService {
    state: Arc<Mutex<InMemoryPaymentState>>,
}

impl InMemoryPaymentService {
    /// Creates a new in-memory payment service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the service to fail on cancel.
    pub async fn set_fail_on_cancel(&self, fail: bool) {
        self.state.lock().await.fail_on_cancel = fail;
    }

    /// Returns true if the order's payment was cancelled.
    pub async fn is_cancelled(&self, order_code: &OrderCode) -> bool {
        self.state.lock().await.cancelled.contains(order_code)
    }
}

#[async_trait]
impl PaymentService for InMemoryPaymentService {
    async fn cancel_payment(&self, order_code: &OrderCode) -> Result<(), SagaError> {
        let mut state = self.state.lock().await;
        if state.fail_on_cancel {
            return Err(SagaError::PaymentService(
                "payment provider unreachable".to_string(),
            ));
        }
        state.cancelled.insert(order_code.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancel_and_fail() {
        let service = InMemoryPaymentService::new();
        let code = OrderCode::new("o1");

        service.cancel_payment(&code).await.unwrap();
        assert!(service.is_cancelled(&code).await);

        service.set_fail_on_cancel(true).await;
        let result = service.cancel_payment(&OrderCode::new("o2")).await;
        assert!(matches!(result, Err(SagaError::PaymentService(_))));
    }
}
