//! Payment requests and the mock processor.
//!
//! The order service does not capture money itself. It records a PENDING
//! payment, announces it with `payment_requested`, and waits for the
//! processor's `payment_processed` / `payment_failed`. The mock processor
//! below stands in for a real one during development.

use crate::error::OrderError;
use crate::models::{DEFAULT_CURRENCY, Order, Payment};
use crate::service::OrderService;
use checkout_core::events::payment::{
    PaymentEvent, PaymentFailed, PaymentMethod, PaymentProcessed, PaymentRequested, PaymentStatus,
};
use uuid::Uuid;

/// Failure reason reported by the mock processor.
pub const MOCK_FAILURE_REASON: &str = "Mock payment failure for testing";

impl OrderService {
    /// Make sure a PENDING order has an announced payment request.
    ///
    /// Without a payment on record, a PENDING payment for the order's final
    /// amount is stored first. A payment whose `payment_requested` never
    /// reached the broker is announced now; an announced one is returned
    /// as is. Caller holds the order lock.
    ///
    /// # Errors
    ///
    /// [`OrderError::Repository`] / [`OrderError::Publish`] on infrastructure failures.
    pub(crate) async fn request_payment(&self, order: &Order) -> Result<Payment, OrderError> {
        let mut payment = match self.repository.payments_for_order(&order.id).await?.pop() {
            Some(payment) => payment,
            None => {
                let payment = Payment {
                    id: Uuid::new_v4().to_string(),
                    order_id: order.id.clone(),
                    amount: order.final_amount,
                    currency: DEFAULT_CURRENCY.to_string(),
                    method: PaymentMethod::default(),
                    status: PaymentStatus::Pending,
                    external_transaction_id: None,
                    failure_reason: None,
                    created_at: self.clock.now(),
                    processed_at: None,
                    announcement_pending: true,
                };
                self.repository.insert_payment(payment.clone()).await?;
                payment
            },
        };
        if !payment.announcement_pending {
            return Ok(payment);
        }

        self.publisher
            .publish_event(&PaymentEvent::Requested(PaymentRequested {
                payment_id: payment.id.clone(),
                order_id: order.id.clone(),
                amount: payment.amount,
                currency: payment.currency.clone(),
                method: payment.method,
                status: payment.status,
                cart_id: order.cart_id.clone(),
                user_id: order.user_id.clone(),
                created_at: payment.created_at,
            }))
            .await?;
        payment.announcement_pending = false;
        self.repository.save(order, Some(&payment)).await?;

        tracing::info!(
            order_id = %order.id,
            payment_id = %payment.id,
            amount = %payment.amount,
            "Payment requested"
        );
        Ok(payment)
    }

    /// Payment by id.
    ///
    /// # Errors
    ///
    /// [`OrderError::PaymentNotFound`] for unknown payments.
    pub async fn get_payment(&self, payment_id: &str) -> Result<Payment, OrderError> {
        self.repository
            .get_payment(payment_id)
            .await?
            .ok_or_else(|| OrderError::PaymentNotFound(payment_id.to_string()))
    }

    /// Payments of an order, oldest first.
    ///
    /// # Errors
    ///
    /// [`OrderError::OrderNotFound`] for unknown orders.
    pub async fn payments_for_order(&self, order_id: &str) -> Result<Vec<Payment>, OrderError> {
        self.get_order(order_id).await?;
        Ok(self.repository.payments_for_order(order_id).await?)
    }

    /// Resolve a pending payment the way an external processor would: by
    /// publishing `payment_processed` or `payment_failed`.
    ///
    /// Nothing is written here; the saga applies the outcome when it consumes
    /// the event, exactly as it would for a real processor.
    ///
    /// # Errors
    ///
    /// - [`OrderError::PaymentNotFound`] for unknown payments
    /// - [`OrderError::PaymentResolved`] when the payment already left PENDING/PROCESSING
    /// - [`OrderError::Publish`] when the outcome cannot be published
    pub async fn process_mock_payment(
        &self,
        payment_id: &str,
        success: bool,
        transaction_id: Option<String>,
    ) -> Result<PaymentEvent, OrderError> {
        let payment = self.get_payment(payment_id).await?;
        if !matches!(payment.status, PaymentStatus::Pending | PaymentStatus::Processing) {
            return Err(OrderError::PaymentResolved {
                payment_id: payment.id,
                status: payment.status,
            });
        }

        let event = if success {
            let transaction_id = transaction_id
                .unwrap_or_else(|| format!("mock_txn_{}", Uuid::new_v4().simple()));
            PaymentEvent::Processed(PaymentProcessed {
                order_id: payment.order_id.clone(),
                payment_id: Some(payment.id.clone()),
                transaction_id: Some(transaction_id),
            })
        } else {
            PaymentEvent::Failed(PaymentFailed {
                order_id: payment.order_id.clone(),
                payment_id: Some(payment.id.clone()),
                failure_reason: MOCK_FAILURE_REASON.to_string(),
            })
        };

        self.publisher.publish_event(&event).await?;
        tracing::info!(payment_id, success, "Mock payment outcome published");
        Ok(event)
    }
}
