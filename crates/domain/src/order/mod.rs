//! Orders: status machine, records and amount rules.

pub mod amounts;
pub mod model;
mod state;

pub use amounts::{OrderAmounts, ShippingConfig};
pub use model::{
    AssembledOrder, MAX_FAIL_REASON_CHARS, Order, OrderDraft, OrderLineItem, OrderShipment,
    PaymentType, ShippingMethod, truncate_reason,
};
pub use state::OrderStatus;
