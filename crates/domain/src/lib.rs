//! Order domain for the purchase pipeline.
//!
//! - [`order`]: status machine, header/line/shipment records, amount and
//!   shipping rules
//! - [`store`]: order persistence; every status change is a conditional
//!   update, and assembly/cancellation write their outbox rows in the same
//!   transaction

pub mod error;
pub mod order;
pub mod store;

pub use error::{DomainError, Result};
pub use order::{
    AssembledOrder, Order, OrderAmounts, OrderDraft, OrderLineItem, OrderShipment, OrderStatus,
    PaymentType, ShippingConfig, ShippingMethod, truncate_reason,
};
pub use store::{InMemoryOrderStore, OrderStore, PostgresOrderStore};
