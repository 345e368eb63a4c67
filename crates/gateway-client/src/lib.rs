//! Payment processor client.
//!
//! The processor is an external collaborator exposing four operations:
//! create a payment intent, query its status, refund it, and verify the
//! signature on an asynchronous notification. [`PaymentGateway`] is the
//! seam the trade lifecycle engine depends on; [`HttpGateway`] is the
//! HTTP implementation with a bounded request timeout.
//!
//! Gateway `create` calls are not idempotent on the processor side, so
//! callers must invoke them at most once per order; a client-generated
//! idempotency key is attached where the processor supports it.

pub mod client;
pub mod error;
pub mod sign;
pub mod types;

pub use client::{HttpGateway, PaymentGateway};
pub use error::GatewayError;
pub use types::{
    ChargeRequest, ChargeResponse, GatewayStatus, QueryResponse, RefundRequest, RefundResponse,
};
