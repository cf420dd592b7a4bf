//! Default adapters for the payment gateway collaborator.

pub mod client;
pub mod signature;

pub use client::HttpGatewayClient;
pub use signature::{HmacSignatureVerifier, SIGNATURE_HEADER};
