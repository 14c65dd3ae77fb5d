//! Transaction id translation between broker and proxy namespaces.
//!
//! Brokers identify a prepared transaction by their own coordinates; proxy
//! clients only ever see an opaque token wrapping those coordinates.

pub mod id;

pub use id::TransactionId;
