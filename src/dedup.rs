//! Durable ledger of messages that already received a reply.

pub mod store;

pub use store::DedupStore;
