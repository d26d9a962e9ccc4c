//! UDP discovery: one-shot broadcast probe and response collection.

pub mod discovery;

pub use discovery::{discover, DiscoveryOptions};
