//! Pipeline components, leaf first: sniffing, moderation, the two stores,
//! entity slots, and the coordinator that ties them together.

pub mod asset_store;
pub mod coordinator;
pub mod moderation;
pub mod pending_store;
pub mod slots;
pub mod sniffer;
pub mod sweeper;
