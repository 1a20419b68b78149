//! The remote document store: ownership checks and survey updates.

pub mod client;
pub mod ownership;
pub mod updater;

pub use client::{ReqwestResourceStore, ResourceStore, UpstreamError};
pub use ownership::verify_ownership;
pub use updater::ResourceUpdater;
