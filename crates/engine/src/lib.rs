//! Targeting and serving pipeline.
//!
//! A serve request flows through: cache lookup → profile load → catalog
//! query → time-slot filter → frequency-cap filter → (fallback when empty)
//! → composite scoring → response, with impression recording and the cache
//! write running in the background.

pub mod cache;
pub mod filters;
pub mod profile;
pub mod scorer;
pub mod serve;

pub use cache::{sanitize_customer_id, ServeCache};
pub use profile::ProfileStore;
pub use serve::ServeEngine;
