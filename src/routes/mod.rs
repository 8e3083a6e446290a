//! HTTP route handlers.
//!
//! [`events`] holds the locally handled widget-event routes (reached through
//! the dispatch middleware, not the router); [`health`] is the ordinary
//! liveness endpoint on the host router.

pub mod events;
pub mod health;
