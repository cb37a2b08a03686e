//! Shared types for the loft realtime stack.
//!
//! `models` mirrors the rows the layer reads, `api` the JSON bodies of the
//! count/mark-read endpoints, and `events` the change-event channel spoken
//! between `loft-gateway` and `loft-realtime`.

pub mod api;
pub mod events;
pub mod models;
