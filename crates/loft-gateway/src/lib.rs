//! Change-event gateway: fans row changes out to WebSocket subscribers,
//! restricted to the users allowed to see each row.

pub mod connection;
pub mod dispatcher;
pub mod routes;

pub use routes::router;
