//! HTTP surfaces: the user-facing proxy pipeline and server wiring.

pub mod proxy;
pub mod server;

pub use server::{AppState, QProxy, ServeError};
