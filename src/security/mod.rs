//! Request-origin classification.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → peer address checked against trusted_proxies
//!     → X-Forwarded-For honored only behind a trusted hop
//!     → resolved client IP checked against whitelisted_ips
//! ```
//!
//! # Design Decisions
//! - Lists are parsed once at config (re)load, immutable afterwards
//! - Unidentifiable clients are treated as not whitelisted, never fatal

pub mod ip_list;

pub use ip_list::{IpList, IpListError};
