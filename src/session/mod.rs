//! Chat-provider session glue: cookies, login, and the live session.
//!
//! - [`cookies`]: the on-disk cookie file
//! - [`auth`]: email-code login that produces that file
//! - [`client`]: a logged-in session that can ask about an uploaded PDF
//! - [`store`]: the process-wide, atomically swapped current session

pub mod auth;
pub mod client;
pub mod cookies;
pub mod store;

pub use auth::{LoginRegistry, VerifiedLogin};
pub use client::ChatSession;
pub use cookies::StoredCookie;
pub use store::SessionStore;

/// Tracing target for session operations.
pub const TRACING_TARGET: &str = "edgequake_pdf2json::session";
