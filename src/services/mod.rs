//! Domain services used by HTTP and websocket routes.
//!
//! ARCHITECTURE
//! ============
//! Service modules own business rules and talk to the stores through the
//! traits on `AppState`, so route handlers stay focused on protocol
//! translation and auth plumbing.

pub mod account;
pub mod attachment;
pub mod broadcast;
pub mod chatroom;
pub mod error;
pub mod membership;
pub mod message;
pub mod session;

pub use error::ChatError;
