//! Central (client) role.
//!
//! A [`CentralSession`] scans for the temperature service, connects to the
//! first match, discovers its services and reads the temperature.

pub mod session;
pub mod state;

pub use session::CentralSession;
pub use state::SessionState;
