//! The relay: one session per client connection, bridging it to the
//! upstream model.

pub mod accumulator;
pub mod driver;
pub mod gate;
pub mod session;
pub mod validator;

pub use driver::ClientFrame;
pub use session::{RelaySession, Routed, SessionState};
