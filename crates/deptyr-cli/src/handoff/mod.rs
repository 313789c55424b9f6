//! Head and client roles, plus what they need around the core: the
//! rendezvous socket, pty allocation and readiness notification.

pub mod client;
pub mod endpoint;
pub mod head;
pub mod notify;
pub mod pty;

pub use head::Head;
