//! Typed domain operations on top of a [`Connection`](crate::Connection).
//!
//! Each façade is a cheap handle around a shared connection; clone or create
//! as many as needed.

mod channels;
mod local;
mod notify;
mod resources;
mod transfers;

pub use channels::Channels;
pub use local::LocalServer;
pub use notify::Notifications;
pub use resources::Resources;
pub use transfers::Transfers;
