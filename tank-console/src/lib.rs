pub mod autopilot;
pub mod channel;
pub mod detect;
pub mod observers;
pub mod server;
pub mod stream;
