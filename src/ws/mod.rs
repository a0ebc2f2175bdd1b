pub mod connection;
pub mod handler;
pub mod hub;
pub mod lifecycle;

pub use hub::{Hub, HubConfig};
