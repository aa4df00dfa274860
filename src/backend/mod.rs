//! Everything that talks to the dashboard backend.

mod client;
pub mod push;

pub use client::{parse_recipients, BackendClient};
