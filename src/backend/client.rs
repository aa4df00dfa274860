mod advice;
mod alerts;
mod core;
mod dashboard;

pub use self::advice::parse_recipients;
pub use self::core::BackendClient;
