//! Built-in provider adapters.

mod google;
mod openrouter;
mod unsupported;

pub use google::GoogleAdapter;
pub use openrouter::OpenRouterAdapter;
pub use unsupported::UnsupportedAdapter;
