//! Scry auth - OAuth and API-key authentication for the Scry CLI's model
//! providers.
//!
//! The library is constructed explicitly by the entry point: build a
//! [`SecureCredentialStore`](auth::SecureCredentialStore) and an
//! [`AdapterRegistry`](auth::AdapterRegistry) from [`config::Config`], hand
//! them to an [`OAuthManager`](auth::OAuthManager), and wrap that in an
//! [`AuthenticationManager`](auth::AuthenticationManager).

pub mod auth;
pub mod config;
pub mod error;
pub mod provider;

pub use error::{AdapterError, AuthError, ErrorKind, Result};
pub use provider::ProviderId;
