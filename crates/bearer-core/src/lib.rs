//! Client toolkit for bearer-token HTTP APIs with transparent token refresh.
//!
//! [`client::ApiClient`] wraps `reqwest` with a single-flight refresh
//! coordinator: when a request fails with an expired access token, exactly
//! one refresh exchange runs while every other failing request is suspended,
//! then each is replayed with the new credential. Unrecoverable auth
//! failures invoke a pluggable session teardown. Credentials persist through
//! the [`auth::CredentialStore`] boundary.

pub mod auth;
pub mod client;
pub mod config;
