//! Secret handling utilities.
//!
//! Re-exports secrecy types used for the database URL and the Azure DevOps
//! personal access token.

pub use secrecy::{ExposeSecret, SecretString};
