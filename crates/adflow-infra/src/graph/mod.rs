//! Graph API adapter implementing the ad platform capability traits.

pub mod client;
pub mod error;

pub use client::{ACCESS_TOKEN_ENV, AdAccount, GraphClient, TokenSource};
pub use error::classify_error;
