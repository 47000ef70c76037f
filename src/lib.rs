pub mod claims;
pub mod cli;
pub mod client;
pub mod config;
pub mod controls;
pub mod endpoint;
pub mod error;
pub mod findings;
pub mod identity;
pub mod pagination;
pub mod reporter;
pub mod retry;
pub mod swimlanes;
pub mod token_store;

pub use client::{graphql_errors, ApiClient, TokenManager};
pub use error::ApiError;
