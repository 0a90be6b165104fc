//! Mail Rules: declarative email rules, evaluated against incoming mail.

pub mod api;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod provider;
pub mod rules;
pub mod store;
