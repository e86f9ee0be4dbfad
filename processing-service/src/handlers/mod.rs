//! HTTP handlers for processing-service.

pub mod admin;
pub mod auth;
pub mod customers;
pub mod jobs;
pub mod usage;
pub mod webhooks;
