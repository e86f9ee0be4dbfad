pub mod database;
pub mod lifecycle;
pub mod metrics;
pub mod notify;
pub mod quota;
pub mod workflow;
