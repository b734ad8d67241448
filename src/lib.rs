pub mod approvals;
pub mod attachments;
pub mod auth;
pub mod categories;
pub mod config;
pub mod documents;
pub mod maintenance;
pub mod reviews;
pub mod server;
pub mod shared;
pub mod versioning;
pub mod viewers;
