pub mod api_types;
pub mod client;
pub mod partition;
pub mod query;
pub mod types;
