pub mod fetch;
pub mod provider;
pub mod types;
