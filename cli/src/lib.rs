pub mod authority;
pub mod client;
pub mod store;
