pub mod broker;
pub mod error;
pub mod fake;
pub mod keys;
pub mod store;

pub use error::StoreError;
pub use fake::FakeStore;
pub use store::{RedisStore, Store};
