pub mod account;
pub mod manager;
pub mod persistence;
pub mod refresh;

pub use account::{Account, AccountSource, PoolStatus};
pub use manager::AccountPool;
