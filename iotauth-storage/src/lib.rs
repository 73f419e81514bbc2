#![forbid(unsafe_code)]
#![forbid(clippy::unwrap_used)]
#![deny(clippy::pedantic)]
#![deny(clippy::get_unwrap)]
#![allow(clippy::module_name_repetitions)]

pub mod migrator;
mod pool;

pub use pool::{connect, connect_tmp};
pub use sqlx::SqlitePool as Pool;
