pub mod day;
pub mod db;
pub mod error;
pub mod json_file;
pub mod memory;
pub mod models;
pub mod recognition;
pub mod service;
pub mod store;

pub use error::{CoreError, Result};
