pub mod config;
pub mod convert;
pub mod dataset;
pub mod dates;
pub mod db;
pub mod error;
pub mod sync;
