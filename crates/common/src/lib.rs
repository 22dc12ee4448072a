pub mod config;
pub mod db;
pub mod error;
pub mod gmgn;
pub mod observability;
pub mod types;
