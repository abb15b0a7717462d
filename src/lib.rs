pub mod config;
pub mod db;
pub mod error;
pub mod providers;
pub mod qc;
pub mod services;
pub mod utils;

pub use error::QcError;
pub use qc::registry::QcRegistry;
