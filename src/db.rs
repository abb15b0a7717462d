pub mod error;
pub mod models;
pub mod reading_repository;
pub mod station_repository;

pub use error::DbError;
pub use models::*;
pub use reading_repository::ReadingRepository;
pub use station_repository::StationRepository;
