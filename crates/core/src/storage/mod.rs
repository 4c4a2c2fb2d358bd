pub mod account_repository;
pub mod asset_repository;
pub mod database;
pub mod market_info_repository;
mod migrations;
pub mod price_repository;

pub use database::Database;
