pub mod analytics;
pub mod asset;
pub mod market_info;
pub mod portfolio;
pub mod price;
pub mod settings;
