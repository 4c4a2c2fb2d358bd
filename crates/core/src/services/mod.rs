pub mod analytics_service;
pub mod currency_service;
pub mod ingestion_service;
pub mod portfolio_service;
pub mod price_service;
pub mod query_service;
pub mod retry;
pub mod sync_service;
