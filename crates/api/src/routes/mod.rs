pub mod admin;
pub mod flash_sales;
pub mod health;
pub mod metrics;
pub mod orders;
