pub mod config;
pub mod dashboard;
pub mod database;
pub mod error;
pub mod filter;
pub mod geo;
pub mod resource;
pub mod resources;
pub mod schema;
