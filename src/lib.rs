pub mod api;
pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod instrument;
pub mod orderbook;
pub mod orders;
pub mod state;
pub mod store;
pub mod trade;
pub mod transaction;
pub mod utils;
pub mod wallet;
