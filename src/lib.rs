pub mod billing;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod keygen;
pub mod models;
pub mod notify;
