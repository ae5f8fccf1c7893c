//! HTTP request handlers, one module per resource.

pub mod health;
pub mod purchase;
pub mod raffles;
pub mod settlement;
pub mod tickets;
pub mod webhook;

pub use health::health_check;
