//! Request handlers.

pub mod auth;
pub mod favorites;
pub mod health;
pub mod images;
pub mod ratings;
pub mod recipes;

pub use health::*;
