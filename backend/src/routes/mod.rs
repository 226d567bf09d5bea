// backend/src/routes/mod.rs

pub mod auth;
pub mod health;
