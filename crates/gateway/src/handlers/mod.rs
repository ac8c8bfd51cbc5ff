//! API handlers module

pub mod admin;
pub mod analyze;
pub mod auth;
pub mod documents;
pub mod health;
pub mod process;
pub mod qa;
pub mod storage;
pub mod users;
