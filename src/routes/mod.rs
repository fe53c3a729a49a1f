//! Route modules for the chunked upload service

pub mod health;
pub mod upload;
