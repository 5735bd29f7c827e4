//! Core helpers shared by both warehouse clients.
//!
//! - [`identifier`]: identifier validation and quoting for generated SQL

pub mod identifier;
