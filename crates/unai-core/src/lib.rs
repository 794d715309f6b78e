//! # UNAi Core
//!
//! Shared, runtime-free logic for the UNAi support chatbot: credential
//! slots and key selection, quota ledger arithmetic with daily reset,
//! knowledge document models, context assembly for the generation prompt,
//! and the storage traits the application crate implements.
//!
//! This crate contains no tokio, sqlx, reqwest, or filesystem I/O.

pub mod context;
pub mod embedding;
pub mod keys;
pub mod models;
pub mod quota;
pub mod store;
