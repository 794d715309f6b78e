//! # UNAi
//!
//! Support chatbot service: answers troubleshooting questions with
//! retrieved knowledge-base context, rotating across several API keys per
//! provider and keeping an advisory daily quota ledger.
//!
//! ## Architecture
//!
//! ```text
//!  POST /chat
//!      │
//!      ▼
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │  Retrieval   │──▶│  Generation  │──▶│   Response   │
//! │ embed+search │   │ Groq/Gemini  │   │  200/429/503 │
//! └──────┬───────┘   └──────┬───────┘   └──────────────┘
//!        │                  │ usage event (not awaited)
//!        ▼                  ▼
//! ┌──────────────┐   ┌──────────────┐
//! │   SQLite     │◀──│ UsageRecorder│
//! │ docs+ledger  │   │  background  │
//! └──────────────┘   └──────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment secrets |
//! | [`error`] | Provider error taxonomy |
//! | [`db`] / [`migrate`] | SQLite connection and schema |
//! | [`sqlite_store`] | SQLite implementation of the storage traits |
//! | [`provider`] | Groq and Gemini HTTP clients |
//! | [`ledger`] | Usage snapshots and the background recorder |
//! | [`retrieval`] | Similarity search with keyword fallback |
//! | [`generation`] | Prompt assembly and one provider call |
//! | [`orchestrator`] | The chat pipeline |
//! | [`server`] | HTTP endpoints |
//! | [`ingest`] | Knowledge document import and clear |
//! | [`usage`] | Per-key quota report |

pub mod config;
pub mod db;
pub mod error;
pub mod generation;
pub mod ingest;
pub mod ledger;
pub mod migrate;
pub mod orchestrator;
pub mod provider;
pub mod retrieval;
pub mod server;
pub mod sqlite_store;
pub mod usage;
