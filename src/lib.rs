//! # coveo-chatbot
//!
//! Search and usage-analytics client for a chat-embedded Coveo experience.
//!
//! A bot agent asks for a search; the embed obtains a short-lived search
//! token (the *session endpoint*), runs the query against the Coveo Search
//! API, shows the top results, and reports search and click events to Coveo
//! Usage Analytics so relevance tuning sees chatbot traffic.
//!
//! ## Architecture
//!
//! ```text
//!                  ┌──────────────────────┐
//!   chat message ─▶│  QueryOrchestrator   │◀─ result click (rank)
//!                  └──┬────────┬───────┬──┘
//!                     │        │       │ spawned, not awaited
//!           bootstrap ▼        ▼       ▼
//!        ┌──────────────┐ ┌────────┐ ┌────────────────┐
//!        │SessionEndpoint│ │ Search │ │   Analytics    │
//!        │ cache+issuer │ │ /v2    │ │ search/click/  │
//!        └──────┬───────┘ └────────┘ │ custom + visitor│
//!               ▼                    └───────┬────────┘
//!         session store                 local store
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Search API data types |
//! | [`store`] | Key/value store trait, in-memory and file stores |
//! | [`visitor`] | Persisted visitor id |
//! | [`endpoint`] | Session endpoint, descriptor parsing, issuers |
//! | [`search`] | Search API client |
//! | [`analytics`] | Usage Analytics client |
//! | [`orchestrator`] | Bootstrap, query with retry, display, click handling |
//! | [`result_view`] | Result rendering classification |
//! | [`chat`] | Agent chat message parsing |
//! | [`logging`] | Tracing subscriber setup |

pub mod analytics;
pub mod chat;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod logging;
pub mod models;
pub mod orchestrator;
pub mod result_view;
pub mod search;
pub mod store;
pub mod visitor;
