//! # SDA
//!
//! Content and conversation backend for a research assistant.
//!
//! Clients upload files to an S3-compatible object store through pre-signed
//! URLs, register them as *source data*, group them into immutable *research
//! contexts* bound to an LLM, and hold *conversations* whose agent messages
//! cite the sources they used. Metadata lives in SQLite; file bytes never
//! pass through this service.
//!
//! ## Architecture
//!
//! ```text
//!  HTTP (axum)          services                 gateways
//! ┌──────────┐   ┌──────────────────────┐   ┌────────────────┐
//! │ server   │──▶│ source_data          │──▶│ store (SQLite) │
//! │ envelope │   │ research_context     │   └────────────────┘
//! └──────────┘   │ conversation clients │   ┌────────────────┐
//!                └──────────────────────┘──▶│ blob (S3)      │
//!                                           └────────────────┘
//! ```
//!
//! Pure domain logic (models, errors, validation, LFNs, key naming and the
//! object-store trait) lives in the `sda-core` crate.
//!
//! ## Quick Start
//!
//! ```bash
//! sda init                      # create database, seed LLM catalog
//! sda client add alice          # register a client
//! sda serve                     # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations and catalog seeding |
//! | [`store`] | Metadata store gateway (one transaction per session) |
//! | [`object_store_s3`] | S3 backend with SigV4 pre-signing |
//! | [`blob`] | Blob store gateway |
//! | [`clients`] | Client registry |
//! | [`source_data`] | Upload, registration and download of source data |
//! | [`research_context`] | Research context creation and extension |
//! | [`conversation`] | Conversations, messages, thread ids and citations |
//! | [`envelope`] | Wire response envelope |
//! | [`server`] | HTTP server |
//! | [`app`] | Service wiring |

pub mod app;
pub mod blob;
pub mod clients;
pub mod config;
pub mod conversation;
pub mod db;
pub mod envelope;
pub mod migrate;
pub mod object_store_s3;
pub mod research_context;
pub mod server;
pub mod source_data;
pub mod store;
