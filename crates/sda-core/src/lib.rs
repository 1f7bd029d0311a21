//! # SDA Core
//!
//! Transport- and database-independent logic for the SDA research backend:
//! the data model, the error taxonomy, identifier validation, Logical File
//! Names, object-key naming, and the object-store trait.
//!
//! This crate contains no tokio runtime, sqlx, or HTTP client. The server
//! crate (`sda`) builds the metadata store, the S3 backend and the services
//! on top of it.

pub mod error;
pub mod lfn;
pub mod models;
pub mod naming;
pub mod storage;
pub mod validate;

pub use error::{ErrorKind, Result, SdaError};
