#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Builds a star-schema warehouse from a crime incident CSV and a directory
//! of hourly weather observations.
//!
//! The [`Pipeline`] runs four stages against a
//! [`Connector`](crime_warehouse_database::Connector): extract (normalize,
//! aggregate, gap-fill, join), dimensions, facts, and schema wiring. Each
//! stage holds its own connection for exactly as long as it runs.

pub mod aggregate;
pub mod config;
pub mod dimensions;
pub mod error;
pub mod facts;
pub mod gap_fill;
pub mod join;
pub mod normalize;
pub mod pipeline;
pub mod rows;
pub mod schema;
pub mod source;
pub mod stage;
pub mod verify;

pub use config::{ConfigError, WarehouseConfig};
pub use error::{EtlError, StageError};
pub use pipeline::Pipeline;
