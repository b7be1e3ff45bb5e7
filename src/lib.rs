//! A campaign targeting engine: selects the ad campaigns to deliver for an `(app, country, os)`
//! request.
//!
//! # Overview
//!
//! Campaigns and their [targeting rules](TargetingRule) are loaded by a [`DataLoader`] into an
//! immutable [`Snapshot`]. The [`TargetingCache`] is the central authority on which snapshot is
//! current. Whenever data changes, the snapshot is replaced completely, so a reader always sees
//! campaigns and rules from the same load.
//!
//! A [`RefreshThread`] refreshes the cache periodically, and requests trigger a background refresh
//! when the snapshot is older than the refresh interval. A failed refresh keeps the previous
//! snapshot; only the initial load at startup is fatal.
//!
//! The [`DeliveryEvaluator`] applies the [rule matcher](rules::matches) to every active campaign
//! in a snapshot. [`DeliveryService`] ties the pieces together and owns the refresh thread, and
//! the [`server`] module exposes it over HTTP.
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum. Backing-store failures ([`LoaderError`]) after
//! startup never reach request handling; they are logged and retried on the next refresh.
//!
//! # Logging
//!
//! The crate uses the [`log`](https://docs.rs/log/latest/log/) crate with the `targeting` target
//! and structured key-values.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod data_loader;
pub mod http_loader;
pub mod models;
pub mod rules;
pub mod server;

mod config;
mod error;
mod evaluator;
mod refresh_thread;
mod service;
mod snapshot;
mod targeting_cache;

pub use config::{RefreshConfig, ServiceConfig};
pub use data_loader::{DataLoader, JsonFileLoader, LoadedData, StaticLoader, TargetingData};
pub use error::{Error, LoaderError, Result, ValidationError};
pub use evaluator::DeliveryEvaluator;
pub use http_loader::{HttpLoader, HttpLoaderConfig};
pub use models::{
    Campaign, CampaignResponse, CampaignStatus, DeliveryRequest, Dimension, ErrorResponse, RuleType,
    TargetingRule,
};
pub use refresh_thread::RefreshThread;
pub use service::DeliveryService;
pub use snapshot::Snapshot;
pub use targeting_cache::TargetingCache;
