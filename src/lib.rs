//! Decentralized web-of-trust engine: incremental trust/score propagation
//! and download-eligibility scheduling.
//!
//! The module layout mirrors the component boundaries of the design this
//! crate follows: `store` is the embedded object arena (C1), `trust_graph`
//! is the mutating API in front of it (C2), `score_engine` keeps derived
//! scores consistent (C3), `download_policy` turns scores into fetch
//! decisions (C4), `downloader::{fast, slow}` carry those decisions out
//! (C5/C6), and `maintenance` runs the periodic correctness passes (C7).

pub mod config;
pub mod download_policy;
pub mod downloader;
pub mod error;
pub mod identity_file;
pub mod ids;
pub mod logging;
pub mod maintenance;
pub mod model;
pub mod net;
pub mod score_engine;
pub mod store;
pub mod trust_graph;

pub use config::Config;
pub use download_policy::{DownloadCoordinator, FetchTransition, Partition};
pub use downloader::{FastDownloader, SlowDownloader};
pub use error::{WotError, WotResult};
pub use ids::IdentityId;
pub use maintenance::MaintenanceScheduler;
pub use model::{FetchState, Identity, IdentityKind, Score, Trust};
pub use net::NetworkClient;
pub use store::GraphStore;
pub use trust_graph::{ChangeReport, TrustGraph};
