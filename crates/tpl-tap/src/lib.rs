//! 3PL Central Tap Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Incremental extraction of 3PL Central warehouse resources (orders,
//! inventory, customers and their items, stock, locations) into a stream of
//! SCHEMA, RECORD and STATE messages.
//!
//! # Components
//!
//! - [`streams`]: declarative, validated tree of stream definitions
//! - [`normalize`]: raw API page to flat snake_case records
//! - [`bookmarks`]: nested bookmark state with emit-on-write persistence
//! - [`paginate`]: page loop with RQL bookmark filtering
//! - [`sync`]: depth-first orchestration with resume checkpoints
//! - [`transport`]: the HTTP client behind the [`transport::Transport`] trait
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tpl_tap::catalog::{Catalog, SingerCatalog};
//! use tpl_tap::emit::JsonLinesEmitter;
//! use tpl_tap::{config::TapConfig, streams, sync, transport::TplClient};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = TapConfig::load(Some("config.json".as_ref()))?;
//!     let tree = streams::default_tree(&config)?;
//!     let catalog = SingerCatalog::from_file("catalog.json".as_ref())?;
//!     let client = TplClient::new(&config)?;
//!
//!     let ctx = sync::SyncContext {
//!         transport: &client,
//!         emitter: Arc::new(JsonLinesEmitter::stdout()),
//!         catalog: &catalog,
//!         start_date: config.start_date()?,
//!     };
//!     sync::run(&ctx, &tree, Default::default(), &catalog.selected_streams()).await?;
//!     Ok(())
//! }
//! ```

pub mod bookmarks;
pub mod catalog;
pub mod config;
pub mod discover;
pub mod emit;
pub mod normalize;
pub mod paginate;
pub mod schema;
pub mod streams;
pub mod sync;
pub mod transport;

pub use bookmarks::{BookmarkStore, SyncState};
pub use streams::{StreamDefinition, StreamTree};
pub use sync::{run, SyncContext, SyncOutcome, SyncSummary};
