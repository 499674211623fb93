//! # Tailburrow
//!
//! A local archive for artwork favorites, with cross-source deduplication.
//!
//! ## Architecture
//!
//! ```text
//! PageFetcher → Sync Engine → Downloader → Hasher → Library + Store
//!                     └──── Reconciler (FurAffinity → e621 by hash)
//! ```
//!
//! e621 is the primary source: favorites come from its JSON API with full
//! metadata. FurAffinity is the secondary source: favorites are scraped with
//! session cookies, and every image is matched by content hash against the
//! library and e621 before it is kept as an exclusive.
//!
//! ## Quick Start
//!
//! ```bash
//! tailburrow library init ~/Pictures/burrow
//! tailburrow creds set e621 myname --secret API_KEY
//! tailburrow sync e621 --max 20
//! tailburrow list
//! ```
//!
//! ## Modules
//!
//! - [`app`]: Application context and error types
//! - [`cli`]: Command-line interface definitions
//! - [`domain`]: Items, tags, sources and run status
//! - [`store`]: Database persistence
//! - [`sync`]: Sync engines and the reconciler

/// Application context and error handling.
///
/// The [`AppContext`](app::AppContext) struct wires together the store,
/// library, credentials and sync controller.
pub mod app;

/// Command-line interface using clap.
pub mod cli;

/// Configuration loaded from `~/.config/tailburrow/config.toml`.
pub mod config;

/// Per-source credentials kept in the settings table.
pub mod credentials;

/// Core domain models.
///
/// - [`Item`](domain::Item): an archived file with provenance and tags
/// - [`UnavailableRecord`](domain::UnavailableRecord): a post that could not be archived
/// - [`RunStatus`](domain::RunStatus): snapshot of a sync run
pub mod domain;

/// e621 JSON API client.
pub mod e621;

/// FurAffinity cookie client and HTML extraction.
pub mod furaffinity;

/// Pagination, download and lookup abstractions shared by the engines.
///
/// - [`PageFetcher`](fetcher::PageFetcher): one page of favorites per call
/// - [`Downloader`](fetcher::Downloader): raw file bytes
/// - [`PrimaryLookup`](fetcher::PrimaryLookup): find a primary post by content hash
pub mod fetcher;

/// MD5 content hashing used as the cross-source dedup key.
pub mod hasher;

/// The managed library directory: layout, file naming and trash.
pub mod library;

/// SQLite persistence layer.
///
/// - [`Store`](store::Store): Trait defining storage operations
/// - [`SqliteStore`](store::SqliteStore): SQLite implementation
pub mod store;

/// Sync engines, the cross-source reconciler and their control surface.
pub mod sync;
