//! Story playback engine.
//!
//! A horizontally paged strip of companies, each with a run of short image or
//! video stories played back behind segmented progress bars. The engine keeps
//! seen and clap state across feed refreshes, caches media on disk, and
//! reports every background result over one event channel.
//!
//! - [`hub`] - owns the home list, refreshes it and opens sessions
//! - [`carousel`] - one viewing session across companies
//! - [`timeline`] - segmented progress for a single company
//! - [`reconcile`] - merges a fresh feed with local state
//! - [`cache`] - disk-backed media store with an in-memory front
//! - [`storage`] - persistence of the home list between launches

pub mod cache;
pub mod carousel;
pub mod config;
pub mod events;
pub mod feed;
pub mod hub;
pub mod model;
pub mod net;
pub mod reconcile;
pub mod storage;
pub mod timeline;
pub mod util;
