//! Development server with live reload for sluice.
//!
//! Serves the development output directory, injects the live-reload client
//! into HTML pages and runs one file watcher per source path set. Each
//! watcher feeds its own channel and consumer task, which rebuilds and then
//! pushes a reload or stylesheet-inject message to connected browsers.

pub mod handlers;
pub mod livereload;
pub mod server;
pub mod watcher;

pub use handlers::{ChangeHandler, CopyRerun, ScriptRebuild, StyleRebuild};
pub use livereload::{LiveReloadHub, ReloadMessage};
pub use server::{DevServer, DevServerConfig, ServerError};
pub use watcher::{ChangeBatch, FileWatcher};
