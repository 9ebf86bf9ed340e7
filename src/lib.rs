//! Watches a chat page for finished agent turns and collects the code blocks
//! of the latest one into a side panel.
//!
//! The pieces, leaves first: [`tree`] (read-only document surface and
//! selectors), [`debounce`], [`control`] and [`tracker`] (generation state),
//! [`extract`] and [`session`] (extraction and change detection), [`render`]
//! (projection and surfaces), and [`watcher`], the event loop tying them to a
//! [`source::PageSource`].

pub mod adapter;
pub mod clipboard;
pub mod config;
pub mod control;
pub mod debounce;
pub mod dom_scripts;
pub mod extract;
pub mod logging;
pub mod metrics;
pub mod render;
pub mod session;
pub mod source;
pub mod tracker;
pub mod tree;
pub mod watcher;

pub use config::{HostSelectors, SidebarConfig, SidebarConfigError, Verbosity};
pub use extract::ContentItem;
pub use render::{RenderCommand, RenderSurface, ViewRecord};
pub use session::{ExtractionOutcome, ExtractionSession};
pub use watcher::{SidebarWatcher, UserAction, WatcherError, WatcherHandle};
