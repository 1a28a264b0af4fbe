//! Source resolution and session storage

pub mod cache;
pub mod resolver;

pub use cache::SessionStore;
pub use resolver::{resolve_base64, resolve_path, stage_upload, ResolvedPdf};
