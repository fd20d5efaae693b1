//! Collaborators for Weibo: the mobile JSON API for timelines and the desktop
//! profile page for related accounts.

pub mod api;
pub mod discovery;
pub mod parse;

pub use api::MobileApiSource;
pub use discovery::{ProfilePageDiscoverer, RelatedIdExtractor};
