//! rollcall-storage — Durable enrollment artifacts.
//!
//! SQLite user records, the per-user media directory layout, and the
//! Motion-JPEG video artifact recorded during a capture session.

pub mod layout;
pub mod store;
pub mod video;

pub use layout::{LayoutError, MediaLayout, UserDirs};
pub use store::{StoreError, UserRecord, UserStore, UserSummary};
pub use video::{MjpegWriter, VideoManifest};
