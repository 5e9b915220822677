//! WebDAV method layer for Davit
//!
//! Maps the WebDAV method set onto the [`davit_vfs::FileSystem`] façade,
//! owns the in-memory [`LockManager`], and renders multistatus XML.
//! Served under `/dav/*`; authentication happens upstream and arrives as
//! an `AuthResult`.

pub mod handler;
pub mod ifheader;
pub mod lock;
pub mod propfind;

pub use handler::DavHandler;
pub use lock::{Lock, LockDepth, LockManager, LockScope};
