//! # Snapsend Testkit
//!
//! Test utilities for snapsend.
//!
//! This crate provides:
//! - A reference receiver that replays streams strictly
//! - Canonical tree views for comparing a snapshot with its received copy
//! - Send and round-trip fixtures
//! - Property-based generators of filesystem mutations
//!
//! ## Usage
//!
//! ```rust
//! use snapsend_testkit::prelude::*;
//!
//! let pair = SnapshotPair::new(|base| {
//!     base.mkdir("docs", 0o755).unwrap();
//!     base.write_file("docs/a.txt", 0o644, b"alpha").unwrap();
//! })
//! .snapshot(|next| {
//!     next.rename("docs/a.txt", "docs/b.txt").unwrap();
//! });
//!
//! let output = pair.round_trip();
//! assert!(output.dump().contains(&"rename docs/a.txt -> docs/b.txt".to_string()));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod receiver;
pub mod view;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::receiver::*;
    pub use crate::view::*;
}

pub use fixtures::*;
pub use generators::*;
pub use receiver::*;
pub use view::*;
