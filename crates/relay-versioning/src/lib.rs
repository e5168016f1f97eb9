//! ---
//! ra_section: "14-versioning"
//! ra_subsection: "module"
//! ra_type: "source"
//! ra_scope: "code"
//! ra_description: "Version labels, build metadata and revision references."
//! ra_version: "v0.1.0"
//! ra_owner: "tbd"
//! ---
#![warn(missing_docs)]

//! Version metadata helpers shared by the update orchestrator and the admin
//! API: numeric version-label comparison, compile-time build information and
//! the immutable revision reference exchanged between revision sources.

pub mod revision;
pub mod semver;

pub use revision::{RecentChange, RevisionRef};
pub use semver::{compare_versions, VersionInfo, VersionTriple};
