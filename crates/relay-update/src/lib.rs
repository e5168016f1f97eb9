//! ---
//! ra_section: "14-versioning"
//! ra_subsection: "module"
//! ra_type: "source"
//! ra_scope: "code"
//! ra_description: "Update orchestrator for relay deployments."
//! ra_version: "v0.1.0"
//! ra_owner: "tbd"
//! ---
//! Decides whether a deployment is behind upstream and advances
//! source-controlled deployments in place.
//!
//! [`UpdateService`] wires the pieces together: the
//! [`DeploymentClassifier`] picks a strategy, [`RevisionSource`] answers
//! "what is current and what is latest" for that strategy, the
//! [`UpdateChecker`] turns the answers into an [`UpdateVerdict`] memoized by
//! the [`VerdictCache`], and the [`UpdateExecutor`] performs the update.

pub mod cache;
pub mod checker;
pub mod classifier;
pub mod error;
pub mod executor;
pub mod lock;
pub mod process;
pub mod service;
pub mod source;
pub mod verdict;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use cache::{CacheEntry, VerdictCache, VERSION_CHECK_KEY};
pub use checker::UpdateChecker;
pub use classifier::{DeploymentClassifier, DeploymentMode};
pub use error::{FailureKind, Result, UpdateError};
pub use executor::{StepRecord, UpdateExecutor, UpdateOutcome, UpdateStep, UpdateStepReport};
pub use lock::ExecutionLock;
pub use process::{Invocation, ProcessError, ProcessOutput, ProcessRunner, TokioProcessRunner};
pub use service::UpdateService;
pub use source::github::{GitHubRepository, Release, RemoteError, RemoteRepository};
pub use source::marker::AppliedRevisionMarker;
pub use source::RevisionSource;
pub use verdict::{CheckReport, ReleaseInfo, UpdateVerdict, VerdictRecord};
