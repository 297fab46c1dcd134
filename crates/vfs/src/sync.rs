//! Scoped synchronization with outcome aggregation.
//!
//! A scoped sync drives every live controller under a URI prefix, children
//! before parents, and keeps going past individual failures so one broken
//! archive cannot prevent the others from flushing. Outcomes are collected
//! into a report that separates data-preserving warnings from data-losing
//! failures.

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error};

use crate::controller::FederatedController;
use crate::error::FsError;
use crate::federation::FsContext;
use crate::options::SyncOptions;

/// One per-mount-point sync outcome worth reporting.
#[derive(Debug)]
pub enum SyncIssue {
    /// A constraint was compromised but no data was lost.
    Warning {
        /// Mount point URI the warning belongs to.
        mount_point: String,
        /// What was compromised.
        detail: String,
    },
    /// The mount point failed to flush; its pending changes are still in
    /// memory.
    Failure {
        /// Mount point URI that failed.
        mount_point: String,
        /// The flush error.
        error: FsError,
    },
}

/// Aggregate of every sync failure in one scoped run.
#[derive(Debug, Error)]
#[error("synchronization failed for {} mount point(s)", failures.len())]
pub struct SyncError {
    /// Mount point URI and flush error, children first.
    pub failures: Vec<(String, FsError)>,
}

/// Outcome of a scoped sync.
#[derive(Debug, Default)]
pub struct SyncReport {
    issues: Vec<SyncIssue>,
}

impl SyncReport {
    /// All issues in controller order, children first.
    pub fn issues(&self) -> &[SyncIssue] {
        &self.issues
    }

    /// Iterate the data-preserving warnings.
    pub fn warnings(&self) -> impl Iterator<Item = &SyncIssue> {
        self.issues
            .iter()
            .filter(|issue| matches!(issue, SyncIssue::Warning { .. }))
    }

    /// Whether any mount point failed to flush.
    pub fn has_failures(&self) -> bool {
        self.issues
            .iter()
            .any(|issue| matches!(issue, SyncIssue::Failure { .. }))
    }

    /// Convert into a hard error iff a failure is present; warnings alone
    /// leave the run successful.
    pub fn into_result(self) -> Result<Vec<SyncIssue>, SyncError> {
        if !self.has_failures() {
            return Ok(self.issues);
        }
        let failures: Vec<(String, FsError)> = self
            .issues
            .into_iter()
            .filter_map(|issue| match issue {
                SyncIssue::Failure { mount_point, error } => Some((mount_point, error)),
                SyncIssue::Warning { .. } => None,
            })
            .collect();
        Err(SyncError { failures })
    }
}

/// Synchronize every live controller whose mount point starts with `prefix`.
///
/// Options are validated once up front; an illegal combination aborts before
/// any controller is touched. Individual controller failures are captured in
/// the report and never abort the loop.
///
/// Flushing a nested archive stages its bytes into the enclosing archive,
/// touching a controller that may not have been live when the snapshot was
/// taken. The orchestrator therefore re-snapshots until every live controller
/// in scope has been driven once; descending mount-point order within each
/// snapshot keeps children ahead of their parents.
pub(crate) fn sync_scope(
    ctx: &Arc<FsContext>,
    prefix: &str,
    options: &SyncOptions,
) -> Result<SyncReport, FsError> {
    options.validate()?;

    let mut report: SyncReport = SyncReport::default();
    let mut done: HashSet<String> = HashSet::new();
    loop {
        let pending: Vec<Arc<FederatedController>> = ctx
            .registry()
            .select(prefix)
            .into_iter()
            .filter(|controller| !done.contains(controller.model().mount_point().uri()))
            .collect();
        if pending.is_empty() {
            break;
        }
        debug!(prefix, controllers = pending.len(), "scoped sync pass");

        for controller in pending {
            let uri: String = controller.model().mount_point().uri().to_string();
            done.insert(uri.clone());
            match controller.sync(options) {
                Ok(warnings) => {
                    for warning in warnings {
                        report.issues.push(SyncIssue::Warning {
                            mount_point: uri.clone(),
                            detail: warning.detail,
                        });
                    }
                }
                Err(cause) => {
                    error!(mount_point = %uri, error = %cause, "sync failed");
                    report.issues.push(SyncIssue::Failure {
                        mount_point: uri,
                        error: cause,
                    });
                }
            }
        }
    }
    Ok(report)
}
