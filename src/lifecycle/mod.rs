//! Analysis state transitions.
//!
//! An analysis starts `IN_PROGRESS` and is completed once with whatever final
//! status the build system reports. Each operation runs in a single store
//! transaction: either every row it touches changes, or none does.

mod validation;
mod vulnerabilities;

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::store::{
    AnalysisDependencyKey, InstalledDependencyKey, RequestedDependencyKey, Store, TargetKey,
    get_or_create,
};
use crate::types::{Analysis, AnalysisReport, ReportedDependency};

use validation::{require, validate_dependencies};

#[derive(Clone)]
pub struct AnalysisLifecycle {
    store: Arc<dyn Store>,
}

impl AnalysisLifecycle {
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Records that the build system started analysing `repo` at `commit`.
    ///
    /// Not idempotent: every call creates a new analysis, even when one is
    /// already in progress for the same target. The target itself is shared.
    pub fn start_analysis(&self, repo: &str, commit: &str, notify: &str) -> Result<Analysis> {
        require(repo, "repo")?;
        require(commit, "commit")?;

        let tx = self.store.begin()?;
        let (target, new_target) = get_or_create(tx.as_ref(), &TargetKey { repo, commit })?;
        let analysis = Analysis::start(&target.id, notify);
        tx.create_analysis(&analysis)?;
        tx.commit()?;

        info!(
            analysis_id = %analysis.id,
            target_id = %target.id,
            new_target,
            "Analysis started for {repo}@{commit}"
        );
        Ok(analysis)
    }

    /// Sets the final status of an analysis and links every reported
    /// dependency to it. Duplicate tuples in `dependencies` collapse to one link.
    pub fn complete_analysis(
        &self,
        analysis_id: &str,
        status: &str,
        dependencies: &[ReportedDependency],
    ) -> Result<Analysis> {
        require(status, "status")?;
        validate_dependencies(dependencies)?;

        let tx = self.store.begin()?;
        let mut analysis = tx.get_analysis(analysis_id)?.ok_or(Error::NotFound)?;

        if !analysis.is_in_progress() {
            warn!(
                analysis_id,
                previous_status = %analysis.status,
                "Completing an analysis that already finished"
            );
        }

        analysis.status = status.to_string();
        analysis.finished = Some(Utc::now());
        tx.update_analysis(&analysis)?;

        let mut new_links = 0usize;
        for dep in dependencies {
            let (requested, _) = get_or_create(
                tx.as_ref(),
                &RequestedDependencyKey {
                    spec: &dep.spec,
                    installer: &dep.installer,
                },
            )?;
            let (installed, _) = get_or_create(
                tx.as_ref(),
                &InstalledDependencyKey {
                    package_name: &dep.package_name,
                    version: &dep.version,
                    installer: &dep.installer,
                },
            )?;
            let (_, created) = get_or_create(
                tx.as_ref(),
                &AnalysisDependencyKey {
                    analysis_id,
                    requested_dependency_id: &requested.id,
                    installed_dependency_id: &installed.id,
                },
            )?;
            if created {
                new_links += 1;
            }
        }

        tx.commit()?;

        info!(
            analysis_id,
            status,
            reported = dependencies.len(),
            new_links,
            "Analysis finished"
        );
        Ok(analysis)
    }

    /// The analysis with its target, linked dependencies and their known CVEs.
    pub fn report(&self, analysis_id: &str) -> Result<AnalysisReport> {
        let tx = self.store.begin_read()?;
        let analysis = tx.get_analysis(analysis_id)?.ok_or(Error::NotFound)?;
        let target = tx.get_target(&analysis.target_id)?.ok_or_else(|| {
            Error::Storage(format!(
                "analysis {analysis_id} references missing target {}",
                analysis.target_id
            ))
        })?;

        let mut dependencies = tx.list_analysis_dependencies(analysis_id)?;
        for dep in &mut dependencies {
            dep.vulnerabilities = tx.list_dependency_vulnerabilities(&dep.installed.id)?;
        }
        tx.rollback()?;

        let report = AnalysisReport {
            analysis,
            target,
            dependencies,
        };
        debug!(
            analysis_id,
            dependencies = report.dependencies.len(),
            cves = ?report.cves(),
            "Built analysis report"
        );
        Ok(report)
    }
}
