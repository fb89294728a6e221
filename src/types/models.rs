use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status every analysis starts in.
pub const STATUS_IN_PROGRESS: &str = "IN_PROGRESS";

#[must_use]
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// A (repository, commit) pair under analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub id: String,
    pub repo: String,
    pub commit: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Analysis {
    pub id: String,
    pub target_id: String,
    pub started: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished: Option<DateTime<Utc>>,
    pub status: String,
    pub notify: String,
}

impl Analysis {
    /// A fresh in-progress analysis for `target_id`.
    #[must_use]
    pub fn start(target_id: &str, notify: &str) -> Self {
        Self {
            id: new_id(),
            target_id: target_id.to_string(),
            started: Utc::now(),
            finished: None,
            status: STATUS_IN_PROGRESS.to_string(),
            notify: notify.to_string(),
        }
    }

    #[must_use]
    pub fn is_in_progress(&self) -> bool {
        self.finished.is_none() && self.status == STATUS_IN_PROGRESS
    }
}

/// What the user asked for, e.g. a version range, for one installer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestedDependency {
    pub id: String,
    pub spec: String,
    pub installer: String,
}

/// The concrete package version an installer resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledDependency {
    pub id: String,
    pub package_name: String,
    pub version: String,
    pub installer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpe: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vulnerability {
    pub id: String,
    pub cve: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VulnerableDependency {
    pub id: String,
    pub dependency_id: String,
    pub vulnerability_id: String,
}

/// Within one analysis, a requested spec resolved to an installed version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisDependency {
    pub id: String,
    pub analysis_id: String,
    pub requested_dependency_id: String,
    pub installed_dependency_id: String,
}

/// One dependency as reported by the build system when an analysis finishes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReportedDependency {
    pub installer: String,
    pub spec: String,
    pub package_name: String,
    pub version: String,
}

/// An analysis link resolved into its catalog rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkedDependency {
    pub requested: RequestedDependency,
    pub installed: InstalledDependency,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vulnerabilities: Vec<Vulnerability>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    #[serde(flatten)]
    pub analysis: Analysis,
    pub target: Target,
    pub dependencies: Vec<LinkedDependency>,
}

impl AnalysisReport {
    /// Distinct CVE identifiers across every linked dependency.
    #[must_use]
    pub fn cves(&self) -> Vec<&str> {
        let mut cves: Vec<&str> = self
            .dependencies
            .iter()
            .flat_map(|dep| dep.vulnerabilities.iter().map(|v| v.cve.as_str()))
            .collect();
        cves.sort_unstable();
        cves.dedup();
        cves
    }
}
