mod schema;
mod sqlite;
pub mod upsert;

pub use schema::{MIGRATIONS, Migration, latest_version};
pub use sqlite::SqliteStore;
pub use upsert::{
    AnalysisDependencyKey, InstalledDependencyKey, NaturalKey, RequestedDependencyKey, TargetKey,
    VulnerabilityKey, VulnerableDependencyKey, get_or_create,
};

use crate::error::Result;
use crate::types::*;

/// Store defines the catalog database interface.
pub trait Store: Send + Sync {
    /// Applies every pending migration.
    fn initialize(&self) -> Result<()>;

    /// Highest applied migration version, 0 for an empty database.
    fn schema_version(&self) -> Result<u32>;

    /// Opens a write transaction. Dropping it without `commit` rolls it back.
    fn begin(&self) -> Result<Box<dyn Transaction + '_>>;

    /// Opens a read transaction: a consistent snapshot that takes no write
    /// lock until something writes through it. End it with `rollback`.
    fn begin_read(&self) -> Result<Box<dyn Transaction + '_>>;
}

/// Row-level catalog operations, all scoped to one atomic transaction.
///
/// `create_*` methods are plain inserts and fail with
/// [`Error::ConstraintViolation`](crate::error::Error::ConstraintViolation) when a
/// uniqueness invariant would be broken.
pub trait Transaction {
    // Target operations
    fn get_target(&self, id: &str) -> Result<Option<Target>>;
    fn find_target(&self, repo: &str, commit: &str) -> Result<Option<Target>>;
    fn create_target(&self, target: &Target) -> Result<()>;

    // Analysis operations
    fn get_analysis(&self, id: &str) -> Result<Option<Analysis>>;
    fn create_analysis(&self, analysis: &Analysis) -> Result<()>;
    fn update_analysis(&self, analysis: &Analysis) -> Result<()>;

    // Requested dependency operations
    fn find_requested_dependency(
        &self,
        spec: &str,
        installer: &str,
    ) -> Result<Option<RequestedDependency>>;
    fn create_requested_dependency(&self, dep: &RequestedDependency) -> Result<()>;

    // Installed dependency operations
    fn get_installed_dependency(&self, id: &str) -> Result<Option<InstalledDependency>>;
    fn find_installed_dependency(
        &self,
        package_name: &str,
        version: &str,
        installer: &str,
    ) -> Result<Option<InstalledDependency>>;
    fn create_installed_dependency(&self, dep: &InstalledDependency) -> Result<()>;
    fn set_installed_dependency_cpe(&self, id: &str, cpe: &str) -> Result<()>;

    // Analysis-dependency links
    fn find_analysis_dependency(
        &self,
        analysis_id: &str,
        requested_dependency_id: &str,
        installed_dependency_id: &str,
    ) -> Result<Option<AnalysisDependency>>;
    fn create_analysis_dependency(&self, link: &AnalysisDependency) -> Result<()>;
    fn list_analysis_dependencies(&self, analysis_id: &str) -> Result<Vec<LinkedDependency>>;

    // Vulnerability operations
    fn find_vulnerability(&self, cve: &str) -> Result<Option<Vulnerability>>;
    fn create_vulnerability(&self, vulnerability: &Vulnerability) -> Result<()>;
    fn find_vulnerable_dependency(
        &self,
        dependency_id: &str,
        vulnerability_id: &str,
    ) -> Result<Option<VulnerableDependency>>;
    fn create_vulnerable_dependency(&self, link: &VulnerableDependency) -> Result<()>;
    fn list_dependency_vulnerabilities(&self, dependency_id: &str) -> Result<Vec<Vulnerability>>;

    fn commit(self: Box<Self>) -> Result<()>;
    fn rollback(self: Box<Self>) -> Result<()>;
}
