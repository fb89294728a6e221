//! Get-or-create over natural keys.
//!
//! Many analyses report the same packages concurrently, so a read that finds
//! nothing can be stale by the time the insert runs. The store's unique
//! constraints catch that race; the loser re-reads once and takes the winner's
//! row instead of failing.

use std::fmt::Debug;

use super::Transaction;
use crate::error::{Error, Result};
use crate::types::*;

/// A set of fields that identifies at most one row of its kind.
pub trait NaturalKey: Debug {
    type Row;

    /// Entity name, for logs and errors.
    const KIND: &'static str;

    fn find(&self, tx: &dyn Transaction) -> Result<Option<Self::Row>>;

    /// Plain insert of a fresh row carrying this key.
    fn insert(&self, tx: &dyn Transaction) -> Result<Self::Row>;
}

/// Returns the row for `key`, creating it if absent, and whether it was created.
///
/// A `ConstraintViolation` on insert means another writer created the row
/// first; it is re-read exactly once. If that re-read still misses, the store
/// is in a state get-or-create cannot reason about and a storage error is
/// returned.
pub fn get_or_create<K: NaturalKey>(tx: &dyn Transaction, key: &K) -> Result<(K::Row, bool)> {
    if let Some(row) = key.find(tx)? {
        return Ok((row, false));
    }

    match key.insert(tx) {
        Ok(row) => Ok((row, true)),
        Err(Error::ConstraintViolation(reason)) => {
            tracing::debug!(kind = K::KIND, ?key, %reason, "Lost insert race, re-reading");
            match key.find(tx)? {
                Some(row) => Ok((row, false)),
                None => Err(Error::Storage(format!(
                    "{} {key:?} rejected as duplicate but not found on re-read",
                    K::KIND
                ))),
            }
        }
        Err(e) => Err(e),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TargetKey<'a> {
    pub repo: &'a str,
    pub commit: &'a str,
}

impl NaturalKey for TargetKey<'_> {
    type Row = Target;
    const KIND: &'static str = "target";

    fn find(&self, tx: &dyn Transaction) -> Result<Option<Target>> {
        tx.find_target(self.repo, self.commit)
    }

    fn insert(&self, tx: &dyn Transaction) -> Result<Target> {
        let target = Target {
            id: new_id(),
            repo: self.repo.to_string(),
            commit: self.commit.to_string(),
        };
        tx.create_target(&target)?;
        Ok(target)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RequestedDependencyKey<'a> {
    pub spec: &'a str,
    pub installer: &'a str,
}

impl NaturalKey for RequestedDependencyKey<'_> {
    type Row = RequestedDependency;
    const KIND: &'static str = "requested dependency";

    fn find(&self, tx: &dyn Transaction) -> Result<Option<RequestedDependency>> {
        tx.find_requested_dependency(self.spec, self.installer)
    }

    fn insert(&self, tx: &dyn Transaction) -> Result<RequestedDependency> {
        let dep = RequestedDependency {
            id: new_id(),
            spec: self.spec.to_string(),
            installer: self.installer.to_string(),
        };
        tx.create_requested_dependency(&dep)?;
        Ok(dep)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct InstalledDependencyKey<'a> {
    pub package_name: &'a str,
    pub version: &'a str,
    pub installer: &'a str,
}

impl NaturalKey for InstalledDependencyKey<'_> {
    type Row = InstalledDependency;
    const KIND: &'static str = "installed dependency";

    fn find(&self, tx: &dyn Transaction) -> Result<Option<InstalledDependency>> {
        tx.find_installed_dependency(self.package_name, self.version, self.installer)
    }

    // cpe stays unset until the vulnerability resolver fills it in.
    fn insert(&self, tx: &dyn Transaction) -> Result<InstalledDependency> {
        let dep = InstalledDependency {
            id: new_id(),
            package_name: self.package_name.to_string(),
            version: self.version.to_string(),
            installer: self.installer.to_string(),
            cpe: None,
        };
        tx.create_installed_dependency(&dep)?;
        Ok(dep)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AnalysisDependencyKey<'a> {
    pub analysis_id: &'a str,
    pub requested_dependency_id: &'a str,
    pub installed_dependency_id: &'a str,
}

impl NaturalKey for AnalysisDependencyKey<'_> {
    type Row = AnalysisDependency;
    const KIND: &'static str = "analysis dependency";

    fn find(&self, tx: &dyn Transaction) -> Result<Option<AnalysisDependency>> {
        tx.find_analysis_dependency(
            self.analysis_id,
            self.requested_dependency_id,
            self.installed_dependency_id,
        )
    }

    fn insert(&self, tx: &dyn Transaction) -> Result<AnalysisDependency> {
        let link = AnalysisDependency {
            id: new_id(),
            analysis_id: self.analysis_id.to_string(),
            requested_dependency_id: self.requested_dependency_id.to_string(),
            installed_dependency_id: self.installed_dependency_id.to_string(),
        };
        tx.create_analysis_dependency(&link)?;
        Ok(link)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct VulnerabilityKey<'a> {
    pub cve: &'a str,
}

impl NaturalKey for VulnerabilityKey<'_> {
    type Row = Vulnerability;
    const KIND: &'static str = "vulnerability";

    fn find(&self, tx: &dyn Transaction) -> Result<Option<Vulnerability>> {
        tx.find_vulnerability(self.cve)
    }

    fn insert(&self, tx: &dyn Transaction) -> Result<Vulnerability> {
        let vulnerability = Vulnerability {
            id: new_id(),
            cve: self.cve.to_string(),
        };
        tx.create_vulnerability(&vulnerability)?;
        Ok(vulnerability)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct VulnerableDependencyKey<'a> {
    pub dependency_id: &'a str,
    pub vulnerability_id: &'a str,
}

impl NaturalKey for VulnerableDependencyKey<'_> {
    type Row = VulnerableDependency;
    const KIND: &'static str = "vulnerable dependency";

    fn find(&self, tx: &dyn Transaction) -> Result<Option<VulnerableDependency>> {
        tx.find_vulnerable_dependency(self.dependency_id, self.vulnerability_id)
    }

    fn insert(&self, tx: &dyn Transaction) -> Result<VulnerableDependency> {
        let link = VulnerableDependency {
            id: new_id(),
            dependency_id: self.dependency_id.to_string(),
            vulnerability_id: self.vulnerability_id.to_string(),
        };
        tx.create_vulnerable_dependency(&link)?;
        Ok(link)
    }
}
