use tracing::info;

use super::AnalysisLifecycle;
use super::validation::require;
use crate::error::{Error, Result};
use crate::store::{VulnerabilityKey, VulnerableDependencyKey, get_or_create};
use crate::types::Vulnerability;

impl AnalysisLifecycle {
    /// Write path for the vulnerability resolver: attaches CVEs (and optionally
    /// a CPE) to an installed dependency. CVEs are deduplicated catalog-wide and
    /// repeating a call changes nothing.
    ///
    /// Returns every vulnerability now linked to the dependency.
    pub fn record_vulnerabilities(
        &self,
        dependency_id: &str,
        cpe: Option<&str>,
        cves: &[String],
    ) -> Result<Vec<Vulnerability>> {
        if let Some(cpe) = cpe {
            require(cpe, "cpe")?;
        }
        for (index, cve) in cves.iter().enumerate() {
            require(cve, &format!("cves[{index}]"))?;
        }

        let tx = self.store.begin()?;
        let dependency = tx
            .get_installed_dependency(dependency_id)?
            .ok_or(Error::NotFound)?;

        if let Some(cpe) = cpe {
            tx.set_installed_dependency_cpe(&dependency.id, cpe)?;
        }

        for cve in cves {
            let (vulnerability, _) = get_or_create(tx.as_ref(), &VulnerabilityKey { cve })?;
            get_or_create(
                tx.as_ref(),
                &VulnerableDependencyKey {
                    dependency_id: &dependency.id,
                    vulnerability_id: &vulnerability.id,
                },
            )?;
        }

        let linked = tx.list_dependency_vulnerabilities(&dependency.id)?;
        tx.commit()?;

        info!(
            dependency_id,
            package = %dependency.package_name,
            version = %dependency.version,
            vulnerabilities = linked.len(),
            "Recorded vulnerabilities"
        );
        Ok(linked)
    }
}
