use crate::error::{Error, Result};
use crate::types::ReportedDependency;

pub(crate) fn require(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::Validation(format!("{field} cannot be empty")));
    }
    Ok(())
}

pub(crate) fn validate_dependencies(dependencies: &[ReportedDependency]) -> Result<()> {
    for (index, dep) in dependencies.iter().enumerate() {
        for (field, value) in [
            ("installer", &dep.installer),
            ("spec", &dep.spec),
            ("package_name", &dep.package_name),
            ("version", &dep.version),
        ] {
            require(value, &format!("dependencies[{index}].{field}"))?;
        }
    }
    Ok(())
}
