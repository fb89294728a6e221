use crate::server::dto::DependencyPayload;
use crate::server::response::ApiError;
use crate::types::ReportedDependency;

pub fn required<T>(value: Option<T>, field: &str) -> Result<T, ApiError> {
    value.ok_or_else(|| ApiError::bad_request(format!("Missing required field: {field}")))
}

pub fn reported_dependencies(
    payload: Vec<DependencyPayload>,
) -> Result<Vec<ReportedDependency>, ApiError> {
    payload
        .into_iter()
        .enumerate()
        .map(|(index, dep)| {
            let field = |name: &str| format!("dependencies[{index}].{name}");
            Ok(ReportedDependency {
                installer: required(dep.installer, &field("installer"))?,
                spec: required(dep.spec, &field("spec"))?,
                package_name: required(dep.package_name, &field("package_name"))?,
                version: required(dep.version, &field("version"))?,
            })
        })
        .collect()
}
