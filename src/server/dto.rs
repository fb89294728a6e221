use serde::{Deserialize, Serialize};

// Request fields are optional here so that a missing field is reported as a
// validation error naming it, rather than a generic body rejection.

#[derive(Debug, Default, Deserialize)]
pub struct StartAnalysisRequest {
    #[serde(default)]
    pub repo: Option<String>,
    #[serde(default)]
    pub commit: Option<String>,
    #[serde(default)]
    pub notify: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartAnalysisResponse {
    pub id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct CompleteAnalysisRequest {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub dependencies: Option<Vec<DependencyPayload>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DependencyPayload {
    #[serde(default)]
    pub installer: Option<String>,
    #[serde(default)]
    pub spec: Option<String>,
    #[serde(default)]
    pub package_name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RecordVulnerabilitiesRequest {
    #[serde(default)]
    pub cpe: Option<String>,
    #[serde(default)]
    pub cves: Vec<String>,
}
