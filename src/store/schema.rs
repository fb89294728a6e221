/// Bookkeeping table for applied migrations. Created before anything else.
pub const MIGRATIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at TEXT NOT NULL
);
"#;

pub struct Migration {
    pub version: u32,
    pub name: &'static str,
    pub sql: &'static str,
}

/// Applied in order; a migration never changes once released.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_targets",
        sql: r#"
-- A repository at a given commit
CREATE TABLE targets (
    id TEXT PRIMARY KEY,
    repo TEXT NOT NULL,
    "commit" TEXT NOT NULL,

    UNIQUE(repo, "commit")
);
CREATE INDEX idx_targets_repo ON targets(repo);
"#,
    },
    Migration {
        version: 2,
        name: "create_analyses",
        sql: r#"
CREATE TABLE analyses (
    id TEXT PRIMARY KEY,
    target_id TEXT NOT NULL REFERENCES targets(id),
    started TEXT NOT NULL,
    finished TEXT,              -- NULL while in progress
    status TEXT NOT NULL,
    notify TEXT NOT NULL        -- webhook, opaque to us
);
CREATE INDEX idx_analyses_target ON analyses(target_id);
"#,
    },
    Migration {
        version: 3,
        name: "create_requested_dependencies",
        sql: r#"
-- Shared across analyses
CREATE TABLE requested_dependencies (
    id TEXT PRIMARY KEY,
    spec TEXT NOT NULL,
    installer TEXT NOT NULL,

    UNIQUE(spec, installer)
);
"#,
    },
    Migration {
        version: 4,
        name: "create_installed_dependencies",
        sql: r#"
-- Shared across analyses; cpe is filled in by the vulnerability resolver
CREATE TABLE installed_dependencies (
    id TEXT PRIMARY KEY,
    package_name TEXT NOT NULL,
    version TEXT NOT NULL,
    installer TEXT NOT NULL,
    cpe TEXT,

    UNIQUE(package_name, version, installer)
);
"#,
    },
    Migration {
        version: 5,
        name: "create_vulnerabilities",
        sql: r#"
CREATE TABLE vulnerabilities (
    id TEXT PRIMARY KEY,
    cve TEXT NOT NULL UNIQUE
);
"#,
    },
    Migration {
        version: 6,
        name: "create_vulnerable_dependencies",
        sql: r#"
CREATE TABLE vulnerable_dependencies (
    id TEXT PRIMARY KEY,
    dependency_id TEXT NOT NULL REFERENCES installed_dependencies(id),
    vulnerability_id TEXT NOT NULL REFERENCES vulnerabilities(id),

    UNIQUE(dependency_id, vulnerability_id)
);
CREATE INDEX idx_vulnerable_dependencies_vulnerability ON vulnerable_dependencies(vulnerability_id);
"#,
    },
    Migration {
        version: 7,
        name: "create_analysis_dependencies",
        sql: r#"
CREATE TABLE analysis_dependencies (
    id TEXT PRIMARY KEY,
    analysis_id TEXT NOT NULL REFERENCES analyses(id),
    requested_dependency_id TEXT NOT NULL REFERENCES requested_dependencies(id),
    installed_dependency_id TEXT NOT NULL REFERENCES installed_dependencies(id),

    UNIQUE(analysis_id, requested_dependency_id, installed_dependency_id)
);
CREATE INDEX idx_analysis_dependencies_installed ON analysis_dependencies(installed_dependency_id);
"#,
    },
];

/// Version the schema ends up at once every migration is applied.
#[must_use]
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |m| m.version)
}
