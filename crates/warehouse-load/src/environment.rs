// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! Named target environments of the warehouse-operations API.

use std::{
    collections::BTreeMap,
    fmt::{self, Display},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

/// The environments known without any configuration.
// An enum is used so that adding an environment highlights every place needing a default.
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy, Hash)]
pub enum KnownEnvironment {
    /// A service running on the developer machine.
    #[default]
    Local,
    /// The shared staging deployment.
    Staging,
    /// The production deployment.
    Production,
}

impl KnownEnvironment {
    /// All built-in environments.
    pub const ALL: [KnownEnvironment; 3] = [Self::Local, Self::Staging, Self::Production];

    /// The record registered for this environment by default.
    pub fn record(&self) -> EnvironmentRecord {
        let (base_url, description) = match self {
            KnownEnvironment::Local => ("http://localhost:8080", "Local development environment"),
            KnownEnvironment::Staging => (
                "https://warehouse-operations-staging.paklog.com",
                "Staging environment",
            ),
            KnownEnvironment::Production => (
                "https://warehouse-operations.paklog.com",
                "Production environment",
            ),
        };
        EnvironmentRecord {
            base_url: base_url.to_owned(),
            description: description.to_owned(),
        }
    }
}

impl FromStr for KnownEnvironment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Self::Local),
            "staging" => Ok(Self::Staging),
            "production" => Ok(Self::Production),
            _ => Err(format!("unrecognised environment: {s}")),
        }
    }
}

impl Display for KnownEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KnownEnvironment::Local => f.write_str("local"),
            KnownEnvironment::Staging => f.write_str("staging"),
            KnownEnvironment::Production => f.write_str("production"),
        }
    }
}

/// The configurable part of an environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct EnvironmentRecord {
    /// Base URL all request paths are appended to.
    pub base_url: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
}

/// A resolved environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Environment {
    /// The name under which the environment was resolved.
    pub name: String,
    /// Base URL without a trailing slash.
    pub base_url: String,
    /// Human-readable description.
    pub description: String,
}

impl Environment {
    fn from_record(name: &str, record: &EnvironmentRecord) -> Self {
        Self {
            name: name.to_owned(),
            base_url: record.base_url.trim_end_matches('/').to_owned(),
            description: record.description.clone(),
        }
    }

    /// Replaces the base URL, keeping the name and description.
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_owned();
        self
    }

    /// The absolute URL of `path`.
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

impl Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.base_url)
    }
}

/// The set of environments a run can target.
#[derive(Debug, Clone)]
pub struct EnvironmentRegistry {
    records: BTreeMap<String, EnvironmentRecord>,
}

impl Default for EnvironmentRegistry {
    fn default() -> Self {
        let records = KnownEnvironment::ALL
            .iter()
            .map(|env| (env.to_string(), env.record()))
            .collect();
        Self { records }
    }
}

impl EnvironmentRegistry {
    /// Adds the given records, replacing built-ins with the same name.
    pub fn with_overrides<I>(mut self, overrides: I) -> Self
    where
        I: IntoIterator<Item = (String, EnvironmentRecord)>,
    {
        self.records.extend(overrides);
        self
    }

    /// The names of all registered environments.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    /// Resolves `name`, falling back to `local` when it is absent or unknown.
    pub fn resolve(&self, name: Option<&str>) -> Environment {
        let fallback = KnownEnvironment::Local.to_string();
        let requested = name.unwrap_or(&fallback);

        if let Some(record) = self.records.get(requested) {
            return Environment::from_record(requested, record);
        }

        tracing::warn!(
            environment = requested,
            "unknown environment, falling back to {fallback}"
        );
        let record = self
            .records
            .get(&fallback)
            .cloned()
            .unwrap_or_else(|| KnownEnvironment::Local.record());
        Environment::from_record(&fallback, &record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_builtin_environments() {
        let registry = EnvironmentRegistry::default();

        let staging = registry.resolve(Some("staging"));
        assert_eq!(
            staging.base_url,
            "https://warehouse-operations-staging.paklog.com"
        );
        assert_eq!(staging.description, "Staging environment");

        let production = registry.resolve(Some("production"));
        assert_eq!(production.base_url, "https://warehouse-operations.paklog.com");
    }

    #[test]
    fn absent_or_unknown_names_fall_back_to_local() {
        let registry = EnvironmentRegistry::default();

        for name in [None, Some("qa"), Some("")] {
            let env = registry.resolve(name);
            assert_eq!(env.name, "local");
            assert_eq!(env.base_url, "http://localhost:8080");
            assert_eq!(env.description, "Local development environment");
        }
    }

    #[test]
    fn overrides_replace_and_extend_builtins() {
        let registry = EnvironmentRegistry::default().with_overrides([
            (
                "local".to_owned(),
                EnvironmentRecord {
                    base_url: "http://127.0.0.1:9090/".to_owned(),
                    description: "Docker compose".to_owned(),
                },
            ),
            (
                "perf".to_owned(),
                EnvironmentRecord {
                    base_url: "https://perf.example.com".to_owned(),
                    description: String::new(),
                },
            ),
        ]);

        assert_eq!(registry.resolve(None).base_url, "http://127.0.0.1:9090");
        assert_eq!(registry.resolve(Some("perf")).name, "perf");
        assert_eq!(registry.names().count(), 4);
    }

    #[test]
    fn joins_paths_onto_base_url() {
        let env = EnvironmentRegistry::default()
            .resolve(Some("local"))
            .with_base_url("http://localhost:8080/");
        assert_eq!(
            env.url("/actuator/health"),
            "http://localhost:8080/actuator/health"
        );
        assert_eq!(env.url("api/packages"), "http://localhost:8080/api/packages");
    }

    #[test]
    fn known_environment_round_trips_through_strings() {
        for env in KnownEnvironment::ALL {
            assert_eq!(env.to_string().parse::<KnownEnvironment>(), Ok(env));
        }
        assert!("qa".parse::<KnownEnvironment>().is_err());
    }
}
