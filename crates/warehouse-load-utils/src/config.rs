// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! Loading YAML configuration files.

use std::path::Path;

use anyhow::Context;
use serde::de::DeserializeOwned;

/// Load a value from a YAML file.
pub fn load_from_yaml<P: AsRef<Path>, T: DeserializeOwned>(path: P) -> anyhow::Result<T> {
    let path = path.as_ref();
    tracing::debug!(path = %path.display(), "reading configuration file");

    let reader = std::fs::File::open(path)
        .with_context(|| format!("unable to load configuration from {}", path.display()))?;

    serde_yaml::from_reader(reader)
        .with_context(|| format!("invalid configuration in {}", path.display()))
}

/// Serde adapter for durations written as human-readable strings, e.g. `30s` or `2m 30s`.
pub mod humantime_duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    /// Serializes a duration as a humantime string.
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*duration))
    }

    /// Deserializes a duration from a humantime string.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let value = String::deserialize(deserializer)?;
        humantime::parse_duration(&value).map_err(D::Error::custom)
    }

    /// The same adapter for optional durations.
    pub mod option {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

        /// Serializes an optional duration as a humantime string.
        pub fn serialize<S: Serializer>(
            duration: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match duration {
                Some(duration) => serializer.collect_str(&humantime::format_duration(*duration)),
                None => serializer.serialize_none(),
            }
        }

        /// Deserializes an optional duration from a humantime string.
        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            Option::<String>::deserialize(deserializer)?
                .map(|value| humantime::parse_duration(&value).map_err(D::Error::custom))
                .transpose()
        }
    }
}
