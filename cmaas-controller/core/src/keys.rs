//! Coordination store key grammar.
//!
//! ```text
//! change-set/<namespace>/<microservice>/<serviceVersion>/<mapLevel>/<dataFile>/<revision>
//! commit-config/<namespace>/<microservice>/<serviceVersion>/<mapLevel>[/cim]/<podName>
//! stateActive/<nfId>
//! config/<namespace>/<microservice>[/<revision>]
//! ```

use std::{fmt, str::FromStr};

pub const CHANGE_SET_PREFIX: &str = "change-set/";
pub const COMMIT_CONFIG_PREFIX: &str = "commit-config/";
pub const STATE_ACTIVE_PREFIX: &str = "stateActive/";
pub const CONFIG_PREFIX: &str = "config/";

/// The data file owned by the CIM-managed ConfigMap of a microservice.
pub const CIM_FILE: &str = "cim.json";
const CIM_SEGMENT: &str = "cim";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("key {0:?} does not start with {1:?}")]
    Prefix(String, &'static str),

    #[error("key {0:?} has an unexpected number of segments")]
    Segments(String),

    #[error("invalid map level {0:?}")]
    MapLevel(String),

    #[error("invalid revision {0:?}")]
    Revision(String),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid commit value {0:?}")]
pub struct CommitValueError(pub String);

/// Distinguishes network-function-level from microservice-level ownership of
/// a configuration file.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MapLevel {
    Nf,
    Ms,
}

/// Identifies a single configuration file delivered to a microservice.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileCoordinate {
    pub namespace: String,
    pub microservice: String,
    pub service_version: String,
    pub map_level: MapLevel,
    pub data_file: String,
}

/// A staged change-set for a coordinate at a given revision.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ChangeSetKey {
    pub coordinate: FileCoordinate,
    pub revision: u64,
}

/// A pod's acknowledgment record.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CommitKey {
    pub namespace: String,
    pub microservice: String,
    pub service_version: String,
    pub map_level: MapLevel,
    pub cim: bool,
    pub pod: String,
}

/// The value a pod reports in its commit-config entry.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CommitValue {
    Revision(u64),
    /// The pod failed to apply the configuration (`-1`).
    Failed,
    /// The pod intentionally ignores the configuration (`-2`).
    Bypass,
}

pub fn state_active_key(nf_id: &str) -> String {
    format!("{STATE_ACTIVE_PREFIX}{nf_id}")
}

pub fn config_key(namespace: &str, microservice: &str, revision: Option<&str>) -> String {
    match revision {
        Some(rev) => format!("{CONFIG_PREFIX}{namespace}/{microservice}/{rev}"),
        None => format!("{CONFIG_PREFIX}{namespace}/{microservice}"),
    }
}

/// The prefix under which revision-suffixed Day-1 entries of a microservice live.
pub fn config_revisions_prefix(namespace: &str, microservice: &str) -> String {
    format!("{CONFIG_PREFIX}{namespace}/{microservice}/")
}

pub fn namespace_config_prefix(namespace: &str) -> String {
    format!("{CONFIG_PREFIX}{namespace}/")
}

// === impl MapLevel ===

impl MapLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nf => "nf",
            Self::Ms => "ms",
        }
    }
}

impl fmt::Display for MapLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MapLevel {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nf" => Ok(Self::Nf),
            "ms" => Ok(Self::Ms),
            s => Err(KeyError::MapLevel(s.to_string())),
        }
    }
}

// === impl FileCoordinate ===

impl FileCoordinate {
    pub fn is_cim_file(&self) -> bool {
        self.data_file == CIM_FILE
    }

    /// The commit-config prefix that pods acknowledging this file write under.
    ///
    /// The prefix always ends with `/` so that it never matches a sibling
    /// microservice or version sharing a name prefix.
    pub fn commit_prefix(&self, cim: bool) -> String {
        let Self {
            namespace,
            microservice,
            service_version,
            map_level,
            ..
        } = self;
        if cim {
            format!("{COMMIT_CONFIG_PREFIX}{namespace}/{microservice}/{service_version}/{map_level}/{CIM_SEGMENT}/")
        } else {
            format!("{COMMIT_CONFIG_PREFIX}{namespace}/{microservice}/{service_version}/{map_level}/")
        }
    }
}

impl fmt::Display for FileCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}/{}",
            self.namespace, self.microservice, self.service_version, self.map_level, self.data_file
        )
    }
}

// === impl ChangeSetKey ===

impl fmt::Display for ChangeSetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{CHANGE_SET_PREFIX}{}/{}", self.coordinate, self.revision)
    }
}

impl FromStr for ChangeSetKey {
    type Err = KeyError;

    fn from_str(key: &str) -> Result<Self, Self::Err> {
        let rest = key
            .strip_prefix(CHANGE_SET_PREFIX)
            .ok_or_else(|| KeyError::Prefix(key.to_string(), CHANGE_SET_PREFIX))?;
        let parts = rest.split('/').collect::<Vec<_>>();
        let [namespace, microservice, service_version, map_level, data_file, revision] =
            parts.as_slice()
        else {
            return Err(KeyError::Segments(key.to_string()));
        };
        if [namespace, microservice, service_version, data_file]
            .iter()
            .any(|s| s.is_empty())
        {
            return Err(KeyError::Segments(key.to_string()));
        }
        let revision = revision
            .parse()
            .map_err(|_| KeyError::Revision(revision.to_string()))?;
        Ok(Self {
            coordinate: FileCoordinate {
                namespace: namespace.to_string(),
                microservice: microservice.to_string(),
                service_version: service_version.to_string(),
                map_level: map_level.parse()?,
                data_file: data_file.to_string(),
            },
            revision,
        })
    }
}

// === impl CommitKey ===

impl fmt::Display for CommitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{COMMIT_CONFIG_PREFIX}{}/{}/{}/{}/",
            self.namespace, self.microservice, self.service_version, self.map_level
        )?;
        if self.cim {
            write!(f, "{CIM_SEGMENT}/")?;
        }
        f.write_str(&self.pod)
    }
}

impl FromStr for CommitKey {
    type Err = KeyError;

    fn from_str(key: &str) -> Result<Self, Self::Err> {
        let rest = key
            .strip_prefix(COMMIT_CONFIG_PREFIX)
            .ok_or_else(|| KeyError::Prefix(key.to_string(), COMMIT_CONFIG_PREFIX))?;
        let parts = rest.split('/').collect::<Vec<_>>();
        let (namespace, microservice, service_version, map_level, cim, pod) = match parts.as_slice()
        {
            [ns, ms, ver, level, pod] => (ns, ms, ver, level, false, pod),
            [ns, ms, ver, level, seg, pod] if *seg == CIM_SEGMENT => (ns, ms, ver, level, true, pod),
            _ => return Err(KeyError::Segments(key.to_string())),
        };
        if pod.is_empty() {
            return Err(KeyError::Segments(key.to_string()));
        }
        Ok(Self {
            namespace: namespace.to_string(),
            microservice: microservice.to_string(),
            service_version: service_version.to_string(),
            map_level: map_level.parse()?,
            cim,
            pod: pod.to_string(),
        })
    }
}

// === impl CommitValue ===

impl fmt::Display for CommitValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Revision(rev) => write!(f, "{rev}"),
            Self::Failed => f.write_str("-1"),
            Self::Bypass => f.write_str("-2"),
        }
    }
}

impl FromStr for CommitValue {
    type Err = CommitValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "-1" => Ok(Self::Failed),
            "-2" => Ok(Self::Bypass),
            v => v
                .parse()
                .map(Self::Revision)
                .map_err(|_| CommitValueError(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn coordinate() -> FileCoordinate {
        FileCoordinate {
            namespace: "ns1".to_string(),
            microservice: "amf".to_string(),
            service_version: "v1".to_string(),
            map_level: MapLevel::Nf,
            data_file: "app.json".to_string(),
        }
    }

    #[test]
    fn change_set_key_format() {
        let key = ChangeSetKey {
            coordinate: coordinate(),
            revision: 3,
        };
        assert_eq!(key.to_string(), "change-set/ns1/amf/v1/nf/app.json/3");
        assert_eq!(key.to_string().parse::<ChangeSetKey>(), Ok(key));
    }

    #[test]
    fn change_set_key_rejects_malformed() {
        assert!(matches!(
            "commit-config/ns1/amf/v1/nf/app.json/3".parse::<ChangeSetKey>(),
            Err(KeyError::Prefix(..))
        ));
        assert!(matches!(
            "change-set/ns1/amf/v1/nf/app.json".parse::<ChangeSetKey>(),
            Err(KeyError::Segments(_))
        ));
        assert!(matches!(
            "change-set/ns1/amf/v1/xx/app.json/3".parse::<ChangeSetKey>(),
            Err(KeyError::MapLevel(_))
        ));
        assert!(matches!(
            "change-set/ns1/amf/v1/nf/app.json/three".parse::<ChangeSetKey>(),
            Err(KeyError::Revision(_))
        ));
    }

    #[test]
    fn commit_prefixes() {
        let c = coordinate();
        assert_eq!(c.commit_prefix(false), "commit-config/ns1/amf/v1/nf/");
        assert_eq!(c.commit_prefix(true), "commit-config/ns1/amf/v1/nf/cim/");
    }

    #[test]
    fn commit_key_parse() {
        let key = "commit-config/ns1/amf/v1/nf/amf-0"
            .parse::<CommitKey>()
            .unwrap();
        assert_eq!(key.pod, "amf-0");
        assert!(!key.cim);

        let key = "commit-config/ns1/amf/v1/ms/cim/amf-0"
            .parse::<CommitKey>()
            .unwrap();
        assert_eq!(key.pod, "amf-0");
        assert_eq!(key.map_level, MapLevel::Ms);
        assert!(key.cim);
        assert_eq!(key.to_string(), "commit-config/ns1/amf/v1/ms/cim/amf-0");

        assert!("commit-config/ns1/amf/v1/nf/other/amf-0"
            .parse::<CommitKey>()
            .is_err());
    }

    #[test]
    fn commit_values() {
        assert_eq!("3".parse(), Ok(CommitValue::Revision(3)));
        assert_eq!(" 4\n".parse(), Ok(CommitValue::Revision(4)));
        assert_eq!("-1".parse(), Ok(CommitValue::Failed));
        assert_eq!("-2".parse(), Ok(CommitValue::Bypass));
        assert!("-3".parse::<CommitValue>().is_err());
        assert!("".parse::<CommitValue>().is_err());
    }

    #[test]
    fn config_keys() {
        assert_eq!(config_key("ns1", "amf", None), "config/ns1/amf");
        assert_eq!(config_key("ns1", "amf", Some("7")), "config/ns1/amf/7");
        assert_eq!(config_revisions_prefix("ns1", "amf"), "config/ns1/amf/");
        assert_eq!(state_active_key("nf1"), "stateActive/nf1");
    }
}
