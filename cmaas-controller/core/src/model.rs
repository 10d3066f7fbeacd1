use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Decides how a Day-2 change reaches running pods.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum UpdatePolicy {
    /// Pods apply the staged change-set in place.
    Dynamic,
    /// Pods are restarted to pick up the new configuration.
    #[default]
    Restart,
}

/// A single datastore change notification for one YANG namespace.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigUpdate {
    pub yang_namespace: String,
    #[serde(default)]
    pub yang_prefix: Option<String>,
    #[serde(default)]
    pub restart: bool,
}

/// All updates belonging to one datastore transaction, merged so that each
/// YANG namespace appears once.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UpdateBatch(Vec<ConfigUpdate>);

/// A network function state transition reported by the lifecycle manager.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NfStateChange {
    pub nf_name: String,
    pub new_state: String,
}

/// The `xgvela.com/tmaas` annotation carried by onboarded ConfigMaps.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tmaas {
    #[serde(default)]
    pub nf_id: String,
    #[serde(default)]
    pub nf_type: String,
    #[serde(default)]
    pub xgvela_id: String,
}

/// Header metadata of a YANG model carried in a ConfigMap.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct YangModel {
    /// The data key of the YANG file, e.g. `app.yang`.
    pub yang_file: String,
    /// `<module>-<nfId>`.
    pub module: String,
    /// `<namespace>:<nfId>`, if the model declares one.
    pub namespace: Option<String>,
    /// `<prefix>-<nfId>`, if the model declares one.
    pub prefix: Option<String>,
    /// The JSON data key carrying this model's configuration, if the
    /// ConfigMap has one.
    pub data_key: Option<String>,
    pub root: Option<crate::ModelRef>,
}

// === impl UpdatePolicy ===

impl fmt::Display for UpdatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dynamic => f.write_str("Dynamic"),
            Self::Restart => f.write_str("Restart"),
        }
    }
}

impl FromStr for UpdatePolicy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("dynamic") {
            Ok(Self::Dynamic)
        } else if s.eq_ignore_ascii_case("restart") {
            Ok(Self::Restart)
        } else {
            Err(())
        }
    }
}

// === impl UpdateBatch ===

impl UpdateBatch {
    /// Adds an update, merging it into an existing entry for the same YANG
    /// namespace. A restart request is never cleared by a later merge.
    pub fn push(&mut self, update: ConfigUpdate) {
        match self
            .0
            .iter_mut()
            .find(|u| u.yang_namespace == update.yang_namespace)
        {
            Some(existing) => {
                existing.restart |= update.restart;
                if existing.yang_prefix.is_none() {
                    existing.yang_prefix = update.yang_prefix;
                }
            }
            None => self.0.push(update),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConfigUpdate> {
        self.0.iter()
    }

    /// Re-merges a batch that was deserialized as a raw list.
    pub fn normalize(self) -> Self {
        self.0.into_iter().collect()
    }
}

impl FromIterator<ConfigUpdate> for UpdateBatch {
    fn from_iter<T: IntoIterator<Item = ConfigUpdate>>(iter: T) -> Self {
        let mut batch = Self::default();
        for update in iter {
            batch.push(update);
        }
        batch
    }
}

impl IntoIterator for UpdateBatch {
    type Item = ConfigUpdate;
    type IntoIter = std::vec::IntoIter<ConfigUpdate>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

// === impl NfStateChange ===

impl NfStateChange {
    pub fn is_active(&self) -> bool {
        self.new_state == crate::NF_ACTIVE_STATE
    }
}
