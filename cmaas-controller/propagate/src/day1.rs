//! Aggregation of the configuration each microservice needs at startup.

use cmaas_controller_core::{diff::parse_config, ConfigMapSnapshot};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Microservice -> data file -> configuration.
pub type Day1Configs = BTreeMap<String, Map<String, Value>>;

/// Merges the files an NF-level ConfigMap distributes through its dependency
/// manifest with the files of the NF's microservice-level ConfigMaps.
///
/// Files whose content cannot be parsed are skipped. A malformed manifest
/// contributes nothing.
pub fn aggregate(nf: &ConfigMapSnapshot, microservices: &[ConfigMapSnapshot]) -> Day1Configs {
    let mut configs = Day1Configs::new();

    match nf.dependencies() {
        Ok(deps) => {
            for (stem, consumers) in deps {
                let data_file = format!("{stem}.json");
                let Some(value) = parse_file(nf, &data_file) else {
                    continue;
                };
                for microservice in consumers {
                    configs
                        .entry(microservice)
                        .or_default()
                        .insert(data_file.clone(), value.clone());
                }
            }
        }
        Err(error) => {
            warn!(namespace = %nf.namespace, name = %nf.name, %error, "Skipping dependency manifest");
        }
    }

    for cm in microservices {
        let Some(microservice) = cm.microservice() else {
            debug!(namespace = %cm.namespace, name = %cm.name, "ConfigMap has no microservice label");
            continue;
        };
        let entry = configs.entry(microservice.to_string()).or_default();
        for data_file in cm.config_data_keys() {
            if let Some(value) = parse_file(cm, data_file) {
                entry.insert(data_file.to_string(), value);
            }
        }
    }

    configs
}

fn parse_file(cm: &ConfigMapSnapshot, data_file: &str) -> Option<Value> {
    let raw = cm.data.get(data_file)?;
    match parse_config(raw) {
        Ok(value) => Some(value),
        Err(error) => {
            warn!(namespace = %cm.namespace, name = %cm.name, %data_file, %error, "Skipping unparseable file");
            None
        }
    }
}
