//! Classification of pod acknowledgments against an expected revision.

use ahash::AHashSet as HashSet;
use cmaas_controller_core::{CommitKey, CommitValue};
use cmaas_controller_store::KeyValue;
use tracing::debug;

/// The terminal classification of a pod, or of an acknowledgment left by a
/// pod that no longer exists.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// The pod acknowledged the expected revision or a later one.
    Success { revision: u64 },
    /// The pod acknowledged an older revision.
    Drift { revision: u64 },
    /// A ready pod left no acknowledgment.
    MissingAck,
    /// The pod reported a failure that was handled when it was written.
    SentinelFailure,
    /// The pod ignores this configuration.
    Bypass,
    /// The acknowledging pod no longer exists.
    Stale,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Outcome {
    pub pod: String,
    /// The commit-config key the verdict was derived from, if any.
    pub key: Option<String>,
    pub verdict: Verdict,
}

/// The pods of a microservice version.
#[derive(Clone, Debug, Default)]
pub struct Pods {
    /// Ready pods, expected to converge.
    pub ready: Vec<String>,
    /// Every pod, ready or not.
    pub all: Vec<String>,
}

/// Classifies every ready pod and every stale acknowledgment exactly once.
///
/// Acknowledgments of pods that exist but are not ready are left alone, as
/// are acknowledgments under a CIM sub-path when `skip_cim` is set. A value
/// that is neither a revision nor a sentinel is not an acknowledgment.
pub fn classify(expected: u64, pods: &Pods, entries: &[KeyValue], skip_cim: bool) -> Vec<Outcome> {
    let all = pods.all.iter().map(String::as_str).collect::<HashSet<_>>();
    let mut pending = pods.ready.iter().map(String::as_str).collect::<HashSet<_>>();
    let mut outcomes = Vec::with_capacity(pods.ready.len());

    for kv in entries {
        let key = match kv.key.parse::<CommitKey>() {
            Ok(key) => key,
            Err(error) => {
                debug!(key = %kv.key, %error, "Ignoring malformed commit-config key");
                continue;
            }
        };
        if skip_cim && key.cim {
            debug!(key = %kv.key, "Skipping CIM acknowledgment");
            continue;
        }

        let pod = key.pod.as_str();
        if pending.contains(pod) {
            let verdict = match kv.value.parse::<CommitValue>() {
                Ok(CommitValue::Failed) => Verdict::SentinelFailure,
                Ok(CommitValue::Bypass) => Verdict::Bypass,
                Ok(CommitValue::Revision(revision)) if revision < expected => {
                    Verdict::Drift { revision }
                }
                Ok(CommitValue::Revision(revision)) => Verdict::Success { revision },
                Err(error) => {
                    debug!(key = %kv.key, %error, "Ignoring unreadable acknowledgment");
                    continue;
                }
            };
            pending.remove(pod);
            outcomes.push(Outcome {
                pod: pod.to_string(),
                key: Some(kv.key.clone()),
                verdict,
            });
        } else if !all.contains(pod) {
            outcomes.push(Outcome {
                pod: pod.to_string(),
                key: Some(kv.key.clone()),
                verdict: Verdict::Stale,
            });
        }
    }

    for pod in &pods.ready {
        if pending.remove(pod.as_str()) {
            outcomes.push(Outcome {
                pod: pod.clone(),
                key: None,
                verdict: Verdict::MissingAck,
            });
        }
    }
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const PREFIX: &str = "commit-config/ns1/amf/v1/nf/";

    fn kv(pod: &str, value: &str) -> KeyValue {
        KeyValue {
            key: format!("{PREFIX}{pod}"),
            value: value.to_string(),
        }
    }

    fn pods(ready: &[&str], not_ready: &[&str]) -> Pods {
        Pods {
            ready: ready.iter().map(|p| p.to_string()).collect(),
            all: ready
                .iter()
                .chain(not_ready)
                .map(|p| p.to_string())
                .collect(),
        }
    }

    fn verdicts(outcomes: &[Outcome]) -> Vec<(&str, &Verdict)> {
        outcomes
            .iter()
            .map(|o| (o.pod.as_str(), &o.verdict))
            .collect()
    }

    #[test]
    fn every_ready_pod_is_classified_once() {
        let pods = pods(&["p1", "p2", "p3", "p4", "p5", "p6", "p7"], &["p8"]);
        let entries = [
            kv("p1", "3"),
            kv("p2", "2"),
            kv("p3", "-1"),
            kv("p4", "-2"),
            kv("p5", "4"),
            kv("p6", "garbage"),
            kv("p8", "1"),
            kv("p9", "3"),
            // A second acknowledgment of an already classified pod.
            KeyValue {
                key: format!("{PREFIX}cim/p1"),
                value: "0".to_string(),
            },
        ];
        let outcomes = classify(3, &pods, &entries, false);
        assert_eq!(
            verdicts(&outcomes),
            vec![
                ("p1", &Verdict::Success { revision: 3 }),
                ("p2", &Verdict::Drift { revision: 2 }),
                ("p3", &Verdict::SentinelFailure),
                ("p4", &Verdict::Bypass),
                ("p5", &Verdict::Success { revision: 4 }),
                ("p9", &Verdict::Stale),
                ("p6", &Verdict::MissingAck),
                ("p7", &Verdict::MissingAck),
            ]
        );

        let mut classified = outcomes
            .iter()
            .filter(|o| o.verdict != Verdict::Stale)
            .map(|o| o.pod.clone())
            .collect::<Vec<_>>();
        classified.sort();
        assert_eq!(classified, pods.ready);
    }

    #[test]
    fn cim_acknowledgments_are_skipped() {
        let pods = pods(&["p1"], &[]);
        let entries = [
            KeyValue {
                key: format!("{PREFIX}cim/p1"),
                value: "3".to_string(),
            },
            KeyValue {
                key: format!("{PREFIX}cim/gone"),
                value: "3".to_string(),
            },
        ];
        let outcomes = classify(3, &pods, &entries, true);
        assert_eq!(verdicts(&outcomes), vec![("p1", &Verdict::MissingAck)]);
    }

    #[test]
    fn malformed_keys_are_ignored() {
        let pods = pods(&["p1"], &[]);
        let entries = [KeyValue {
            key: "commit-config/ns1/amf".to_string(),
            value: "3".to_string(),
        }];
        let outcomes = classify(3, &pods, &entries, false);
        assert_eq!(verdicts(&outcomes), vec![("p1", &Verdict::MissingAck)]);
    }

    #[test]
    fn no_pods_no_entries() {
        assert!(classify(1, &Pods::default(), &[], false).is_empty());
    }
}
