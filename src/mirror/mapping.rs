//! Topic mapping resolution. Literal patterns yield one pair; a trailing
//! `*` expands against the source cluster's topic list, with `*` in the
//! target pattern replaced by the matched suffix.

use std::collections::HashMap;

use crate::error::{MirrorError, Result};
use crate::store::models::TopicMapping;

/// A concrete (source topic, target topic) pair after pattern expansion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMapping {
    pub source_topic: String,
    pub target_topic: String,
    pub source_partitions: i32,
}

/// Expand mapping patterns against the source cluster's topic list.
/// Disabled mappings are skipped; duplicate source topics keep their first
/// resolution.
pub fn resolve_mappings(
    mappings: &[TopicMapping],
    source_topics: &HashMap<String, i32>,
) -> Result<Vec<ResolvedMapping>> {
    let mut resolved: Vec<ResolvedMapping> = Vec::new();

    for mapping in mappings.iter().filter(|m| m.enabled) {
        if let Some(prefix) = mapping.source_topic_pattern.strip_suffix('*') {
            let mut matches: Vec<&String> = source_topics
                .keys()
                .filter(|name| name.starts_with(prefix))
                .collect();
            matches.sort();

            for name in matches {
                let suffix = &name[prefix.len()..];
                let target = if mapping.target_topic_pattern.contains('*') {
                    mapping.target_topic_pattern.replacen('*', suffix, 1)
                } else {
                    mapping.target_topic_pattern.clone()
                };
                push_unique(
                    &mut resolved,
                    ResolvedMapping {
                        source_topic: name.clone(),
                        target_topic: target,
                        source_partitions: source_topics[name],
                    },
                );
            }
        } else {
            let Some(partitions) = source_topics.get(&mapping.source_topic_pattern) else {
                return Err(MirrorError::Topology {
                    message: format!(
                        "source topic does not exist: {}",
                        mapping.source_topic_pattern
                    ),
                    topic: Some(mapping.source_topic_pattern.clone()),
                });
            };
            push_unique(
                &mut resolved,
                ResolvedMapping {
                    source_topic: mapping.source_topic_pattern.clone(),
                    target_topic: mapping.target_topic_pattern.clone(),
                    source_partitions: *partitions,
                },
            );
        }
    }

    Ok(resolved)
}

fn push_unique(resolved: &mut Vec<ResolvedMapping>, mapping: ResolvedMapping) {
    if !resolved.iter().any(|m| m.source_topic == mapping.source_topic) {
        resolved.push(mapping);
    }
}

/// Verify target partition counts for partition-preserving jobs. The
/// target of every pair must exist with at least as many partitions as
/// its source.
pub fn verify_partition_counts(
    resolved: &[ResolvedMapping],
    target_topics: &HashMap<String, i32>,
) -> Result<()> {
    for mapping in resolved {
        match target_topics.get(&mapping.target_topic) {
            None => {
                return Err(MirrorError::Topology {
                    message: format!("target topic does not exist: {}", mapping.target_topic),
                    topic: Some(mapping.target_topic.clone()),
                });
            }
            Some(target_partitions) if *target_partitions < mapping.source_partitions => {
                return Err(MirrorError::Topology {
                    message: format!(
                        "target topic {} has {} partitions but source {} has {}",
                        mapping.target_topic,
                        target_partitions,
                        mapping.source_topic,
                        mapping.source_partitions
                    ),
                    topic: Some(mapping.target_topic.clone()),
                });
            }
            Some(_) => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(source: &str, target: &str, enabled: bool) -> TopicMapping {
        TopicMapping {
            id: 0,
            job_id: "j1".to_string(),
            source_topic_pattern: source.to_string(),
            target_topic_pattern: target.to_string(),
            enabled,
        }
    }

    fn topics(entries: &[(&str, i32)]) -> HashMap<String, i32> {
        entries
            .iter()
            .map(|(name, partitions)| (name.to_string(), *partitions))
            .collect()
    }

    #[test]
    fn test_literal_mapping() {
        let source = topics(&[("topic-a", 4)]);
        let resolved =
            resolve_mappings(&[mapping("topic-a", "topic-a-replica", true)], &source).unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].source_topic, "topic-a");
        assert_eq!(resolved[0].target_topic, "topic-a-replica");
        assert_eq!(resolved[0].source_partitions, 4);
    }

    #[test]
    fn test_literal_missing_source_is_topology_error() {
        let source = topics(&[("other", 1)]);
        let err = resolve_mappings(&[mapping("topic-a", "t", true)], &source).unwrap_err();
        assert!(matches!(err, MirrorError::Topology { .. }));
        assert!(err.to_string().contains("topic-a"));
    }

    #[test]
    fn test_prefix_wildcard_expansion() {
        let source = topics(&[("orders-eu", 3), ("orders-us", 6), ("audit", 1)]);
        let resolved = resolve_mappings(&[mapping("orders-*", "mirror-*", true)], &source).unwrap();
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[0].source_topic, "orders-eu");
        assert_eq!(resolved[0].target_topic, "mirror-eu");
        assert_eq!(resolved[1].source_topic, "orders-us");
        assert_eq!(resolved[1].target_topic, "mirror-us");
    }

    #[test]
    fn test_wildcard_with_literal_target() {
        let source = topics(&[("logs-a", 1), ("logs-b", 1)]);
        let resolved = resolve_mappings(&[mapping("logs-*", "all-logs", true)], &source).unwrap();
        assert_eq!(resolved.len(), 2);
        assert!(resolved.iter().all(|m| m.target_topic == "all-logs"));
    }

    #[test]
    fn test_wildcard_matches_nothing() {
        let source = topics(&[("audit", 1)]);
        let resolved = resolve_mappings(&[mapping("orders-*", "mirror-*", true)], &source).unwrap();
        assert!(resolved.is_empty());
    }

    #[test]
    fn test_disabled_mappings_skipped() {
        let source = topics(&[("topic-a", 4)]);
        let resolved =
            resolve_mappings(&[mapping("topic-a", "topic-a-replica", false)], &source).unwrap();
        assert!(resolved.is_empty());
    }

    #[test]
    fn test_duplicate_sources_keep_first() {
        let source = topics(&[("orders-eu", 3)]);
        let resolved = resolve_mappings(
            &[
                mapping("orders-eu", "explicit", true),
                mapping("orders-*", "mirror-*", true),
            ],
            &source,
        )
        .unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].target_topic, "explicit");
    }

    #[test]
    fn test_partition_count_verification() {
        let resolved = vec![ResolvedMapping {
            source_topic: "topic-a".to_string(),
            target_topic: "topic-a-replica".to_string(),
            source_partitions: 4,
        }];

        assert!(verify_partition_counts(&resolved, &topics(&[("topic-a-replica", 4)])).is_ok());
        assert!(verify_partition_counts(&resolved, &topics(&[("topic-a-replica", 6)])).is_ok());

        let err =
            verify_partition_counts(&resolved, &topics(&[("topic-a-replica", 2)])).unwrap_err();
        assert!(matches!(err, MirrorError::Topology { .. }));

        let err = verify_partition_counts(&resolved, &topics(&[])).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }
}
