//! Policy filter — which workloads are in scope at all.
//!
//! Each rule is an independent predicate on the workload; any single
//! match excludes it. No rule depends on another, so the order they are
//! checked in only affects which rule gets reported, never the outcome.

use std::collections::HashSet;

use quiesce_core::{ExclusionRule, QuiesceConfig, Workload};

/// Every rule, in the order [`PolicyFilter::check`] reports them.
pub const RULES: [ExclusionRule; 6] = [
    ExclusionRule::AlreadyScaledDown,
    ExclusionRule::LoadTestNamespace,
    ExclusionRule::OptOutAnnotation,
    ExclusionRule::IgnoredNamespace,
    ExclusionRule::IgnoredWorkload,
    ExclusionRule::ReservedNodeAffinity,
];

#[derive(Debug, Clone)]
pub struct PolicyFilter {
    load_test_prefix: String,
    ignore_annotation: String,
    ignore_namespaces: HashSet<String>,
    ignore_workloads: HashSet<String>,
    reserved_node_pools: HashSet<String>,
}

impl PolicyFilter {
    pub fn from_config(config: &QuiesceConfig) -> Self {
        Self {
            load_test_prefix: config.load_test_namespace_prefix.clone(),
            ignore_annotation: config.ignore_annotations.clone(),
            ignore_namespaces: config.ignore_namespaces.iter().cloned().collect(),
            ignore_workloads: config.ignore_deployments.iter().cloned().collect(),
            reserved_node_pools: config.reserved_node_pools.iter().cloned().collect(),
        }
    }

    /// The first rule (in [`RULES`] order) that excludes the workload.
    pub fn check(&self, workload: &Workload) -> Option<ExclusionRule> {
        RULES.into_iter().find(|rule| self.matches(*rule, workload))
    }

    pub fn in_scope(&self, workload: &Workload) -> bool {
        self.check(workload).is_none()
    }

    /// Whether a single rule excludes the workload.
    pub fn matches(&self, rule: ExclusionRule, workload: &Workload) -> bool {
        match rule {
            ExclusionRule::AlreadyScaledDown => workload.replicas < 1,
            ExclusionRule::LoadTestNamespace => {
                !self.load_test_prefix.is_empty()
                    && workload.namespace.starts_with(&self.load_test_prefix)
            }
            ExclusionRule::OptOutAnnotation => workload
                .annotations
                .get(&self.ignore_annotation)
                .is_some_and(|v| v == "true"),
            ExclusionRule::IgnoredNamespace => self.ignore_namespaces.contains(&workload.namespace),
            ExclusionRule::IgnoredWorkload => self.ignore_workloads.contains(&workload.name),
            ExclusionRule::ReservedNodeAffinity => workload
                .node_affinity
                .iter()
                .flat_map(|term| &term.match_expressions)
                .flat_map(|expr| &expr.values)
                .any(|value| self.reserved_node_pools.contains(value)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiesce_core::{MatchExpression, NodeSelectorTerm};

    fn filter() -> PolicyFilter {
        PolicyFilter::from_config(&QuiesceConfig {
            ignore_namespaces: vec!["kube-system".to_string()],
            ignore_deployments: vec!["gateway".to_string()],
            ignore_annotations: "quiesce.io/ignore".to_string(),
            ..QuiesceConfig::default()
        })
    }

    fn affinity(values: &[&str]) -> Vec<NodeSelectorTerm> {
        vec![NodeSelectorTerm {
            match_expressions: vec![MatchExpression {
                key: "node-pool".to_string(),
                operator: "In".to_string(),
                values: values.iter().map(|v| v.to_string()).collect(),
            }],
        }]
    }

    #[test]
    fn plain_workload_is_in_scope() {
        assert!(filter().in_scope(&Workload::new("shop", "api", 3)));
    }

    #[test]
    fn zero_replicas_already_scaled_down() {
        let w = Workload::new("shop", "api", 0);
        assert_eq!(filter().check(&w), Some(ExclusionRule::AlreadyScaledDown));
    }

    #[test]
    fn load_test_namespace_prefix() {
        let w = Workload::new("load-checkout", "api", 2);
        assert_eq!(filter().check(&w), Some(ExclusionRule::LoadTestNamespace));
        // Prefix only, not substring.
        assert!(filter().in_scope(&Workload::new("preload-checkout", "api", 2)));
    }

    #[test]
    fn opt_out_annotation_needs_literal_true() {
        let mut w = Workload::new("shop", "api", 2);
        w.annotations
            .insert("quiesce.io/ignore".to_string(), "yes".to_string());
        assert!(filter().in_scope(&w));

        w.annotations
            .insert("quiesce.io/ignore".to_string(), "true".to_string());
        assert_eq!(filter().check(&w), Some(ExclusionRule::OptOutAnnotation));
    }

    #[test]
    fn ignore_lists_are_exact_match() {
        assert_eq!(
            filter().check(&Workload::new("kube-system", "coredns", 2)),
            Some(ExclusionRule::IgnoredNamespace)
        );
        assert!(filter().in_scope(&Workload::new("kube-system-extra", "coredns", 2)));

        assert_eq!(
            filter().check(&Workload::new("shop", "gateway", 2)),
            Some(ExclusionRule::IgnoredWorkload)
        );
        assert!(filter().in_scope(&Workload::new("shop", "gateway-v2", 2)));
    }

    #[test]
    fn reserved_node_pool_affinity() {
        let mut w = Workload::new("shop", "api", 2);
        w.node_affinity = affinity(&["general", "staging"]);
        assert_eq!(filter().check(&w), Some(ExclusionRule::ReservedNodeAffinity));

        w.node_affinity = affinity(&["general"]);
        assert!(filter().in_scope(&w));
    }

    #[test]
    fn affinity_scans_every_term() {
        let mut w = Workload::new("shop", "api", 2);
        w.node_affinity = vec![
            NodeSelectorTerm::default(),
            affinity(&["general"]).remove(0),
            affinity(&["load"]).remove(0),
        ];
        assert!(!filter().in_scope(&w));
    }

    #[test]
    fn outcome_is_independent_of_rule_order() {
        let mut tricky = Workload::new("load-kube", "gateway", 0);
        tricky
            .annotations
            .insert("quiesce.io/ignore".to_string(), "true".to_string());
        tricky.node_affinity = affinity(&["staging"]);

        let workloads = vec![
            Workload::new("shop", "api", 3),
            Workload::new("kube-system", "api", 3),
            Workload::new("load-x", "gateway", 3),
            tricky,
        ];

        let f = filter();
        let mut reversed = RULES;
        reversed.reverse();
        let mut rotated = RULES;
        rotated.rotate_left(3);

        for w in &workloads {
            let expected = f.in_scope(w);
            for order in [RULES, reversed, rotated] {
                let excluded = order.iter().any(|rule| f.matches(*rule, w));
                assert_eq!(!excluded, expected, "order changed outcome for {}", w.key());
            }
            // Repeated evaluation gives the same answer.
            assert_eq!(f.in_scope(w), expected);
        }
    }
}
