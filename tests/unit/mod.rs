// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Unit tests for common-service-webhook.
//!
//! These tests run without a Kubernetes cluster and test individual
//! components in isolation.

#[path = "../common/mod.rs"]
mod common;

mod merge_tests {
    use super::common::fixtures::{PodPresetBuilder, config_map_env, env, mount, volume};
    use common_service_webhook::presets::merge::{
        merge_env, merge_env_from, merge_volume_mounts, merge_volumes,
    };
    use common_service_webhook::presets::{Axis, Field};

    #[test]
    fn test_env_union_keeps_base_order() {
        let p1 = PodPresetBuilder::new("p1").env("B", "2").build();
        let p2 = PodPresetBuilder::new("p2").env("C", "3").build();

        let merged = merge_env(&[env("A", "1")], &[&p1, &p2]).unwrap();
        let names: Vec<&str> = merged.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_identical_env_is_not_a_conflict() {
        let p1 = PodPresetBuilder::new("p1").env("A", "1").build();
        let merged = merge_env(&[env("A", "1")], &[&p1]).unwrap();
        assert_eq!(merged, vec![env("A", "1")]);
    }

    #[test]
    fn test_env_conflict_names_preset_and_key() {
        let p1 = PodPresetBuilder::new("proxy").env("HTTP_PROXY", "b").build();
        let conflicts = merge_env(&[env("HTTP_PROXY", "a")], &[&p1]).unwrap_err();

        assert_eq!(conflicts.len(), 1);
        let conflict = conflicts.iter().next().unwrap();
        assert_eq!(conflict.field, Field::Env);
        assert_eq!(conflict.axis, Axis::Name);
        assert_eq!(conflict.preset, "proxy");
        assert_eq!(conflict.key, "HTTP_PROXY");
        assert!(conflicts.to_string().contains("merging env for proxy"));
    }

    #[test]
    fn test_conflict_between_two_presets() {
        let p1 = PodPresetBuilder::new("p1").env("A", "1").build();
        let p2 = PodPresetBuilder::new("p2").env("A", "2").build();

        let conflicts = merge_env(&[], &[&p1, &p2]).unwrap_err();
        assert_eq!(conflicts.iter().next().unwrap().preset, "p2");
    }

    #[test]
    fn test_all_conflicts_collected() {
        let p1 = PodPresetBuilder::new("p1").env("A", "x").env("B", "y").build();
        let conflicts = merge_env(&[env("A", "1"), env("B", "2")], &[&p1]).unwrap_err();
        assert_eq!(conflicts.len(), 2);
        assert!(conflicts.to_string().contains("; "));
    }

    #[test]
    fn test_volume_conflict() {
        let mut other = volume("data");
        other.empty_dir = Some(Default::default());
        let mut p1 = PodPresetBuilder::new("p1").build();
        p1.spec.volumes.push(other);

        let conflicts = merge_volumes(&[volume("data")], &[&p1]).unwrap_err();
        assert_eq!(conflicts.iter().next().unwrap().field, Field::Volumes);
    }

    #[test]
    fn test_mount_conflicts_on_both_axes() {
        let p1 = PodPresetBuilder::new("p1").volume_mount("data", "/other").build();
        let p2 = PodPresetBuilder::new("p2").volume_mount("logs", "/data").build();

        let by_name = merge_volume_mounts(&[mount("data", "/data")], &[&p1]).unwrap_err();
        assert_eq!(by_name.iter().next().unwrap().axis, Axis::Name);

        let by_path = merge_volume_mounts(&[mount("data", "/data")], &[&p2]).unwrap_err();
        assert_eq!(by_path.iter().next().unwrap().axis, Axis::MountPath);
        assert!(by_path.to_string().contains("mount path /data"));
    }

    #[test]
    fn test_mount_conflicting_on_name_and_path_reports_twice() {
        let mut m = mount("data", "/data");
        m.read_only = Some(true);
        let mut p1 = PodPresetBuilder::new("p1").build();
        p1.spec.volume_mounts.push(m);

        let conflicts = merge_volume_mounts(&[mount("data", "/data")], &[&p1]).unwrap_err();
        assert_eq!(conflicts.len(), 2);
    }

    #[test]
    fn test_env_from_is_appended() {
        let p1 = PodPresetBuilder::new("p1").env_from(config_map_env("shared")).build();
        let merged = merge_env_from(&[config_map_env("own")], &[&p1]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0], config_map_env("own"));
        assert_eq!(merged[1], config_map_env("shared"));
    }
}

mod matcher_tests {
    use super::common::fixtures::PodPresetBuilder;
    use common_service_webhook::presets::{Error, matching_presets};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};
    use kube::ResourceExt;
    use std::collections::BTreeMap;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_match_labels() {
        let presets = vec![
            PodPresetBuilder::new("web").namespace("ns").match_label("app", "web").build(),
            PodPresetBuilder::new("db").namespace("ns").match_label("app", "db").build(),
        ];

        let matched = matching_presets(&presets, "ns", &labels(&[("app", "web")])).unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].name_any(), "web");
    }

    #[test]
    fn test_empty_selector_matches_everything() {
        let presets = vec![PodPresetBuilder::new("all").namespace("ns").build()];
        assert_eq!(matching_presets(&presets, "ns", &BTreeMap::new()).unwrap().len(), 1);
    }

    #[test]
    fn test_other_namespace_never_matches() {
        let presets = vec![PodPresetBuilder::new("all").namespace("other").build()];
        assert!(matching_presets(&presets, "ns", &BTreeMap::new()).unwrap().is_empty());
    }

    #[test]
    fn test_match_expressions() {
        let presets = vec![
            PodPresetBuilder::new("tiered")
                .namespace("ns")
                .selector(LabelSelector {
                    match_labels: None,
                    match_expressions: Some(vec![LabelSelectorRequirement {
                        key: "tier".to_string(),
                        operator: "In".to_string(),
                        values: Some(vec!["frontend".to_string(), "edge".to_string()]),
                    }]),
                })
                .build(),
        ];

        assert_eq!(
            matching_presets(&presets, "ns", &labels(&[("tier", "edge")])).unwrap().len(),
            1
        );
        assert!(matching_presets(&presets, "ns", &labels(&[("tier", "backend")])).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_operator_is_an_error() {
        let presets = vec![
            PodPresetBuilder::new("broken")
                .namespace("ns")
                .selector(LabelSelector {
                    match_labels: None,
                    match_expressions: Some(vec![LabelSelectorRequirement {
                        key: "tier".to_string(),
                        operator: "Near".to_string(),
                        values: None,
                    }]),
                })
                .build(),
        ];

        let err = matching_presets(&presets, "ns", &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, Error::InvalidSelector { ref preset, .. } if preset == "broken"));
    }

    #[test]
    fn test_listing_order_is_kept() {
        let presets = vec![
            PodPresetBuilder::new("z").namespace("ns").build(),
            PodPresetBuilder::new("a").namespace("ns").build(),
        ];
        let names: Vec<String> = matching_presets(&presets, "ns", &BTreeMap::new())
            .unwrap()
            .iter()
            .map(|p| p.name_any())
            .collect();
        assert_eq!(names, vec!["z", "a"]);
    }
}

mod inject_tests {
    use super::common::fixtures::{PodBuilder, PodPresetBuilder, env};
    use common_service_webhook::presets::inject::{
        MIRROR_POD_ANNOTATION, OPT_OUT_ANNOTATION, applied_annotation_key,
    };
    use common_service_webhook::presets::{Exclusion, apply_presets, exclusion};
    use kube::ResourceExt;

    #[test]
    fn test_annotation_records_resource_version() {
        let preset = PodPresetBuilder::new("proxy").resource_version("12").env("A", "1").build();
        let mut pod = PodBuilder::new("web").container("app", vec![]).build();

        apply_presets(&mut pod, &[&preset]).unwrap();
        assert_eq!(
            pod.annotations().get(&applied_annotation_key(&preset)),
            Some(&"12".to_string())
        );
        assert_eq!(
            applied_annotation_key(&preset),
            "cs-podpreset.operator.ibm.com/podpreset-proxy"
        );
    }

    #[test]
    fn test_pod_volumes_created_when_absent() {
        let preset = PodPresetBuilder::new("p").volume("cache").build();
        let mut pod = PodBuilder::new("web").container("app", vec![env("A", "1")]).build();

        apply_presets(&mut pod, &[&preset]).unwrap();
        assert_eq!(pod.spec.unwrap().volumes.unwrap()[0].name, "cache");
    }

    #[test]
    fn test_no_presets_changes_nothing() {
        let original = PodBuilder::new("web").container("app", vec![]).build();
        let mut pod = original.clone();
        apply_presets(&mut pod, &[]).unwrap();
        assert_eq!(pod, original);
    }

    #[test]
    fn test_exclusion_annotations() {
        let mirror = PodBuilder::new("static")
            .annotation(MIRROR_POD_ANNOTATION, "abc")
            .build();
        let opted_out = PodBuilder::new("web").annotation(OPT_OUT_ANNOTATION, "true").build();
        let not_opted_out = PodBuilder::new("web").annotation(OPT_OUT_ANNOTATION, "false").build();

        assert_eq!(exclusion(&mirror), Some(Exclusion::MirrorPod));
        assert_eq!(exclusion(&opted_out), Some(Exclusion::OptedOut));
        assert_eq!(exclusion(&not_opted_out), None);
    }
}

mod nsmap_tests {
    use super::common::fixtures::mapping_config_map;
    use common_service_webhook::nsmap::{DEFAULT_CS_NAMESPACE, MappingViolation, NamespaceMappingTable};

    const TABLE: &str = r#"
controlNamespace: cs-control
namespaceMapping:
  - requested-from-namespace:
      - cp4i
      - cp4i-apps
    map-to-common-service-namespace: cp4i-cs
  - requested-from-namespace: cp4d
    map-to-common-service-namespace: cp4d-cs
"#;

    #[test]
    fn test_lookup_from_config_map() {
        let table = NamespaceMappingTable::from_config_map(&mapping_config_map(TABLE)).unwrap();
        assert_eq!(table.target_for("cp4i-apps"), Some("cp4i-cs"));
        assert_eq!(table.target_for("cp4d"), Some("cp4d-cs"));
        assert_eq!(table.target_for("elsewhere"), None);
        assert_eq!(table.default_namespace(), DEFAULT_CS_NAMESPACE);
        assert!(table.validate().is_ok());
    }

    #[test]
    fn test_missing_key_is_empty_table() {
        let mut cm = mapping_config_map("");
        cm.data = None;
        let table = NamespaceMappingTable::from_config_map(&cm).unwrap();
        assert!(table.mappings.is_empty());
        assert!(table.validate().is_ok());
    }

    #[test]
    fn test_malformed_yaml_is_an_error() {
        assert!(NamespaceMappingTable::from_yaml("namespaceMapping: [: oops").is_err());
    }

    #[test]
    fn test_violation_messages() {
        let table = NamespaceMappingTable::from_yaml(
            r#"
controlNamespace: shared
namespaceMapping:
  - requested-from-namespace: [a]
    map-to-common-service-namespace: shared
"#,
        )
        .unwrap();
        let violation = table.validate().unwrap_err();
        assert_eq!(violation, MappingViolation::ControlIsTarget("shared".to_string()));
        assert_eq!(
            violation.to_string(),
            "controlNamespace: shared cannot be the same as one of the map-to-common-service-namespace"
        );
    }

    #[test]
    fn test_first_violation_wins() {
        // the duplicate target in mapping two is reported before the
        // duplicate request in the same mapping
        let table = NamespaceMappingTable::from_yaml(
            r#"
controlNamespace: ctl
namespaceMapping:
  - requested-from-namespace: [a]
    map-to-common-service-namespace: t
  - requested-from-namespace: [a]
    map-to-common-service-namespace: t
"#,
        )
        .unwrap();
        assert_eq!(
            table.validate().unwrap_err(),
            MappingViolation::DuplicateTarget("t".to_string())
        );
    }
}

mod registry_tests {
    use common_service_webhook::webhooks::registry::{
        OperationType, Scope, namespace_mapping_descriptor, pod_preset_descriptor,
    };
    use common_service_webhook::webhooks::{
        HandlerKind, RegistryError, Rule, WebhookKind, WebhookRegistry, default_registry,
    };

    #[test]
    fn test_default_registry_without_operand_request() {
        let registry = default_registry(false).unwrap();
        assert_eq!(registry.len(), 2);
        assert!(registry.by_path("/mutate-ibm-cp-operandrequest").is_none());
        assert_eq!(
            registry.by_path("/mutate-ibm-cs-pod").unwrap().handler,
            HandlerKind::PodPreset
        );
    }

    #[test]
    fn test_default_registry_with_operand_request() {
        let registry = default_registry(true).unwrap();
        let paths: Vec<&str> = registry.descriptors().iter().map(|d| d.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "/mutate-ibm-cs-pod",
                "/mutate-ibm-cp-operandrequest",
                "/validate-ibm-cs-ns-map"
            ]
        );
    }

    #[test]
    fn test_duplicates_rejected() {
        let mut registry = WebhookRegistry::new();
        registry.add(pod_preset_descriptor()).unwrap();
        assert_eq!(
            registry.add(pod_preset_descriptor()),
            Err(RegistryError::DuplicateName(pod_preset_descriptor().name))
        );

        let mut same_path = namespace_mapping_descriptor();
        same_path.path = pod_preset_descriptor().path;
        assert!(matches!(registry.add(same_path), Err(RegistryError::DuplicatePath(_))));
    }

    #[test]
    fn test_failure_policies() {
        assert_eq!(WebhookKind::Mutating.failure_policy(), "Ignore");
        assert_eq!(WebhookKind::Validating.failure_policy(), "Fail");
    }

    #[test]
    fn test_rule_rendering() {
        let rule = Rule::new()
            .one_resource("apps", "v1", "deployments")
            .for_create()
            .for_create()
            .for_operation(OperationType::Delete)
            .with_scope(Scope::Cluster)
            .to_k8s();

        assert_eq!(rule.api_groups, Some(vec!["apps".to_string()]));
        assert_eq!(rule.resources, Some(vec!["deployments".to_string()]));
        assert_eq!(
            rule.operations,
            Some(vec!["CREATE".to_string(), "DELETE".to_string()])
        );
        assert_eq!(rule.scope.as_deref(), Some("Cluster"));
    }

    #[test]
    fn test_pod_rule_lists_update_before_create() {
        let rule = pod_preset_descriptor().rule.to_k8s();
        assert_eq!(
            rule.operations,
            Some(vec!["UPDATE".to_string(), "CREATE".to_string()])
        );
        assert_eq!(rule.scope.as_deref(), Some("Namespaced"));
    }
}

mod error_tests {
    use common_service_webhook::controller::Error;
    use kube::error::ErrorResponse;
    use std::time::Duration;

    fn api_error(code: u16) -> Error {
        Error::Kube(kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "test".to_string(),
            reason: "Test".to_string(),
            code,
        }))
    }

    #[test]
    fn test_classification() {
        assert!(api_error(404).is_not_found());
        assert!(api_error(409).is_conflict());
        assert!(api_error(409).is_retryable());
        assert!(api_error(503).is_retryable());
        assert!(api_error(429).is_retryable());
        assert!(!api_error(403).is_retryable());
        assert!(!Error::MissingCaBundle("cert".to_string()).is_retryable());
    }

    #[test]
    fn test_requeue_after() {
        assert_eq!(api_error(500).requeue_after(), Duration::from_secs(30));
        assert_eq!(
            Error::MissingCaBundle("cert".to_string()).requeue_after(),
            Duration::from_secs(3600)
        );
    }
}

mod config_tests {
    use common_service_webhook::config::{ConfigError, DEFAULT_SERVICE_PORT, OperatorConfig};
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<OperatorConfig, ConfigError> {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        OperatorConfig::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn test_service_target_from_env() {
        let config = config(&[
            ("POD_NAMESPACE", "ibm-common-services"),
            ("WEBHOOK_SERVICE_NAME", "webhook"),
            ("WEBHOOK_SERVICE_PORT", "9443"),
        ])
        .unwrap();

        let target = config.service_target();
        assert_eq!(target.namespace, "ibm-common-services");
        assert_eq!(target.name, "webhook");
        assert_eq!(target.port, 9443);
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert!(!config.namespace_from_env);
        assert_eq!(config.service_port, DEFAULT_SERVICE_PORT);
        assert!(!config.enable_operand_request_webhook);
        assert!(config.cert_path().ends_with("tls.crt"));
    }

    #[test]
    fn test_invalid_port() {
        assert!(matches!(
            config(&[("WEBHOOK_SERVICE_PORT", "https")]),
            Err(ConfigError::InvalidPort { .. })
        ));
    }
}
