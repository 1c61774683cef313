//! OperandRequest registry namespace rewrite scenarios.

use crate::common::fixtures::{mapping_config_map, operand_request};
use crate::review::{admission_request, patched};
use common_service_webhook::crd::OperandRequest;
use common_service_webhook::webhooks::Verdict;
use common_service_webhook::webhooks::handlers::decode_object;
use common_service_webhook::webhooks::handlers::operand_request::mutate;

const TENANTS: &str = r#"
controlNamespace: cs-control
namespaceMapping:
  - requested-from-namespace:
      - cp4i
      - cp4i-apps
    map-to-common-service-namespace: cp4i-cs
  - requested-from-namespace: cp4d
    map-to-common-service-namespace: cp4d-cs
"#;

fn registry_namespaces(opreq: &OperandRequest) -> Vec<&str> {
    opreq
        .spec
        .requests
        .iter()
        .map(|r| r.registry_namespace.as_str())
        .collect()
}

/// Every tenant namespace is pointed at its own common-services namespace.
#[test]
fn test_each_tenant_rewritten_to_its_target() {
    let mapping = mapping_config_map(TENANTS);

    for (namespace, target) in [("cp4i", "cp4i-cs"), ("cp4i-apps", "cp4i-cs"), ("cp4d", "cp4d-cs")] {
        let opreq = operand_request(namespace, &["ibm-common-services"]);
        let Verdict::Patched(patch) = mutate(&opreq, Some(&mapping)).unwrap() else {
            panic!("expected a patch for {namespace}");
        };
        assert_eq!(registry_namespaces(&patched(&opreq, &patch)), vec![target]);
    }
}

/// A request decoded from an AdmissionReview is rewritten the same way.
#[test]
fn test_decoded_request_is_rewritten() {
    let request = admission_request(
        "OperandRequest",
        &operand_request("cp4d", &["ibm-common-services", "custom-registry"]),
    );
    let opreq: OperandRequest = decode_object(&request, "OperandRequest").unwrap();

    let Verdict::Patched(patch) = mutate(&opreq, Some(&mapping_config_map(TENANTS))).unwrap() else {
        panic!("expected a patch");
    };
    assert_eq!(
        registry_namespaces(&patched(&opreq, &patch)),
        vec!["cp4d-cs", "custom-registry"]
    );
}

/// The admitted response carries the patch and the request uid.
#[test]
fn test_response_carries_patch() {
    let opreq = operand_request("cp4i", &["ibm-common-services"]);
    let request = admission_request("OperandRequest", &opreq);

    let verdict = mutate(&opreq, Some(&mapping_config_map(TENANTS))).unwrap();
    let response = verdict.into_response(&request);
    assert!(response.allowed);
    assert!(response.patch.is_some());
    assert_eq!(response.uid, crate::review::REQUEST_UID);
}

#[test]
fn test_requests_outside_the_table_untouched() {
    let mapping = mapping_config_map(TENANTS);
    let opreq = operand_request("cs-control", &["ibm-common-services"]);
    assert_eq!(mutate(&opreq, Some(&mapping)).unwrap(), Verdict::Allowed);

    let empty = mapping_config_map("");
    let opreq = operand_request("cp4i", &["ibm-common-services"]);
    assert_eq!(mutate(&opreq, Some(&empty)).unwrap(), Verdict::Allowed);
}

/// A broken table surfaces as a 400 errored response, not a denial.
#[test]
fn test_malformed_table_errors_the_request() {
    let opreq = operand_request("cp4i", &["ibm-common-services"]);
    let request = admission_request("OperandRequest", &opreq);

    let err = mutate(&opreq, Some(&mapping_config_map("namespaceMapping: {"))).unwrap_err();
    let verdict = Verdict::from(err);
    assert_eq!(verdict.outcome(), "errored");

    let response = verdict.into_response(&request);
    assert!(!response.allowed);
    assert_eq!(response.result.code, 400);
}
