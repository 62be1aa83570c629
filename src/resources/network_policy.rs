use std::collections::BTreeMap;

use k8s_openapi::api::networking::v1::{
    IPBlock, NetworkPolicy, NetworkPolicyEgressRule, NetworkPolicyIngressRule, NetworkPolicyPeer,
    NetworkPolicyPort, NetworkPolicySpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams};
use kube::{Client, Error, ResourceExt};

use crate::crd::{EgressRule, NetworkAccess};

use super::FIELD_MANAGER;

/// Non-routable ranges excluded from the compiled egress CIDR so sandbox
/// pods can't use "allowed" internet egress to reach other cluster or
/// private-network workloads (§4.7).
const RFC1918_RANGES: [&str; 3] = ["10.0.0.0/8", "172.16.0.0/12", "192.168.0.0/16"];

/// Domains in an egress policy's chunk are recorded here for operator
/// auditability, since NetworkPolicy itself can only filter by IP/port.
const ALLOWED_DOMAINS_ANNOTATION: &str = "llmsafespace.dev/allowed-domains";

const EGRESS_CHUNK_SIZE: usize = 10;

const BASE_LABEL: &str = "llmsafespace.dev/network-policy-base";

const API_SERVICE_NAMESPACE_LABEL: &str = "kubernetes.io/metadata.name";
const API_SERVICE_NAMESPACE: &str = "llmsafespace-system";
const API_SERVICE_POD_LABEL: &str = "llmsafespace.dev/component";
const API_SERVICE_POD_VALUE: &str = "api-service";
const API_SERVICE_PORT: i32 = 443;

const DNS_NAMESPACE: &str = "kube-system";
const DNS_POD_LABEL: &str = "k8s-app";
const DNS_POD_VALUE: &str = "kube-dns";

/// Ensures the full NetworkPolicy set for a sandbox pod (§4.7): three
/// always-present base policies (default-deny, api-access, dns-access)
/// plus one egress policy per 10-domain chunk of `access.egress`, plus an
/// ingress-allow policy when the sandbox requested ingress.
pub async fn ensure_all(
    client: Client,
    namespace: &str,
    base_name: &str,
    pod_selector: BTreeMap<String, String>,
    access: &NetworkAccess,
    owner: Option<OwnerReference>,
) -> Result<(), Error> {
    let mut policies = vec![
        build_default_deny(base_name, namespace, pod_selector.clone(), owner.clone()),
        build_api_access(base_name, namespace, pod_selector.clone(), owner.clone()),
        build_dns_access(base_name, namespace, pod_selector.clone(), owner.clone()),
    ];
    policies.extend(build_egress_chunks(base_name, namespace, pod_selector.clone(), &access.egress, owner.clone()));
    if access.ingress {
        policies.push(build_ingress(base_name, namespace, pod_selector, owner));
    }

    let api: Api<NetworkPolicy> = Api::namespaced(client, namespace);
    for policy in &policies {
        let name = policy.metadata.name.clone().unwrap_or_default();
        api.patch(&name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(policy)).await?;
    }
    Ok(())
}

/// Deletes every NetworkPolicy this base name owns, including however many
/// egress chunks are currently live — found by label rather than recomputed
/// from the (possibly since-changed) spec, so shrinking the egress list
/// never leaves an orphaned chunk behind.
pub async fn delete_all(client: Client, namespace: &str, base_name: &str) -> Result<(), Error> {
    let api: Api<NetworkPolicy> = Api::namespaced(client, namespace);
    let params = ListParams::default().labels(&format!("{BASE_LABEL}={base_name}"));
    let existing = api.list(&params).await?;
    for policy in existing.items {
        let name = policy.name_any();
        match api.delete(&name, &DeleteParams::default()).await {
            Ok(_) => {}
            Err(Error::Api(resp)) if resp.code == 404 => {}
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

fn base_labels(base_name: &str, role: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(BASE_LABEL.to_string(), base_name.to_string());
    labels.insert("llmsafespace.dev/network-policy-role".to_string(), role.to_string());
    labels
}

fn metadata(name: String, namespace: &str, labels: BTreeMap<String, String>, owner: Option<OwnerReference>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: Some(namespace.to_string()),
        labels: Some(labels),
        owner_references: owner.map(|o| vec![o]),
        ..Default::default()
    }
}

fn build_default_deny(base_name: &str, namespace: &str, pod_selector: BTreeMap<String, String>, owner: Option<OwnerReference>) -> NetworkPolicy {
    NetworkPolicy {
        metadata: metadata(format!("{base_name}-default-deny"), namespace, base_labels(base_name, "default-deny"), owner),
        spec: Some(NetworkPolicySpec {
            pod_selector: LabelSelector { match_labels: Some(pod_selector), ..Default::default() },
            policy_types: Some(vec!["Ingress".to_string(), "Egress".to_string()]),
            egress: Some(vec![]),
            ingress: Some(vec![]),
        }),
        status: None,
    }
}

fn build_api_access(base_name: &str, namespace: &str, pod_selector: BTreeMap<String, String>, owner: Option<OwnerReference>) -> NetworkPolicy {
    let mut namespace_selector_labels = BTreeMap::new();
    namespace_selector_labels.insert(API_SERVICE_NAMESPACE_LABEL.to_string(), API_SERVICE_NAMESPACE.to_string());
    let mut pod_match = BTreeMap::new();
    pod_match.insert(API_SERVICE_POD_LABEL.to_string(), API_SERVICE_POD_VALUE.to_string());

    NetworkPolicy {
        metadata: metadata(format!("{base_name}-api-access"), namespace, base_labels(base_name, "api-access"), owner),
        spec: Some(NetworkPolicySpec {
            pod_selector: LabelSelector { match_labels: Some(pod_selector), ..Default::default() },
            policy_types: Some(vec!["Egress".to_string()]),
            egress: Some(vec![NetworkPolicyEgressRule {
                to: Some(vec![NetworkPolicyPeer {
                    namespace_selector: Some(LabelSelector { match_labels: Some(namespace_selector_labels), ..Default::default() }),
                    pod_selector: Some(LabelSelector { match_labels: Some(pod_match), ..Default::default() }),
                    ..Default::default()
                }]),
                ports: Some(vec![NetworkPolicyPort {
                    protocol: Some("TCP".to_string()),
                    port: Some(IntOrString::Int(API_SERVICE_PORT)),
                    ..Default::default()
                }]),
            }]),
            ingress: None,
        }),
        status: None,
    }
}

fn build_dns_access(base_name: &str, namespace: &str, pod_selector: BTreeMap<String, String>, owner: Option<OwnerReference>) -> NetworkPolicy {
    let mut namespace_selector_labels = BTreeMap::new();
    namespace_selector_labels.insert(API_SERVICE_NAMESPACE_LABEL.to_string(), DNS_NAMESPACE.to_string());
    let mut pod_match = BTreeMap::new();
    pod_match.insert(DNS_POD_LABEL.to_string(), DNS_POD_VALUE.to_string());

    NetworkPolicy {
        metadata: metadata(format!("{base_name}-dns-access"), namespace, base_labels(base_name, "dns-access"), owner),
        spec: Some(NetworkPolicySpec {
            pod_selector: LabelSelector { match_labels: Some(pod_selector), ..Default::default() },
            policy_types: Some(vec!["Egress".to_string()]),
            egress: Some(vec![NetworkPolicyEgressRule {
                to: Some(vec![NetworkPolicyPeer {
                    namespace_selector: Some(LabelSelector { match_labels: Some(namespace_selector_labels), ..Default::default() }),
                    pod_selector: Some(LabelSelector { match_labels: Some(pod_match), ..Default::default() }),
                    ..Default::default()
                }]),
                ports: Some(vec![
                    NetworkPolicyPort { protocol: Some("UDP".to_string()), port: Some(IntOrString::Int(53)), ..Default::default() },
                    NetworkPolicyPort { protocol: Some("TCP".to_string()), port: Some(IntOrString::Int(53)), ..Default::default() },
                ]),
            }]),
            ingress: None,
        }),
        status: None,
    }
}

fn build_ingress(base_name: &str, namespace: &str, pod_selector: BTreeMap<String, String>, owner: Option<OwnerReference>) -> NetworkPolicy {
    NetworkPolicy {
        metadata: metadata(format!("{base_name}-ingress"), namespace, base_labels(base_name, "ingress"), owner),
        spec: Some(NetworkPolicySpec {
            pod_selector: LabelSelector { match_labels: Some(pod_selector), ..Default::default() },
            policy_types: Some(vec!["Ingress".to_string()]),
            egress: None,
            ingress: Some(vec![NetworkPolicyIngressRule {
                from: Some(vec![NetworkPolicyPeer { pod_selector: Some(LabelSelector::default()), ..Default::default() }]),
                ports: None,
            }]),
        }),
        status: None,
    }
}

fn build_egress_chunks(
    base_name: &str,
    namespace: &str,
    pod_selector: BTreeMap<String, String>,
    egress: &[EgressRule],
    owner: Option<OwnerReference>,
) -> Vec<NetworkPolicy> {
    egress
        .chunks(EGRESS_CHUNK_SIZE)
        .enumerate()
        .map(|(index, chunk)| {
            let domains: Vec<&str> = chunk.iter().map(|rule| rule.domain.as_str()).collect();
            let mut annotations = BTreeMap::new();
            annotations.insert(ALLOWED_DOMAINS_ANNOTATION.to_string(), domains.join(","));

            let rules: Vec<NetworkPolicyEgressRule> = chunk
                .iter()
                .map(|rule| NetworkPolicyEgressRule { to: Some(vec![compiled_egress_peer()]), ports: rule_ports(rule) })
                .collect();

            NetworkPolicy {
                metadata: ObjectMeta { annotations: Some(annotations), ..metadata(format!("{base_name}-egress-{index}"), namespace, base_labels(base_name, "egress-chunk"), owner.clone()) },
                spec: Some(NetworkPolicySpec {
                    pod_selector: LabelSelector { match_labels: Some(pod_selector.clone()), ..Default::default() },
                    policy_types: Some(vec!["Egress".to_string()]),
                    egress: Some(rules),
                    ingress: None,
                }),
                status: None,
            }
        })
        .collect()
}

fn compiled_egress_peer() -> NetworkPolicyPeer {
    NetworkPolicyPeer {
        ip_block: Some(IPBlock {
            cidr: "0.0.0.0/0".to_string(),
            except: Some(RFC1918_RANGES.iter().map(|s| s.to_string()).collect()),
        }),
        ..Default::default()
    }
}

fn rule_ports(rule: &EgressRule) -> Option<Vec<NetworkPolicyPort>> {
    if rule.ports.is_empty() {
        return None;
    }
    Some(
        rule.ports
            .iter()
            .map(|port| NetworkPolicyPort {
                protocol: Some(rule.protocol.as_deref().unwrap_or("tcp").to_uppercase()),
                port: Some(IntOrString::Int(*port as i32)),
                ..Default::default()
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_all_base_names_match_spec_convention() {
        let deny = build_default_deny("sandbox-demo-1", "default", BTreeMap::new(), None);
        let api = build_api_access("sandbox-demo-1", "default", BTreeMap::new(), None);
        let dns = build_dns_access("sandbox-demo-1", "default", BTreeMap::new(), None);
        assert_eq!(deny.metadata.name.as_deref(), Some("sandbox-demo-1-default-deny"));
        assert_eq!(api.metadata.name.as_deref(), Some("sandbox-demo-1-api-access"));
        assert_eq!(dns.metadata.name.as_deref(), Some("sandbox-demo-1-dns-access"));
    }

    #[test]
    fn test_default_deny_denies_everything() {
        let policy = build_default_deny("sbx-1", "default", BTreeMap::new(), None);
        let spec = policy.spec.unwrap();
        assert!(spec.egress.unwrap().is_empty());
        assert!(spec.ingress.unwrap().is_empty());
    }

    #[test]
    fn test_dns_access_allows_port_53() {
        let policy = build_dns_access("sbx-1", "default", BTreeMap::new(), None);
        let egress = policy.spec.unwrap().egress.unwrap();
        assert_eq!(egress[0].ports.as_ref().unwrap().len(), 2);
    }

    #[test]
    fn test_egress_chunks_at_ten_domains_each() {
        let egress: Vec<EgressRule> = (0..15)
            .map(|i| EgressRule { domain: format!("example{i}.org"), ports: vec![443], protocol: Some("tcp".to_string()) })
            .collect();
        let chunks = build_egress_chunks("sbx-1", "default", BTreeMap::new(), &egress, None);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].metadata.name.as_deref(), Some("sbx-1-egress-0"));
        assert_eq!(chunks[1].metadata.name.as_deref(), Some("sbx-1-egress-1"));
        assert_eq!(chunks[0].spec.as_ref().unwrap().egress.as_ref().unwrap().len(), 10);
        assert_eq!(chunks[1].spec.as_ref().unwrap().egress.as_ref().unwrap().len(), 5);
    }

    #[test]
    fn test_egress_chunk_carries_allowed_domains_annotation() {
        let egress = vec![
            EgressRule { domain: "pypi.org".to_string(), ports: vec![443], protocol: Some("tcp".to_string()) },
            EgressRule { domain: "files.pythonhosted.org".to_string(), ports: vec![443], protocol: Some("tcp".to_string()) },
        ];
        let chunks = build_egress_chunks("sandbox-demo", "default", BTreeMap::new(), &egress, None);
        let annotation = chunks[0].metadata.annotations.as_ref().unwrap().get(ALLOWED_DOMAINS_ANNOTATION).unwrap();
        assert_eq!(annotation, "pypi.org,files.pythonhosted.org");
    }

    #[test]
    fn test_egress_peer_excludes_rfc1918_ranges() {
        let peer = compiled_egress_peer();
        let except = peer.ip_block.unwrap().except.unwrap();
        assert_eq!(except.len(), 3);
        assert!(except.contains(&"10.0.0.0/8".to_string()));
    }

    #[test]
    fn test_no_egress_chunks_when_no_domains_requested() {
        let chunks = build_egress_chunks("sbx-1", "default", BTreeMap::new(), &[], None);
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_ingress_policy_only_built_when_requested() {
        let policy = build_ingress("sbx-1", "default", BTreeMap::new(), None);
        assert_eq!(policy.metadata.name.as_deref(), Some("sbx-1-ingress"));
        assert_eq!(policy.spec.unwrap().ingress.unwrap().len(), 1);
    }
}
