use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, Error};

use super::FIELD_MANAGER;

const SANDBOX_PORT: i32 = 8080;

/// A ClusterIP service exposing the sandbox pod's exec/attach port so the
/// API service can reach it without going through the Kubernetes API
/// server's proxy subresource for ordinary traffic.
pub fn build_service(
    name: &str,
    namespace: &str,
    selector: BTreeMap<String, String>,
    owner: Option<OwnerReference>,
) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            owner_references: owner.map(|o| vec![o]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(selector),
            ports: Some(vec![ServicePort {
                name: Some("sandbox".to_string()),
                port: SANDBOX_PORT,
                target_port: Some(k8s_openapi::apimachinery::pkg::util::intstr::IntOrString::Int(SANDBOX_PORT)),
                ..Default::default()
            }]),
            type_: Some("ClusterIP".to_string()),
            ..Default::default()
        }),
        status: None,
    }
}

pub async fn ensure(client: Client, namespace: &str, service: &Service) -> Result<Service, Error> {
    let api: Api<Service> = Api::namespaced(client, namespace);
    let name = service.metadata.name.clone().unwrap_or_default();
    api.patch(&name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(service)).await
}

pub async fn delete(client: Client, namespace: &str, name: &str) -> Result<(), Error> {
    let api: Api<Service> = Api::namespaced(client, namespace);
    match api.delete(name, &Default::default()).await {
        Ok(_) => Ok(()),
        Err(Error::Api(resp)) if resp.code == 404 => Ok(()),
        Err(err) => Err(err),
    }
}

pub fn endpoint_dns_name(service_name: &str, namespace: &str) -> String {
    format!("{service_name}.{namespace}.svc.cluster.local")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_service_exposes_sandbox_port() {
        let service = build_service("sbx-1", "default", BTreeMap::new(), None);
        let port = &service.spec.unwrap().ports.unwrap()[0];
        assert_eq!(port.port, SANDBOX_PORT);
    }

    #[test]
    fn test_endpoint_dns_name_format() {
        assert_eq!(endpoint_dns_name("sandbox-demo-1", "default"), "sandbox-demo-1.default.svc.cluster.local");
    }
}
