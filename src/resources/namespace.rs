use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, Error};

use super::FIELD_MANAGER;

/// Sandbox namespaces aren't created per-sandbox by default (sandboxes
/// live in the namespace they're declared in), but a Sandbox with
/// `spec.namespaceIsolation` set builds one of these before any other
/// child object, ahead of the service account (§4.2 creation order).
pub fn build_namespace(name: &str) -> Namespace {
    Namespace { metadata: ObjectMeta { name: Some(name.to_string()), ..Default::default() }, spec: None, status: None }
}

pub async fn ensure(client: Client, namespace: &Namespace) -> Result<Namespace, Error> {
    let api: Api<Namespace> = Api::all(client);
    let name = namespace.metadata.name.clone().unwrap_or_default();
    api.patch(&name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(namespace)).await
}

pub async fn delete(client: Client, name: &str) -> Result<(), Error> {
    let api: Api<Namespace> = Api::all(client);
    match api.delete(name, &Default::default()).await {
        Ok(_) => Ok(()),
        Err(Error::Api(resp)) if resp.code == 404 => Ok(()),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_namespace_sets_name() {
        let ns = build_namespace("sandboxes-team-a");
        assert_eq!(ns.metadata.name.as_deref(), Some("sandboxes-team-a"));
    }
}
