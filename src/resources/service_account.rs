use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, Error};

use super::FIELD_MANAGER;

/// A bare, tokenless ServiceAccount assigned to every sandbox pod so it
/// never inherits the default namespace service account's permissions
/// (§4.7, "least privilege by default").
pub fn build_service_account(name: &str, namespace: &str) -> ServiceAccount {
    ServiceAccount {
        metadata: ObjectMeta { name: Some(name.to_string()), namespace: Some(namespace.to_string()), ..Default::default() },
        automount_service_account_token: Some(false),
        ..Default::default()
    }
}

pub async fn ensure(client: Client, namespace: &str, sa: &ServiceAccount) -> Result<ServiceAccount, Error> {
    let api: Api<ServiceAccount> = Api::namespaced(client, namespace);
    let name = sa.metadata.name.clone().unwrap_or_default();
    api.patch(&name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(sa)).await
}

pub async fn delete(client: Client, namespace: &str, name: &str) -> Result<(), Error> {
    let api: Api<ServiceAccount> = Api::namespaced(client, namespace);
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
    fn test_service_account_never_automounts_token() {
        let sa = build_service_account("sbx-1", "default");
        assert_eq!(sa.automount_service_account_token, Some(false));
    }
}
