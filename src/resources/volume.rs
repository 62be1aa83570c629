use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    PersistentVolumeClaim, PersistentVolumeClaimSpec, ResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, Error};

use crate::crd::StorageConfig;

use super::FIELD_MANAGER;

/// Builds a PVC for a sandbox that requested persistent storage. Shared
/// volumes are provisioned separately (one PVC per name, `ReadWriteMany`)
/// since they outlive any single sandbox.
pub fn build_pvc(
    name: &str,
    namespace: &str,
    storage: &StorageConfig,
    labels: BTreeMap<String, String>,
    owner: Option<OwnerReference>,
) -> Option<PersistentVolumeClaim> {
    if !storage.persistent {
        return None;
    }

    let mut requests = BTreeMap::new();
    requests.insert(
        "storage".to_string(),
        Quantity(storage.volume_size.clone().unwrap_or_else(|| "1Gi".to_string())),
    );

    Some(PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            owner_references: owner.map(|o| vec![o]),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            resources: Some(ResourceRequirements { requests: Some(requests), ..Default::default() }),
            storage_class_name: storage.storage_class.clone(),
            ..Default::default()
        }),
        status: None,
    })
}

pub async fn ensure(
    client: Client,
    namespace: &str,
    pvc: &PersistentVolumeClaim,
) -> Result<PersistentVolumeClaim, Error> {
    let api: Api<PersistentVolumeClaim> = Api::namespaced(client, namespace);
    let name = pvc.metadata.name.clone().unwrap_or_default();
    api.patch(&name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(pvc)).await
}

pub async fn delete(client: Client, namespace: &str, name: &str) -> Result<(), Error> {
    let api: Api<PersistentVolumeClaim> = Api::namespaced(client, namespace);
    match api.delete(name, &Default::default()).await {
        Ok(_) => Ok(()),
        Err(Error::Api(resp)) if resp.code == 404 => Ok(()),
        Err(err) => Err(err),
    }
}
