use kube::{Api, Client};
use k8s_openapi::api::core::v1::Namespace;

/// Confirms the process can reach the API server and has at least
/// read access to namespaces, the minimum permission the controller
/// needs to start up.
pub async fn run() -> anyhow::Result<()> {
    let client = Client::try_default().await?;
    let api: Api<Namespace> = Api::all(client);
    let namespaces = api.list(&Default::default()).await?;
    println!("connected to cluster, {} namespaces visible", namespaces.items.len());
    Ok(())
}
