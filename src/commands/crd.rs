use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, PostParams};
use kube::{Client, CustomResourceExt, Error};

use crate::crd::{RuntimeEnvironment, Sandbox, SandboxProfile, WarmPod, WarmPool};

pub fn generate() -> anyhow::Result<()> {
    for crd in all_crds() {
        println!("---");
        println!("{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}

pub async fn install() -> anyhow::Result<()> {
    let client = Client::try_default().await?;
    let api: Api<CustomResourceDefinition> = Api::all(client);

    for crd in all_crds() {
        let name = crd.metadata.name.clone().unwrap_or_default();
        match api.create(&PostParams::default(), &crd).await {
            Ok(_) => println!("created {name}"),
            Err(Error::Api(resp)) if resp.code == 409 => println!("{name} already exists, skipping"),
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn all_crds() -> Vec<CustomResourceDefinition> {
    vec![
        Sandbox::crd(),
        WarmPool::crd(),
        WarmPod::crd(),
        RuntimeEnvironment::crd(),
        SandboxProfile::crd(),
    ]
}
