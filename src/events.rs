//! Kubernetes Events recorder (§7 "user-visible failure"). Thin wrapper
//! over `kube::runtime::events::Recorder` so reconcilers emit `Normal`/
//! `Warning` events without repeating the reporting-controller boilerplate
//! at every call site.

use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;

const REPORTING_CONTROLLER: &str = "sandbox-controller";

pub struct EventRecorder {
    recorder: Recorder,
}

impl EventRecorder {
    pub fn new(client: Client, object: ObjectReference) -> Self {
        let reporter = Reporter { controller: REPORTING_CONTROLLER.to_string(), instance: None };
        Self { recorder: Recorder::new(client, reporter, object) }
    }

    pub async fn normal(&self, reason: &str, message: impl Into<String>) -> Result<(), kube::Error> {
        self.recorder
            .publish(Event { type_: EventType::Normal, reason: reason.to_string(), note: Some(message.into()), action: reason.to_string(), secondary: None })
            .await
    }

    pub async fn warning(&self, reason: &str, message: impl Into<String>) -> Result<(), kube::Error> {
        self.recorder
            .publish(Event { type_: EventType::Warning, reason: reason.to_string(), note: Some(message.into()), action: reason.to_string(), secondary: None })
            .await
    }
}

pub fn object_reference(kind: &str, namespace: &str, name: &str, uid: Option<String>) -> ObjectReference {
    ObjectReference {
        api_version: Some("llmsafespace.dev/v1".to_string()),
        kind: Some(kind.to_string()),
        namespace: Some(namespace.to_string()),
        name: Some(name.to_string()),
        uid,
        ..Default::default()
    }
}
