pub mod sandbox;
pub mod warm_pod;
pub mod warm_pool;

use std::sync::Arc;

use kube::Client;

use crate::api_client::ApiServiceClient;
use crate::queue::Dispatcher;

/// Shared context handed to every reconciler, the same role the teacher's
/// `Context` struct plays for `commands/reconcile.rs`'s `Controller::new`.
pub struct Context {
    pub client: Client,
    pub dispatcher: Arc<Dispatcher>,
    pub api_client: Option<Arc<ApiServiceClient>>,
}

impl Context {
    pub fn new(client: Client, api_client: Option<Arc<ApiServiceClient>>) -> Arc<Self> {
        Arc::new(Self { client, dispatcher: Arc::new(Dispatcher::new()), api_client })
    }
}
