//! In-process provider.
//!
//! Keeps scale sets and resource groups in memory, counts every call per
//! operation and can inject failures or completion latency. The CLI uses it
//! as a dry-run control plane and the tests use it as their provider.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::{
    Completion, GroupDescriptor, GroupRequest, ProviderClient, ProviderError, ScaleSetDescriptor,
    ScaleSetRequest,
};

/// Provider operations, used for call accounting and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    GetScaleSet,
    CreateOrUpdateScaleSet,
    DeleteScaleSet,
    GetGroup,
    CreateOrUpdateGroup,
    DeleteGroup,
}

impl Operation {
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Operation::GetScaleSet | Operation::GetGroup)
    }
}

#[derive(Default)]
struct State {
    scale_sets: BTreeMap<(String, String), ScaleSetDescriptor>,
    groups: BTreeMap<String, GroupDescriptor>,
    calls: HashMap<Operation, usize>,
    scale_set_requests: Vec<ScaleSetRequest>,
    failures: HashMap<Operation, ProviderError>,
    latency: Option<Duration>,
}

/// Provider backed by in-memory maps.
pub struct InMemoryProvider {
    subscription: String,
    state: Arc<Mutex<State>>,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self {
            subscription: uuid::Uuid::new_v4().to_string(),
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    /// Delay every mutating completion by `latency`.
    pub async fn set_latency(&self, latency: Duration) {
        self.state.lock().await.latency = Some(latency);
    }

    /// Make the next call of `op` fail with `error`.
    pub async fn fail_next(&self, op: Operation, error: ProviderError) {
        self.state.lock().await.failures.insert(op, error);
    }

    /// Number of calls made for `op`.
    pub async fn calls(&self, op: Operation) -> usize {
        self.state.lock().await.calls.get(&op).copied().unwrap_or(0)
    }

    /// Number of create/update/delete calls across all resource kinds.
    pub async fn mutation_calls(&self) -> usize {
        let state = self.state.lock().await;
        state
            .calls
            .iter()
            .filter(|(op, _)| op.is_mutation())
            .map(|(_, n)| n)
            .sum()
    }

    /// Every scale set create/update request received, oldest first.
    pub async fn scale_set_requests(&self) -> Vec<ScaleSetRequest> {
        self.state.lock().await.scale_set_requests.clone()
    }

    pub async fn scale_set(&self, group: &str, name: &str) -> Option<ScaleSetDescriptor> {
        self.state
            .lock()
            .await
            .scale_sets
            .get(&(group.to_string(), name.to_string()))
            .cloned()
    }

    pub async fn group(&self, name: &str) -> Option<GroupDescriptor> {
        self.state.lock().await.groups.get(name).cloned()
    }

    /// Seed a scale set, as if it had been created out of band.
    pub async fn insert_scale_set(&self, group: &str, descriptor: ScaleSetDescriptor) {
        self.state
            .lock()
            .await
            .scale_sets
            .insert((group.to_string(), descriptor.name.clone()), descriptor);
    }

    /// Drop a scale set without going through the API, as if removed out of band.
    pub async fn forget_scale_set(&self, group: &str, name: &str) {
        self.state
            .lock()
            .await
            .scale_sets
            .remove(&(group.to_string(), name.to_string()));
    }

    fn scale_set_id(&self, group: &str, name: &str) -> String {
        format!(
            "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Compute/virtualMachineScaleSets/{}",
            self.subscription, group, name
        )
    }

    fn group_id(&self, name: &str) -> String {
        format!("/subscriptions/{}/resourceGroups/{}", self.subscription, name)
    }

    /// Count the call and return an injected failure, if any.
    async fn record(&self, op: Operation) -> Result<Option<Duration>, ProviderError> {
        let mut state = self.state.lock().await;
        *state.calls.entry(op).or_insert(0) += 1;
        match state.failures.remove(&op) {
            Some(err) => Err(err),
            None => Ok(state.latency),
        }
    }

    /// Run a mutation now, or after the configured latency on a background task.
    async fn settle<T, F>(&self, op: Operation, mutation: F) -> Completion<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut State) -> Result<T, ProviderError> + Send + 'static,
    {
        let latency = match self.record(op).await {
            Ok(latency) => latency,
            Err(err) => return Completion::ready(Err(err)),
        };
        match latency {
            None => {
                let mut state = self.state.lock().await;
                Completion::ready(mutation(&mut *state))
            }
            Some(latency) => {
                let (tx, completion) = Completion::channel();
                let state = Arc::clone(&self.state);
                tokio::spawn(async move {
                    tokio::time::sleep(latency).await;
                    let mut state = state.lock().await;
                    tx.complete(mutation(&mut *state));
                });
                completion
            }
        }
    }
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderClient for InMemoryProvider {
    async fn get_scale_set(
        &self,
        group: &str,
        name: &str,
    ) -> Result<ScaleSetDescriptor, ProviderError> {
        debug!("Getting scale set {}/{}", group, name);
        self.record(Operation::GetScaleSet).await?;
        self.scale_set(group, name)
            .await
            .ok_or_else(|| ProviderError::NotFound(format!("scale set {}/{}", group, name)))
    }

    async fn create_or_update_scale_set(
        &self,
        group: &str,
        name: &str,
        request: ScaleSetRequest,
    ) -> Completion<ScaleSetDescriptor> {
        debug!("Creating or updating scale set {}/{}", group, name);
        self.state
            .lock()
            .await
            .scale_set_requests
            .push(request.clone());

        let key = (group.to_string(), name.to_string());
        let id = self.scale_set_id(group, name);
        let name = name.to_string();
        self.settle(Operation::CreateOrUpdateScaleSet, move |state| {
            let descriptor = ScaleSetDescriptor {
                id,
                name,
                tags: request.tags,
                image_reference: Some(request.storage.image_reference),
                sku: Some(request.sku),
            };
            state.scale_sets.insert(key, descriptor.clone());
            Ok(descriptor)
        })
        .await
    }

    async fn delete_scale_set(&self, group: &str, name: &str) -> Completion<()> {
        debug!("Deleting scale set {}/{}", group, name);
        let key = (group.to_string(), name.to_string());
        self.settle(Operation::DeleteScaleSet, move |state| {
            match state.scale_sets.remove(&key) {
                Some(_) => Ok(()),
                None => Err(ProviderError::NotFound(format!(
                    "scale set {}/{}",
                    key.0, key.1
                ))),
            }
        })
        .await
    }

    async fn get_group(&self, name: &str) -> Result<GroupDescriptor, ProviderError> {
        debug!("Getting resource group {}", name);
        self.record(Operation::GetGroup).await?;
        self.group(name)
            .await
            .ok_or_else(|| ProviderError::NotFound(format!("resource group {}", name)))
    }

    async fn create_or_update_group(
        &self,
        name: &str,
        request: GroupRequest,
    ) -> Completion<GroupDescriptor> {
        debug!("Creating or updating resource group {}", name);
        let id = self.group_id(name);
        let name = name.to_string();
        self.settle(Operation::CreateOrUpdateGroup, move |state| {
            let descriptor = GroupDescriptor {
                id,
                name: name.clone(),
                location: request.location,
                tags: request.tags,
            };
            state.groups.insert(name, descriptor.clone());
            Ok(descriptor)
        })
        .await
    }

    async fn delete_group(&self, name: &str) -> Completion<()> {
        debug!("Deleting resource group {}", name);
        let name = name.to_string();
        self.settle(Operation::DeleteGroup, move |state| {
            if state.groups.remove(&name).is_none() {
                return Err(ProviderError::NotFound(format!("resource group {}", name)));
            }
            // Deleting a group takes everything inside it along.
            state.scale_sets.retain(|(group, _), _| *group != name);
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group_request() -> GroupRequest {
        GroupRequest {
            location: "eastus".to_string(),
            tags: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_group_lifecycle() {
        let provider = InMemoryProvider::new();
        let timeout = Duration::from_secs(1);

        assert!(matches!(
            provider.get_group("kube").await,
            Err(ProviderError::NotFound(_))
        ));

        let created = provider
            .create_or_update_group("kube", group_request())
            .await
            .wait(timeout)
            .await
            .unwrap();
        assert!(created.id.ends_with("/resourceGroups/kube"));
        assert_eq!(provider.get_group("kube").await.unwrap().id, created.id);

        provider
            .delete_group("kube")
            .await
            .wait(timeout)
            .await
            .unwrap();
        assert!(provider.group("kube").await.is_none());
        assert_eq!(provider.calls(Operation::GetGroup).await, 2);
        assert_eq!(provider.mutation_calls().await, 2);
    }

    #[tokio::test]
    async fn test_injected_failure_applies_once() {
        let provider = InMemoryProvider::new();
        let timeout = Duration::from_secs(1);
        provider
            .fail_next(
                Operation::CreateOrUpdateGroup,
                ProviderError::Failed("quota".to_string()),
            )
            .await;

        let first = provider
            .create_or_update_group("kube", group_request())
            .await
            .wait(timeout)
            .await;
        assert_eq!(first, Err(ProviderError::Failed("quota".to_string())));

        let second = provider
            .create_or_update_group("kube", group_request())
            .await
            .wait(timeout)
            .await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn test_latency_defers_completion() {
        let provider = InMemoryProvider::new();
        provider.set_latency(Duration::from_millis(200)).await;

        let result = provider
            .create_or_update_group("kube", group_request())
            .await
            .wait(Duration::from_millis(10))
            .await;
        assert!(matches!(result, Err(ProviderError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_delete_missing_scale_set() {
        let provider = InMemoryProvider::new();
        let result = provider
            .delete_scale_set("kube", "kube-master")
            .await
            .wait(Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(ProviderError::NotFound(_))));
    }
}
