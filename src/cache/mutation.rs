//! Mutation coordination: run one write, then invalidate what it touched.
//!
//! A [`Mutation`] executes exactly one network operation per invocation,
//! with no automatic retry. On success it invalidates the configured
//! resource names on the shared [`QueryClient`], which is how a create,
//! update or delete propagates to every cached listing that could show the
//! affected entity. On error the cache is left untouched.
//!
//! Mutations are strictly confirm-then-invalidate; nothing is applied
//! optimistically, so there is nothing to roll back. Concurrent mutations
//! are not coalesced - preventing a double submission is the caller's job.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::debug;

use super::client::QueryClient;
use crate::error::ApiError;

type BoxFuture<T> = Pin<Box<dyn Future<Output = Result<T, ApiError>> + Send>>;
type MutateFn<I, O> = Box<dyn Fn(I) -> BoxFuture<O> + Send + Sync>;
type SuccessHook<O> = Box<dyn Fn(&O) + Send + Sync>;
type ErrorHook = Box<dyn Fn(&ApiError) + Send + Sync>;

/// Observable state of a mutation between invocations.
#[derive(Debug, Clone, Default)]
pub enum MutationState {
  #[default]
  Idle,
  Loading,
  Success,
  Error(Arc<ApiError>),
}

impl MutationState {
  pub fn is_loading(&self) -> bool {
    matches!(self, MutationState::Loading)
  }

  pub fn is_success(&self) -> bool {
    matches!(self, MutationState::Success)
  }

  pub fn error(&self) -> Option<&Arc<ApiError>> {
    match self {
      MutationState::Error(e) => Some(e),
      _ => None,
    }
  }
}

/// A configured write operation against the backend.
///
/// Built once per form or action, invoked per submission:
///
/// ```ignore
/// let mut delete = Mutation::new(queries.clone(), move |id: u32| {
///   let api = api.clone();
///   async move { api.delete_part(id, &token).await }
/// })
/// .invalidates("parts");
///
/// delete.mutate(part_id).await?;
/// ```
pub struct Mutation<I, O> {
  queries: QueryClient,
  op: MutateFn<I, O>,
  invalidates: Vec<String>,
  on_success: Option<SuccessHook<O>>,
  on_error: Option<ErrorHook>,
  state: MutationState,
}

impl<I, O> Mutation<I, O> {
  pub fn new<F, Fut>(queries: QueryClient, op: F) -> Self
  where
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O, ApiError>> + Send + 'static,
  {
    Self {
      queries,
      op: Box::new(move |input| Box::pin(op(input))),
      invalidates: Vec::new(),
      on_success: None,
      on_error: None,
      state: MutationState::Idle,
    }
  }

  /// Invalidate this resource name on success. May be chained for writes
  /// that affect several resources.
  pub fn invalidates(mut self, resource: &str) -> Self {
    self.invalidates.push(resource.to_string());
    self
  }

  pub fn on_success<F>(mut self, hook: F) -> Self
  where
    F: Fn(&O) + Send + Sync + 'static,
  {
    self.on_success = Some(Box::new(hook));
    self
  }

  pub fn on_error<F>(mut self, hook: F) -> Self
  where
    F: Fn(&ApiError) + Send + Sync + 'static,
  {
    self.on_error = Some(Box::new(hook));
    self
  }

  pub fn state(&self) -> &MutationState {
    &self.state
  }

  /// Clear a settled outcome once the caller has observed it.
  pub fn reset(&mut self) {
    self.state = MutationState::Idle;
  }

  /// Execute the operation once.
  pub async fn mutate(&mut self, input: I) -> Result<O, Arc<ApiError>> {
    self.state = MutationState::Loading;

    match (self.op)(input).await {
      Ok(output) => {
        for resource in &self.invalidates {
          debug!(resource, "mutation succeeded, invalidating");
          self.queries.invalidate(resource);
        }
        if let Some(hook) = &self.on_success {
          hook(&output);
        }
        self.state = MutationState::Success;
        Ok(output)
      }
      Err(e) => {
        let error = Arc::new(e);
        if let Some(hook) = &self.on_error {
          hook(&error);
        }
        self.state = MutationState::Error(error.clone());
        Err(error)
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{QueryKey, ReadOptions};
  use serde::{Deserialize, Serialize};
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::sync::Mutex;

  #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
  struct PartList {
    total: u32,
    items: Vec<String>,
  }

  fn list_fetch(
    backend: Arc<Mutex<Vec<String>>>,
    calls: Arc<AtomicU32>,
  ) -> impl Future<Output = Result<PartList, ApiError>> {
    async move {
      calls.fetch_add(1, Ordering::SeqCst);
      let items = backend.lock().unwrap().clone();
      Ok(PartList {
        total: items.len() as u32,
        items,
      })
    }
  }

  #[tokio::test]
  async fn test_create_then_list_sees_new_item() {
    let queries = QueryClient::new();
    let backend = Arc::new(Mutex::new(Vec::new()));
    let key = QueryKey::bare("parts");
    let calls = Arc::new(AtomicU32::new(0));

    let empty = queries
      .read::<PartList, _, _>(&key, ReadOptions::default(), {
        let backend = backend.clone();
        let calls = calls.clone();
        move || list_fetch(backend, calls)
      })
      .await;
    assert_eq!(empty.data.as_ref().map(|l| l.total), Some(0));

    let mut create = Mutation::new(queries.clone(), {
      let backend = backend.clone();
      move |name: String| {
        let backend = backend.clone();
        async move {
          backend.lock().unwrap().push(name);
          Ok(1u32)
        }
      }
    })
    .invalidates("parts");

    create.mutate("Tactile Switches".to_string()).await.unwrap();
    assert!(create.state().is_success());

    // The invalidation links the mutation to the list key: the next read
    // refetches and sees the created item.
    let listed = queries
      .read::<PartList, _, _>(&key, ReadOptions::default(), {
        let backend = backend.clone();
        let calls = calls.clone();
        move || list_fetch(backend, calls)
      })
      .await;
    let list = listed.data.unwrap();
    assert_eq!(list.total, 1);
    assert_eq!(list.items, vec!["Tactile Switches".to_string()]);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_failed_mutation_leaves_cache_untouched() {
    let queries = QueryClient::new();
    let key = QueryKey::bare("parts");
    let calls = Arc::new(AtomicU32::new(0));
    let seen_error = Arc::new(Mutex::new(None::<String>));

    {
      let calls = calls.clone();
      queries
        .read::<u32, _, _>(&key, ReadOptions::default(), move || async move {
          calls.fetch_add(1, Ordering::SeqCst);
          Ok(10)
        })
        .await;
    }

    let mut rename = Mutation::new(queries.clone(), |_input: u32| async {
      Err::<u32, _>(ApiError::Server {
        status: 422,
        message: "name already exists".to_string(),
      })
    })
    .invalidates("parts")
    .on_error({
      let seen_error = seen_error.clone();
      move |e| {
        *seen_error.lock().unwrap() = Some(e.to_string());
      }
    });

    let result = rename.mutate(7).await;
    assert!(result.is_err());
    assert!(rename.state().error().is_some());
    assert_eq!(
      seen_error.lock().unwrap().as_deref(),
      Some("server error (422): name already exists")
    );

    // No invalidation happened: the cached value is still fresh.
    let calls2 = calls.clone();
    let cached = queries
      .read::<u32, _, _>(&key, ReadOptions::default(), move || async move {
        calls2.fetch_add(1, Ordering::SeqCst);
        Ok(99)
      })
      .await;
    assert_eq!(cached.data, Some(10));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    rename.reset();
    assert!(matches!(rename.state(), MutationState::Idle));
  }

  #[tokio::test]
  async fn test_success_hook_observes_result() {
    let queries = QueryClient::new();
    let observed = Arc::new(AtomicU32::new(0));

    let mut create = Mutation::new(queries, |_: ()| async { Ok(17u32) }).on_success({
      let observed = observed.clone();
      move |id| observed.store(*id, Ordering::SeqCst)
    });

    let id = create.mutate(()).await.unwrap();
    assert_eq!(id, 17);
    assert_eq!(observed.load(Ordering::SeqCst), 17);
  }

  #[tokio::test]
  async fn test_multiple_invalidation_targets() {
    let queries = QueryClient::new();
    let battlestations = QueryKey::bare("battlestations");
    let favorites = QueryKey::bare("user_favorites");
    let calls = Arc::new(AtomicU32::new(0));

    for key in [&battlestations, &favorites] {
      let calls = calls.clone();
      queries
        .read::<u32, _, _>(key, ReadOptions::default(), move || async move {
          calls.fetch_add(1, Ordering::SeqCst);
          Ok(0)
        })
        .await;
    }

    let mut favorite = Mutation::new(queries.clone(), |_: ()| async { Ok(()) })
      .invalidates("battlestations")
      .invalidates("user_favorites");
    favorite.mutate(()).await.unwrap();

    for key in [&battlestations, &favorites] {
      let calls = calls.clone();
      queries
        .read::<u32, _, _>(key, ReadOptions::default(), move || async move {
          calls.fetch_add(1, Ordering::SeqCst);
          Ok(1)
        })
        .await;
    }
    assert_eq!(calls.load(Ordering::SeqCst), 4);
  }
}
