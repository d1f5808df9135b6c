//! Process-wide auth session state.
//!
//! The external identity provider pushes auth-state reports (a user object
//! on login, nothing on logout). This module wraps that callback boundary
//! as a cancellable subscription feeding a single-writer broadcast
//! channel: one spawned task owns the state, everyone else holds read-only
//! watch receivers. The lifecycle is `Initializing` until the provider's
//! first report, then `Authenticated` or `Anonymous`, never `Initializing`
//! again.
//!
//! Role flags are not delivered by the provider; they come from a side
//! lookup against the user-profile resource and may lag the authenticated
//! transition. Consumers see default (all-false) roles in the interim.
//!
//! Tokens are never stored: they expire, so every authenticated request
//! retrieves a fresh one from the provider immediately before the call. A
//! retrieval failure is an authentication error, distinct from network and
//! server failures, and is not retried.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::ApiError;

/// The identity the external provider reports after sign-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
  pub user_id: String,
  pub display_name: Option<String>,
  pub email: Option<String>,
}

/// Role flags derived from the user-profile resource.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Roles {
  pub is_admin: bool,
  pub is_moderator: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
  /// The provider has not reported yet.
  Initializing,
  Anonymous,
  Authenticated { user: Identity, roles: Roles },
}

impl SessionState {
  pub fn is_authenticated(&self) -> bool {
    matches!(self, SessionState::Authenticated { .. })
  }

  pub fn is_initializing(&self) -> bool {
    matches!(self, SessionState::Initializing)
  }

  pub fn user(&self) -> Option<&Identity> {
    match self {
      SessionState::Authenticated { user, .. } => Some(user),
      _ => None,
    }
  }

  pub fn roles(&self) -> Roles {
    match self {
      SessionState::Authenticated { roles, .. } => *roles,
      _ => Roles::default(),
    }
  }
}

/// The opaque external identity capability (sign-in/out, state pushes,
/// token retrieval with provider-side refresh, account management).
pub trait IdentityProvider: Send + Sync + 'static {
  /// Push stream of auth-state reports: `Some(identity)` on login, `None`
  /// on logout. The provider reports the current state once on
  /// subscription, then once per actual change.
  fn subscribe(&self) -> mpsc::UnboundedReceiver<Option<Identity>>;

  /// A fresh (possibly cached-and-refreshed) ID token for this user.
  fn id_token(&self, user: &Identity) -> impl Future<Output = Result<String, ApiError>> + Send;

  fn sign_in(
    &self,
    email: &str,
    password: &str,
  ) -> impl Future<Output = Result<Identity, ApiError>> + Send;

  fn sign_out(&self) -> impl Future<Output = Result<(), ApiError>> + Send;

  fn send_password_reset(&self, email: &str) -> impl Future<Output = Result<(), ApiError>> + Send;

  fn delete_account(&self, user: &Identity) -> impl Future<Output = Result<(), ApiError>> + Send;
}

type BoxFuture<T> = Pin<Box<dyn Future<Output = Result<T, ApiError>> + Send>>;

/// Side lookup resolving an identity (plus a token for the call) to its
/// role flags; backed by the user-profile endpoint in production.
pub type RoleLookup = Arc<dyn Fn(&Identity, &str) -> BoxFuture<Roles> + Send + Sync>;

/// Read side of the session: cheap to clone, shared everywhere.
pub struct AuthSession<P> {
  provider: Arc<P>,
  state: watch::Receiver<SessionState>,
  task: JoinHandle<()>,
}

impl<P: IdentityProvider> AuthSession<P> {
  /// Subscribe to the provider and start the single writer task.
  pub fn spawn(provider: Arc<P>, role_lookup: Option<RoleLookup>) -> Self {
    let (tx, rx) = watch::channel(SessionState::Initializing);
    let mut reports = provider.subscribe();

    let task = tokio::spawn({
      let provider = Arc::clone(&provider);
      async move {
        while let Some(report) = reports.recv().await {
          match report {
            Some(user) => {
              debug!(user = %user.user_id, "auth state: authenticated");
              let _ = tx.send(SessionState::Authenticated {
                user: user.clone(),
                roles: Roles::default(),
              });

              if let Some(lookup) = &role_lookup {
                match resolve_roles(provider.as_ref(), lookup, &user).await {
                  Ok(roles) => {
                    // Apply only if this user is still the signed-in one.
                    let still_current = matches!(
                      &*tx.borrow(),
                      SessionState::Authenticated { user: current, .. }
                        if current.user_id == user.user_id
                    );
                    if still_current {
                      let _ = tx.send(SessionState::Authenticated { user: user.clone(), roles });
                    }
                  }
                  Err(e) => warn!("role lookup failed: {e}"),
                }
              }
            }
            None => {
              debug!("auth state: anonymous");
              let _ = tx.send(SessionState::Anonymous);
            }
          }
        }
      }
    });

    Self {
      provider,
      state: rx,
      task,
    }
  }

  /// Subscribe to state changes. Receivers are independent; dropping one
  /// never affects the session.
  pub fn subscribe(&self) -> watch::Receiver<SessionState> {
    self.state.clone()
  }

  pub fn current(&self) -> SessionState {
    self.state.borrow().clone()
  }

  pub fn is_authenticated(&self) -> bool {
    self.current().is_authenticated()
  }

  pub fn roles(&self) -> Roles {
    self.current().roles()
  }

  /// Wait for the provider's first report.
  pub async fn ready(&self) -> SessionState {
    let mut rx = self.state.clone();
    loop {
      let current = rx.borrow_and_update().clone();
      if !current.is_initializing() {
        return current;
      }
      if rx.changed().await.is_err() {
        return self.current();
      }
    }
  }

  /// Call-scoped token retrieval: a fresh token for the request about to
  /// be made. Every failure here is an authentication error.
  pub async fn id_token(&self) -> Result<String, ApiError> {
    let user = match self.current() {
      SessionState::Authenticated { user, .. } => user,
      _ => return Err(ApiError::Auth("not signed in".to_string())),
    };

    self.provider.id_token(&user).await.map_err(|e| match e {
      ApiError::Auth(_) => e,
      other => ApiError::Auth(other.to_string()),
    })
  }

  pub async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, ApiError> {
    self.provider.sign_in(email, password).await
  }

  /// Provider-side sign-out; the session transitions to `Anonymous` when
  /// the provider pushes the resulting report.
  pub async fn sign_out(&self) -> Result<(), ApiError> {
    self.provider.sign_out().await
  }

  pub async fn send_password_reset(&self, email: &str) -> Result<(), ApiError> {
    self.provider.send_password_reset(email).await
  }

  pub async fn delete_account(&self) -> Result<(), ApiError> {
    let user = match self.current() {
      SessionState::Authenticated { user, .. } => user,
      _ => return Err(ApiError::Auth("not signed in".to_string())),
    };
    self.provider.delete_account(&user).await
  }
}

impl<P> Drop for AuthSession<P> {
  fn drop(&mut self) {
    // The writer task must not outlive its readers.
    self.task.abort();
  }
}

async fn resolve_roles<P: IdentityProvider>(
  provider: &P,
  lookup: &RoleLookup,
  user: &Identity,
) -> Result<Roles, ApiError> {
  let token = provider.id_token(user).await?;
  lookup(user, &token).await
}

/// Identity provider backed by a fixed token, for headless use where the
/// token comes from the environment. Reports its state once and never
/// changes; interactive operations are unsupported.
pub struct StaticTokenProvider {
  credentials: Option<(String, String)>,
}

impl StaticTokenProvider {
  pub fn new(user_id: String, token: String) -> Self {
    Self {
      credentials: Some((user_id, token)),
    }
  }

  /// No credentials configured; the session resolves to `Anonymous`.
  pub fn anonymous() -> Self {
    Self { credentials: None }
  }
}

impl IdentityProvider for StaticTokenProvider {
  fn subscribe(&self) -> mpsc::UnboundedReceiver<Option<Identity>> {
    let (tx, rx) = mpsc::unbounded_channel();
    let report = self.credentials.as_ref().map(|(user_id, _)| Identity {
      user_id: user_id.clone(),
      display_name: None,
      email: None,
    });
    let _ = tx.send(report);
    rx
  }

  fn id_token(&self, _user: &Identity) -> impl Future<Output = Result<String, ApiError>> + Send {
    let token = self
      .credentials
      .as_ref()
      .map(|(_, token)| token.clone())
      .ok_or_else(|| ApiError::Auth("no static token configured".to_string()));
    async move { token }
  }

  fn sign_in(
    &self,
    _email: &str,
    _password: &str,
  ) -> impl Future<Output = Result<Identity, ApiError>> + Send {
    async { Err(ApiError::Auth("static token provider cannot sign in".to_string())) }
  }

  fn sign_out(&self) -> impl Future<Output = Result<(), ApiError>> + Send {
    async { Ok(()) }
  }

  fn send_password_reset(&self, _email: &str) -> impl Future<Output = Result<(), ApiError>> + Send {
    async {
      Err(ApiError::Auth(
        "static token provider cannot reset passwords".to_string(),
      ))
    }
  }

  fn delete_account(&self, _user: &Identity) -> impl Future<Output = Result<(), ApiError>> + Send {
    async {
      Err(ApiError::Auth(
        "static token provider cannot delete accounts".to_string(),
      ))
    }
  }
}
