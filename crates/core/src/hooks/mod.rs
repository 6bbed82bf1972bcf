//! Lifecycle extension hooks
//!
//! Every transition exposes a before-hook (in-line with the transition,
//! may transform or veto) and an after-hook (detached, receives the
//! committed result, outcome ignored). Hook code is pluggable and
//! untrusted: the runner contains panics and enforces a deadline so a
//! misbehaving hook can never crash or block the engine.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{Lobby, LobbyAttrs};

/// Outcome of a before-hook
#[derive(Debug, Clone)]
pub enum HookOutcome<T> {
    /// Proceed with the (possibly transformed) payload
    Proceed(T),
    /// Abort the transition with a reason
    Reject(String),
}

/// Payload handed to the membership hooks
#[derive(Debug, Clone, Copy)]
pub struct MemberAction {
    pub lobby_id: Uuid,
    pub user_id: i64,
}

/// One callback pair per lifecycle step. Default bodies are
/// pass-through/no-op, so implementors override only what they need and
/// the absent-hook case is just `NoopHooks`.
#[async_trait]
pub trait LobbyHooks: Send + Sync {
    async fn before_create(&self, attrs: LobbyAttrs) -> HookOutcome<LobbyAttrs> {
        HookOutcome::Proceed(attrs)
    }
    async fn after_create(&self, _lobby: Lobby) {}

    async fn before_join(&self, action: MemberAction) -> HookOutcome<MemberAction> {
        HookOutcome::Proceed(action)
    }
    async fn after_join(&self, _action: MemberAction) {}

    async fn before_leave(&self, action: MemberAction) -> HookOutcome<MemberAction> {
        HookOutcome::Proceed(action)
    }
    async fn after_leave(&self, _action: MemberAction) {}

    async fn before_kick(&self, action: MemberAction) -> HookOutcome<MemberAction> {
        HookOutcome::Proceed(action)
    }
    async fn after_kick(&self, _action: MemberAction) {}

    /// Untyped on purpose: a hook may rewrite arbitrary fields of the
    /// settings change. The engine falls back to the caller's attrs when
    /// the returned value does not deserialize.
    async fn before_update(&self, attrs: Value) -> HookOutcome<Value> {
        HookOutcome::Proceed(attrs)
    }
    async fn after_update(&self, _lobby: Lobby) {}

    async fn before_delete(&self, lobby_id: Uuid) -> HookOutcome<Uuid> {
        HookOutcome::Proceed(lobby_id)
    }
    async fn after_delete(&self, _lobby_id: Uuid) {}
}

/// The default pass-through implementation
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

#[async_trait]
impl LobbyHooks for NoopHooks {}

/// Executes hooks under a deadline with fault isolation.
///
/// Before-hooks run on their own task so a panic surfaces as a join
/// error instead of unwinding the engine; a deadline miss aborts the
/// task and is reported as its own error kind, distinct from a veto.
/// After-hooks are spawned and never awaited by the transition.
#[derive(Clone)]
pub struct HookRunner {
    hooks: Arc<dyn LobbyHooks>,
    timeout: Duration,
}

impl HookRunner {
    pub fn new(hooks: Arc<dyn LobbyHooks>, timeout: Duration) -> Self {
        Self { hooks, timeout }
    }

    async fn run_before<T, F>(&self, stage: &'static str, fut: F) -> Result<T>
    where
        T: Send + 'static,
        F: std::future::Future<Output = HookOutcome<T>> + Send + 'static,
    {
        let mut task = tokio::spawn(fut);
        match tokio::time::timeout(self.timeout, &mut task).await {
            Ok(Ok(HookOutcome::Proceed(payload))) => Ok(payload),
            Ok(Ok(HookOutcome::Reject(reason))) => Err(Error::HookRejected(reason)),
            Ok(Err(join_err)) => {
                warn!(stage, error = %join_err, "before-hook crashed");
                Err(Error::HookRejected("hook crashed".into()))
            }
            Err(_) => {
                task.abort();
                warn!(stage, "before-hook exceeded its deadline");
                Err(Error::HookTimeout)
            }
        }
    }

    fn detach<F>(stage: &'static str, fut: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let task = tokio::spawn(fut);
        tokio::spawn(async move {
            if let Err(err) = task.await {
                warn!(stage, error = %err, "after-hook failed");
            }
        });
    }

    pub async fn before_create(&self, attrs: LobbyAttrs) -> Result<LobbyAttrs> {
        let hooks = self.hooks.clone();
        self.run_before("create", async move { hooks.before_create(attrs).await })
            .await
    }

    pub fn after_create(&self, lobby: Lobby) {
        let hooks = self.hooks.clone();
        Self::detach("create", async move { hooks.after_create(lobby).await });
    }

    pub async fn before_join(&self, action: MemberAction) -> Result<MemberAction> {
        let hooks = self.hooks.clone();
        self.run_before("join", async move { hooks.before_join(action).await })
            .await
    }

    pub fn after_join(&self, action: MemberAction) {
        let hooks = self.hooks.clone();
        Self::detach("join", async move { hooks.after_join(action).await });
    }

    pub async fn before_leave(&self, action: MemberAction) -> Result<MemberAction> {
        let hooks = self.hooks.clone();
        self.run_before("leave", async move { hooks.before_leave(action).await })
            .await
    }

    pub fn after_leave(&self, action: MemberAction) {
        let hooks = self.hooks.clone();
        Self::detach("leave", async move { hooks.after_leave(action).await });
    }

    pub async fn before_kick(&self, action: MemberAction) -> Result<MemberAction> {
        let hooks = self.hooks.clone();
        self.run_before("kick", async move { hooks.before_kick(action).await })
            .await
    }

    pub fn after_kick(&self, action: MemberAction) {
        let hooks = self.hooks.clone();
        Self::detach("kick", async move { hooks.after_kick(action).await });
    }

    pub async fn before_update(&self, attrs: Value) -> Result<Value> {
        let hooks = self.hooks.clone();
        self.run_before("update", async move { hooks.before_update(attrs).await })
            .await
    }

    pub fn after_update(&self, lobby: Lobby) {
        let hooks = self.hooks.clone();
        Self::detach("update", async move { hooks.after_update(lobby).await });
    }

    pub async fn before_delete(&self, lobby_id: Uuid) -> Result<Uuid> {
        let hooks = self.hooks.clone();
        self.run_before("delete", async move { hooks.before_delete(lobby_id).await })
            .await
    }

    pub fn after_delete(&self, lobby_id: Uuid) {
        let hooks = self.hooks.clone();
        Self::detach("delete", async move { hooks.after_delete(lobby_id).await });
    }
}
