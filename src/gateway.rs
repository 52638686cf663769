//! ChatGateway: front-end adapter between a chat surface and the assistant.
//!
//! Per inbound message it resolves (or creates) the conversation thread bound
//! to the external thread id, runs the turn, and turns any failure into a
//! static reply after a fixed number of attempts. Turns on the same external
//! id are serialized; different ids run in parallel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{error, info, instrument, warn};

use crate::assistant::{AssistantService, ConversationSession, RunDriver, ThreadMessage, ToolInvocation};
use crate::error::{GatewayError, StoreError};
use crate::store::ThreadStore;

/// ユーザーに見せる唯一のエラー文言 (内部エラーの詳細は出さない)
pub const FALLBACK_REPLY: &str = "An error occurred. Please try again later.";

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayPolicy {
    pub max_attempts: u32,
    /// Pause between failed attempts.
    pub retry_delay: Duration,
}

impl Default for GatewayPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, retry_delay: Duration::from_secs(1) }
    }
}

/// What the front-end renders for one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayReply {
    pub text: String,
    /// Tool calls answered during the successful attempt.
    pub tool_calls: Vec<ToolInvocation>,
    pub attempts: u32,
    /// `true` when `text` is `FALLBACK_REPLY`.
    pub failed: bool,
}

type LockMap = Mutex<HashMap<String, Arc<AsyncMutex<()>>>>;

pub struct ChatGateway<S> {
    driver: RunDriver<S>,
    store: Arc<ThreadStore>,
    assistant_id: String,
    policy: GatewayPolicy,
    locks: LockMap,
}

/// 外部 id ごとの排他。drop 時に他の保持者・待機者がいなければマップから外す。
struct KeyLease<'a> {
    locks: &'a LockMap,
    key: String,
    lock: Arc<AsyncMutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyLease<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        // マップ側の参照と自分の参照だけが残っている
        let idle = Arc::strong_count(&self.lock) == 2
            && locks.get(&self.key).is_some_and(|held| Arc::ptr_eq(held, &self.lock));
        if idle {
            locks.remove(&self.key);
        }
    }
}

impl<S: AssistantService> ChatGateway<S> {
    pub fn new(driver: RunDriver<S>, store: Arc<ThreadStore>, assistant_id: impl Into<String>) -> Self {
        Self {
            driver,
            store,
            assistant_id: assistant_id.into(),
            policy: GatewayPolicy::default(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_policy(mut self, policy: GatewayPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn store(&self) -> &Arc<ThreadStore> {
        &self.store
    }

    async fn acquire(&self, external_id: &str) -> KeyLease<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
            Arc::clone(locks.entry(external_id.to_string()).or_default())
        };
        let mut lease = KeyLease { locks: &self.locks, key: external_id.to_string(), lock, guard: None };
        lease.guard = Some(Arc::clone(&lease.lock).lock_owned().await);
        lease
    }

    #[cfg(test)]
    fn lock_count(&self) -> usize {
        self.locks.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    /// Handle one inbound message.
    ///
    /// Turn failures are retried up to `max_attempts` and then replaced by
    /// `FALLBACK_REPLY`; only store failures are returned as errors.
    #[instrument(name = "gateway_message", skip(self, text))]
    pub async fn handle_message(&self, external_id: &str, text: &str) -> Result<GatewayReply, StoreError> {
        let _lease = self.acquire(external_id).await;

        let max_attempts = self.policy.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            match self.run_turn(external_id, text).await {
                Ok((text, tool_calls)) => {
                    info!(target: "gateway", external_id, attempt, "reply_sent");
                    return Ok(GatewayReply { text, tool_calls, attempts: attempt, failed: false });
                }
                Err(GatewayError::Store(e)) => {
                    error!(target: "gateway", external_id, error = %e, "thread_store_failed");
                    return Err(e);
                }
                Err(e) => {
                    warn!(target: "gateway", external_id, attempt, max_attempts, error = %e, "turn_failed");
                    if attempt < max_attempts {
                        tokio::time::sleep(self.policy.retry_delay).await;
                    }
                }
            }
        }
        error!(target: "gateway", external_id, max_attempts, "giving_up_with_fallback_reply");
        Ok(GatewayReply { text: FALLBACK_REPLY.to_string(), tool_calls: Vec::new(), attempts: max_attempts, failed: true })
    }

    async fn run_turn(&self, external_id: &str, text: &str) -> Result<(String, Vec<ToolInvocation>), GatewayError> {
        let mut session = self.session_for(external_id).await?;
        let reply = session.send_message(text).await?;
        Ok((reply, session.tool_calls().to_vec()))
    }

    /// Session bound to `external_id`, creating the remote thread and the
    /// mapping on first use. 呼び出し側でキーのロックを保持していること。
    async fn session_for(&self, external_id: &str) -> Result<ConversationSession<S>, GatewayError> {
        let session = match self.store.lookup(external_id)? {
            Some(thread_id) => ConversationSession::resume(self.driver.clone(), &self.assistant_id, thread_id),
            None => {
                let session = ConversationSession::open(self.driver.clone(), &self.assistant_id).await?;
                self.store.create(external_id, session.thread_id())?;
                info!(target: "gateway", external_id, thread_id = session.thread_id(), "thread_mapping_created");
                session
            }
        };
        self.store.touch(external_id)?;
        Ok(session)
    }

    /// Delete the newest message of the thread bound to `external_id`.
    pub async fn remove_last(&self, external_id: &str) -> Result<ThreadMessage, GatewayError> {
        let _lease = self.acquire(external_id).await;

        let thread_id = self
            .store
            .lookup(external_id)?
            .ok_or_else(|| GatewayError::NoThreadMapping { external_id: external_id.to_string() })?;
        let session = ConversationSession::resume(self.driver.clone(), &self.assistant_id, thread_id);
        let removed = session.remove_last_message().await?;
        self.store.touch(external_id)?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistant::mock::ScriptedAssistant;
    use crate::plugins::PluginRegistry;

    fn gateway(svc: &Arc<ScriptedAssistant>) -> ChatGateway<ScriptedAssistant> {
        let driver = RunDriver::new(Arc::clone(svc), Arc::new(PluginRegistry::new()));
        let store = Arc::new(ThreadStore::in_memory().unwrap());
        ChatGateway::new(driver, store, "asst")
    }

    #[tokio::test(start_paused = true)]
    async fn same_external_id_reuses_thread() {
        let svc = Arc::new(ScriptedAssistant::new().with_default_reply("ok"));
        let gw = gateway(&svc);

        gw.handle_message("T1", "one").await.unwrap();
        let first = gw.store().lookup("T1").unwrap().unwrap();
        gw.handle_message("T1", "two").await.unwrap();
        assert_eq!(gw.store().lookup("T1").unwrap().unwrap(), first);
        assert_eq!(svc.thread_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn remove_last_without_mapping_names_the_external_id() {
        let svc = Arc::new(ScriptedAssistant::new());
        let gw = gateway(&svc);
        let err = gw.remove_last("nope").await.unwrap_err();
        assert!(matches!(&err, GatewayError::NoThreadMapping { external_id } if external_id == "nope"));
        assert_eq!(svc.thread_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn finished_turns_release_their_locks() {
        let svc = Arc::new(ScriptedAssistant::new().with_default_reply("ok"));
        let gw = gateway(&svc);

        for i in 0..200 {
            gw.handle_message(&format!("slack:{i}"), "hi").await.unwrap();
        }
        assert_eq!(gw.lock_count(), 0);

        let (a, b) = tokio::join!(gw.handle_message("slack:0", "again"), gw.handle_message("slack:0", "and again"));
        assert!(!a.unwrap().failed && !b.unwrap().failed);
        assert_eq!(gw.lock_count(), 0);

        gw.remove_last("slack:1").await.unwrap();
        gw.remove_last("unknown").await.unwrap_err();
        assert_eq!(gw.lock_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_turn_keeps_the_lock_entry() {
        let svc = Arc::new(ScriptedAssistant::new().with_default_reply("ok"));
        let gw = gateway(&svc);

        let held = gw.acquire("T1").await;
        let waiting = gw.handle_message("T1", "queued");
        tokio::pin!(waiting);
        // 保持中は待機側が先に進めない
        assert!(tokio::time::timeout(Duration::from_secs(5), &mut waiting).await.is_err());
        drop(held);
        assert_eq!(gw.lock_count(), 1, "the waiter still references the entry");

        waiting.await.unwrap();
        assert_eq!(gw.lock_count(), 0);
    }
}
