use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::{sync::watch, task::JoinHandle};

use super::{ClientError, PersistedSession, SessionStorage};

#[derive(Debug, Serialize)]
struct AuthRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
    #[serde(rename = "expiresIn")]
    expires_in: i64,
    #[serde(rename = "userId")]
    user_id: String,
}

#[derive(Debug, Clone)]
struct ActiveSession {
    token: String,
    user_id: String,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct SessionState {
    session: Option<ActiveSession>,
    timer: Option<JoinHandle<()>>,
}

struct SessionInner {
    http: reqwest::Client,
    api_base: String,
    storage: SessionStorage,
    auth_tx: watch::Sender<bool>,
    state: Mutex<SessionState>,
}

/// 客户端会话管理器：持有令牌、到期定时器与认证状态广播。
/// 句柄可克隆，内部状态共享；同一客户端进程只应创建一个。
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionInner>,
}

impl SessionManager {
    pub fn new(api_base: impl Into<String>, storage: SessionStorage) -> Self {
        let api_base: String = api_base.into();
        let (auth_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(SessionInner {
                http: reqwest::Client::new(),
                api_base: api_base.trim_end_matches('/').to_string(),
                storage,
                auth_tx,
                state: Mutex::new(SessionState::default()),
            }),
        }
    }

    /// 订阅认证状态；丢弃接收端即取消订阅
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.inner.auth_tx.subscribe()
    }

    pub fn is_authenticated(&self) -> bool {
        self.lock().session.is_some()
    }

    pub fn token(&self) -> Option<String> {
        self.lock().session.as_ref().map(|s| s.token.clone())
    }

    pub fn user_id(&self) -> Option<String> {
        self.lock().session.as_ref().map(|s| s.user_id.clone())
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.lock().session.as_ref().map(|s| s.expires_at)
    }

    pub async fn signup(&self, email: &str, password: &str) -> Result<(), ClientError> {
        let response = self
            .inner
            .http
            .post(format!("{}/user/signup", self.inner.api_base))
            .json(&AuthRequest { email, password })
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ClientError::Rejected(response.status().as_u16()));
        }
        Ok(())
    }

    /// 登录失败不向调用方抛错，只广播未认证状态
    pub async fn login(&self, email: &str, password: &str) {
        match self.request_login(email, password).await {
            Ok(login) => {
                let expires_in = login.expires_in.max(0);
                let expires_at = Utc::now() + Duration::seconds(expires_in);
                let persisted = PersistedSession {
                    token: login.token.clone(),
                    expiration: expires_at,
                    user_id: login.user_id.clone(),
                };
                if let Err(e) = self.inner.storage.save(&persisted) {
                    tracing::warn!("Failed to persist session: {}", e);
                }
                self.activate(
                    ActiveSession {
                        token: login.token,
                        user_id: login.user_id,
                        expires_at,
                    },
                    expires_in as u64,
                );
            }
            Err(e) => {
                tracing::debug!("Login failed: {}", e);
                self.clear_session();
            }
        }
    }

    async fn request_login(
        &self,
        email: &str,
        password: &str,
    ) -> Result<LoginResponse, ClientError> {
        let response = self
            .inner
            .http
            .post(format!("{}/user/login", self.inner.api_base))
            .json(&AuthRequest { email, password })
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ClientError::Rejected(response.status().as_u16()));
        }
        Ok(response.json().await?)
    }

    /// 客户端启动时调用一次：恢复未过期的持久化会话，过期的清掉
    pub fn restore_session(&self) {
        let persisted = match self.inner.storage.load() {
            Ok(Some(persisted)) => persisted,
            Ok(None) => {
                self.inner.auth_tx.send_replace(false);
                return;
            }
            Err(e) => {
                tracing::warn!("Failed to read persisted session: {}", e);
                self.inner.auth_tx.send_replace(false);
                return;
            }
        };

        let remaining = (persisted.expiration - Utc::now()).num_seconds();
        if remaining > 0 {
            self.activate(
                ActiveSession {
                    token: persisted.token,
                    user_id: persisted.user_id,
                    expires_at: persisted.expiration,
                },
                remaining as u64,
            );
        } else {
            if let Err(e) = self.inner.storage.clear() {
                tracing::warn!("Failed to clear expired session: {}", e);
            }
            self.inner.auth_tx.send_replace(false);
        }
    }

    pub fn logout(&self) {
        if let Err(e) = self.inner.storage.clear() {
            tracing::warn!("Failed to clear persisted session: {}", e);
        }
        self.clear_session();
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.inner.state.lock().expect("session state lock poisoned")
    }

    // 写入会话、换定时器并广播，全部在一次持锁内完成，
    // 订阅方不会观察到状态与广播不一致的窗口
    fn activate(&self, session: ActiveSession, expires_in_secs: u64) {
        let timer = self.spawn_expiry_timer(expires_in_secs);
        let mut state = self.lock();
        if let Some(old) = state.timer.take() {
            old.abort();
        }
        state.session = Some(session);
        state.timer = Some(timer);
        self.inner.auth_tx.send_replace(true);
    }

    fn clear_session(&self) {
        let mut state = self.lock();
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        state.session = None;
        self.inner.auth_tx.send_replace(false);
    }

    // 到期强制登出；不走 logout()，避免任务中止自身
    fn spawn_expiry_timer(&self, secs: u64) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(StdDuration::from_secs(secs)).await;
            tracing::debug!("Session expired, logging out");
            if let Err(e) = manager.inner.storage.clear() {
                tracing::warn!("Failed to clear persisted session: {}", e);
            }
            let mut state = manager.lock();
            state.timer = None;
            state.session = None;
            manager.inner.auth_tx.send_replace(false);
        })
    }
}
