//! 客户端会话管理器：恢复、登录、到期登出与状态广播。

use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use postboard::client::{PersistedSession, SessionManager, SessionStorage};
use tempfile::TempDir;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

fn storage_in(dir: &TempDir) -> SessionStorage {
    SessionStorage::new(dir.path().join("session.json"))
}

// 不会被访问到的地址，作为无需网络的用例的 api_base
const UNREACHABLE_API: &str = "http://127.0.0.1:9/api";

#[tokio::test]
async fn restore_with_future_expiry_authenticates() {
    let dir = TempDir::new().unwrap();
    let storage = storage_in(&dir);
    storage
        .save(&PersistedSession {
            token: "signed-token".into(),
            expiration: Utc::now() + Duration::seconds(3600),
            user_id: "user-1".into(),
        })
        .unwrap();

    let manager = SessionManager::new(UNREACHABLE_API, storage);
    manager.restore_session();

    assert!(manager.is_authenticated());
    assert_eq!(manager.token().as_deref(), Some("signed-token"));
    assert_eq!(manager.user_id().as_deref(), Some("user-1"));
    assert!(*manager.subscribe().borrow());
}

#[tokio::test]
async fn restore_with_past_expiry_stays_logged_out_and_clears_the_file() {
    let dir = TempDir::new().unwrap();
    let storage = storage_in(&dir);
    storage
        .save(&PersistedSession {
            token: "signed-token".into(),
            expiration: Utc::now() - Duration::seconds(1),
            user_id: "user-1".into(),
        })
        .unwrap();

    let manager = SessionManager::new(UNREACHABLE_API, storage.clone());
    manager.restore_session();

    assert!(!manager.is_authenticated());
    assert!(!*manager.subscribe().borrow());
    assert_eq!(storage.load().unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn expiry_timer_forces_logout() {
    let dir = TempDir::new().unwrap();
    let storage = storage_in(&dir);
    storage
        .save(&PersistedSession {
            token: "signed-token".into(),
            expiration: Utc::now() + Duration::seconds(3600),
            user_id: "user-1".into(),
        })
        .unwrap();

    let manager = SessionManager::new(UNREACHABLE_API, storage.clone());
    manager.restore_session();
    assert!(manager.is_authenticated());

    let mut status = manager.subscribe();
    tokio::time::advance(StdDuration::from_secs(3601)).await;
    status.changed().await.unwrap();

    assert!(!*status.borrow());
    assert!(!manager.is_authenticated());
    assert_eq!(storage.load().unwrap(), None);
}

#[tokio::test]
async fn login_persists_the_session_and_broadcasts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/user/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "token": "signed-token",
            "expiresIn": 3600,
            "userId": "user-1",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let storage = storage_in(&dir);
    let manager = SessionManager::new(format!("{}/api", server.uri()), storage.clone());

    manager.login("someone@example.com", "s3cret").await;

    assert!(manager.is_authenticated());
    assert!(*manager.subscribe().borrow());
    assert_eq!(manager.token().as_deref(), Some("signed-token"));
    assert_eq!(manager.user_id().as_deref(), Some("user-1"));

    let persisted = storage.load().unwrap().unwrap();
    assert_eq!(persisted.token, "signed-token");
    assert_eq!(persisted.user_id, "user-1");
    assert!(persisted.expiration > Utc::now());
}

#[tokio::test]
async fn failed_login_broadcasts_not_authenticated_without_erroring() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/user/login"))
        .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
            "message": "Invalid authentication credentials!",
        })))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let manager = SessionManager::new(format!("{}/api", server.uri()), storage_in(&dir));

    manager.login("someone@example.com", "wrong").await;

    assert!(!manager.is_authenticated());
    assert!(!*manager.subscribe().borrow());
    assert_eq!(manager.token(), None);
}

#[tokio::test]
async fn logout_clears_memory_and_disk() {
    let dir = TempDir::new().unwrap();
    let storage = storage_in(&dir);
    storage
        .save(&PersistedSession {
            token: "signed-token".into(),
            expiration: Utc::now() + Duration::seconds(3600),
            user_id: "user-1".into(),
        })
        .unwrap();

    let manager = SessionManager::new(UNREACHABLE_API, storage.clone());
    manager.restore_session();
    assert!(manager.is_authenticated());

    manager.logout();

    assert!(!manager.is_authenticated());
    assert!(!*manager.subscribe().borrow());
    assert_eq!(storage.load().unwrap(), None);
}
