//! Service wired against a temp-file database and a fake AI service

use chrono::{Duration as ChronoDuration, Utc};
use compliance_ai::bridge::{AiJobBridge, FsDocumentStorage};
use compliance_ai::db::{self, frameworks, users};
use compliance_ai::models::{Framework, JobUpdate};
use compliance_ai::AppState;
use compliance_common::config::ServiceConfig;
use compliance_common::events::{ExtractionStatus, SubjectKind};
use compliance_common::time;
use serde_json::Value;
use sqlx::SqlitePool;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

use super::fake_ai::{FakeAi, FakeAiScript};

pub const SECRET: &str = "test-secret";
pub const ALICE: &str = "alice";
pub const BOB: &str = "bob";

const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TestContext {
    pub state: AppState,
    pub fake: FakeAi,
    pub temp_dir: TempDir,
}

impl TestContext {
    /// Fresh database (in a temp file; in-memory SQLite is per-connection) and fake AI service
    pub async fn new(script: FakeAiScript) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let fake = FakeAi::start(script).await;

        let config = ServiceConfig {
            database_path: temp_dir.path().join("compliance.db"),
            storage_root: temp_dir.path().join("documents"),
            ai_base_url: fake.base_url.clone(),
            ai_ws_url: Some(fake.ws_url.clone()),
            jwt_secret: SECRET.to_string(),
            http_timeout_secs: 5,
            ..Default::default()
        };

        let pool = db::init_database_pool(&config.database_path).await.unwrap();
        users::upsert_user(&pool, ALICE, 0).await.unwrap();
        users::upsert_user(&pool, BOB, 0).await.unwrap();

        let storage = Arc::new(FsDocumentStorage::new(config.storage_root.clone()));
        let bridge = AiJobBridge::new(
            &config.ai_base_url,
            &config.resolved_ws_url(),
            config.http_timeout(),
            storage,
        )
        .unwrap();

        let state = AppState::new(pool, config, bridge);

        Self {
            state,
            fake,
            temp_dir,
        }
    }

    pub fn db(&self) -> &SqlitePool {
        &self.state.db
    }

    pub fn token(&self, user_id: &str) -> String {
        compliance_common::auth::issue_token(SECRET, user_id, 0, ChronoDuration::hours(1)).unwrap()
    }

    /// Store a document and register a pending framework for it
    pub async fn register_framework(&self, user_id: &str, kind: SubjectKind) -> Framework {
        let relative = format!("{}/{}.pdf", user_id, Uuid::new_v4());
        let full_path = self.state.config.storage_root.join(&relative);
        std::fs::create_dir_all(full_path.parent().unwrap()).unwrap();
        std::fs::write(&full_path, b"%PDF-1.7 test framework").unwrap();

        let framework = Framework::new(
            user_id.to_string(),
            kind,
            "framework.pdf".to_string(),
            relative,
        );
        frameworks::insert(self.db(), &framework).await.unwrap();
        framework
    }

    /// Framework whose AI job already completed with `items`
    pub async fn completed_framework(
        &self,
        user_id: &str,
        kind: SubjectKind,
        job_id: &str,
        items: Vec<Value>,
    ) -> Framework {
        let mut framework = Framework::new(
            user_id.to_string(),
            kind,
            "framework.pdf".to_string(),
            format!("{}/done.pdf", user_id),
        );
        framework
            .job
            .record_upload(job_id.to_string(), ExtractionStatus::Pending, Utc::now());
        framework
            .job
            .apply(&JobUpdate::Completed { items }, Utc::now());
        frameworks::insert(self.db(), &framework).await.unwrap();
        framework
    }

    pub async fn load_framework(&self, id: Uuid) -> Framework {
        frameworks::load(self.db(), id).await.unwrap().unwrap()
    }

    /// Pretend the framework's last status write happened `minutes` ago
    pub async fn backdate_framework(&self, id: Uuid, minutes: i64) {
        sqlx::query("UPDATE frameworks SET processed_at = ? WHERE id = ?")
            .bind(time::to_db(Utc::now() - ChronoDuration::minutes(minutes)))
            .bind(id.to_string())
            .execute(self.db())
            .await
            .unwrap();
    }

    pub async fn backdate_comparison(&self, id: Uuid, minutes: i64) {
        sqlx::query("UPDATE comparisons SET updated_at = ? WHERE id = ?")
            .bind(time::to_db(Utc::now() - ChronoDuration::minutes(minutes)))
            .bind(id.to_string())
            .execute(self.db())
            .await
            .unwrap();
    }

    /// Serve the full router on an ephemeral port
    pub async fn serve(&self) -> SocketAddr {
        let app = compliance_ai::build_router(self.state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }
}

/// Poll `condition` until it holds; panics after a few seconds
pub async fn wait_until<F, Fut>(what: &str, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
    while !condition().await {
        if tokio::time::Instant::now() > deadline {
            panic!("Timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Next notification delivered to a registry receiver, parsed
pub async fn next_frame(rx: &mut UnboundedReceiver<Arc<str>>) -> Value {
    let frame = tokio::time::timeout(WAIT_TIMEOUT, rx.recv())
        .await
        .expect("no notification delivered")
        .expect("registry dropped");
    serde_json::from_str(&frame).unwrap()
}

/// True if nothing arrives within `millis`
pub async fn no_frame_within(rx: &mut UnboundedReceiver<Arc<str>>, millis: u64) -> bool {
    tokio::time::timeout(Duration::from_millis(millis), rx.recv())
        .await
        .is_err()
}
