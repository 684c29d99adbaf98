use crate::generation::TextGenerator;
use crate::identity::{CallerIdentity, IdentityProvider};
use crate::lifecycle::{LocalStore, QuizLifecycle};
use crate::models::{DecodeError, Question};
use crate::repo::QuizRepository;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

/// Account record for an externally authenticated caller. Created lazily on
/// the first article save; the subject id comes from the identity provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub subject: String,
    pub name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub content: String,
    pub summary: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One stored multiple-choice question. `options` holds the serialized
/// option list; `answer` holds the correct index in string form. The option
/// order must never be reshuffled after storage or `answer` silently breaks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizRow {
    pub id: i64,
    pub article_id: i64,
    pub question: String,
    pub options: String,
    pub answer: String,
}

impl QuizRow {
    pub fn decode(&self) -> Result<Question, DecodeError> {
        crate::models::decode_question(&self.question, &self.options, &self.answer)
    }
}

/// Append-only log entry; never updated after insertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizAttempt {
    pub id: i64,
    pub user_id: i64,
    pub quiz_id: i64,
    pub total_score: u32,
    pub created_at: DateTime<Utc>,
}

/// Best-score cache; at most one row per (user, quiz) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserScore {
    pub id: i64,
    pub user_id: i64,
    pub quiz_id: i64,
    pub total_score: u32,
}

pub struct InMemoryDb {
    pub users: RwLock<HashMap<i64, User>>,
    pub users_by_subject: RwLock<HashMap<String, i64>>,
    pub articles: RwLock<HashMap<i64, Article>>,
    pub quizzes: RwLock<HashMap<i64, QuizRow>>,
    pub attempts: RwLock<HashMap<i64, QuizAttempt>>,
    pub scores: RwLock<HashMap<i64, UserScore>>,
    next_user_id: AtomicI64,
    next_article_id: AtomicI64,
    next_quiz_id: AtomicI64,
    next_attempt_id: AtomicI64,
    next_score_id: AtomicI64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistentSnapshot {
    users: HashMap<i64, User>,
    users_by_subject: HashMap<String, i64>,
    articles: HashMap<i64, Article>,
    quizzes: HashMap<i64, QuizRow>,
    attempts: HashMap<i64, QuizAttempt>,
    scores: HashMap<i64, UserScore>,
    next_user_id: i64,
    next_article_id: i64,
    next_quiz_id: i64,
    next_attempt_id: i64,
    next_score_id: i64,
}

fn next_after<T>(stored: Option<i64>, keys: &HashMap<i64, T>) -> i64 {
    stored
        .unwrap_or(1)
        .max(keys.keys().max().copied().unwrap_or(0) + 1)
}

impl InMemoryDb {
    pub fn new(snapshot_path: Option<&str>) -> Self {
        let snapshot = snapshot_path.and_then(|path| {
            let raw = fs::read_to_string(path).ok()?;
            match serde_json::from_str::<PersistentSnapshot>(&raw) {
                Ok(s) => Some(s),
                Err(err) => {
                    warn!("failed to read local snapshot {}: {}", path, err);
                    None
                }
            }
        });

        let users = snapshot.as_ref().map(|s| s.users.clone()).unwrap_or_default();
        let users_by_subject = snapshot
            .as_ref()
            .map(|s| s.users_by_subject.clone())
            .unwrap_or_default();
        let articles = snapshot.as_ref().map(|s| s.articles.clone()).unwrap_or_default();
        let quizzes = snapshot.as_ref().map(|s| s.quizzes.clone()).unwrap_or_default();
        let attempts = snapshot.as_ref().map(|s| s.attempts.clone()).unwrap_or_default();
        let scores = snapshot.as_ref().map(|s| s.scores.clone()).unwrap_or_default();

        let next_user_id = next_after(snapshot.as_ref().map(|s| s.next_user_id), &users);
        let next_article_id = next_after(snapshot.as_ref().map(|s| s.next_article_id), &articles);
        let next_quiz_id = next_after(snapshot.as_ref().map(|s| s.next_quiz_id), &quizzes);
        let next_attempt_id = next_after(snapshot.as_ref().map(|s| s.next_attempt_id), &attempts);
        let next_score_id = next_after(snapshot.as_ref().map(|s| s.next_score_id), &scores);

        Self {
            users: RwLock::new(users),
            users_by_subject: RwLock::new(users_by_subject),
            articles: RwLock::new(articles),
            quizzes: RwLock::new(quizzes),
            attempts: RwLock::new(attempts),
            scores: RwLock::new(scores),
            next_user_id: AtomicI64::new(next_user_id),
            next_article_id: AtomicI64::new(next_article_id),
            next_quiz_id: AtomicI64::new(next_quiz_id),
            next_attempt_id: AtomicI64::new(next_attempt_id),
            next_score_id: AtomicI64::new(next_score_id),
        }
    }

    pub fn next_user_id(&self) -> i64 {
        self.next_user_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn next_article_id(&self) -> i64 {
        self.next_article_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn next_quiz_id(&self) -> i64 {
        self.next_quiz_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn next_attempt_id(&self) -> i64 {
        self.next_attempt_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn next_score_id(&self) -> i64 {
        self.next_score_id.fetch_add(1, Ordering::SeqCst)
    }

    pub(crate) async fn snapshot(&self) -> impl Serialize {
        PersistentSnapshot {
            users: self.users.read().await.clone(),
            users_by_subject: self.users_by_subject.read().await.clone(),
            articles: self.articles.read().await.clone(),
            quizzes: self.quizzes.read().await.clone(),
            attempts: self.attempts.read().await.clone(),
            scores: self.scores.read().await.clone(),
            next_user_id: self.next_user_id.load(Ordering::SeqCst),
            next_article_id: self.next_article_id.load(Ordering::SeqCst),
            next_quiz_id: self.next_quiz_id.load(Ordering::SeqCst),
            next_attempt_id: self.next_attempt_id.load(Ordering::SeqCst),
            next_score_id: self.next_score_id.load(Ordering::SeqCst),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub repo: QuizRepository,
    pub generator: Arc<dyn TextGenerator>,
    pub identity: Arc<dyn IdentityProvider>,
}

impl AppState {
    pub fn new(generator: Arc<dyn TextGenerator>, identity: Arc<dyn IdentityProvider>) -> Self {
        let local_state_path = std::env::var("LOCAL_STATE_PATH")
            .ok()
            .filter(|v| !v.trim().is_empty());
        Self::with_snapshot_path(generator, identity, local_state_path)
    }

    pub fn with_snapshot_path(
        generator: Arc<dyn TextGenerator>,
        identity: Arc<dyn IdentityProvider>,
        local_state_path: Option<String>,
    ) -> Self {
        let db = Arc::new(InMemoryDb::new(local_state_path.as_deref()));
        Self {
            repo: QuizRepository::new(db, local_state_path),
            generator,
            identity,
        }
    }

    /// Builds a lifecycle driver bound to one caller, sharing this state's
    /// generator and repository.
    pub fn lifecycle_for(&self, identity: CallerIdentity) -> QuizLifecycle {
        QuizLifecycle::new(
            self.generator.clone(),
            Arc::new(LocalStore::new(self.repo.clone(), identity)),
        )
    }
}
