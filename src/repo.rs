use crate::identity::CallerIdentity;
use crate::models::{encode_options, validate_questions, Question, ValidationIssue};
use crate::state::{Article, InMemoryDb, QuizAttempt, QuizRow, User, UserScore};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("not found")]
    NotFound,
    #[error("validation failed")]
    Validation(Vec<ValidationIssue>),
}

#[derive(Debug, Clone, Serialize)]
pub struct ArticleWithQuizzes {
    #[serde(flatten)]
    pub article: Article,
    pub quizzes: Vec<QuizRow>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttemptWithQuiz {
    #[serde(flatten)]
    pub attempt: QuizAttempt,
    pub quiz: QuizRow,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArticleUpdate {
    pub title: Option<String>,
    pub content: Option<String>,
    pub summary: Option<String>,
}

fn require_non_empty(field: &'static str, value: &str, issues: &mut Vec<ValidationIssue>) {
    if value.trim().is_empty() {
        issues.push(ValidationIssue {
            field: field.to_string(),
            issue: "must not be empty".into(),
        });
    }
}

/// Persistence operations over users, articles, quiz rows, attempts and the
/// best-score cache. Every mutation and single-item read is scoped to the
/// owning user; list reads are pre-filtered.
#[derive(Clone)]
pub struct QuizRepository {
    db: Arc<InMemoryDb>,
    snapshot_path: Option<String>,
}

impl QuizRepository {
    pub fn new(db: Arc<InMemoryDb>, snapshot_path: Option<String>) -> Self {
        Self { db, snapshot_path }
    }

    pub async fn find_user_by_subject(&self, subject: &str) -> Option<User> {
        let id = *self.db.users_by_subject.read().await.get(subject)?;
        self.db.users.read().await.get(&id).cloned()
    }

    /// Creates the user record on first authenticated save, refreshing
    /// name/email on later ones. Nothing else about a user is ever mutated.
    pub async fn find_or_create_user(&self, identity: &CallerIdentity) -> User {
        if let Some(existing) = self.find_user_by_subject(&identity.subject).await {
            let name = identity.name.clone().unwrap_or_else(|| existing.name.clone());
            let email = identity.email.clone().unwrap_or_else(|| existing.email.clone());
            if name != existing.name || email != existing.email {
                let mut users = self.db.users.write().await;
                if let Some(user) = users.get_mut(&existing.id) {
                    user.name = name;
                    user.email = email;
                    let refreshed = user.clone();
                    drop(users);
                    self.persist().await;
                    return refreshed;
                }
            }
            return existing;
        }

        let user = User {
            id: self.db.next_user_id(),
            subject: identity.subject.clone(),
            name: identity.name.clone().unwrap_or_else(|| "Unknown User".to_string()),
            email: identity
                .email
                .clone()
                .unwrap_or_else(|| "unknown@email.com".to_string()),
            created_at: Utc::now(),
        };
        self.db.users.write().await.insert(user.id, user.clone());
        self.db
            .users_by_subject
            .write()
            .await
            .insert(user.subject.clone(), user.id);
        self.persist().await;
        user
    }

    async fn quizzes_for(&self, article_id: i64) -> Vec<QuizRow> {
        let quizzes = self.db.quizzes.read().await;
        let mut rows: Vec<QuizRow> = quizzes
            .values()
            .filter(|q| q.article_id == article_id)
            .cloned()
            .collect();
        rows.sort_by_key(|q| q.id);
        rows
    }

    pub async fn list_articles(&self, user_id: i64) -> Vec<ArticleWithQuizzes> {
        let mut articles: Vec<Article> = self
            .db
            .articles
            .read()
            .await
            .values()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect();
        articles.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let mut out = Vec::with_capacity(articles.len());
        for article in articles {
            let quizzes = self.quizzes_for(article.id).await;
            out.push(ArticleWithQuizzes { article, quizzes });
        }
        out
    }

    pub async fn create_article(
        &self,
        user_id: i64,
        title: &str,
        content: &str,
        summary: &str,
    ) -> Result<ArticleWithQuizzes, RepoError> {
        let mut issues = Vec::new();
        require_non_empty("title", title, &mut issues);
        require_non_empty("content", content, &mut issues);
        require_non_empty("summary", summary, &mut issues);
        if !issues.is_empty() {
            return Err(RepoError::Validation(issues));
        }

        let now = Utc::now();
        let article = Article {
            id: self.db.next_article_id(),
            user_id,
            title: title.to_string(),
            content: content.to_string(),
            summary: summary.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.db.articles.write().await.insert(article.id, article.clone());
        self.persist().await;
        Ok(ArticleWithQuizzes {
            article,
            quizzes: Vec::new(),
        })
    }

    async fn owned_article(&self, user_id: i64, id: i64) -> Result<Article, RepoError> {
        self.db
            .articles
            .read()
            .await
            .get(&id)
            .filter(|a| a.user_id == user_id)
            .cloned()
            .ok_or(RepoError::NotFound)
    }

    pub async fn get_article(&self, user_id: i64, id: i64) -> Result<ArticleWithQuizzes, RepoError> {
        let article = self.owned_article(user_id, id).await?;
        let quizzes = self.quizzes_for(article.id).await;
        Ok(ArticleWithQuizzes { article, quizzes })
    }

    /// Partial update; only supplied fields are overwritten, the update
    /// timestamp always refreshes.
    pub async fn update_article(
        &self,
        user_id: i64,
        id: i64,
        fields: ArticleUpdate,
    ) -> Result<ArticleWithQuizzes, RepoError> {
        let updated = {
            let mut articles = self.db.articles.write().await;
            let article = articles
                .get_mut(&id)
                .filter(|a| a.user_id == user_id)
                .ok_or(RepoError::NotFound)?;
            if let Some(title) = fields.title.filter(|v| !v.trim().is_empty()) {
                article.title = title;
            }
            if let Some(content) = fields.content.filter(|v| !v.trim().is_empty()) {
                article.content = content;
            }
            if let Some(summary) = fields.summary.filter(|v| !v.trim().is_empty()) {
                article.summary = summary;
            }
            article.updated_at = Utc::now();
            article.clone()
        };
        self.persist().await;
        let quizzes = self.quizzes_for(updated.id).await;
        Ok(ArticleWithQuizzes {
            article: updated,
            quizzes,
        })
    }

    /// Removes the article together with its quiz rows, their attempts and
    /// their score caches, mirroring the store's foreign-key cascade.
    pub async fn delete_article(&self, user_id: i64, id: i64) -> Result<(), RepoError> {
        self.owned_article(user_id, id).await?;

        let mut articles = self.db.articles.write().await;
        let mut quizzes = self.db.quizzes.write().await;
        let mut attempts = self.db.attempts.write().await;
        let mut scores = self.db.scores.write().await;

        articles.remove(&id);
        let quiz_ids: Vec<i64> = quizzes
            .values()
            .filter(|q| q.article_id == id)
            .map(|q| q.id)
            .collect();
        quizzes.retain(|_, q| q.article_id != id);
        attempts.retain(|_, a| !quiz_ids.contains(&a.quiz_id));
        scores.retain(|_, s| !quiz_ids.contains(&s.quiz_id));

        drop((articles, quizzes, attempts, scores));
        self.persist().await;
        Ok(())
    }

    /// Regeneration contract: the previous question set for the article is
    /// discarded and the new one inserted under a single table write lock,
    /// so no reader observes an empty or mixed set.
    pub async fn replace_questions(
        &self,
        user_id: i64,
        article_id: i64,
        questions: &[Question],
    ) -> Result<Vec<QuizRow>, RepoError> {
        self.owned_article(user_id, article_id).await?;
        validate_questions(questions).map_err(RepoError::Validation)?;

        let created = {
            let mut quizzes = self.db.quizzes.write().await;
            quizzes.retain(|_, q| q.article_id != article_id);
            let mut created = Vec::with_capacity(questions.len());
            for q in questions {
                let row = QuizRow {
                    id: self.db.next_quiz_id(),
                    article_id,
                    question: q.question.clone(),
                    options: encode_options(&q.options),
                    answer: q.correct.to_string(),
                };
                quizzes.insert(row.id, row.clone());
                created.push(row);
            }
            created
        };
        self.persist().await;
        Ok(created)
    }

    /// Appends an attempt and applies the best-score retention rule: the
    /// cache moves only on a strictly greater score, every attempt is logged
    /// regardless. The scores write lock is held across read-and-compare so
    /// concurrent submissions cannot lose an update.
    pub async fn record_attempt(
        &self,
        user_id: i64,
        quiz_id: i64,
        score: u32,
    ) -> Result<QuizAttempt, RepoError> {
        let anchor_article = {
            let quizzes = self.db.quizzes.read().await;
            quizzes.get(&quiz_id).map(|q| q.article_id).ok_or(RepoError::NotFound)?
        };
        self.owned_article(user_id, anchor_article).await?;

        let attempt = QuizAttempt {
            id: self.db.next_attempt_id(),
            user_id,
            quiz_id,
            total_score: score,
            created_at: Utc::now(),
        };
        self.db.attempts.write().await.insert(attempt.id, attempt.clone());

        {
            let mut scores = self.db.scores.write().await;
            match scores
                .values_mut()
                .find(|s| s.user_id == user_id && s.quiz_id == quiz_id)
            {
                Some(existing) => {
                    if score > existing.total_score {
                        existing.total_score = score;
                    }
                }
                None => {
                    let row = UserScore {
                        id: self.db.next_score_id(),
                        user_id,
                        quiz_id,
                        total_score: score,
                    };
                    scores.insert(row.id, row);
                }
            }
        }

        self.persist().await;
        Ok(attempt)
    }

    pub async fn best_score(&self, user_id: i64, quiz_id: i64) -> Option<u32> {
        self.db
            .scores
            .read()
            .await
            .values()
            .find(|s| s.user_id == user_id && s.quiz_id == quiz_id)
            .map(|s| s.total_score)
    }

    /// The caller's attempts against any quiz row of the article, most
    /// recent first, each joined with its anchor row.
    pub async fn list_attempts(&self, user_id: i64, article_id: i64) -> Vec<AttemptWithQuiz> {
        let quizzes = self.db.quizzes.read().await;
        let attempts = self.db.attempts.read().await;
        let mut rows: Vec<AttemptWithQuiz> = attempts
            .values()
            .filter(|a| a.user_id == user_id)
            .filter_map(|a| {
                let quiz = quizzes.get(&a.quiz_id)?;
                (quiz.article_id == article_id).then(|| AttemptWithQuiz {
                    attempt: a.clone(),
                    quiz: quiz.clone(),
                })
            })
            .collect();
        rows.sort_by(|a, b| b.attempt.id.cmp(&a.attempt.id));
        rows
    }

    async fn persist(&self) {
        let Some(path) = self.snapshot_path.as_ref() else {
            return;
        };
        let snapshot = self.db.snapshot().await;
        let serialized = match serde_json::to_vec_pretty(&snapshot) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!("failed to serialize local snapshot: {}", err);
                return;
            }
        };
        if let Some(parent) = Path::new(path).parent() {
            if let Err(err) = tokio::fs::create_dir_all(parent).await {
                warn!("failed to create snapshot directory: {}", err);
                return;
            }
        }
        if let Err(err) = tokio::fs::write(path, serialized).await {
            warn!("failed to persist local snapshot {}: {}", path, err);
        }
    }
}
