use crate::error::{AppError, ErrorDetail};
use crate::identity::CallerIdentity;
use crate::models::{Question, ValidationIssue};
use crate::repo::{ArticleUpdate, RepoError};
use crate::state::{AppState, User};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use axum_extra::extract::cookie::CookieJar;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::json;
use std::time::{Duration, Instant};

static RATE_LIMIT: Lazy<DashMap<String, (u32, Instant)>> = Lazy::new(DashMap::new);

fn check_rate_limit(scope: &str, key: &str, limit_per_minute: u32) -> bool {
    let now = Instant::now();
    let full_key = format!("{scope}:{key}");
    if let Some(mut entry) = RATE_LIMIT.get_mut(&full_key) {
        if now.duration_since(entry.1) > Duration::from_secs(60) {
            *entry = (1, now);
            true
        } else if entry.0 >= limit_per_minute {
            false
        } else {
            entry.0 += 1;
            true
        }
    } else {
        RATE_LIMIT.insert(full_key, (1, now));
        true
    }
}

fn request_id_from_headers(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

fn client_ip(headers: &HeaderMap) -> &str {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("local")
}

fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
    jar: &CookieJar,
    req_id: &str,
) -> Result<CallerIdentity, AppError> {
    state
        .identity
        .resolve(headers, jar)
        .ok_or_else(|| AppError::unauthorized(req_id))
}

async fn current_user(state: &AppState, identity: &CallerIdentity, req_id: &str) -> Result<User, AppError> {
    state
        .repo
        .find_user_by_subject(&identity.subject)
        .await
        .ok_or_else(|| AppError::not_found("user not found", req_id))
}

fn issue_details(issues: Vec<ValidationIssue>) -> Vec<ErrorDetail> {
    issues
        .into_iter()
        .map(|i| ErrorDetail {
            field: i.field,
            issue: i.issue,
        })
        .collect()
}

fn map_repo_err(err: RepoError, not_found_message: &str, req_id: &str) -> AppError {
    match err {
        RepoError::NotFound => AppError::not_found(not_found_message, req_id),
        RepoError::Validation(issues) => {
            AppError::validation("validation failed", req_id).with_details(issue_details(issues))
        }
    }
}

pub async fn list_articles(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Json<serde_json::Value>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let identity = authenticate(&state, &headers, &jar, &req_id)?;
    let user = current_user(&state, &identity, &req_id).await?;
    let articles = state.repo.list_articles(user.id).await;
    Ok(Json(json!({ "articles": articles })))
}

#[derive(Debug, Deserialize)]
pub struct CreateArticlePayload {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
}

pub async fn create_article(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(payload): Json<CreateArticlePayload>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let req_id = request_id_from_headers(&headers);
    if !check_rate_limit("articles_create", client_ip(&headers), 20) {
        return Err(AppError::rate_limited(req_id));
    }
    let identity = authenticate(&state, &headers, &jar, &req_id)?;

    let (Some(title), Some(content), Some(summary)) = (payload.title, payload.content, payload.summary)
    else {
        return Err(AppError::validation(
            "title, content, and summary are required",
            req_id,
        ));
    };

    // First authenticated save provisions the user record.
    let user = state.repo.find_or_create_user(&identity).await;
    let article = state
        .repo
        .create_article(user.id, &title, &content, &summary)
        .await
        .map_err(|e| map_repo_err(e, "article not found", &req_id))?;
    Ok((StatusCode::CREATED, Json(json!({ "article": article }))))
}

pub async fn get_article(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let identity = authenticate(&state, &headers, &jar, &req_id)?;
    let user = current_user(&state, &identity, &req_id).await?;
    let article = state
        .repo
        .get_article(user.id, id)
        .await
        .map_err(|e| map_repo_err(e, "article not found", &req_id))?;
    Ok(Json(json!({ "article": article })))
}

pub async fn update_article(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Path(id): Path<i64>,
    Json(payload): Json<ArticleUpdate>,
) -> Result<Json<serde_json::Value>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let identity = authenticate(&state, &headers, &jar, &req_id)?;
    let user = current_user(&state, &identity, &req_id).await?;
    let article = state
        .repo
        .update_article(user.id, id, payload)
        .await
        .map_err(|e| map_repo_err(e, "article not found", &req_id))?;
    Ok(Json(json!({ "article": article })))
}

pub async fn delete_article(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let identity = authenticate(&state, &headers, &jar, &req_id)?;
    let user = current_user(&state, &identity, &req_id).await?;
    state
        .repo
        .delete_article(user.id, id)
        .await
        .map_err(|e| map_repo_err(e, "article not found", &req_id))?;
    Ok(Json(json!({
        "success": true,
        "message": "Article deleted successfully"
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveQuizPayload {
    #[serde(default)]
    pub article_id: Option<i64>,
    #[serde(default)]
    pub questions: Option<Vec<Question>>,
}

pub async fn save_quiz(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(payload): Json<SaveQuizPayload>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let req_id = request_id_from_headers(&headers);
    if !check_rate_limit("quiz_save", client_ip(&headers), 15) {
        return Err(AppError::rate_limited(req_id));
    }
    let identity = authenticate(&state, &headers, &jar, &req_id)?;
    let user = current_user(&state, &identity, &req_id).await?;

    let (Some(article_id), Some(questions)) = (payload.article_id, payload.questions) else {
        return Err(AppError::validation(
            "articleId and questions array are required",
            req_id,
        ));
    };

    let quizzes = state
        .repo
        .replace_questions(user.id, article_id, &questions)
        .await
        .map_err(|e| map_repo_err(e, "article not found", &req_id))?;
    Ok((StatusCode::CREATED, Json(json!({ "quizzes": quizzes }))))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAttemptPayload {
    #[serde(default)]
    pub quiz_id: Option<i64>,
    #[serde(default)]
    pub score: Option<u32>,
    #[serde(default)]
    pub total_questions: Option<u32>,
}

pub async fn submit_attempt(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(payload): Json<SubmitAttemptPayload>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let req_id = request_id_from_headers(&headers);
    let identity = authenticate(&state, &headers, &jar, &req_id)?;
    let user = current_user(&state, &identity, &req_id).await?;

    let (Some(quiz_id), Some(score), Some(total_questions)) =
        (payload.quiz_id, payload.score, payload.total_questions)
    else {
        return Err(AppError::validation(
            "quizId, score, and totalQuestions are required",
            req_id,
        ));
    };
    if total_questions == 0 {
        return Err(AppError::validation("totalQuestions must be positive", req_id));
    }

    let attempt = state
        .repo
        .record_attempt(user.id, quiz_id, score)
        .await
        .map_err(|e| map_repo_err(e, "quiz not found", &req_id))?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "attempt": attempt,
            "message": "Quiz attempt saved successfully"
        })),
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptsQuery {
    #[serde(default)]
    pub article_id: Option<i64>,
}

pub async fn list_attempts(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Query(query): Query<AttemptsQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let identity = authenticate(&state, &headers, &jar, &req_id)?;
    let user = current_user(&state, &identity, &req_id).await?;

    let Some(article_id) = query.article_id else {
        return Err(AppError::validation("articleId is required", req_id));
    };

    let attempts = state.repo.list_attempts(user.id, article_id).await;
    Ok(Json(json!({ "attempts": attempts })))
}
