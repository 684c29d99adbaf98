use article_quiz::generation::MockGenerator;
use article_quiz::identity::HeaderIdentity;
use article_quiz::routes::build_router;
use article_quiz::state::AppState;
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::json;
use std::sync::Arc;

async fn spawn_server() -> (String, reqwest::Client) {
    let state = AppState::with_snapshot_path(Arc::new(MockGenerator), Arc::new(HeaderIdentity), None);
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let client = reqwest::Client::new();
    (format!("http://{}", addr), client)
}

fn auth_headers(subject: &str) -> HeaderMap {
    let mut h = HeaderMap::new();
    h.insert(
        "authorization",
        HeaderValue::from_str(&format!("Bearer {subject}")).unwrap(),
    );
    h.insert("x-auth-name", HeaderValue::from_str(&format!("{subject} name")).unwrap());
    h.insert(
        "x-auth-email",
        HeaderValue::from_str(&format!("{subject}@example.com")).unwrap(),
    );
    h
}

fn sample_questions(n: usize, tag: &str) -> serde_json::Value {
    let questions: Vec<serde_json::Value> = (0..n)
        .map(|i| {
            json!({
                "question": format!("{tag} question {i}"),
                "options": ["a", "b", "c", "d"],
                "correct": i % 4
            })
        })
        .collect();
    json!(questions)
}

async fn create_article(base: &str, client: &reqwest::Client, subject: &str, title: &str) -> i64 {
    let resp = client
        .post(format!("{}/articles", base))
        .headers(auth_headers(subject))
        .json(&json!({"title": title, "content": "Some content", "summary": "Some summary"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    resp.json::<serde_json::Value>().await.unwrap()["article"]["id"]
        .as_i64()
        .unwrap()
}

#[tokio::test]
async fn requests_without_identity_are_unauthorized() {
    let (base, client) = spawn_server().await;

    for (method, path) in [
        (reqwest::Method::GET, "/articles"),
        (reqwest::Method::POST, "/articles"),
        (reqwest::Method::GET, "/articles/1"),
        (reqwest::Method::PATCH, "/articles/1"),
        (reqwest::Method::DELETE, "/articles/1"),
        (reqwest::Method::POST, "/quiz"),
        (reqwest::Method::PUT, "/quiz"),
        (reqwest::Method::GET, "/quiz?articleId=1"),
    ] {
        let resp = client
            .request(method.clone(), format!("{}{}", base, path))
            .json(&json!({}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 401, "{method} {path}");
    }
}

#[tokio::test]
async fn listing_before_any_save_is_user_not_found() {
    let (base, client) = spawn_server().await;
    let resp = client
        .get(format!("{}/articles", base))
        .headers(auth_headers("fresh"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn article_crud_and_partial_update() {
    let (base, client) = spawn_server().await;
    let id = create_article(&base, &client, "crud", "First").await;

    let missing_field = client
        .post(format!("{}/articles", base))
        .headers(auth_headers("crud"))
        .json(&json!({"title": "T", "content": "C"}))
        .send()
        .await
        .unwrap();
    assert_eq!(missing_field.status(), 400);

    let fetched = client
        .get(format!("{}/articles/{}", base, id))
        .headers(auth_headers("crud"))
        .send()
        .await
        .unwrap();
    assert_eq!(fetched.status(), 200);
    let fetched = fetched.json::<serde_json::Value>().await.unwrap();
    assert_eq!(fetched["article"]["title"], "First");
    assert_eq!(fetched["article"]["summary"], "Some summary");
    assert!(fetched["article"]["quizzes"].as_array().unwrap().is_empty());

    let patched = client
        .patch(format!("{}/articles/{}", base, id))
        .headers(auth_headers("crud"))
        .json(&json!({"summary": "Refreshed"}))
        .send()
        .await
        .unwrap();
    assert_eq!(patched.status(), 200);
    let patched = patched.json::<serde_json::Value>().await.unwrap();
    assert_eq!(patched["article"]["title"], "First");
    assert_eq!(patched["article"]["summary"], "Refreshed");

    let listed = client
        .get(format!("{}/articles", base))
        .headers(auth_headers("crud"))
        .send()
        .await
        .unwrap()
        .json::<serde_json::Value>()
        .await
        .unwrap();
    assert_eq!(listed["articles"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn ownership_is_never_disclosed() {
    let (base, client) = spawn_server().await;
    let owned = create_article(&base, &client, "alice", "Alice's").await;
    // provisions bob's user record
    create_article(&base, &client, "bob", "Bob's").await;

    let get = client
        .get(format!("{}/articles/{}", base, owned))
        .headers(auth_headers("bob"))
        .send()
        .await
        .unwrap();
    assert_eq!(get.status(), 404);

    let patch = client
        .patch(format!("{}/articles/{}", base, owned))
        .headers(auth_headers("bob"))
        .json(&json!({"title": "stolen"}))
        .send()
        .await
        .unwrap();
    assert_eq!(patch.status(), 404);

    let delete = client
        .delete(format!("{}/articles/{}", base, owned))
        .headers(auth_headers("bob"))
        .send()
        .await
        .unwrap();
    assert_eq!(delete.status(), 404);

    let quiz = client
        .post(format!("{}/quiz", base))
        .headers(auth_headers("bob"))
        .json(&json!({"articleId": owned, "questions": sample_questions(2, "x")}))
        .send()
        .await
        .unwrap();
    assert_eq!(quiz.status(), 404);

    // alice still sees her article untouched
    let mine = client
        .get(format!("{}/articles/{}", base, owned))
        .headers(auth_headers("alice"))
        .send()
        .await
        .unwrap();
    assert_eq!(mine.status(), 200);
    let mine = mine.json::<serde_json::Value>().await.unwrap();
    assert_eq!(mine["article"]["title"], "Alice's");
}

#[tokio::test]
async fn quiz_replacement_attempts_and_best_score_flow() {
    let (base, client) = spawn_server().await;
    let article_id = create_article(&base, &client, "taker", "T").await;

    let first = client
        .post(format!("{}/quiz", base))
        .headers(auth_headers("taker"))
        .json(&json!({"articleId": article_id, "questions": sample_questions(2, "first")}))
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), 201);
    let first = first.json::<serde_json::Value>().await.unwrap();
    assert_eq!(first["quizzes"].as_array().unwrap().len(), 2);

    // regenerating replaces the whole set, never merges
    let second = client
        .post(format!("{}/quiz", base))
        .headers(auth_headers("taker"))
        .json(&json!({"articleId": article_id, "questions": sample_questions(3, "second")}))
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), 201);
    let second = second.json::<serde_json::Value>().await.unwrap();
    let quizzes = second["quizzes"].as_array().unwrap();
    assert_eq!(quizzes.len(), 3);

    let stored = client
        .get(format!("{}/articles/{}", base, article_id))
        .headers(auth_headers("taker"))
        .send()
        .await
        .unwrap()
        .json::<serde_json::Value>()
        .await
        .unwrap();
    let stored_quizzes = stored["article"]["quizzes"].as_array().unwrap();
    assert_eq!(stored_quizzes.len(), 3);
    assert!(stored_quizzes
        .iter()
        .all(|q| q["question"].as_str().unwrap().starts_with("second")));

    let anchor = quizzes[0]["id"].as_i64().unwrap();
    for score in [2i64, 1] {
        let attempt = client
            .put(format!("{}/quiz", base))
            .headers(auth_headers("taker"))
            .json(&json!({"quizId": anchor, "score": score, "totalQuestions": 3}))
            .send()
            .await
            .unwrap();
        assert_eq!(attempt.status(), 201);
        let body = attempt.json::<serde_json::Value>().await.unwrap();
        assert_eq!(body["attempt"]["totalScore"].as_i64().unwrap(), score);
        assert_eq!(body["message"], "Quiz attempt saved successfully");
    }

    let attempts = client
        .get(format!("{}/quiz?articleId={}", base, article_id))
        .headers(auth_headers("taker"))
        .send()
        .await
        .unwrap()
        .json::<serde_json::Value>()
        .await
        .unwrap();
    let attempts = attempts["attempts"].as_array().unwrap();
    assert_eq!(attempts.len(), 2);
    // most recent first, joined with the anchor quiz row
    assert_eq!(attempts[0]["totalScore"].as_i64().unwrap(), 1);
    assert_eq!(attempts[1]["totalScore"].as_i64().unwrap(), 2);
    assert_eq!(attempts[0]["quiz"]["id"].as_i64().unwrap(), anchor);
}

#[tokio::test]
async fn quiz_validation_errors() {
    let (base, client) = spawn_server().await;
    let article_id = create_article(&base, &client, "val", "T").await;

    let missing_questions = client
        .post(format!("{}/quiz", base))
        .headers(auth_headers("val"))
        .json(&json!({"articleId": article_id}))
        .send()
        .await
        .unwrap();
    assert_eq!(missing_questions.status(), 400);

    let bad_index = client
        .post(format!("{}/quiz", base))
        .headers(auth_headers("val"))
        .json(&json!({
            "articleId": article_id,
            "questions": [{"question": "q", "options": ["a", "b"], "correct": 5}]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(bad_index.status(), 400);

    let missing_score = client
        .put(format!("{}/quiz", base))
        .headers(auth_headers("val"))
        .json(&json!({"quizId": 1, "totalQuestions": 3}))
        .send()
        .await
        .unwrap();
    assert_eq!(missing_score.status(), 400);

    let missing_param = client
        .get(format!("{}/quiz", base))
        .headers(auth_headers("val"))
        .send()
        .await
        .unwrap();
    assert_eq!(missing_param.status(), 400);

    let unknown_anchor = client
        .put(format!("{}/quiz", base))
        .headers(auth_headers("val"))
        .json(&json!({"quizId": 424242, "score": 1, "totalQuestions": 3}))
        .send()
        .await
        .unwrap();
    assert_eq!(unknown_anchor.status(), 404);
}

#[tokio::test]
async fn deleting_an_article_cascades() {
    let (base, client) = spawn_server().await;
    let article_id = create_article(&base, &client, "cascade", "T").await;

    let quizzes = client
        .post(format!("{}/quiz", base))
        .headers(auth_headers("cascade"))
        .json(&json!({"articleId": article_id, "questions": sample_questions(2, "q")}))
        .send()
        .await
        .unwrap()
        .json::<serde_json::Value>()
        .await
        .unwrap();
    let anchor = quizzes["quizzes"][0]["id"].as_i64().unwrap();

    let submitted = client
        .put(format!("{}/quiz", base))
        .headers(auth_headers("cascade"))
        .json(&json!({"quizId": anchor, "score": 2, "totalQuestions": 2}))
        .send()
        .await
        .unwrap();
    assert_eq!(submitted.status(), 201);

    let deleted = client
        .delete(format!("{}/articles/{}", base, article_id))
        .headers(auth_headers("cascade"))
        .send()
        .await
        .unwrap();
    assert_eq!(deleted.status(), 200);
    let deleted = deleted.json::<serde_json::Value>().await.unwrap();
    assert_eq!(deleted["success"], true);

    let gone = client
        .get(format!("{}/articles/{}", base, article_id))
        .headers(auth_headers("cascade"))
        .send()
        .await
        .unwrap();
    assert_eq!(gone.status(), 404);

    let attempts = client
        .get(format!("{}/quiz?articleId={}", base, article_id))
        .headers(auth_headers("cascade"))
        .send()
        .await
        .unwrap()
        .json::<serde_json::Value>()
        .await
        .unwrap();
    assert!(attempts["attempts"].as_array().unwrap().is_empty());

    let orphan_attempt = client
        .put(format!("{}/quiz", base))
        .headers(auth_headers("cascade"))
        .json(&json!({"quizId": anchor, "score": 1, "totalQuestions": 2}))
        .send()
        .await
        .unwrap();
    assert_eq!(orphan_attempt.status(), 404);
}
