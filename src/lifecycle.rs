use crate::generation::TextGenerator;
use crate::identity::CallerIdentity;
use crate::models::{self, Question};
use crate::repo::QuizRepository;
use crate::state::{Article, QuizRow};
use futures::future::BoxFuture;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Step {
    #[default]
    Input,
    Summary,
    FullContent,
    Quiz,
}

/// The whole client-visible session: article draft, generated summary,
/// decoded question set, answer sheet and view flags. `epoch` tags every
/// in-flight call; completions from a previous epoch are discarded.
#[derive(Debug, Clone, Default)]
pub struct LifecycleState {
    pub step: Step,
    pub title: String,
    pub content: String,
    pub summary: String,
    pub article_id: Option<i64>,
    pub anchor_quiz_id: Option<i64>,
    pub questions: Vec<Question>,
    pub answers: HashMap<usize, usize>,
    pub current_question: usize,
    pub show_results: bool,
    pub summary_loading: bool,
    pub quiz_loading: bool,
    pub error: Option<String>,
    pub epoch: u64,
}

impl LifecycleState {
    pub fn score(&self) -> u32 {
        models::score(&self.questions, &self.answers)
    }

    pub fn percentage(&self) -> u32 {
        models::percentage(self.score(), self.questions.len() as u32)
    }

    fn fresh(epoch: u64) -> Self {
        Self {
            epoch,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub enum Event {
    TitleChanged(String),
    ContentChanged(String),
    GenerateSummary,
    SummaryGenerated { epoch: u64, summary: String },
    SummaryFailed { epoch: u64, reason: String },
    ArticleSaved { epoch: u64, article_id: i64 },
    SaveFailed { epoch: u64, reason: String },
    SeeFullContent,
    CloseFullContent,
    GenerateQuiz,
    QuestionsGenerated { epoch: u64, questions: Vec<Question> },
    QuizFailed { epoch: u64, reason: String },
    QuestionsSaved { epoch: u64, anchor_quiz_id: Option<i64> },
    QuestionsSaveFailed { epoch: u64, reason: String },
    Answer { question: usize, option: usize },
    Previous,
    Next,
    BackToSummary,
    Submit,
    AttemptRecorded { epoch: u64 },
    AttemptFailed { epoch: u64, reason: String },
    Retake,
    ArticleSelected { article: Article, quizzes: Vec<QuizRow> },
    Reset,
}

/// Side effects named by the reducer and executed by the driver. Each
/// network-bound effect carries the epoch current when it was issued.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Summarize { epoch: u64, title: String, content: String },
    SaveArticle { epoch: u64, title: String, content: String, summary: String },
    GenerateQuestions { epoch: u64, content: String },
    SaveQuestions { epoch: u64, article_id: i64, questions: Vec<Question> },
    RecordAttempt { epoch: u64, quiz_id: i64, score: u32, total_questions: u32 },
    ClearSelection,
}

/// Pure transition function. Every user action and async completion flows
/// through here; the returned effects are the only way the machine touches
/// the outside world.
pub fn reduce(mut state: LifecycleState, event: Event) -> (LifecycleState, Vec<Effect>) {
    let mut effects = Vec::new();

    match event {
        Event::TitleChanged(title) => {
            if state.step == Step::Input {
                state.title = title;
            }
        }
        Event::ContentChanged(content) => {
            if state.step == Step::Input {
                state.content = content;
            }
        }

        Event::GenerateSummary => {
            let ready = state.step == Step::Input
                && !state.summary_loading
                && !state.title.trim().is_empty()
                && !state.content.trim().is_empty();
            if ready {
                state.summary_loading = true;
                state.error = None;
                effects.push(Effect::Summarize {
                    epoch: state.epoch,
                    title: state.title.clone(),
                    content: state.content.clone(),
                });
            }
        }
        Event::SummaryGenerated { epoch, summary } => {
            if epoch == state.epoch {
                state.summary = summary.clone();
                effects.push(Effect::SaveArticle {
                    epoch,
                    title: state.title.clone(),
                    content: state.content.clone(),
                    summary,
                });
            }
        }
        Event::ArticleSaved { epoch, article_id } => {
            if epoch == state.epoch {
                state.article_id = Some(article_id);
                state.summary_loading = false;
                state.step = Step::Summary;
            }
        }
        Event::SummaryFailed { epoch, reason } | Event::SaveFailed { epoch, reason } => {
            if epoch == state.epoch {
                state.summary_loading = false;
                state.error = Some(reason);
            }
        }

        Event::SeeFullContent => {
            if state.step == Step::Summary {
                state.step = Step::FullContent;
            }
        }
        Event::CloseFullContent => {
            if state.step == Step::FullContent {
                state.step = Step::Summary;
            }
        }

        Event::GenerateQuiz => {
            if state.step == Step::Summary {
                if !state.questions.is_empty() {
                    // Regeneration is never implicit: an existing set is
                    // reused as-is.
                    state.step = Step::Quiz;
                } else if !state.quiz_loading {
                    state.quiz_loading = true;
                    state.error = None;
                    effects.push(Effect::GenerateQuestions {
                        epoch: state.epoch,
                        content: state.content.clone(),
                    });
                }
            }
        }
        Event::QuestionsGenerated { epoch, questions } => {
            if epoch == state.epoch {
                state.questions = questions;
                state.answers.clear();
                state.current_question = 0;
                state.show_results = false;
                state.quiz_loading = false;
                state.step = Step::Quiz;
                if let Some(article_id) = state.article_id {
                    if !state.questions.is_empty() {
                        effects.push(Effect::SaveQuestions {
                            epoch,
                            article_id,
                            questions: state.questions.clone(),
                        });
                    }
                }
            }
        }
        Event::QuizFailed { epoch, reason } => {
            if epoch == state.epoch {
                state.quiz_loading = false;
                state.error = Some(reason);
            }
        }
        Event::QuestionsSaved { epoch, anchor_quiz_id } => {
            if epoch == state.epoch {
                state.anchor_quiz_id = anchor_quiz_id;
            }
        }
        Event::QuestionsSaveFailed { epoch, reason } | Event::AttemptFailed { epoch, reason } => {
            if epoch == state.epoch {
                state.error = Some(reason);
            }
        }

        Event::Answer { question, option } => {
            if state.step == Step::Quiz && !state.show_results {
                state.answers.insert(question, option);
            }
        }
        Event::Previous => {
            if state.step == Step::Quiz && !state.show_results {
                state.current_question = state.current_question.saturating_sub(1);
            }
        }
        Event::Next => {
            if state.step == Step::Quiz && !state.show_results && !state.questions.is_empty() {
                state.current_question = (state.current_question + 1).min(state.questions.len() - 1);
            }
        }
        Event::BackToSummary => {
            if state.step == Step::Quiz && !state.show_results {
                state.step = Step::Summary;
            }
        }
        Event::Submit => {
            if state.step == Step::Quiz && !state.show_results {
                state.show_results = true;
                if let Some(quiz_id) = state.anchor_quiz_id {
                    if !state.questions.is_empty() {
                        effects.push(Effect::RecordAttempt {
                            epoch: state.epoch,
                            quiz_id,
                            score: state.score(),
                            total_questions: state.questions.len() as u32,
                        });
                    }
                }
            }
        }
        Event::AttemptRecorded { .. } => {}
        Event::Retake => {
            if state.step == Step::Quiz && state.show_results {
                state.answers.clear();
                state.current_question = 0;
                state.show_results = false;
            }
        }

        Event::ArticleSelected { article, quizzes } => {
            let epoch = state.epoch + 1;
            let mut next = LifecycleState::fresh(epoch);
            next.step = Step::Summary;
            next.title = article.title;
            next.content = article.content;
            next.summary = article.summary;
            next.article_id = Some(article.id);
            // Rows that no longer decode are skipped rather than taking the
            // whole article down.
            for row in &quizzes {
                if let Ok(question) = row.decode() {
                    if next.anchor_quiz_id.is_none() {
                        next.anchor_quiz_id = Some(row.id);
                    }
                    next.questions.push(question);
                }
            }
            state = next;
        }
        Event::Reset => {
            state = LifecycleState::fresh(state.epoch + 1);
            effects.push(Effect::ClearSelection);
        }
    }

    (state, effects)
}

/// Store side of the lifecycle, kept behind a trait so the machine can be
/// driven against the in-process repository or a test double.
pub trait LifecycleStore: Send + Sync {
    fn save_article(
        &self,
        title: String,
        content: String,
        summary: String,
    ) -> BoxFuture<'static, anyhow::Result<Article>>;

    fn replace_questions(
        &self,
        article_id: i64,
        questions: Vec<Question>,
    ) -> BoxFuture<'static, anyhow::Result<Vec<QuizRow>>>;

    fn record_attempt(
        &self,
        quiz_id: i64,
        score: u32,
        total_questions: u32,
    ) -> BoxFuture<'static, anyhow::Result<()>>;
}

/// `LifecycleStore` over the local repository for a fixed caller.
#[derive(Clone)]
pub struct LocalStore {
    repo: QuizRepository,
    identity: CallerIdentity,
}

impl LocalStore {
    pub fn new(repo: QuizRepository, identity: CallerIdentity) -> Self {
        Self { repo, identity }
    }
}

impl LifecycleStore for LocalStore {
    fn save_article(
        &self,
        title: String,
        content: String,
        summary: String,
    ) -> BoxFuture<'static, anyhow::Result<Article>> {
        let repo = self.repo.clone();
        let identity = self.identity.clone();
        Box::pin(async move {
            let user = repo.find_or_create_user(&identity).await;
            let created = repo.create_article(user.id, &title, &content, &summary).await?;
            Ok(created.article)
        })
    }

    fn replace_questions(
        &self,
        article_id: i64,
        questions: Vec<Question>,
    ) -> BoxFuture<'static, anyhow::Result<Vec<QuizRow>>> {
        let repo = self.repo.clone();
        let identity = self.identity.clone();
        Box::pin(async move {
            let user = repo.find_or_create_user(&identity).await;
            Ok(repo.replace_questions(user.id, article_id, &questions).await?)
        })
    }

    fn record_attempt(
        &self,
        quiz_id: i64,
        score: u32,
        _total_questions: u32,
    ) -> BoxFuture<'static, anyhow::Result<()>> {
        let repo = self.repo.clone();
        let identity = self.identity.clone();
        Box::pin(async move {
            let user = repo.find_or_create_user(&identity).await;
            repo.record_attempt(user.id, quiz_id, score).await?;
            Ok(())
        })
    }
}

/// Owns the state and runs the reduce/execute loop: each dispatched event is
/// reduced, its effects executed, and their completion events fed back until
/// the machine is quiescent.
pub struct QuizLifecycle {
    state: LifecycleState,
    generator: Arc<dyn TextGenerator>,
    store: Arc<dyn LifecycleStore>,
    on_clear_selection: Option<Box<dyn FnMut() + Send>>,
}

impl QuizLifecycle {
    pub fn new(generator: Arc<dyn TextGenerator>, store: Arc<dyn LifecycleStore>) -> Self {
        Self {
            state: LifecycleState::default(),
            generator,
            store,
            on_clear_selection: None,
        }
    }

    /// Registers the external collaborator notified when a reset clears the
    /// article selection.
    pub fn on_clear_selection(mut self, listener: impl FnMut() + Send + 'static) -> Self {
        self.on_clear_selection = Some(Box::new(listener));
        self
    }

    pub fn state(&self) -> &LifecycleState {
        &self.state
    }

    pub async fn dispatch(&mut self, event: Event) {
        let mut queue = VecDeque::from([event]);
        while let Some(event) = queue.pop_front() {
            let (next, effects) = reduce(std::mem::take(&mut self.state), event);
            self.state = next;
            for effect in effects {
                if let Some(follow_up) = self.run_effect(effect).await {
                    queue.push_back(follow_up);
                }
            }
        }
    }

    async fn run_effect(&mut self, effect: Effect) -> Option<Event> {
        match effect {
            Effect::Summarize { epoch, title, content } => {
                match self.generator.summarize(&title, &content).await {
                    Ok(summary) => Some(Event::SummaryGenerated { epoch, summary }),
                    Err(err) => Some(Event::SummaryFailed {
                        epoch,
                        reason: format!("Failed to generate summary: {err}"),
                    }),
                }
            }
            Effect::SaveArticle { epoch, title, content, summary } => {
                match self.store.save_article(title, content, summary).await {
                    Ok(article) => Some(Event::ArticleSaved {
                        epoch,
                        article_id: article.id,
                    }),
                    Err(err) => Some(Event::SaveFailed {
                        epoch,
                        reason: format!("Failed to save article: {err}"),
                    }),
                }
            }
            Effect::GenerateQuestions { epoch, content } => {
                match self.generator.generate_questions(&content).await {
                    Ok(questions) => Some(Event::QuestionsGenerated { epoch, questions }),
                    Err(err) => Some(Event::QuizFailed {
                        epoch,
                        reason: format!("Failed to generate quiz: {err}"),
                    }),
                }
            }
            Effect::SaveQuestions { epoch, article_id, questions } => {
                match self.store.replace_questions(article_id, questions).await {
                    Ok(rows) => Some(Event::QuestionsSaved {
                        epoch,
                        anchor_quiz_id: rows.first().map(|r| r.id),
                    }),
                    Err(err) => Some(Event::QuestionsSaveFailed {
                        epoch,
                        reason: format!("Failed to save quiz: {err}"),
                    }),
                }
            }
            Effect::RecordAttempt { epoch, quiz_id, score, total_questions } => {
                match self.store.record_attempt(quiz_id, score, total_questions).await {
                    Ok(()) => Some(Event::AttemptRecorded { epoch }),
                    Err(err) => Some(Event::AttemptFailed {
                        epoch,
                        reason: format!("Failed to save quiz attempt: {err}"),
                    }),
                }
            }
            Effect::ClearSelection => {
                if let Some(listener) = self.on_clear_selection.as_mut() {
                    listener();
                }
                None
            }
        }
    }
}
