use crate::repo::ArticleWithQuizzes;

/// Read-only projection of the caller's persisted articles plus a selection
/// pointer. Loading, saving and deleting happen elsewhere; this only mirrors
/// their results.
#[derive(Default)]
pub struct HistoryView {
    articles: Vec<ArticleWithQuizzes>,
    selected: Option<i64>,
}

impl HistoryView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a freshly listed article set, keeping the selection when the
    /// selected article still exists.
    pub fn replace(&mut self, articles: Vec<ArticleWithQuizzes>) {
        self.articles = articles;
        if let Some(id) = self.selected {
            if !self.articles.iter().any(|a| a.article.id == id) {
                self.selected = None;
            }
        }
    }

    pub fn articles(&self) -> &[ArticleWithQuizzes] {
        &self.articles
    }

    pub fn select(&mut self, id: i64) -> Option<&ArticleWithQuizzes> {
        let found = self.articles.iter().find(|a| a.article.id == id)?;
        self.selected = Some(id);
        Some(found)
    }

    pub fn selected(&self) -> Option<&ArticleWithQuizzes> {
        let id = self.selected?;
        self.articles.iter().find(|a| a.article.id == id)
    }

    pub fn clear_selection(&mut self) {
        self.selected = None;
    }

    /// Mirrors a deletion; a selection pointing at the removed article is
    /// cleared.
    pub fn remove(&mut self, id: i64) {
        self.articles.retain(|a| a.article.id != id);
        if self.selected == Some(id) {
            self.selected = None;
        }
    }
}
