//! `parse_html` and `clean_html` actions (spec.md §6).
//!
//! HTML parsing/cleaning heuristics are explicitly out of scope for the
//! pipeline runtime itself; this crate supplies a default, intentionally
//! simple implementation behind the `HtmlParser`/`HtmlCleaner` seams so
//! the action chain is exercisable end to end. A production deployment
//! swaps these for whatever note-authoring heuristics it actually needs.

use async_trait::async_trait;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use notepipe_core::action::{Action, ActionContext, ActionError, Dependencies};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ParsedNote {
    pub title: String,
    pub body_text: String,
    pub ingredient_lines: Vec<String>,
    pub instruction_lines: Vec<String>,
    pub image_urls: Vec<String>,
}

#[async_trait]
pub trait HtmlParser: Send + Sync {
    async fn parse(&self, raw_html: &str) -> Result<ParsedNote, ActionError>;
}

#[async_trait]
pub trait HtmlCleaner: Send + Sync {
    async fn clean(&self, parsed: ParsedNote) -> Result<ParsedNote, ActionError>;
}

/// Extracts `<h1>`/`<title>` as the note title, `li` elements under
/// elements tagged `.ingredients`/`.instructions` as line items, and
/// `img[src]` as image candidates. A minimal, deterministic default —
/// not a substitute for real note-authoring heuristics.
pub struct DefaultHtmlParser;

#[async_trait]
impl HtmlParser for DefaultHtmlParser {
    async fn parse(&self, raw_html: &str) -> Result<ParsedNote, ActionError> {
        if raw_html.trim().is_empty() {
            return Err(ActionError::validation("parse_html", "empty document"));
        }

        let document = Html::parse_document(raw_html);
        let title_selector = Selector::parse("h1, title").unwrap();
        let title = document
            .select(&title_selector)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .unwrap_or_default();

        let ingredients_selector = Selector::parse(".ingredients li").unwrap();
        let ingredient_lines = document
            .select(&ingredients_selector)
            .map(|el| el.text().collect::<String>().trim().to_string())
            .filter(|line| !line.is_empty())
            .collect();

        let instructions_selector = Selector::parse(".instructions li").unwrap();
        let instruction_lines = document
            .select(&instructions_selector)
            .map(|el| el.text().collect::<String>().trim().to_string())
            .filter(|line| !line.is_empty())
            .collect();

        let img_selector = Selector::parse("img[src]").unwrap();
        let image_urls = document
            .select(&img_selector)
            .filter_map(|el| el.value().attr("src").map(str::to_string))
            .collect();

        let body_selector = Selector::parse("body").unwrap();
        let body_text = document
            .select(&body_selector)
            .next()
            .map(|el| el.text().collect::<String>())
            .unwrap_or_default();

        Ok(ParsedNote {
            title,
            body_text,
            ingredient_lines,
            instruction_lines,
            image_urls,
        })
    }
}

/// Trims whitespace and drops empty lines. The only "cleaning" this
/// default does; anything more is domain heuristics out of scope here.
pub struct DefaultHtmlCleaner;

#[async_trait]
impl HtmlCleaner for DefaultHtmlCleaner {
    async fn clean(&self, mut parsed: ParsedNote) -> Result<ParsedNote, ActionError> {
        parsed.body_text = parsed.body_text.split_whitespace().collect::<Vec<_>>().join(" ");
        parsed.ingredient_lines.retain(|line| !line.trim().is_empty());
        parsed.instruction_lines.retain(|line| !line.trim().is_empty());
        Ok(parsed)
    }
}

pub struct ParseHtmlAction {
    parser: Arc<dyn HtmlParser>,
}

impl ParseHtmlAction {
    pub fn new(parser: Arc<dyn HtmlParser>) -> Self {
        Self { parser }
    }
}

#[async_trait]
impl Action for ParseHtmlAction {
    fn name(&self) -> String {
        "parse_html".into()
    }

    fn retryable(&self) -> bool {
        false
    }

    async fn execute(
        &self,
        data: serde_json::Value,
        _deps: &Dependencies,
        _context: &ActionContext,
    ) -> Result<serde_json::Value, ActionError> {
        let raw_html = data
            .get("html")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ActionError::validation("parse_html", "missing 'html' field"))?;

        let parsed = self.parser.parse(raw_html).await?;
        let mut data = data;
        data["parsed"] = serde_json::to_value(parsed).map_err(|e| ActionError::Unexpected(e.into()))?;
        Ok(data)
    }
}

pub struct CleanHtmlAction {
    cleaner: Arc<dyn HtmlCleaner>,
}

impl CleanHtmlAction {
    pub fn new(cleaner: Arc<dyn HtmlCleaner>) -> Self {
        Self { cleaner }
    }
}

#[async_trait]
impl Action for CleanHtmlAction {
    fn name(&self) -> String {
        "clean_html".into()
    }

    async fn execute(
        &self,
        data: serde_json::Value,
        _deps: &Dependencies,
        _context: &ActionContext,
    ) -> Result<serde_json::Value, ActionError> {
        let parsed: ParsedNote = data
            .get("parsed")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| ActionError::Unexpected(e.into()))?
            .ok_or_else(|| ActionError::validation("clean_html", "missing 'parsed' field, run parse_html first"))?;

        let cleaned = self.cleaner.clean(parsed).await?;
        let mut data = data;
        data["parsed"] = serde_json::to_value(cleaned).map_err(|e| ActionError::Unexpected(e.into()))?;
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notepipe_core::database::InMemoryDatabase;

    fn deps() -> Dependencies {
        Dependencies::new(Arc::new(InMemoryDatabase::new()))
    }

    fn ctx() -> ActionContext {
        ActionContext::new("job-1", "note", "note-worker")
    }

    #[tokio::test]
    async fn parse_html_extracts_ingredient_lines() {
        let action = ParseHtmlAction::new(Arc::new(DefaultHtmlParser));
        let html = r#"<html><body><h1>Soup</h1><ul class="ingredients"><li>2 cups water</li></ul></body></html>"#;
        let result = action.execute(serde_json::json!({ "html": html }), &deps(), &ctx()).await.unwrap();
        let parsed: ParsedNote = serde_json::from_value(result["parsed"].clone()).unwrap();
        assert_eq!(parsed.title, "Soup");
        assert_eq!(parsed.ingredient_lines, vec!["2 cups water".to_string()]);
    }

    #[tokio::test]
    async fn parse_html_rejects_empty_document() {
        let action = ParseHtmlAction::new(Arc::new(DefaultHtmlParser));
        let result = action.execute(serde_json::json!({ "html": "" }), &deps(), &ctx()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn clean_html_requires_prior_parse() {
        let action = CleanHtmlAction::new(Arc::new(DefaultHtmlCleaner));
        let result = action.execute(serde_json::json!({}), &deps(), &ctx()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn clean_html_drops_blank_lines() {
        let action = CleanHtmlAction::new(Arc::new(DefaultHtmlCleaner));
        let parsed = ParsedNote {
            ingredient_lines: vec!["  ".into(), "2 cups water".into()],
            ..Default::default()
        };
        let input = serde_json::json!({ "parsed": parsed });
        let result = action.execute(input, &deps(), &ctx()).await.unwrap();
        let cleaned: ParsedNote = serde_json::from_value(result["parsed"].clone()).unwrap();
        assert_eq!(cleaned.ingredient_lines, vec!["2 cups water".to_string()]);
    }
}
