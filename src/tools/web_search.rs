//! Simulated web search returning deterministic results.
//!
//! Stands in for a real search API so demo runs need no network or keys; a
//! production deployment registers its own implementation under the same name.

use async_trait::async_trait;
use serde::Deserialize;

use super::Tool;

const DEFAULT_LIMIT: usize = 5;

/// Search parameters accepted as JSON instructions.
#[derive(Debug, Deserialize)]
struct SearchParams {
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default = "default_source")]
    source: String,
}

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

fn default_source() -> String {
    "general".to_string()
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            source: default_source(),
        }
    }
}

/// Search the web for information about a topic.
pub struct WebSearch;

#[async_trait]
impl Tool for WebSearch {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for information about a topic. Returns result titles, URLs and snippets. Accepts optional JSON instructions: {\"limit\": 5, \"source\": \"general|academic|news\"}."
    }

    async fn run(&self, task_description: &str, instructions: &str) -> anyhow::Result<String> {
        let params: SearchParams = serde_json::from_str(instructions).unwrap_or_default();
        Ok(simulate_search(task_description, params.limit, &params.source))
    }
}

fn simulate_search(query: &str, limit: usize, source: &str) -> String {
    let mut results = vec![
        (
            format!("Search result 1 for: {query}"),
            "https://example.com/result1".to_string(),
            format!("Key information related to {query}, including data and analysis."),
        ),
        (
            format!("Search result 2 for: {query}"),
            "https://example.com/result2".to_string(),
            format!("Additional material on {query} from reliable sources. Recent studies show steady interest."),
        ),
        (
            format!("Search result 3 for: {query}"),
            "https://example.com/result3".to_string(),
            format!("A broad analysis of {query} and its impact across related fields."),
        ),
    ];

    match source {
        "academic" => results.push((
            format!("Academic study on {query}"),
            "https://academic-journal.example.com/paper123".to_string(),
            format!("Peer-reviewed discussion of {query} from a scientific perspective."),
        )),
        "news" => results.push((
            format!("Latest news about {query}"),
            "https://news.example.com/latest".to_string(),
            format!("New developments around {query} over the past week."),
        )),
        _ => {}
    }

    results.truncate(limit);
    let formatted: Vec<String> = results
        .iter()
        .map(|(title, url, snippet)| format!("**{title}**\n{url}\n{snippet}"))
        .collect();

    format!(
        "Found {} results for query: '{}'\n\n{}",
        results.len(),
        query,
        formatted.join("\n\n")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn prose_instructions_fall_back_to_defaults() {
        let out = WebSearch
            .run("solar panel efficiency", "look for recent data")
            .await
            .unwrap();
        assert!(out.starts_with("Found 3 results for query: 'solar panel efficiency'"));
        assert!(out.contains("https://example.com/result1"));
    }

    #[tokio::test]
    async fn json_instructions_set_limit_and_source() {
        let out = WebSearch
            .run("graphene", r#"{"limit": 1}"#)
            .await
            .unwrap();
        assert!(out.starts_with("Found 1 results"));
        assert!(!out.contains("result2"));

        let academic = WebSearch
            .run("graphene", r#"{"source": "academic", "limit": 10}"#)
            .await
            .unwrap();
        assert!(academic.contains("Academic study on graphene"));

        let news = WebSearch
            .run("graphene", r#"{"source": "news", "limit": 10}"#)
            .await
            .unwrap();
        assert!(news.contains("Latest news about graphene"));
    }
}
