//! Simulated content generation in several formats.

use async_trait::async_trait;
use serde::Deserialize;

use super::Tool;

/// Generation parameters accepted as JSON instructions.
#[derive(Debug, Deserialize)]
struct ContentParams {
    #[serde(rename = "type", default = "default_kind")]
    kind: String,
    #[serde(default = "default_length")]
    length: String,
    #[serde(default = "default_tone")]
    tone: String,
}

fn default_kind() -> String {
    "general".to_string()
}

fn default_length() -> String {
    "medium".to_string()
}

fn default_tone() -> String {
    "neutral".to_string()
}

impl Default for ContentParams {
    fn default() -> Self {
        Self {
            kind: default_kind(),
            length: default_length(),
            tone: default_tone(),
        }
    }
}

/// Produce articles, reports and posts about a topic.
pub struct ContentGenerator;

#[async_trait]
impl Tool for ContentGenerator {
    fn name(&self) -> &str {
        "content_generator"
    }

    fn description(&self) -> &str {
        "Generate written content such as articles, reports and social posts. Accepts optional JSON instructions: {\"type\": \"article|report|social_post|general\", \"length\": \"short|medium|long\", \"tone\": \"neutral|formal|casual\"}."
    }

    async fn run(&self, task_description: &str, instructions: &str) -> anyhow::Result<String> {
        let params: ContentParams = serde_json::from_str(instructions).unwrap_or_default();
        let paragraphs = match params.length.as_str() {
            "short" => 2,
            "medium" => 4,
            "long" => 8,
            _ => 3,
        };

        Ok(match params.kind.as_str() {
            "article" => generate_article(task_description, paragraphs),
            "report" => generate_report(task_description, paragraphs),
            "social_post" => generate_social_post(task_description, &params.tone),
            _ => generate_general(task_description, paragraphs),
        })
    }
}

fn generate_article(topic: &str, paragraphs: usize) -> String {
    let mut out = format!("# Article: {topic}\n\n");
    out.push_str(&format!(
        "An introduction to {topic}, why it matters, and how it touches neighbouring fields, \
         with an emphasis on recent developments.\n"
    ));
    for i in 1..=paragraphs.saturating_sub(2) {
        out.push_str(&format!(
            "\nParagraph {i}: detailed information and analysis on {topic}, referencing \
             relevant studies and research.\n"
        ));
    }
    out.push_str(&format!(
        "\nConclusion: the material above underlines the significance of {topic} and can \
         serve as a basis for working with it more effectively.\n"
    ));
    out
}

fn generate_report(topic: &str, paragraphs: usize) -> String {
    let mut out = format!("# Report: {topic}\n\n");
    out.push_str(&format!(
        "Executive summary: this report offers a broad analysis of {topic} with practical \
         recommendations.\n"
    ));
    out.push_str(&format!(
        "\n## Introduction\nThe report covers {topic} and its relevance, focusing on \
         practical applications.\n"
    ));
    out.push_str(
        "\n## Methodology\nInformation was gathered from varied, reliable sources and \
         analyzed with appropriate statistical methods.\n",
    );
    for i in 1..=paragraphs.saturating_sub(4) {
        out.push_str(&format!(
            "\n## Section {i}\nIn-depth findings on a specific aspect of {topic}, grounded \
             in recent data.\n"
        ));
    }
    out.push_str(&format!(
        "\n## Findings and Recommendations\nConclusions drawn from the analysis of {topic}, \
         together with practical recommendations.\n"
    ));
    out
}

fn generate_social_post(topic: &str, tone: &str) -> String {
    match tone {
        "formal" => format!(
            "Some valuable information about {topic}. It plays a significant role in its \
             field; we welcome your thoughts on the subject. #{}",
            topic.replace(' ', "_")
        ),
        "casual" => format!(
            "Ever heard of {topic}? Here are a few surprisingly interesting facts about it \
             - worth a look! #{}",
            topic.replace(' ', "_")
        ),
        _ => format!(
            "A quick look at {topic}: what it is, why it matters, and where it is heading. \
             #{}",
            topic.replace(' ', "_")
        ),
    }
}

fn generate_general(topic: &str, paragraphs: usize) -> String {
    let mut out = format!("Content on: {topic}\n");
    for i in 1..=paragraphs {
        out.push_str(&format!(
            "\nPart {i}: useful information about {topic}, presented in a clear and \
             organized way.\n"
        ));
    }
    out
}
