//! Call categorization over an [`Adapter`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::adapters::Adapter;
use crate::config::ProviderKind;
use crate::domain::Category;

use super::{Categorizer, StageError};

pub const DEFAULT_PATTERN: &str = "categorize_call";

pub const DEFAULT_INSTRUCTION: &str = "You sort transcripts of customer service phone calls \
into the categories a company has defined. The input lists the categories as `id: name - \
description`, followed by the transcript. Reply with the id of the single best matching \
category and nothing else. Reply 0 if no category fits.";

pub fn default_action(provider: ProviderKind) -> &'static str {
    match provider {
        ProviderKind::Fabric => DEFAULT_PATTERN,
        _ => DEFAULT_INSTRUCTION,
    }
}

pub struct AdapterCategorizer {
    adapter: Arc<dyn Adapter>,
    action: String,
    timeout: Duration,
}

impl AdapterCategorizer {
    pub fn new(adapter: Arc<dyn Adapter>, action: impl Into<String>, timeout: Duration) -> Self {
        Self {
            adapter,
            action: action.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Categorizer for AdapterCategorizer {
    fn name(&self) -> &str {
        self.adapter.name()
    }

    async fn categorize(&self, categories: &[Category], text: &str) -> Result<String, StageError> {
        let input = render_input(categories, text);
        let output = self.adapter.execute(&self.action, &input, self.timeout).await?;
        Ok(output.content)
    }
}

/// Category list followed by the transcript
pub fn render_input(categories: &[Category], text: &str) -> String {
    let mut input = String::from("Categories:\n");
    for category in categories {
        let line = match &category.description {
            Some(description) if !description.is_empty() => {
                format!("{}: {} - {}\n", category.id, category.name, description)
            }
            _ => format!("{}: {}\n", category.id, category.name),
        };
        input.push_str(&line);
    }
    input.push_str("\nTranscript:\n");
    input.push_str(text.trim());
    input
}
