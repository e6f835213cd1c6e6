//! Conflict detection over an [`Adapter`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::adapters::Adapter;
use crate::config::ProviderKind;

use super::{ConflictDetector, StageError};

pub const DEFAULT_PATTERN: &str = "detect_conflict";

pub const DEFAULT_INSTRUCTION: &str = "You review transcripts of customer service phone calls. \
Decide whether the conversation contains conflict: an upset, angry or dissatisfied customer, \
a dispute, or a heated exchange. Answer with exactly one word: yes or no.";

/// Action to use when the configuration does not name one
pub fn default_action(provider: ProviderKind) -> &'static str {
    match provider {
        ProviderKind::Fabric => DEFAULT_PATTERN,
        _ => DEFAULT_INSTRUCTION,
    }
}

/// Asks an adapter a yes/no question about the transcript
pub struct AdapterConflictDetector {
    adapter: Arc<dyn Adapter>,
    action: String,
    timeout: Duration,
}

impl AdapterConflictDetector {
    pub fn new(adapter: Arc<dyn Adapter>, action: impl Into<String>, timeout: Duration) -> Self {
        Self {
            adapter,
            action: action.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ConflictDetector for AdapterConflictDetector {
    fn name(&self) -> &str {
        self.adapter.name()
    }

    async fn detect(&self, text: &str) -> Result<bool, StageError> {
        let output = self.adapter.execute(&self.action, text, self.timeout).await?;

        parse_conflict_answer(&output.content)
            .ok_or_else(|| StageError::Malformed(output.content.trim().to_string()))
    }
}

/// Read a yes/no style answer. Only the first word counts.
pub fn parse_conflict_answer(raw: &str) -> Option<bool> {
    let first = raw
        .split_whitespace()
        .next()?
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_ascii_lowercase();

    match first.as_str() {
        "yes" | "true" | "conflict" | "1" | "si" | "sí" => Some(true),
        "no" | "false" | "none" | "0" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::AdapterOutput;

    struct CannedAdapter(&'static str);

    #[async_trait]
    impl Adapter for CannedAdapter {
        fn name(&self) -> &str {
            "canned"
        }

        async fn execute(
            &self,
            _action: &str,
            _input: &str,
            _timeout: Duration,
        ) -> anyhow::Result<AdapterOutput> {
            Ok(AdapterOutput::new(self.0.to_string()))
        }
    }

    #[test]
    fn test_parse_conflict_answer() {
        assert_eq!(parse_conflict_answer("yes"), Some(true));
        assert_eq!(parse_conflict_answer("  Yes.\n"), Some(true));
        assert_eq!(parse_conflict_answer("TRUE"), Some(true));
        assert_eq!(parse_conflict_answer("no, the call was calm"), Some(false));
        assert_eq!(parse_conflict_answer("**No**"), Some(false));
        assert_eq!(parse_conflict_answer("maybe"), None);
        assert_eq!(parse_conflict_answer(""), None);
    }

    #[test]
    fn test_default_action_by_provider() {
        assert_eq!(default_action(ProviderKind::Fabric), DEFAULT_PATTERN);
        assert_eq!(default_action(ProviderKind::Gemini), DEFAULT_INSTRUCTION);
    }

    #[tokio::test]
    async fn test_detect_yes() {
        let detector =
            AdapterConflictDetector::new(Arc::new(CannedAdapter("Yes")), "q", Duration::from_secs(1));
        assert!(detector.detect("the product broke").await.unwrap());
        assert_eq!(detector.name(), "canned");
    }

    #[tokio::test]
    async fn test_detect_unrecognised_answer_is_error() {
        let detector = AdapterConflictDetector::new(
            Arc::new(CannedAdapter("I cannot tell")),
            "q",
            Duration::from_secs(1),
        );
        let err = detector.detect("hello").await.unwrap_err();
        assert!(matches!(err, StageError::Malformed(_)));
    }
}
