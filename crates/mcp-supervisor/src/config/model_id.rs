//! `provider.modelName[.reasoningEffort]` model identifiers.

use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

/// Model used when the document does not name one.
pub const DEFAULT_MODEL: &str = "anthropic.claude-3-5-haiku-latest";

/// Optional third segment of a model identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReasoningEffort {
    Low,
    Medium,
    High,
}

impl ReasoningEffort {
    pub fn as_str(self) -> &'static str {
        match self {
            ReasoningEffort::Low => "low",
            ReasoningEffort::Medium => "medium",
            ReasoningEffort::High => "high",
        }
    }

    fn parse(segment: &str) -> Option<Self> {
        match segment {
            "low" => Some(ReasoningEffort::Low),
            "medium" => Some(ReasoningEffort::Medium),
            "high" => Some(ReasoningEffort::High),
            _ => None,
        }
    }
}

/// A validated model identifier such as `openai.o3-mini.low`.
///
/// The model segment may itself contain dots (`openai.gpt-4.1`); a trailing
/// segment is only read as the reasoning effort when it is `low`, `medium`
/// or `high`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelId {
    provider: String,
    model: String,
    reasoning_effort: Option<ReasoningEffort>,
}

impl ModelId {
    pub fn parse(input: &str) -> Result<Self, String> {
        if input.is_empty() {
            return Err("model identifier must not be empty".to_string());
        }
        if input.chars().any(char::is_whitespace) {
            return Err(format!("model identifier `{input}` must not contain whitespace"));
        }
        let Some((provider, rest)) = input.split_once('.') else {
            return Err(format!(
                "model identifier `{input}` must have the form provider.model[.reasoning_effort]"
            ));
        };
        if provider.is_empty()
            || !provider
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-'))
        {
            return Err(format!(
                "model identifier `{input}` has an invalid provider segment (allowed: [A-Za-z0-9_-]+)"
            ));
        }
        if rest.split('.').any(str::is_empty) {
            return Err(format!("model identifier `{input}` has an empty segment"));
        }

        let (model, reasoning_effort) = match rest.rsplit_once('.') {
            Some((head, tail)) => match ReasoningEffort::parse(tail) {
                Some(effort) => (head, Some(effort)),
                None => (rest, None),
            },
            None => (rest, None),
        };

        Ok(Self {
            provider: provider.to_string(),
            model: model.to_string(),
            reasoning_effort,
        })
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn reasoning_effort(&self) -> Option<ReasoningEffort> {
        self.reasoning_effort
    }
}

impl Default for ModelId {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: "claude-3-5-haiku-latest".to_string(),
            reasoning_effort: None,
        }
    }
}

impl FromStr for ModelId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.provider, self.model)?;
        if let Some(effort) = self.reasoning_effort {
            write!(f, ".{}", effort.as_str())?;
        }
        Ok(())
    }
}

impl Serialize for ModelId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
