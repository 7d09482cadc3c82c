use crate::config::{ClientConfig, StatusClassification};

/// Decides whether an advisory status line means image work has started.
///
/// Keyword sniffing is a heuristic: the producer does not say which kind of
/// answer it is preparing until the first text or preview frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusPolicy {
    Ignore,
    /// Lowercased keywords, matched as substrings.
    Keywords(Vec<String>),
}

impl StatusPolicy {
    #[must_use]
    pub fn keywords<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        StatusPolicy::Keywords(
            keywords
                .into_iter()
                .map(|keyword| keyword.as_ref().trim().to_lowercase())
                .filter(|keyword| !keyword.is_empty())
                .collect(),
        )
    }

    #[must_use]
    pub fn from_config(config: &ClientConfig) -> Self {
        match config.status_classification {
            StatusClassification::Ignore => StatusPolicy::Ignore,
            StatusClassification::Keywords => Self::keywords(&config.status_image_keywords),
        }
    }

    #[must_use]
    pub fn implies_image(&self, status: &str) -> bool {
        match self {
            StatusPolicy::Ignore => false,
            StatusPolicy::Keywords(keywords) => {
                let status = status.to_lowercase();
                keywords.iter().any(|keyword| status.contains(keyword.as_str()))
            }
        }
    }
}

impl Default for StatusPolicy {
    fn default() -> Self {
        Self::from_config(&ClientConfig::default())
    }
}
