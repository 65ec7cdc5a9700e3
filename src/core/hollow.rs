//! Detection of hollow completions: results that claim success without doing
//! any real work.

use regex::{Regex, RegexBuilder};

use crate::config::SwarmConfig;
use crate::core::task::TaskResult;
use crate::Result;

/// Classifies worker results as hollow.
///
/// A result is hollow when it reports success and either made no tool calls
/// and produced almost no output, or admits failure in its text without
/// reporting any findings.
#[derive(Debug, Clone)]
pub struct HollowDetector {
    min_output_chars: usize,
    failure_pattern: Option<Regex>,
}

impl HollowDetector {
    /// Build a detector from an output-length threshold and a list of
    /// failure-admission phrases. Phrases are matched literally and
    /// case-insensitively.
    pub fn new(min_output_chars: usize, phrases: &[String]) -> Result<Self> {
        let alternatives: Vec<String> = phrases
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .map(regex::escape)
            .collect();

        let failure_pattern = if alternatives.is_empty() {
            None
        } else {
            Some(
                RegexBuilder::new(&alternatives.join("|"))
                    .case_insensitive(true)
                    .build()?,
            )
        };

        Ok(Self {
            min_output_chars,
            failure_pattern,
        })
    }

    pub fn from_config(config: &SwarmConfig) -> Result<Self> {
        Self::new(
            config.hollow_output_threshold,
            &config.hollow_failure_phrases,
        )
    }

    /// True when the text contains any failure-admission phrase.
    pub fn admits_failure(&self, text: &str) -> bool {
        self.failure_pattern
            .as_ref()
            .map(|re| re.is_match(text))
            .unwrap_or(false)
    }

    pub fn is_hollow(&self, result: &TaskResult) -> bool {
        if !result.success {
            return false;
        }
        let trimmed_len = result.output.trim().chars().count();
        let empty_work = result.tool_calls == 0 && trimmed_len < self.min_output_chars;
        let admitted = self.admits_failure(&result.output) && !result.has_findings();
        empty_work || admitted
    }
}

impl Default for HollowDetector {
    fn default() -> Self {
        let config = SwarmConfig::default();
        // Default phrases are plain words, escaping cannot produce an invalid pattern.
        Self::from_config(&config).unwrap_or(Self {
            min_output_chars: config.hollow_output_threshold,
            failure_pattern: None,
        })
    }
}
