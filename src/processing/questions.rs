//! Parsing and validation of the uploaded questions list.

use thiserror::Error;

/// Reasons a questions upload is rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QuestionsError {
    /// Payload is not UTF-8 JSON holding an array of strings.
    #[error("questions.json must be a JSON array of strings")]
    NotStringArray,
    /// Every entry was blank after trimming.
    #[error("questions.json must contain at least one non-empty question")]
    Empty,
    /// More questions than the configured ceiling.
    #[error("Too many questions: {count} (max {max})")]
    TooMany {
        /// Questions submitted.
        count: usize,
        /// Configured ceiling.
        max: usize,
    },
}

/// Parse a JSON array of strings, trimming entries and dropping blank ones.
pub fn parse_questions(bytes: &[u8]) -> Result<Vec<String>, QuestionsError> {
    let raw: Vec<String> =
        serde_json::from_slice(bytes).map_err(|_| QuestionsError::NotStringArray)?;
    normalize_questions(raw)
}

/// Trim every question and drop blank ones; at least one must remain.
pub fn normalize_questions(raw: Vec<String>) -> Result<Vec<String>, QuestionsError> {
    let questions: Vec<String> = raw
        .into_iter()
        .filter_map(|question| {
            let trimmed = question.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        })
        .collect();

    if questions.is_empty() {
        return Err(QuestionsError::Empty);
    }
    Ok(questions)
}

/// Reject lists longer than `max`.
pub fn check_question_limit(count: usize, max: usize) -> Result<(), QuestionsError> {
    if count > max {
        return Err(QuestionsError::TooMany { count, max });
    }
    Ok(())
}
