//! Quiz checking
//!
//! A block with a non-empty question is a quiz. Passing the quiz completes
//! the block.

/// Borrowed view of a block's quiz fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quiz<'a> {
    pub question: &'a str,
    pub options: &'a [String],
    pub correct_index: Option<usize>,
}

/// Result of answering a quiz
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuizVerdict {
    Correct,
    Incorrect,
    /// The chosen option does not exist
    InvalidOption,
}

impl Quiz<'_> {
    pub fn check(&self, chosen: usize) -> QuizVerdict {
        if chosen >= self.options.len() {
            return QuizVerdict::InvalidOption;
        }
        match self.correct_index {
            Some(correct) if correct == chosen => QuizVerdict::Correct,
            _ => QuizVerdict::Incorrect,
        }
    }

    /// Option letter used when rendering ("A", "B", ...)
    pub fn option_label(index: usize) -> char {
        (b'A' + (index % 26) as u8) as char
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_answers() {
        let options = vec!["Plan".to_string(), "Do".to_string(), "Check".to_string()];
        let quiz = Quiz { question: "First step?", options: &options, correct_index: Some(0) };

        assert_eq!(quiz.check(0), QuizVerdict::Correct);
        assert_eq!(quiz.check(2), QuizVerdict::Incorrect);
        assert_eq!(quiz.check(3), QuizVerdict::InvalidOption);
    }

    #[test]
    fn test_quiz_without_answer_never_passes() {
        let options = vec!["a".to_string()];
        let quiz = Quiz { question: "?", options: &options, correct_index: None };
        assert_eq!(quiz.check(0), QuizVerdict::Incorrect);
    }

    #[test]
    fn test_option_labels() {
        assert_eq!(Quiz::option_label(0), 'A');
        assert_eq!(Quiz::option_label(3), 'D');
    }
}
