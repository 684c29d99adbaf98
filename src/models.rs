use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One multiple-choice question as it travels over the wire and through the
/// generation contract: the prompt, an ordered option list, and the index of
/// the correct option.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Question {
    pub question: String,
    pub options: Vec<String>,
    pub correct: usize,
}

/// Serializes an option list into its stored form. Option order is frozen at
/// this point; the stored correct index refers into this exact ordering.
pub fn encode_options(options: &[String]) -> String {
    serde_json::to_string(options).unwrap_or_else(|_| "[]".to_string())
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("options payload is not a JSON string array: {0}")]
    Options(String),
    #[error("stored answer {0:?} is not an index into {1} options")]
    Answer(String, usize),
}

/// Rebuilds a [`Question`] from a stored row's `(question, options, answer)`
/// triple.
pub fn decode_question(question: &str, options_json: &str, answer: &str) -> Result<Question, DecodeError> {
    let options: Vec<String> = serde_json::from_str(options_json)
        .map_err(|e| DecodeError::Options(e.to_string()))?;
    let correct: usize = answer
        .trim()
        .parse()
        .map_err(|_| DecodeError::Answer(answer.to_string(), options.len()))?;
    if correct >= options.len() {
        return Err(DecodeError::Answer(answer.to_string(), options.len()));
    }
    Ok(Question {
        question: question.to_string(),
        options,
        correct,
    })
}

/// Counts correct answers. `answers` maps question index to selected option
/// index; unanswered indices never match and count as incorrect.
pub fn score(questions: &[Question], answers: &HashMap<usize, usize>) -> u32 {
    questions
        .iter()
        .enumerate()
        .filter(|(i, q)| answers.get(i) == Some(&q.correct))
        .count() as u32
}

/// Rounded percentage of correct answers. `total == 0` yields 0; callers are
/// expected not to render results for an empty question set.
pub fn percentage(score: u32, total: u32) -> u32 {
    if total == 0 {
        return 0;
    }
    ((score as f64) * 100.0 / (total as f64)).round() as u32
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub field: String,
    pub issue: String,
}

/// Structural checks applied before a question set is persisted.
pub fn validate_questions(questions: &[Question]) -> Result<(), Vec<ValidationIssue>> {
    let mut issues = Vec::new();
    if questions.is_empty() {
        issues.push(ValidationIssue {
            field: "questions".into(),
            issue: "must contain at least one question".into(),
        });
    }
    for (i, q) in questions.iter().enumerate() {
        if q.question.trim().is_empty() {
            issues.push(ValidationIssue {
                field: format!("questions[{i}].question"),
                issue: "must not be empty".into(),
            });
        }
        if q.options.len() < 2 {
            issues.push(ValidationIssue {
                field: format!("questions[{i}].options"),
                issue: "must contain at least 2 options".into(),
            });
        }
        for (j, opt) in q.options.iter().enumerate() {
            if opt.trim().is_empty() {
                issues.push(ValidationIssue {
                    field: format!("questions[{i}].options[{j}]"),
                    issue: "must not be empty".into(),
                });
            }
        }
        if q.correct >= q.options.len() {
            issues.push(ValidationIssue {
                field: format!("questions[{i}].correct"),
                issue: "must index into options".into(),
            });
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(issues)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_questions() -> Vec<Question> {
        vec![
            Question {
                question: "Capital of France".into(),
                options: vec!["Paris".into(), "Rome".into(), "Berlin".into(), "Madrid".into()],
                correct: 0,
            },
            Question {
                question: "2 + 2".into(),
                options: vec!["3".into(), "4".into(), "5".into(), "22".into()],
                correct: 1,
            },
            Question {
                question: "Largest ocean".into(),
                options: vec!["Atlantic".into(), "Indian".into(), "Pacific".into(), "Arctic".into()],
                correct: 2,
            },
        ]
    }

    #[test]
    fn score_counts_only_exact_matches() {
        let questions = sample_questions();
        let mut answers = HashMap::new();
        answers.insert(0, 0);
        answers.insert(1, 3);
        // index 2 left unanswered
        assert_eq!(score(&questions, &answers), 1);
    }

    #[test]
    fn score_is_bounded_and_full_only_when_all_correct() {
        let questions = sample_questions();
        let mut answers = HashMap::new();
        for (i, q) in questions.iter().enumerate() {
            answers.insert(i, q.correct);
        }
        assert_eq!(score(&questions, &answers), questions.len() as u32);

        answers.insert(1, 0);
        assert!(score(&questions, &answers) < questions.len() as u32);
    }

    #[test]
    fn score_of_empty_set_is_zero() {
        assert_eq!(score(&[], &HashMap::new()), 0);
    }

    #[test]
    fn percentage_rounds() {
        assert_eq!(percentage(2, 3), 67);
        assert_eq!(percentage(1, 3), 33);
        assert_eq!(percentage(3, 3), 100);
        assert_eq!(percentage(0, 0), 0);
    }

    #[test]
    fn options_round_trip_through_storage() {
        let q = &sample_questions()[0];
        let stored = encode_options(&q.options);
        let decoded = decode_question(&q.question, &stored, &q.correct.to_string()).unwrap();
        assert_eq!(&decoded, q);
    }

    #[test]
    fn decode_rejects_out_of_range_answer() {
        let stored = encode_options(&["a".to_string(), "b".to_string()]);
        let err = decode_question("q", &stored, "2").unwrap_err();
        assert!(matches!(err, DecodeError::Answer(_, 2)));
        assert!(decode_question("q", &stored, "x").is_err());
        assert!(decode_question("q", "not json", "0").is_err());
    }

    #[test]
    fn validate_flags_empty_prompt_and_bad_index() {
        let mut questions = sample_questions();
        questions[0].question = " ".into();
        questions[1].correct = 9;
        let issues = validate_questions(&questions).unwrap_err();
        assert!(issues.iter().any(|i| i.field == "questions[0].question"));
        assert!(issues.iter().any(|i| i.field == "questions[1].correct"));
        assert!(validate_questions(&sample_questions()).is_ok());
        assert!(validate_questions(&[]).is_err());
    }
}
