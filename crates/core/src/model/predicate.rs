use serde::{Deserialize, Serialize};

use crate::model::Answers;

/// Condition over the collected answers, used for progressive field reveal.
///
/// Serialized externally tagged, e.g. `{"filled": "name"}` or
/// `{"equals": {"field": "category", "value": "face"}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    /// The field holds a non-blank value.
    Filled(String),
    Equals { field: String, value: String },
    OneOf { field: String, values: Vec<String> },
    Not(Box<Predicate>),
    All(Vec<Predicate>),
    Any(Vec<Predicate>),
}

impl Predicate {
    #[must_use]
    pub fn filled(field: impl Into<String>) -> Self {
        Self::Filled(field.into())
    }

    #[must_use]
    pub fn equals(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Equals {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Evaluates the predicate. Comparisons use trimmed values.
    #[must_use]
    pub fn evaluate(&self, answers: &Answers) -> bool {
        match self {
            Predicate::Filled(field) => answers.is_filled(field),
            Predicate::Equals { field, value } => answers.filled(field) == Some(value.as_str()),
            Predicate::OneOf { field, values } => answers
                .filled(field)
                .is_some_and(|v| values.iter().any(|candidate| candidate == v)),
            Predicate::Not(inner) => !inner.evaluate(answers),
            Predicate::All(all) => all.iter().all(|p| p.evaluate(answers)),
            Predicate::Any(any) => any.iter().any(|p| p.evaluate(answers)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn answers(pairs: &[(&str, &str)]) -> Answers {
        pairs.iter().copied().collect()
    }

    #[test]
    fn filled_ignores_blank_values() {
        let p = Predicate::filled("name");
        assert!(!p.evaluate(&answers(&[])));
        assert!(!p.evaluate(&answers(&[("name", "  ")])));
        assert!(p.evaluate(&answers(&[("name", "Jane")])));
    }

    #[test]
    fn combinators_compose() {
        let p = Predicate::All(vec![
            Predicate::filled("name"),
            Predicate::Not(Box::new(Predicate::OneOf {
                field: "category".into(),
                values: vec!["body".into(), "skin".into()],
            })),
        ]);
        assert!(p.evaluate(&answers(&[("name", "Jane"), ("category", "face")])));
        assert!(!p.evaluate(&answers(&[("name", "Jane"), ("category", "skin")])));

        let any = Predicate::Any(vec![
            Predicate::equals("category", "face"),
            Predicate::equals("category", "body"),
        ]);
        assert!(any.evaluate(&answers(&[("category", " body ")])));
        assert!(!any.evaluate(&answers(&[("category", "skin")])));
    }

    #[test]
    fn deserializes_externally_tagged() {
        let p: Predicate =
            serde_json::from_str(r#"{"all": [{"filled": "name"}, {"equals": {"field": "a", "value": "b"}}]}"#)
                .unwrap();
        assert_eq!(
            p,
            Predicate::All(vec![Predicate::filled("name"), Predicate::equals("a", "b")])
        );
    }
}
