use thiserror::Error;

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("failed to parse filter expression: {message}{}", hint_text(.hint))]
    Parse {
        message: String,
        hint: Option<String>,
    },

    #[error("cannot combine clauses before a base clause is set")]
    MissingBase,

    #[error("empty filter expression")]
    Empty,
}

impl FilterError {
    pub fn parse(message: impl Into<String>) -> Self {
        FilterError::Parse {
            message: message.into(),
            hint: None,
        }
    }
}

fn hint_text(hint: &Option<String>) -> String {
    match hint {
        Some(word) => format!(" (did you mean '{word}'?)"),
        None => String::new(),
    }
}
