//! Typed domain errors.
//!
//! The data layer returns `anyhow::Result` and wraps these variants so the
//! API layer can recover the category with `downcast_ref` and choose a status.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StudyError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unauthorized(String),
}

impl StudyError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_message_names_entity_and_id() {
        let err = StudyError::not_found("Assignment", 7);
        assert_eq!(err.to_string(), "Assignment 7 not found");
    }

    #[test]
    fn wrapped_in_anyhow_is_recoverable() {
        let err: anyhow::Error = StudyError::validation("title is required").into();
        let err = err.context("Failed to create assignment");
        match err.downcast_ref::<StudyError>() {
            Some(StudyError::Validation(msg)) => assert_eq!(msg, "title is required"),
            other => panic!("Expected Validation, got {:?}", other),
        }
    }
}
