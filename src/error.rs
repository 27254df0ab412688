use thiserror::Error;

#[derive(Debug, Error)]
pub enum CheckinError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("http error: {0}")]
    Http(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("runtime error: {0}")]
    Runtime(String),
}

pub type Result<T> = std::result::Result<T, CheckinError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_category() {
        let err = CheckinError::Config("x".to_string());
        assert!(format!("{err}").contains("configuration error"));
        let err = CheckinError::Validation("bad time".to_string());
        assert_eq!(err.to_string(), "validation error: bad time");
    }
}
