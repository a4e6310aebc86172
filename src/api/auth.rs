//! Shared-secret verification for the deploy-request endpoint.

use crate::error::GradeError;

fn constant_time_eq(a: &str, b: &str) -> bool {
    let a_bytes = a.as_bytes();
    let b_bytes = b.as_bytes();
    if a_bytes.len() != b_bytes.len() {
        return false;
    }
    a_bytes
        .iter()
        .zip(b_bytes)
        .fold(0u8, |diff, (x, y)| diff | (x ^ y))
        == 0
}

/// Compare the provided secret against the configured one.
///
/// An unconfigured secret rejects every request.
pub fn verify_secret(expected: Option<&str>, provided: &str) -> Result<(), GradeError> {
    match expected {
        Some(expected) if constant_time_eq(expected, provided) => Ok(()),
        Some(_) => Err(GradeError::Auth),
        None => {
            tracing::warn!("STUDENT_SECRET is not configured; rejecting deploy request");
            Err(GradeError::Auth)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_strings_match() {
        assert!(constant_time_eq("s3cret", "s3cret"));
        assert!(!constant_time_eq("s3cret", "s3creT"));
        assert!(!constant_time_eq("s3cret", "s3cret!"));
        assert!(constant_time_eq("", ""));
    }

    #[test]
    fn missing_secret_rejects() {
        assert!(matches!(verify_secret(None, "x"), Err(GradeError::Auth)));
        assert!(matches!(verify_secret(Some("a"), "b"), Err(GradeError::Auth)));
        assert!(verify_secret(Some("a"), "a").is_ok());
    }
}
