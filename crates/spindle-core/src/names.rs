//! Validation of service-supplied names that become paths on disk.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

static FILE_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^/\\\x00]+$").expect("file name pattern is valid")
});

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NameError {
    #[error("Invalid file name: {0}")]
    Invalid(String),
}

/// Check that `name` is a single path component.
///
/// Anything goes except the empty name, `.` and `..`, and names holding a
/// path separator (`/` or `\`) or NUL.
///
/// Job ids, script names and project file names all come from the
/// coordination service and are joined onto the workspace root.
pub fn validate_file_name(name: &str) -> Result<&str, NameError> {
    if name == "." || name == ".." || !FILE_NAME.is_match(name) {
        return Err(NameError::Invalid(name.to_string()));
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_plain_names() {
        assert!(validate_file_name("script.py").is_ok());
        assert!(validate_file_name("sort-1.nba.out").is_ok());
        assert!(validate_file_name("a1b2c3_JOB").is_ok());
        assert!(validate_file_name("my data.csv").is_ok());
        assert!(validate_file_name("résumé (1).txt").is_ok());
        assert!(validate_file_name("...").is_ok());
    }

    #[test]
    fn test_rejects_paths() {
        assert!(validate_file_name("").is_err());
        assert!(validate_file_name(".").is_err());
        assert!(validate_file_name("..").is_err());
        assert!(validate_file_name("../etc/passwd").is_err());
        assert!(validate_file_name("dir/file.py").is_err());
        assert!(validate_file_name("dir\\file.py").is_err());
        assert!(validate_file_name("nul\0byte").is_err());
    }

    #[test]
    fn test_error_message() {
        let err = validate_file_name("a/b").unwrap_err();
        assert_eq!(err.to_string(), "Invalid file name: a/b");
    }
}
