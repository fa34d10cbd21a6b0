use std::fmt;
use std::path::Path;

/// Longest accepted file name, in bytes
pub const MAX_FILENAME_LEN: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub code: &'static str,
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Sanitizes a client-supplied file name so it can be used both as the last
/// segment of a remote key and as a local file name.
pub fn sanitize_filename(filename: &str) -> Result<String, ValidationError> {
    // Get only the filename component (remove any path)
    let name = Path::new(filename.trim())
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");

    if filename.contains("..") || filename.contains('/') || filename.contains('\\') {
        tracing::warn!("Path traversal attempt detected: {}", filename);
    }

    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_control()
                || c == '/'
                || c == '\\'
                || c == ':'
                || c == '*'
                || c == '?'
                || c == '"'
                || c == '<'
                || c == '>'
                || c == '|'
                || c == ';'
            {
                '_'
            } else {
                c
            }
        })
        .collect();

    if sanitized.is_empty() {
        return Err(ValidationError {
            code: "INVALID_FILENAME",
            message: "Filename cannot be empty".to_string(),
        });
    }

    // Prevent hidden files
    if sanitized.starts_with('.') {
        return Err(ValidationError {
            code: "HIDDEN_FILE",
            message: "Hidden files (starting with '.') are not allowed".to_string(),
        });
    }

    // Limit length safely for UTF-8
    let sanitized = if sanitized.len() > MAX_FILENAME_LEN {
        let mut end = MAX_FILENAME_LEN;
        while !sanitized.is_char_boundary(end) {
            end -= 1;
        }
        sanitized[..end].to_string()
    } else {
        sanitized
    };

    Ok(sanitized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_name_passes() {
        assert_eq!(sanitize_filename("left.jpg").unwrap(), "left.jpg");
        assert_eq!(sanitize_filename("  vista 01.png ").unwrap(), "vista 01.png");
    }

    #[test]
    fn test_strips_paths() {
        assert_eq!(sanitize_filename("../../etc/passwd").unwrap(), "passwd");
        assert_eq!(sanitize_filename("/tmp/a.jpg").unwrap(), "a.jpg");
    }

    #[test]
    fn test_replaces_reserved_characters() {
        assert_eq!(sanitize_filename("a:b*c?.jpg").unwrap(), "a_b_c_.jpg");
    }

    #[test]
    fn test_rejects_empty_and_hidden() {
        assert_eq!(sanitize_filename("").unwrap_err().code, "INVALID_FILENAME");
        assert_eq!(sanitize_filename("..").unwrap_err().code, "INVALID_FILENAME");
        assert_eq!(sanitize_filename(".env").unwrap_err().code, "HIDDEN_FILE");
    }

    #[test]
    fn test_truncates_on_char_boundary() {
        let long = "é".repeat(200);
        let sanitized = sanitize_filename(&long).unwrap();
        assert!(sanitized.len() <= MAX_FILENAME_LEN);
        assert!(sanitized.chars().all(|c| c == 'é'));
    }
}
