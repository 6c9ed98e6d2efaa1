//! SMTP response parsing.
//!
//! Every line has the shape `^(\d{3})([- ])(.*)$`: a dash after the code marks
//! a continuation line, a space (or nothing) marks the final line.

use crate::error::{ClientError, Result};

/// A single line of an SMTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseLine {
    pub code: u16,
    /// Whether this is the last line of the response.
    pub is_last: bool,
    pub message: String,
}

/// A complete, possibly multi-line, SMTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// The code of the final line.
    pub code: u16,
    pub lines: Vec<String>,
}

impl Response {
    #[must_use]
    pub const fn new(code: u16, lines: Vec<String>) -> Self {
        Self { code, lines }
    }

    /// The text of the final line.
    #[must_use]
    pub fn message(&self) -> &str {
        self.lines.last().map_or("", String::as_str)
    }

    /// All lines joined by newlines.
    #[must_use]
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    /// Whether an EHLO response advertises `keyword`, e.g. `STARTTLS`.
    ///
    /// The first line is the server's greeting name and is not a keyword.
    #[must_use]
    pub fn has_extension(&self, keyword: &str) -> bool {
        self.lines.iter().skip(1).any(|line| {
            line.split_ascii_whitespace()
                .next()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(keyword))
        })
    }

    /// Parses a single response line.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::ParseError` if the line doesn't match SMTP format.
    pub fn parse_line(line: &str) -> Result<ResponseLine> {
        let code = line
            .get(..3)
            .filter(|code| code.bytes().all(|b| b.is_ascii_digit()))
            .ok_or_else(|| ClientError::ParseError(format!("Invalid response line: '{line}'")))?;

        let code = code
            .parse::<u16>()
            .map_err(|_| ClientError::ParseError(format!("Invalid status code: '{code}'")))?;

        let (is_last, message) = match line.as_bytes().get(3) {
            None => (true, String::new()),
            Some(b' ') => (true, line[4..].to_string()),
            Some(b'-') => (false, line[4..].to_string()),
            Some(c) => {
                return Err(ClientError::ParseError(format!(
                    "Invalid separator character: '{}'",
                    char::from(*c)
                )));
            }
        };

        Ok(ResponseLine {
            code,
            is_last,
            message,
        })
    }

    /// Parses a complete multi-line SMTP response from a buffer.
    ///
    /// Returns the parsed `Response` and the number of bytes consumed, or
    /// `None` if the buffer does not yet hold a final line.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::ParseError` if the response is malformed.
    pub fn parse_response(buffer: &[u8]) -> Result<Option<(Self, usize)>> {
        let mut lines = Vec::new();
        let mut consumed = 0;

        while let Some(end) = buffer[consumed..].iter().position(|&b| b == b'\n') {
            let raw = &buffer[consumed..consumed + end];
            consumed += end + 1;

            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            if raw.is_empty() {
                continue;
            }

            let line = Self::parse_line(std::str::from_utf8(raw)?)?;
            lines.push(line.message);

            if line.is_last {
                return Ok(Some((Self::new(line.code, lines), consumed)));
            }
        }

        Ok(None)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_line() {
        let line = ResponseLine {
            code: 220,
            is_last: true,
            message: "mail.example.com ESMTP".to_string(),
        };
        assert_eq!(
            Response::parse_line("220 mail.example.com ESMTP").unwrap(),
            line
        );
    }

    #[test]
    fn test_parse_multi_line_indicator() {
        let line = Response::parse_line("250-mail.example.com").unwrap();
        assert!(!line.is_last);
        assert_eq!(line.message, "mail.example.com");
    }

    #[test]
    fn test_parse_bare_code() {
        let line = Response::parse_line("250").unwrap();
        assert!(line.is_last);
        assert_eq!(line.message, "");
    }

    #[test]
    fn test_parse_invalid_lines() {
        assert!(Response::parse_line("25").is_err());
        assert!(Response::parse_line("abc hello").is_err());
        assert!(Response::parse_line("250+nope").is_err());
    }

    #[test]
    fn test_parse_complete_response() {
        let data = b"250 OK\r\n";
        let (response, consumed) = Response::parse_response(data).unwrap().unwrap();
        assert_eq!(response.code, 250);
        assert_eq!(response.lines, vec!["OK"]);
        assert_eq!(consumed, 8);
    }

    #[test]
    fn test_parse_multi_line_response() {
        let data = b"250-mail.example.com\r\n250-SIZE 10000000\r\n250 HELP\r\n";
        let (response, consumed) = Response::parse_response(data).unwrap().unwrap();
        assert_eq!(response.code, 250);
        assert_eq!(
            response.lines,
            vec!["mail.example.com", "SIZE 10000000", "HELP"]
        );
        assert_eq!(consumed, data.len());
    }

    #[test]
    fn test_code_comes_from_last_line() {
        let data = b"250-first\r\n251 last\r\n";
        let (response, _) = Response::parse_response(data).unwrap().unwrap();
        assert_eq!(response.code, 251);
        assert_eq!(response.message(), "last");
    }

    #[test]
    fn test_parse_incomplete_response() {
        assert!(
            Response::parse_response(b"250-mail.example.com\r\n250-SIZE")
                .unwrap()
                .is_none()
        );
        assert!(Response::parse_response(b"220 ready").unwrap().is_none());
    }

    #[test]
    fn test_leaves_pipelined_bytes_unconsumed() {
        let data = b"220 ready\r\n250 OK\r\n";
        let (response, consumed) = Response::parse_response(data).unwrap().unwrap();
        assert_eq!(response.code, 220);
        assert_eq!(consumed, 11);
    }

    #[test]
    fn test_has_extension() {
        let response = Response::new(
            250,
            vec![
                "mx.example.com greets you".to_string(),
                "SIZE 35882577".to_string(),
                "starttls".to_string(),
            ],
        );
        assert!(response.has_extension("STARTTLS"));
        assert!(!response.has_extension("PIPELINING"));

        let greeting_only = Response::new(250, vec!["STARTTLS.example.com".to_string()]);
        assert!(!greeting_only.has_extension("STARTTLS"));
    }
}
