//! Line protocol: request classification and response lines.
//!
//! Every request is one `\n`-terminated line and gets exactly one response
//! line back:
//!
//! ```text
//! Request:  (empty line)        Response: NO_FILE_GIVEN
//! Request:  CLOSE               Response: CLOSED          (then close)
//! Request:  SHUTDOWN            Response: SHUTTING_DOWN   (then stop server)
//! Request:  /path/to/model.mln  Response: <value> | CALC_ERR
//! ```
//!
//! Control words match case-insensitively. Anything else is a model path.

use std::fmt;

/// Classification of one request line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command<'a> {
    /// No path supplied
    Empty,
    /// Close this connection
    Close,
    /// Close this connection, then stop the listener
    Shutdown,
    /// Evaluate the model file at the given path
    Evaluate(&'a str),
}

impl<'a> Command<'a> {
    /// Classify a line with its terminator already removed.
    pub fn parse(line: &'a str) -> Self {
        if line.is_empty() {
            Command::Empty
        } else if line.eq_ignore_ascii_case("CLOSE") {
            Command::Close
        } else if line.eq_ignore_ascii_case("SHUTDOWN") {
            Command::Shutdown
        } else {
            Command::Evaluate(line)
        }
    }
}

/// One response line, without its trailing newline
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    NoFileGiven,
    Closed,
    ShuttingDown,
    /// Shortest round-trip decimal: `1.0`, `1e21`, `NaN`, `inf`, `-inf`.
    /// Unlike Java's `Double.toString` this prints `inf` and `1e21`, not
    /// `Infinity` and `1.0E21`; both forms parse as floats.
    Value(f64),
    CalcErr,
    Err,
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::NoFileGiven => f.write_str("NO_FILE_GIVEN"),
            Response::Closed => f.write_str("CLOSED"),
            Response::ShuttingDown => f.write_str("SHUTTING_DOWN"),
            Response::Value(value) => f.write_str(ryu::Buffer::new().format(*value)),
            Response::CalcErr => f.write_str("CALC_ERR"),
            Response::Err => f.write_str("ERR"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty() {
        assert_eq!(Command::parse(""), Command::Empty);
    }

    #[test]
    fn test_parse_control_words() {
        for line in ["CLOSE", "close", "Close", "cLoSe"] {
            assert_eq!(Command::parse(line), Command::Close, "{line}");
        }
        for line in ["SHUTDOWN", "shutdown", "ShutDown"] {
            assert_eq!(Command::parse(line), Command::Shutdown, "{line}");
        }
    }

    #[test]
    fn test_parse_paths() {
        assert_eq!(
            Command::parse("/tmp/model.mln"),
            Command::Evaluate("/tmp/model.mln")
        );
        // Only exact control words are special.
        assert_eq!(Command::parse("CLOSE "), Command::Evaluate("CLOSE "));
        assert_eq!(Command::parse("closed"), Command::Evaluate("closed"));
        assert_eq!(Command::parse(" "), Command::Evaluate(" "));
    }

    #[test]
    fn test_response_lines() {
        assert_eq!(Response::NoFileGiven.to_string(), "NO_FILE_GIVEN");
        assert_eq!(Response::Closed.to_string(), "CLOSED");
        assert_eq!(Response::ShuttingDown.to_string(), "SHUTTING_DOWN");
        assert_eq!(Response::CalcErr.to_string(), "CALC_ERR");
        assert_eq!(Response::Err.to_string(), "ERR");
    }

    #[test]
    fn test_value_formatting() {
        assert_eq!(Response::Value(1.0).to_string(), "1.0");
        assert_eq!(Response::Value(-3.25).to_string(), "-3.25");
        assert_eq!(Response::Value(f64::NAN).to_string(), "NaN");
        assert_eq!(Response::Value(f64::INFINITY).to_string(), "inf");
        assert_eq!(Response::Value(f64::NEG_INFINITY).to_string(), "-inf");
        assert_eq!(Response::Value(1e21).to_string(), "1e21");

        let value = 123.456_789_012_345_67_f64;
        let text = Response::Value(value).to_string();
        assert_eq!(text.parse::<f64>().unwrap(), value);
    }
}
