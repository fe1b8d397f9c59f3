//! Line framing and request parsing for the shell protocol.
//!
//! Every request and reply is one UTF-8 line. Requests come in three
//! flavours:
//!
//! ```text
//! RETRIEVE_FILE_STATUS:/home/u/work/doc.txt        synchronous
//! ASYNC_LIST_WIDGETS:7|{"filter":"all"}            jobId|json
//! V2/LIST_ACCOUNTS:{"id":"abc","arguments":{}}     json envelope
//! ```

use crate::error::{ProtocolError, Result};
use serde_json::{Map, Value};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use unicode_normalization::UnicodeNormalization;

/// Separates the file names of multi-file commands.
pub const RECORD_SEPARATOR: char = '\u{1e}';

pub const ASYNC_PREFIX: &str = "ASYNC_";
pub const V2_PREFIX: &str = "V2/";

/// A parsed request line.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Sync {
        command: String,
        argument: String,
    },
    Async {
        command: String,
        job_id: String,
        arguments: Map<String, Value>,
    },
    V2 {
        command: String,
        id: String,
        arguments: Map<String, Value>,
    },
}

impl Request {
    pub fn command(&self) -> &str {
        match self {
            Request::Sync { command, .. }
            | Request::Async { command, .. }
            | Request::V2 { command, .. } => command,
        }
    }
}

/// NFC-normalizes a raw line and drops the trailing newline.
///
/// Nothing else is trimmed: leading and trailing spaces are valid in file
/// names.
pub fn normalize_line(raw: &str) -> String {
    let composed: String = raw.nfc().collect();
    match composed.strip_suffix('\n') {
        Some(line) => line.to_string(),
        None => composed,
    }
}

/// Splits `COMMAND:argument`; the command is uppercased.
pub fn split_command(line: &str) -> (String, &str) {
    match line.split_once(':') {
        Some((command, argument)) => (command.to_uppercase(), argument),
        None => (line.to_uppercase(), ""),
    }
}

/// Parses one normalized line.
pub fn parse_request(line: &str) -> Result<Request> {
    let (command, argument) = split_command(line);
    if command.is_empty() {
        return Err(ProtocolError::MalformedLine(line.to_string()));
    }

    if command.starts_with(ASYNC_PREFIX) {
        let parts: Vec<&str> = argument.split('|').collect();
        let [job_id, json] = parts.as_slice() else {
            return Err(ProtocolError::ArgumentCount);
        };
        // An unreadable payload is treated as no arguments
        let arguments = match serde_json::from_str::<Value>(json) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        return Ok(Request::Async {
            command,
            job_id: job_id.to_string(),
            arguments,
        });
    }

    if command.starts_with(V2_PREFIX) {
        let envelope: Value = serde_json::from_str(argument)?;
        let id = match envelope.get("id") {
            Some(Value::String(id)) => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => return Err(ProtocolError::MalformedLine("missing job id".into())),
        };
        let arguments = match envelope.get("arguments") {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };
        return Ok(Request::V2 {
            command,
            id,
            arguments,
        });
    }

    Ok(Request::Sync {
        command,
        argument: argument.to_string(),
    })
}

/// Builds `VERB[:status][:path]`.
pub fn build_message(verb: &str, path: &str, status: &str) -> String {
    let mut message = verb.to_string();
    if !status.is_empty() {
        message.push(':');
        message.push_str(status);
    }
    if !path.is_empty() {
        message.push(':');
        message.push_str(&to_native_separators(path));
    }
    message
}

/// Appends the line terminator if it is missing.
pub fn terminate(message: &str) -> String {
    if message.ends_with('\n') {
        message.to_string()
    } else {
        format!("{message}\n")
    }
}

#[cfg(windows)]
fn to_native_separators(path: &str) -> String {
    path.replace('/', "\\")
}

#[cfg(not(windows))]
fn to_native_separators(path: &str) -> String {
    path.to_string()
}

/// Key under which a listener remembers a directory it asked about.
pub fn directory_hash(directory: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    directory.hash(&mut hasher);
    hasher.finish()
}

/// Hash of the directory containing `path` (everything before the last `/`).
pub fn parent_directory_hash(path: &str) -> u64 {
    let directory = match path.rfind('/') {
        Some(index) => &path[..index],
        None => path,
    };
    directory_hash(directory)
}

/// Splits a multi-file argument on the record separator.
pub fn split_files(argument: &str) -> Vec<&str> {
    argument
        .split(RECORD_SEPARATOR)
        .filter(|file| !file.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_the_newline_is_stripped() {
        assert_eq!(normalize_line("STATUS: a b \n"), "STATUS: a b ");
        assert_eq!(normalize_line("VERSION:"), "VERSION:");
    }

    #[test]
    fn decomposed_names_are_composed() {
        // "e" followed by a combining acute accent
        let line = normalize_line("RETRIEVE_FILE_STATUS:/w/cafe\u{301}.txt\n");
        assert_eq!(line, "RETRIEVE_FILE_STATUS:/w/caf\u{e9}.txt");
    }

    #[test]
    fn command_is_uppercased_and_argument_kept() {
        assert_eq!(split_command("version:"), ("VERSION".to_string(), ""));
        assert_eq!(split_command("share:/a:b"), ("SHARE".to_string(), "/a:b"));
        assert_eq!(split_command("VERSION"), ("VERSION".to_string(), ""));
    }

    #[test]
    fn async_requests_need_two_parts() {
        assert!(matches!(
            parse_request("ASYNC_FOO:1"),
            Err(ProtocolError::ArgumentCount)
        ));
        assert!(matches!(
            parse_request("ASYNC_FOO:1|{}|x"),
            Err(ProtocolError::ArgumentCount)
        ));

        let request = parse_request("ASYNC_FOO:7|{\"a\":1}").unwrap();
        let Request::Async {
            job_id, arguments, ..
        } = request
        else {
            panic!("expected async request");
        };
        assert_eq!(job_id, "7");
        assert_eq!(arguments.get("a"), Some(&Value::from(1)));
    }

    #[test]
    fn v2_requests_carry_id_and_arguments() {
        let request =
            parse_request("V2/LIST_ACCOUNTS:{\"id\":\"abc\",\"arguments\":{\"x\":true}}").unwrap();
        assert_eq!(
            request,
            Request::V2 {
                command: "V2/LIST_ACCOUNTS".into(),
                id: "abc".into(),
                arguments: serde_json::from_str("{\"x\":true}").unwrap(),
            }
        );

        assert!(matches!(
            parse_request("V2/LIST_ACCOUNTS:{not json"),
            Err(ProtocolError::InvalidJson(_))
        ));
        assert!(matches!(
            parse_request("V2/LIST_ACCOUNTS:{\"arguments\":{}}"),
            Err(ProtocolError::MalformedLine(_))
        ));
    }

    #[test]
    fn messages_skip_empty_parts() {
        assert_eq!(build_message("STATUS", "/w/a.txt", "OK"), "STATUS:OK:/w/a.txt");
        assert_eq!(build_message("UPDATE_VIEW", "/w", ""), "UPDATE_VIEW:/w");
        assert_eq!(terminate("A"), "A\n");
        assert_eq!(terminate("A\n"), "A\n");
    }

    #[test]
    fn parent_hash_uses_the_containing_directory() {
        assert_eq!(parent_directory_hash("/w/sub/a.txt"), directory_hash("/w/sub"));
        assert_ne!(parent_directory_hash("/w/sub/a.txt"), directory_hash("/w"));
    }

    #[test]
    fn file_lists_split_on_record_separator() {
        assert_eq!(split_files("/w/a\u{1e}/w/b"), vec!["/w/a", "/w/b"]);
        assert_eq!(split_files(""), Vec::<&str>::new());
    }
}
