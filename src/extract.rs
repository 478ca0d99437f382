//! Heuristic recovery of the command verb and key from a Redis request payload.
//!
//! This is not a RESP parser. The payload is cut on CRLF and the RESP array
//! layout is assumed: `*<n>`, `$<len>`, `<verb>`, `$<len>`, `<arg>`, ...

use std::fmt;

const CRLF: &str = "\r\n";

/// Command and key recovered from one request segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisRequest {
    pub command: String,
    /// Key cut to the configured maximum length
    pub key: String,
    /// Key as sent, used for prefix statistics
    pub full_key: String,
    pub full_command: String,
}

impl RedisRequest {
    /// `command + " " + key`, the composite used for top keys and correlation
    pub fn label(&self) -> String {
        format!("{} {}", self.command, self.key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Fewer than three CRLF tokens, no verb position
    Truncated { tokens: usize },
    /// AUTH traffic is never counted
    Auth,
    /// Verb present but no argument position
    TooShort { tokens: usize },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Truncated { tokens } => write!(f, "truncated payload ({tokens} tokens)"),
            SkipReason::Auth => f.write_str("auth command"),
            SkipReason::TooShort { tokens } => {
                write!(f, "command without arguments ({tokens} tokens)")
            }
        }
    }
}

pub fn split_tokens(payload: &str) -> Vec<&str> {
    payload.split(CRLF).collect()
}

/// Case-insensitive `auth` prefix check
pub fn is_auth(command: &str) -> bool {
    command
        .get(..4)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("auth"))
}

pub fn extract_request(payload: &str, max_key_length: usize) -> Result<RedisRequest, SkipReason> {
    let tokens = split_tokens(payload);
    if tokens.len() < 3 {
        return Err(SkipReason::Truncated {
            tokens: tokens.len(),
        });
    }

    let command = tokens[2];
    if is_auth(command) {
        return Err(SkipReason::Auth);
    }
    if tokens.len() < 5 {
        return Err(SkipReason::TooShort {
            tokens: tokens.len(),
        });
    }

    let filtered: Vec<&str> = tokens
        .iter()
        .copied()
        .filter(|token| !token.is_empty() && !token.starts_with('$') && !token.starts_with('*'))
        .collect();

    let full_key = select_key(&filtered).unwrap_or_default();

    Ok(RedisRequest {
        command: command.to_string(),
        key: truncate_key(full_key, max_key_length).to_string(),
        full_key: full_key.to_string(),
        full_command: filtered.join(" "),
    })
}

/// First argument after the verb that is not a lone space and is longer than two bytes
pub fn select_key<'a>(filtered: &[&'a str]) -> Option<&'a str> {
    filtered
        .iter()
        .skip(1)
        .copied()
        .find(|token| *token != " " && token.len() > 2)
}

/// Cut `key` to at most `max_len` bytes without splitting a character
pub fn truncate_key(key: &str, max_len: usize) -> &str {
    if key.len() <= max_len {
        return key;
    }
    let mut end = max_len;
    while !key.is_char_boundary(end) {
        end -= 1;
    }
    &key[..end]
}

/// Cumulative key prefixes at each separator, with and without the separator.
///
/// `user:1001` yields `user` and `user:`. A key without separators is its own prefix.
pub fn key_prefixes<'a>(key: &'a str, separators: &str) -> Vec<&'a str> {
    let mut prefixes: Vec<&str> = Vec::new();
    let mut found = false;

    for (idx, ch) in key.char_indices() {
        if !separators.contains(ch) {
            continue;
        }
        found = true;
        for candidate in [&key[..idx], &key[..idx + ch.len_utf8()]] {
            if !candidate.is_empty() && !prefixes.contains(&candidate) {
                prefixes.push(candidate);
            }
        }
    }

    if !found && !key.is_empty() {
        prefixes.push(key);
    }
    prefixes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KEY_SEPARATORS;

    fn resp(args: &[&str]) -> String {
        let mut out = format!("*{}\r\n", args.len());
        for arg in args {
            out.push_str(&format!("${}\r\n{}\r\n", arg.len(), arg));
        }
        out
    }

    #[test]
    fn test_extract_get() {
        let request = extract_request(&resp(&["GET", "foo"]), 100).unwrap();
        assert_eq!(request.command, "GET");
        assert_eq!(request.key, "foo");
        assert_eq!(request.full_command, "GET foo");
        assert_eq!(request.label(), "GET foo");
    }

    #[test]
    fn test_extract_skips_short_arguments() {
        let request = extract_request(&resp(&["HSET", "ab", "user:42", "name", "v"]), 100).unwrap();
        assert_eq!(request.key, "user:42");
        assert_eq!(request.full_command, "HSET ab user:42 name v");
    }

    #[test]
    fn test_extract_no_qualifying_key() {
        let request = extract_request(&resp(&["INCR", "ab"]), 100).unwrap();
        assert_eq!(request.key, "");
        assert_eq!(request.label(), "INCR ");
    }

    #[test]
    fn test_truncated_payload() {
        assert_eq!(
            extract_request("PING\r\n", 100),
            Err(SkipReason::Truncated { tokens: 2 })
        );
        assert_eq!(extract_request("", 100), Err(SkipReason::Truncated { tokens: 1 }));
    }

    #[test]
    fn test_auth_is_skipped() {
        assert_eq!(
            extract_request(&resp(&["AUTH", "secret"]), 100),
            Err(SkipReason::Auth)
        );
        assert_eq!(
            extract_request(&resp(&["auth", "user", "secret"]), 100),
            Err(SkipReason::Auth)
        );
        assert!(is_auth("Auth"));
        assert!(!is_auth("au"));
        assert!(!is_auth("GET"));
    }

    #[test]
    fn test_command_without_arguments() {
        assert_eq!(
            extract_request("*1\r\n$4\r\nPING\r\n", 100),
            Err(SkipReason::TooShort { tokens: 4 })
        );
    }

    #[test]
    fn test_key_truncation() {
        let request = extract_request(&resp(&["GET", "session:abcdefgh"]), 10).unwrap();
        assert_eq!(request.key, "session:ab");
        assert_eq!(request.full_key, "session:abcdefgh");
        assert_eq!(request.label(), "GET session:ab");
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        assert_eq!(truncate_key("ké", 2), "k");
        assert_eq!(truncate_key("ké", 3), "ké");
        assert_eq!(truncate_key("abc", 10), "abc");
    }

    #[test]
    fn test_prefixes_single_separator() {
        assert_eq!(key_prefixes("user:1001", KEY_SEPARATORS), vec!["user", "user:"]);
    }

    #[test]
    fn test_prefixes_nested() {
        assert_eq!(
            key_prefixes("app:user_7:name", KEY_SEPARATORS),
            vec!["app", "app:", "app:user", "app:user_", "app:user_7", "app:user_7:"]
        );
    }

    #[test]
    fn test_prefixes_edge_cases() {
        assert_eq!(key_prefixes("plain", KEY_SEPARATORS), vec!["plain"]);
        assert!(key_prefixes("", KEY_SEPARATORS).is_empty());
        assert_eq!(key_prefixes(":x", KEY_SEPARATORS), vec![":"]);
        assert_eq!(key_prefixes("a::b", KEY_SEPARATORS), vec!["a", "a:", "a::"]);
    }
}
