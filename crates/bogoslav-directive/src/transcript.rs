//! Conversation transcripts inside `#+begin_ai` blocks.
//!
//! A line starting with `[ME]:` or `[AI]:` opens a new message. Lines whose
//! first non-blank characters are commas followed by a marker (`#+`, `[ME]:`,
//! `[AI]:`) are escaped content; one comma is dropped when reading and added
//! when writing.

use crate::types::{Message, Role};
use regex::Regex;
use std::borrow::Cow;
use std::sync::OnceLock;

fn escape_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^([ \t]*)(,*)(#\+|\[ME\]:|\[AI\]:)").expect("escape pattern is valid")
    })
}

/// Remove one escaping comma from a content line.
pub fn unescape_line(line: &str) -> Cow<'_, str> {
    match escape_pattern().captures(line) {
        Some(caps) if !caps[2].is_empty() => {
            let comma = caps[1].len();
            let mut out = String::with_capacity(line.len() - 1);
            out.push_str(&line[..comma]);
            out.push_str(&line[comma + 1..]);
            Cow::Owned(out)
        }
        _ => Cow::Borrowed(line),
    }
}

/// Escape a content line that would otherwise read as a marker.
pub fn escape_line(line: &str) -> Cow<'_, str> {
    match escape_pattern().captures(line) {
        Some(caps) => {
            let indent = caps[1].len();
            let mut out = String::with_capacity(line.len() + 1);
            out.push_str(&line[..indent]);
            out.push(',');
            out.push_str(&line[indent..]);
            Cow::Owned(out)
        }
        None => Cow::Borrowed(line),
    }
}

fn header_role(line: &str) -> Option<(Role, &str)> {
    if let Some(rest) = line.strip_prefix(Role::User.header()) {
        Some((Role::User, rest))
    } else {
        line.strip_prefix(Role::Model.header())
            .map(|rest| (Role::Model, rest))
    }
}

/// Split raw block content into messages.
///
/// Text before the first header becomes a user message unless it is blank.
pub fn split_messages(content: &str) -> Vec<Message> {
    let mut messages = Vec::new();
    let mut current: Option<Message> = None;
    let mut preamble = String::new();

    for line in content.split_inclusive('\n') {
        if let Some((role, rest)) = header_role(line) {
            if let Some(done) = current.take() {
                messages.push(done);
            } else if !preamble.trim().is_empty() {
                messages.push(Message::new(Role::User, std::mem::take(&mut preamble)));
            }
            let rest = rest.strip_prefix(' ').unwrap_or(rest);
            current = Some(Message::new(role, rest));
            continue;
        }

        let line = unescape_line(line);
        match current.as_mut() {
            Some(message) => message.text.push_str(&line),
            None => preamble.push_str(&line),
        }
    }

    match current {
        Some(done) => messages.push(done),
        None if !preamble.trim().is_empty() => messages.push(Message::new(Role::User, preamble)),
        None => {}
    }

    messages
}

/// Write messages back as block content, every line newline-terminated.
///
/// The first user message is written without a header unless its body
/// starts with a newline. Other headers share the line with the body,
/// separated by one space, unless the body starts with a newline.
pub fn join_messages(messages: &[Message]) -> String {
    let mut out = String::new();

    for (idx, message) in messages.iter().enumerate() {
        let body = if message.text.is_empty() {
            "\n".to_string()
        } else {
            escape_body(&message.text)
        };

        if idx == 0 && message.role == Role::User && !body.starts_with('\n') {
            out.push_str(&body);
        } else {
            out.push_str(message.role.header());
            if !body.starts_with('\n') {
                out.push(' ');
            }
            out.push_str(&body);
        }

        if !out.ends_with('\n') {
            out.push('\n');
        }
    }

    out
}

fn escape_body(text: &str) -> String {
    text.split_inclusive('\n')
        .map(|line| escape_line(line))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_user_message() {
        let messages = split_messages("Just some text\nwith multiple lines.\n");
        assert_eq!(
            messages,
            vec![Message::new(
                Role::User,
                "Just some text\nwith multiple lines.\n"
            )]
        );
    }

    #[test]
    fn test_headers_split_roles() {
        let content = "Some question here.\n[AI]: Some response.\nCan be\nmultiline\n[ME]: Another question.\n";
        let messages = split_messages(content);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0], Message::new(Role::User, "Some question here.\n"));
        assert_eq!(
            messages[1],
            Message::new(Role::Model, "Some response.\nCan be\nmultiline\n")
        );
        assert_eq!(messages[2], Message::new(Role::User, "Another question.\n"));
    }

    #[test]
    fn test_blank_preamble_is_dropped() {
        let messages = split_messages("\n  \n[ME]: hi\n");
        assert_eq!(messages, vec![Message::new(Role::User, "hi\n")]);
    }

    #[test]
    fn test_header_on_own_line_keeps_leading_newline() {
        let messages = split_messages("[ME]:\nquestion\n");
        assert_eq!(messages, vec![Message::new(Role::User, "\nquestion\n")]);
    }

    #[test]
    fn test_escaped_markers_are_content() {
        let content = "look at this:\n,[AI]: not a header\n,#+end_ai\n,,#+end_ai\n";
        let messages = split_messages(content);
        assert_eq!(messages.len(), 1);
        assert_eq!(
            messages[0].text,
            "look at this:\n[AI]: not a header\n#+end_ai\n,#+end_ai\n"
        );
    }

    #[test]
    fn test_join_omits_first_user_header() {
        let messages = vec![
            Message::new(Role::User, "question\n"),
            Message::new(Role::Model, "answer\n"),
            Message::new(Role::User, "\n"),
        ];
        assert_eq!(join_messages(&messages), "question\n[AI]: answer\n[ME]:\n");
    }

    #[test]
    fn test_join_keeps_header_when_body_starts_with_newline() {
        let messages = vec![Message::new(Role::User, "\nquestion\n")];
        assert_eq!(join_messages(&messages), "[ME]:\nquestion\n");
    }

    #[test]
    fn test_join_escapes_marker_lines() {
        let messages = vec![
            Message::new(Role::User, "q\n"),
            Message::new(Role::Model, "code:\n#+end_ai\n[ME]: quoted\n"),
        ];
        let joined = join_messages(&messages);
        assert_eq!(joined, "q\n[AI]: code:\n,#+end_ai\n,[ME]: quoted\n");
        assert_eq!(split_messages(&joined), messages);
    }

    #[test]
    fn test_join_terminates_unterminated_body() {
        let messages = vec![
            Message::new(Role::User, "q"),
            Message::new(Role::Model, "a"),
        ];
        assert_eq!(join_messages(&messages), "q\n[AI]: a\n");
    }
}
