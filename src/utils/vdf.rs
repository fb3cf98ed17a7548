//! Reader and writer for Valve's KeyValues text format (`*.vdf`, `*.acf`).
//!
//! The tree keeps every key in file order, duplicates included, so a parsed
//! document can be written back without losing entries this crate does not
//! understand. Key lookups are case-insensitive like Steam's own.

use std::fmt::Write as _;

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum VdfError {
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },
    #[error("key '{0}' holds a value where a block was expected")]
    NotANode(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VdfValue {
    Text(String),
    Node(VdfNode),
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Entry {
    key: String,
    value: VdfValue,
    /// Platform conditional such as `$WIN32`, written back after the entry.
    condition: Option<String>,
}

impl Entry {
    fn new(key: &str, value: VdfValue) -> Self {
        Self {
            key: key.to_string(),
            value,
            condition: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VdfNode {
    entries: Vec<Entry>,
}

impl VdfNode {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.key.eq_ignore_ascii_case(key))
    }

    pub fn get(&self, key: &str) -> Option<&VdfValue> {
        self.position(key).map(|index| &self.entries[index].value)
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        match self.get(key)? {
            VdfValue::Text(value) => Some(value.as_str()),
            VdfValue::Node(_) => None,
        }
    }

    pub fn node(&self, key: &str) -> Option<&VdfNode> {
        match self.get(key)? {
            VdfValue::Node(node) => Some(node),
            VdfValue::Text(_) => None,
        }
    }

    pub fn node_mut(&mut self, key: &str) -> Option<&mut VdfNode> {
        let index = self.position(key)?;
        match &mut self.entries[index].value {
            VdfValue::Node(node) => Some(node),
            VdfValue::Text(_) => None,
        }
    }

    pub fn node_at(&self, path: &[&str]) -> Option<&VdfNode> {
        path.iter().try_fold(self, |node, key| node.node(key))
    }

    pub fn node_at_mut(&mut self, path: &[&str]) -> Option<&mut VdfNode> {
        let mut current = self;
        for key in path {
            current = current.node_mut(key)?;
        }
        Some(current)
    }

    /// Returns the child block, appending an empty one when absent.
    pub fn ensure_node(&mut self, key: &str) -> Result<&mut VdfNode, VdfError> {
        let index = match self.position(key) {
            Some(index) => index,
            None => {
                self.entries
                    .push(Entry::new(key, VdfValue::Node(VdfNode::new())));
                self.entries.len() - 1
            }
        };
        match &mut self.entries[index].value {
            VdfValue::Node(node) => Ok(node),
            VdfValue::Text(_) => Err(VdfError::NotANode(key.to_string())),
        }
    }

    pub fn ensure_path(&mut self, path: &[&str]) -> Result<&mut VdfNode, VdfError> {
        let mut current = self;
        for key in path {
            current = current.ensure_node(key)?;
        }
        Ok(current)
    }

    /// Replaces the value in place, keeping the key's position, or appends.
    pub fn set_text(&mut self, key: &str, value: impl Into<String>) {
        let value = VdfValue::Text(value.into());
        match self.position(key) {
            Some(index) => self.entries[index].value = value,
            None => self.entries.push(Entry::new(key, value)),
        }
    }

    /// Removes every entry matching `key`, returning the first.
    pub fn remove(&mut self, key: &str) -> Option<VdfValue> {
        let mut removed = None;
        let mut kept = Vec::with_capacity(self.entries.len());
        for entry in self.entries.drain(..) {
            if entry.key.eq_ignore_ascii_case(key) {
                if removed.is_none() {
                    removed = Some(entry.value);
                }
            } else {
                kept.push(entry);
            }
        }
        self.entries = kept;
        removed
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.key.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Platform conditional attached to `key`, without brackets.
    pub fn condition(&self, key: &str) -> Option<&str> {
        self.position(key)
            .and_then(|index| self.entries[index].condition.as_deref())
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Token {
    Text(String),
    Condition(String),
    Open,
    Close,
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
    peeked: Option<Token>,
}

impl<'a> Lexer<'a> {
    fn new(text: &'a str) -> Self {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        Self {
            chars: text.chars().peekable(),
            line: 1,
            peeked: None,
        }
    }

    fn error(&self, message: impl Into<String>) -> VdfError {
        VdfError::Syntax {
            line: self.line,
            message: message.into(),
        }
    }

    fn bump(&mut self) -> Option<char> {
        let next = self.chars.next();
        if next == Some('\n') {
            self.line += 1;
        }
        next
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.chars.peek() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('/') => {
                    let mut lookahead = self.chars.clone();
                    lookahead.next();
                    if lookahead.peek() != Some(&'/') {
                        return;
                    }
                    while let Some(c) = self.bump() {
                        if c == '\n' {
                            break;
                        }
                    }
                }
                _ => return,
            }
        }
    }

    fn quoted(&mut self) -> Result<String, VdfError> {
        let mut value = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string")),
                Some('"') => return Ok(value),
                Some('\\') => match self.bump() {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some('r') => value.push('\r'),
                    Some('\\') => value.push('\\'),
                    Some('"') => value.push('"'),
                    Some(other) => {
                        value.push('\\');
                        value.push(other);
                    }
                    None => return Err(self.error("unterminated string")),
                },
                Some(c) => value.push(c),
            }
        }
    }

    fn bare(&mut self, first: char) -> String {
        let mut value = String::from(first);
        while let Some(&c) = self.chars.peek() {
            if c.is_whitespace() || c == '{' || c == '}' || c == '"' {
                break;
            }
            value.push(c);
            self.bump();
        }
        value
    }

    fn condition(&mut self) -> Result<String, VdfError> {
        let mut value = String::new();
        loop {
            match self.bump() {
                None | Some('\n') => return Err(self.error("unterminated conditional")),
                Some(']') => return Ok(value.trim().to_string()),
                Some(c) => value.push(c),
            }
        }
    }

    fn next_token(&mut self) -> Result<Option<Token>, VdfError> {
        if let Some(token) = self.peeked.take() {
            return Ok(Some(token));
        }
        self.skip_trivia();
        let Some(c) = self.bump() else {
            return Ok(None);
        };
        Ok(Some(match c {
            '{' => Token::Open,
            '}' => Token::Close,
            '"' => Token::Text(self.quoted()?),
            '[' => Token::Condition(self.condition()?),
            other => Token::Text(self.bare(other)),
        }))
    }

    /// Consumes a conditional if one comes next.
    fn take_condition(&mut self) -> Result<Option<String>, VdfError> {
        match self.next_token()? {
            Some(Token::Condition(condition)) => Ok(Some(condition)),
            other => {
                self.peeked = other;
                Ok(None)
            }
        }
    }
}

pub fn parse(text: &str) -> Result<VdfNode, VdfError> {
    let mut lexer = Lexer::new(text);
    let root = parse_block(&mut lexer, false)?;
    Ok(root)
}

fn parse_block(lexer: &mut Lexer<'_>, nested: bool) -> Result<VdfNode, VdfError> {
    let mut node = VdfNode::new();
    loop {
        let key = match lexer.next_token()? {
            None if nested => return Err(lexer.error("unexpected end of file inside block")),
            None => return Ok(node),
            Some(Token::Close) if nested => return Ok(node),
            Some(Token::Close) => return Err(lexer.error("unbalanced '}'")),
            Some(Token::Open) => return Err(lexer.error("block without a key")),
            Some(Token::Condition(_)) => return Err(lexer.error("conditional without a key")),
            Some(Token::Text(key)) => key,
        };
        let mut condition = lexer.take_condition()?;
        let value = match lexer.next_token()? {
            Some(Token::Text(value)) => VdfValue::Text(value),
            Some(Token::Open) => VdfValue::Node(parse_block(lexer, true)?),
            Some(Token::Close) | Some(Token::Condition(_)) | None => {
                return Err(lexer.error(format!("key '{}' has no value", key)))
            }
        };
        if let VdfValue::Text(_) = value {
            if let Some(trailing) = lexer.take_condition()? {
                condition = Some(trailing);
            }
        }
        node.entries.push(Entry {
            key,
            value,
            condition,
        });
    }
}

fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            '\t' => escaped.push_str("\\t"),
            '\r' => escaped.push_str("\\r"),
            other => escaped.push(other),
        }
    }
    escaped
}

pub fn to_string(node: &VdfNode) -> String {
    let mut out = String::new();
    write_block(&mut out, node, 0);
    out
}

fn write_block(out: &mut String, node: &VdfNode, depth: usize) {
    let indent = "\t".repeat(depth);
    for entry in &node.entries {
        let condition = entry
            .condition
            .as_ref()
            .map(|condition| format!(" [{}]", condition))
            .unwrap_or_default();
        let key = escape(&entry.key);
        match &entry.value {
            VdfValue::Text(text) => {
                let _ = writeln!(
                    out,
                    "{}\"{}\"\t\t\"{}\"{}",
                    indent,
                    key,
                    escape(text),
                    condition
                );
            }
            VdfValue::Node(child) => {
                let _ = writeln!(out, "{}\"{}\"{}", indent, key, condition);
                let _ = writeln!(out, "{}{{", indent);
                write_block(out, child, depth + 1);
                let _ = writeln!(out, "{}}}", indent);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOCALCONFIG: &str = r#"
"UserLocalConfigStore"
{
	"Software"
	{
		"Valve"
		{
			"Steam"
			{
				"apps"
				{
					"311210"
					{
						"LastPlayed"		"1700000000"
						"LaunchOptions"		"-windowed \"quoted arg\" %command%"
					}
					"42"
					{
						"LaunchOptions"		"-novid"
					}
				}
				// comment line
				"UnknownBlock"	{ "keep" "me" }
			}
		}
	}
	"friends"	{ "PersonaName" "someone" }
}
"#;

    #[test]
    fn parses_nested_blocks_case_insensitively() {
        let root = parse(LOCALCONFIG).expect("parse localconfig");
        let apps = root
            .node_at(&["userlocalconfigstore", "software", "valve", "steam", "APPS"])
            .expect("apps block");
        let game = apps.node("311210").expect("app block");
        assert_eq!(
            game.text("launchoptions"),
            Some("-windowed \"quoted arg\" %command%")
        );
        assert_eq!(apps.node("42").and_then(|n| n.text("LaunchOptions")), Some("-novid"));
    }

    #[test]
    fn rewrite_keeps_unknown_keys_and_order() {
        let mut root = parse(LOCALCONFIG).expect("parse localconfig");
        root.ensure_path(&["UserLocalConfigStore", "Software", "Valve", "Steam", "apps", "311210"])
            .expect("app path")
            .set_text("LaunchOptions", "%command%");

        let written = to_string(&root);
        let reparsed = parse(&written).expect("reparse");
        let steam = reparsed
            .node_at(&["UserLocalConfigStore", "Software", "Valve", "Steam"])
            .expect("steam block");
        assert_eq!(steam.keys().collect::<Vec<_>>(), vec!["apps", "UnknownBlock"]);
        assert_eq!(steam.node("UnknownBlock").and_then(|n| n.text("keep")), Some("me"));
        let game = steam.node_at(&["apps", "311210"]).expect("app block");
        assert_eq!(game.keys().collect::<Vec<_>>(), vec!["LastPlayed", "LaunchOptions"]);
        assert_eq!(game.text("LaunchOptions"), Some("%command%"));
        assert_eq!(
            reparsed
                .node_at(&["UserLocalConfigStore", "friends"])
                .and_then(|n| n.text("PersonaName")),
            Some("someone")
        );
    }

    #[test]
    fn platform_conditionals_are_written_back() {
        let text = "\"root\"\n{\n\t\"font\"\t\"Tahoma\"\t[$WIN32]\n\t\"linux\" [$LINUX]\n\t{\n\t\t\"a\"\t\"b\"\n\t}\n\t\"plain\"\t\"1\"\n}\n";
        let root = parse(text).expect("parse conditionals");
        let block = root.node("root").expect("root block");
        assert_eq!(block.condition("font"), Some("$WIN32"));
        assert_eq!(block.condition("linux"), Some("$LINUX"));
        assert_eq!(block.condition("plain"), None);
        assert_eq!(block.keys().collect::<Vec<_>>(), vec!["font", "linux", "plain"]);

        let reparsed = parse(&to_string(&root)).expect("reparse");
        assert_eq!(reparsed, root);
        assert!(to_string(&root).contains("\"Tahoma\" [$WIN32]"));
    }

    #[test]
    fn escapes_survive_a_round_trip() {
        let mut root = VdfNode::new();
        root.set_text("value", "WINEDLLOVERRIDES=\"dsound=n,b\" %command% C:\\games");
        let reparsed = parse(&to_string(&root)).expect("reparse");
        assert_eq!(reparsed, root);
    }

    #[test]
    fn rejects_truncated_documents() {
        assert!(matches!(
            parse("\"root\"\n{\n\t\"a\"\t\"b\"\n"),
            Err(VdfError::Syntax { .. })
        ));
        assert!(matches!(parse("\"root\" }"), Err(VdfError::Syntax { .. })));
        assert!(matches!(parse("\"lonely\""), Err(VdfError::Syntax { .. })));
    }

    #[test]
    fn ensure_node_refuses_to_clobber_text() {
        let mut root = VdfNode::new();
        root.set_text("apps", "oops");
        assert_eq!(
            root.ensure_node("apps").map(|_| ()),
            Err(VdfError::NotANode("apps".to_string()))
        );
    }

    #[test]
    fn remove_drops_duplicates() {
        let mut root = parse("\"a\" \"1\" \"b\" \"2\" \"A\" \"3\"").expect("parse");
        assert_eq!(root.remove("a"), Some(VdfValue::Text("1".to_string())));
        assert_eq!(root.keys().collect::<Vec<_>>(), vec!["b"]);
    }
}
