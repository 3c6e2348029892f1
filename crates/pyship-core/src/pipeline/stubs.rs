//! Interface stubs derived from Python source without executing it.
//!
//! The scanner joins physical lines into logical lines (bracket, string and
//! backslash continuations), then walks module and class level statements.
//! Public functions, classes, methods, annotated attributes, imports and
//! `__all__` survive; bodies become `...` and parameter defaults are elided.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StubError {
    pub(crate) line: usize,
    pub(crate) reason: String,
}

impl fmt::Display for StubError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.reason)
    }
}

impl std::error::Error for StubError {}

#[derive(Debug, Clone)]
struct LogicalLine {
    indent: usize,
    line: usize,
    text: String,
}

/// Renders the `.pyi` text for one module.
pub(crate) fn render_stub(source: &str) -> Result<String, StubError> {
    let lines = logical_lines(source)?;
    let mut items: Vec<Item> = Vec::new();
    let mut decorators: Vec<String> = Vec::new();
    let mut idx = 0;
    while idx < lines.len() {
        let line = &lines[idx];
        if line.indent != 0 {
            idx += 1;
            continue;
        }
        let body_end = block_end(&lines, idx, 0);
        match classify(&line.text) {
            Statement::Decorator => {
                decorators.push(line.text.clone());
                idx += 1;
                continue;
            }
            Statement::Def => {
                let def = parse_def(&line.text, line.line)?;
                require_body(&lines, idx, body_end, def.inline_body, line)?;
                if is_public(&def.name) {
                    let mut text = decorators.join("\n");
                    if !text.is_empty() {
                        text.push('\n');
                    }
                    text.push_str(&def.render());
                    items.push(Item::plain(text));
                }
            }
            Statement::Class => {
                let header = parse_class(&line.text, line.line)?;
                require_body(&lines, idx, body_end, header.inline_body, line)?;
                if is_public(&header.name) {
                    let members = class_members(&lines[idx + 1..body_end])?;
                    items.push(Item::class(render_class(&decorators, &header, &members)));
                }
            }
            Statement::Import | Statement::DunderAll => items.push(Item::plain(line.text.clone())),
            Statement::Annotated { name, annotation } => {
                if is_public(&name) {
                    items.push(Item::plain(format!("{name}: {annotation}")));
                }
            }
            Statement::Other => {}
        }
        decorators.clear();
        idx = body_end;
    }
    Ok(join_items(&items))
}

struct Item {
    text: String,
    is_class: bool,
}

impl Item {
    fn plain(text: String) -> Self {
        Self {
            text,
            is_class: false,
        }
    }

    fn class(text: String) -> Self {
        Self {
            text,
            is_class: true,
        }
    }
}

fn join_items(items: &[Item]) -> String {
    let mut out = String::new();
    for (pos, item) in items.iter().enumerate() {
        if pos > 0 {
            let spaced = item.is_class || items[pos - 1].is_class;
            out.push_str(if spaced { "\n\n" } else { "\n" });
        }
        out.push_str(&item.text);
    }
    if !out.is_empty() {
        out.push('\n');
    }
    out
}

fn render_class(decorators: &[String], header: &ClassHeader, members: &[String]) -> String {
    let mut lines: Vec<String> = decorators.to_vec();
    if members.is_empty() {
        lines.push(format!("{}: ...", header.header));
    } else {
        lines.push(format!("{}:", header.header));
        for member in members {
            for part in member.lines() {
                lines.push(format!("    {part}"));
            }
        }
    }
    lines.join("\n")
}

fn class_members(body: &[LogicalLine]) -> Result<Vec<String>, StubError> {
    let Some(member_indent) = body.first().map(|line| line.indent) else {
        return Ok(Vec::new());
    };
    let mut members = Vec::new();
    let mut decorators: Vec<String> = Vec::new();
    let mut idx = 0;
    while idx < body.len() {
        let line = &body[idx];
        if line.indent != member_indent {
            idx += 1;
            continue;
        }
        let end = block_end(body, idx, member_indent);
        match classify(&line.text) {
            Statement::Decorator => {
                decorators.push(line.text.clone());
                idx += 1;
                continue;
            }
            Statement::Def => {
                let def = parse_def(&line.text, line.line)?;
                require_body(body, idx, end, def.inline_body, line)?;
                if is_public(&def.name) {
                    let mut lines = decorators.clone();
                    lines.push(def.render());
                    members.push(lines.join("\n"));
                }
            }
            Statement::Class => {
                let nested = parse_class(&line.text, line.line)?;
                require_body(body, idx, end, nested.inline_body, line)?;
                if is_public(&nested.name) {
                    let mut lines = decorators.clone();
                    lines.push(format!("{}: ...", nested.header));
                    members.push(lines.join("\n"));
                }
            }
            Statement::Annotated { name, annotation } => {
                if is_public(&name) {
                    members.push(format!("{name}: {annotation}"));
                }
            }
            Statement::Import | Statement::DunderAll | Statement::Other => {}
        }
        decorators.clear();
        idx = end;
    }
    Ok(members)
}

/// Index one past the last line belonging to the block opened at `start`.
fn block_end(lines: &[LogicalLine], start: usize, indent: usize) -> usize {
    let mut end = start + 1;
    while end < lines.len() && lines[end].indent > indent {
        end += 1;
    }
    end
}

fn require_body(
    lines: &[LogicalLine],
    start: usize,
    end: usize,
    inline_body: bool,
    header: &LogicalLine,
) -> Result<(), StubError> {
    if inline_body || end > start + 1 && lines[start + 1].indent > header.indent {
        return Ok(());
    }
    Err(StubError {
        line: header.line,
        reason: "expected an indented block after block header".to_string(),
    })
}

fn is_public(name: &str) -> bool {
    !name.starts_with('_') || (name.starts_with("__") && name.ends_with("__") && name.len() > 4)
}

enum Statement {
    Decorator,
    Def,
    Class,
    Import,
    DunderAll,
    Annotated { name: String, annotation: String },
    Other,
}

fn classify(text: &str) -> Statement {
    if text.starts_with('@') {
        return Statement::Decorator;
    }
    let is_async_def = starts_with_keyword(text, "async")
        && starts_with_keyword(text["async".len()..].trim_start(), "def");
    if starts_with_keyword(text, "def") || is_async_def {
        return Statement::Def;
    }
    if starts_with_keyword(text, "class") {
        return Statement::Class;
    }
    if starts_with_keyword(text, "import") || starts_with_keyword(text, "from") && text.contains(" import ") {
        return Statement::Import;
    }
    if starts_with_keyword(text, "__all__") {
        return Statement::DunderAll;
    }
    annotated_assignment(text).unwrap_or(Statement::Other)
}

fn starts_with_keyword(text: &str, keyword: &str) -> bool {
    text.strip_prefix(keyword).is_some_and(|rest| {
        rest.chars()
            .next()
            .map_or(true, |c| !(c.is_alphanumeric() || c == '_'))
    })
}

fn annotated_assignment(text: &str) -> Option<Statement> {
    let ident_len = text
        .char_indices()
        .find(|(_, c)| !(c.is_alphanumeric() || *c == '_'))
        .map_or(text.len(), |(pos, _)| pos);
    if ident_len == 0 || text.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    let name = &text[..ident_len];
    if matches!(name, "else" | "try" | "finally" | "except" | "lambda") {
        return None;
    }
    let rest = text[ident_len..].trim_start();
    let annotation_text = rest.strip_prefix(':')?;
    let annotation = match find_top_level(annotation_text, 0, is_assignment_eq) {
        Some(pos) => &annotation_text[..pos],
        None => annotation_text,
    }
    .trim();
    if annotation.is_empty() {
        return None;
    }
    Some(Statement::Annotated {
        name: name.to_string(),
        annotation: annotation.to_string(),
    })
}

struct DefHeader {
    prefix: &'static str,
    name: String,
    type_params: String,
    params: Vec<String>,
    returns: String,
    inline_body: bool,
}

impl DefHeader {
    fn render(&self) -> String {
        let returns = if self.returns.is_empty() {
            String::new()
        } else {
            format!(" {}", self.returns)
        };
        format!(
            "{}{}{}({}){returns}: ...",
            self.prefix,
            self.name,
            self.type_params,
            self.params.join(", ")
        )
    }
}

fn parse_def(text: &str, line: usize) -> Result<DefHeader, StubError> {
    let fail = |reason: &str| StubError {
        line,
        reason: reason.to_string(),
    };
    let (prefix, rest) = match text.strip_prefix("async") {
        Some(rest) if starts_with_keyword(text, "async") => ("async def ", rest.trim_start()),
        _ => ("def ", text),
    };
    let rest = rest
        .strip_prefix("def")
        .ok_or_else(|| fail("malformed function header"))?
        .trim_start();
    let name_len = rest
        .char_indices()
        .find(|(_, c)| !(c.is_alphanumeric() || *c == '_'))
        .map_or(rest.len(), |(pos, _)| pos);
    if name_len == 0 {
        return Err(fail("function header without a name"));
    }
    let name = rest[..name_len].to_string();
    let mut after = rest[name_len..].trim_start();
    let mut type_params = String::new();
    if after.starts_with('[') {
        let close = find_matching(after, 0).ok_or_else(|| fail("unclosed type parameter list"))?;
        type_params = after[..=close].to_string();
        after = after[close + 1..].trim_start();
    }
    if !after.starts_with('(') {
        return Err(fail("function header without a parameter list"));
    }
    let close = find_matching(after, 0).ok_or_else(|| fail("unclosed parameter list"))?;
    let params = split_top_level(&after[1..close], ',')
        .into_iter()
        .map(|param| strip_default(&param))
        .filter(|param| !param.is_empty())
        .collect();
    let tail = &after[close + 1..];
    let colon = find_top_level(tail, 0, |chars, pos| chars[pos].1 == ':')
        .ok_or_else(|| fail("function header is missing ':'"))?;
    Ok(DefHeader {
        prefix,
        name,
        type_params,
        params,
        returns: tail[..colon].trim().to_string(),
        inline_body: !tail[colon + 1..].trim().is_empty(),
    })
}

struct ClassHeader {
    name: String,
    header: String,
    inline_body: bool,
}

fn parse_class(text: &str, line: usize) -> Result<ClassHeader, StubError> {
    let fail = |reason: &str| StubError {
        line,
        reason: reason.to_string(),
    };
    let rest = text
        .strip_prefix("class")
        .ok_or_else(|| fail("malformed class header"))?
        .trim_start();
    let name_len = rest
        .char_indices()
        .find(|(_, c)| !(c.is_alphanumeric() || *c == '_'))
        .map_or(rest.len(), |(pos, _)| pos);
    if name_len == 0 {
        return Err(fail("class header without a name"));
    }
    let colon = find_top_level(text, 0, |chars, pos| chars[pos].1 == ':')
        .ok_or_else(|| fail("class header is missing ':'"))?;
    Ok(ClassHeader {
        name: rest[..name_len].to_string(),
        header: text[..colon].trim_end().to_string(),
        inline_body: !text[colon + 1..].trim().is_empty(),
    })
}

fn strip_default(param: &str) -> String {
    let param = param.trim();
    match find_top_level(param, 0, is_assignment_eq) {
        Some(pos) => format!("{} = ...", param[..pos].trim_end()),
        None => param.to_string(),
    }
}

fn is_assignment_eq(chars: &[(usize, char)], pos: usize) -> bool {
    if chars[pos].1 != '=' {
        return false;
    }
    let prev = pos.checked_sub(1).map(|p| chars[p].1);
    let next = chars.get(pos + 1).map(|(_, c)| *c);
    !matches!(prev, Some('=' | '<' | '>' | '!' | ':')) && next != Some('=')
}

/// Byte offset of the first char at bracket depth zero, outside string
/// literals, for which `pred` holds.
fn find_top_level<F>(text: &str, start: usize, pred: F) -> Option<usize>
where
    F: Fn(&[(usize, char)], usize) -> bool,
{
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut depth = 0_i32;
    let mut quote: Option<char> = None;
    let mut pos = 0;
    while pos < chars.len() {
        let (offset, c) = chars[pos];
        if let Some(q) = quote {
            if c == '\\' {
                pos += 2;
                continue;
            }
            if c == q {
                quote = None;
            }
            pos += 1;
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            _ if depth == 0 && offset >= start && pred(&chars, pos) => {
                return Some(offset);
            }
            _ => {}
        }
        pos += 1;
    }
    None
}

/// Byte offset of the bracket closing the one at `open`.
fn find_matching(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0_i32;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (offset, c) in text.char_indices().skip_while(|(offset, _)| *offset < open) {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(offset);
                }
            }
            _ => {}
        }
    }
    None
}

fn split_top_level(text: &str, sep: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut rest = text;
    while let Some(pos) = find_top_level(rest, 0, |chars, idx| chars[idx].1 == sep) {
        parts.push(rest[..pos].trim().to_string());
        rest = &rest[pos + sep.len_utf8()..];
    }
    if !rest.trim().is_empty() {
        parts.push(rest.trim().to_string());
    }
    parts
}

fn indent_width(raw: &str) -> usize {
    let mut width = 0;
    for c in raw.chars() {
        match c {
            ' ' => width += 1,
            '\t' => width = (width / 8 + 1) * 8,
            _ => break,
        }
    }
    width
}

struct StringState {
    quote: char,
    triple: bool,
}

fn logical_lines(source: &str) -> Result<Vec<LogicalLine>, StubError> {
    let mut out = Vec::new();
    let mut buffer = String::new();
    let mut start_line = 0;
    let mut indent = 0;
    let mut depth = 0_i32;
    let mut string: Option<StringState> = None;
    let mut continuing = false;

    for (number, raw) in source.lines().enumerate() {
        let number = number + 1;
        if !continuing {
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            indent = indent_width(raw);
            start_line = number;
        }
        let body = if continuing && string.is_some() {
            raw
        } else {
            raw.trim_start()
        };

        let chars: Vec<char> = body.chars().collect();
        let mut piece = String::new();
        let mut pos = 0;
        while pos < chars.len() {
            let c = chars[pos];
            if let Some(state) = &string {
                piece.push(c);
                if c == '\\' {
                    if let Some(next) = chars.get(pos + 1) {
                        piece.push(*next);
                    }
                    pos += 2;
                    continue;
                }
                if c == state.quote {
                    if !state.triple {
                        string = None;
                    } else if chars.get(pos + 1) == Some(&c) && chars.get(pos + 2) == Some(&c) {
                        piece.push(c);
                        piece.push(c);
                        pos += 2;
                        string = None;
                    }
                }
                pos += 1;
                continue;
            }
            match c {
                '#' => break,
                '\'' | '"' => {
                    let triple = chars.get(pos + 1) == Some(&c) && chars.get(pos + 2) == Some(&c);
                    piece.push(c);
                    if triple {
                        piece.push(c);
                        piece.push(c);
                        pos += 2;
                    }
                    string = Some(StringState { quote: c, triple });
                }
                '(' | '[' | '{' => {
                    depth += 1;
                    piece.push(c);
                }
                ')' | ']' | '}' => {
                    depth -= 1;
                    if depth < 0 {
                        return Err(StubError {
                            line: number,
                            reason: format!("unmatched '{c}'"),
                        });
                    }
                    piece.push(c);
                }
                _ => piece.push(c),
            }
            pos += 1;
        }

        let mut backslash = false;
        match &string {
            Some(state) if !state.triple => {
                if piece.ends_with('\\') {
                    piece.pop();
                    backslash = true;
                } else {
                    return Err(StubError {
                        line: number,
                        reason: "unterminated string literal".to_string(),
                    });
                }
            }
            Some(_) => {}
            None => {
                let trimmed_len = piece.trim_end().len();
                piece.truncate(trimmed_len);
                if piece.ends_with('\\') {
                    piece.pop();
                    backslash = true;
                }
            }
        }

        append_piece(&mut buffer, &piece, continuing, string.is_some());
        continuing = backslash || depth > 0 || string.is_some();
        if !continuing {
            out.push(LogicalLine {
                indent,
                line: start_line,
                text: std::mem::take(&mut buffer),
            });
        }
    }

    if continuing {
        return Err(StubError {
            line: start_line,
            reason: "statement is never closed (unbalanced brackets or string)".to_string(),
        });
    }
    Ok(out)
}

fn append_piece(buffer: &mut String, piece: &str, continuing: bool, in_triple: bool) {
    if !continuing || buffer.is_empty() {
        buffer.push_str(piece);
        return;
    }
    if in_triple {
        buffer.push('\n');
        buffer.push_str(piece);
        return;
    }
    let piece = piece.trim();
    if piece.is_empty() {
        return;
    }
    let opens = buffer.ends_with(['(', '[', '{']);
    let closes = piece.starts_with([')', ']', '}']);
    if closes && buffer.ends_with(',') {
        buffer.pop();
    }
    if !(opens || closes || buffer.ends_with(' ')) {
        buffer.push(' ');
    }
    buffer.push_str(piece);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_functions_classes_and_imports() -> Result<(), StubError> {
        let source = r#""""Module docstring."""
from __future__ import annotations

import os
from typing import Iterable

__all__ = ["Greeter", "greet"]

VERSION: str = "1.0"
_CACHE: dict[str, int] = {}


def greet(name: str, *, loud: bool = False, sep: str = ", ") -> str:
    """Say hello."""
    return f"hello{sep}{name}"


async def fetch(
    urls: Iterable[str],
    retries: int = 3,
) -> list[bytes]:
    return []


def _private() -> None:
    pass


class Greeter(object):
    """Greets people."""

    prefix: str = "hi"

    def __init__(self, name: str = "world") -> None:
        self.name = name

    @property
    def loud(self) -> bool:
        return True

    def _helper(self):
        pass
"#;
        let stub = render_stub(source)?;
        let expected = "\
from __future__ import annotations
import os
from typing import Iterable
__all__ = [\"Greeter\", \"greet\"]
VERSION: str
def greet(name: str, *, loud: bool = ..., sep: str = ...) -> str: ...
async def fetch(urls: Iterable[str], retries: int = ...) -> list[bytes]: ...

class Greeter(object):
    prefix: str
    def __init__(self, name: str = ...) -> None: ...
    @property
    def loud(self) -> bool: ...
";
        assert_eq!(stub, expected);
        Ok(())
    }

    #[test]
    fn private_classes_and_decorators_are_dropped() -> Result<(), StubError> {
        let source = "@decorator\ndef _hidden():\n    pass\n\nclass _Internal:\n    x: int\n\nclass Empty: pass\n";
        assert_eq!(render_stub(source)?, "class Empty: ...\n");
        Ok(())
    }

    #[test]
    fn defaults_with_nested_structures_are_elided() -> Result<(), StubError> {
        let source = "def f(a=(1, 2), b={'k': 'v=1'}, c=lambda x: x, d: int = 1 if True else 2): return a\n";
        assert_eq!(
            render_stub(source)?,
            "def f(a = ..., b = ..., c = ..., d: int = ...): ...\n"
        );
        Ok(())
    }

    #[test]
    fn multiline_strings_do_not_confuse_indentation() -> Result<(), StubError> {
        let source = "def doc() -> str:\n    return \"\"\"\nclass NotReal:\n    pass\n\"\"\"\n\ndef after() -> None: ...\n";
        assert_eq!(
            render_stub(source)?,
            "def doc() -> str: ...\ndef after() -> None: ...\n"
        );
        Ok(())
    }

    #[test]
    fn unbalanced_signature_is_an_error() {
        let err = render_stub("def broken(a, b:\n    pass\n").expect_err("should fail");
        assert_eq!(err.line, 1);
    }

    #[test]
    fn header_without_body_is_an_error() {
        let err = render_stub("def nothing():\n\nx = 1\n").expect_err("should fail");
        assert_eq!(err.line, 1);
        assert!(err.reason.contains("indented block"));
    }

    #[test]
    fn rendering_is_deterministic() -> Result<(), StubError> {
        let source = "class A:\n    def b(self, c=1): ...\n";
        assert_eq!(render_stub(source)?, render_stub(source)?);
        Ok(())
    }
}
