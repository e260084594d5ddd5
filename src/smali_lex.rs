//! Line oriented tokenizer for smali source
//!
//! The lexer is lazy: each call to `next()` splits one more physical line into tokens.
//! Blank lines are skipped and never produce a `Line`.
//!
use std::fmt;
use std::iter::Enumerate;
use std::str::Lines;

use crate::error::{Position, SmaliError};
use crate::smali_value::{is_numeric_literal, quoted_literal};
use crate::types::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Directive,
    Identifier,
    TypeDescriptor,
    StringLiteral,
    CharLiteral,
    NumericLiteral,
    Comment,
    EolComment,
    Punctuation,
}

/// A token and the raw source text it was read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub position: Position,
}

impl Token {
    pub fn is_punct(&self, p: &str) -> bool {
        self.kind == TokenKind::Punctuation && self.text == p
    }
}

/// Directive keywords the reader gives structure to, everything else is `Other`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    Class,
    Super,
    Implements,
    Source,
    Field,
    Method,
    Annotation,
    Subannotation,
    Enum,
    End,
    Registers,
    Locals,
    Param,
    Line,
    Catch,
    CatchAll,
    Local,
    Restart,
    Prologue,
    Epilogue,
    Other(String),
}

impl Directive {
    pub fn from_keyword(keyword: &str) -> Directive {
        match keyword {
            ".class" => Directive::Class,
            ".super" => Directive::Super,
            ".implements" => Directive::Implements,
            ".source" => Directive::Source,
            ".field" => Directive::Field,
            ".method" => Directive::Method,
            ".annotation" => Directive::Annotation,
            ".subannotation" => Directive::Subannotation,
            ".enum" => Directive::Enum,
            ".end" => Directive::End,
            ".registers" => Directive::Registers,
            ".locals" => Directive::Locals,
            ".param" => Directive::Param,
            ".line" => Directive::Line,
            ".catch" => Directive::Catch,
            ".catchall" => Directive::CatchAll,
            ".local" => Directive::Local,
            ".restart" => Directive::Restart,
            ".prologue" => Directive::Prologue,
            ".epilogue" => Directive::Epilogue,
            _ => Directive::Other(keyword.to_string()),
        }
    }

    pub fn to_str(&self) -> &str {
        match self {
            Directive::Class => ".class",
            Directive::Super => ".super",
            Directive::Implements => ".implements",
            Directive::Source => ".source",
            Directive::Field => ".field",
            Directive::Method => ".method",
            Directive::Annotation => ".annotation",
            Directive::Subannotation => ".subannotation",
            Directive::Enum => ".enum",
            Directive::End => ".end",
            Directive::Registers => ".registers",
            Directive::Locals => ".locals",
            Directive::Param => ".param",
            Directive::Line => ".line",
            Directive::Catch => ".catch",
            Directive::CatchAll => ".catchall",
            Directive::Local => ".local",
            Directive::Restart => ".restart",
            Directive::Prologue => ".prologue",
            Directive::Epilogue => ".epilogue",
            Directive::Other(k) => k,
        }
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_str())
    }
}

/// One non-blank physical line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub tokens: Vec<Token>,
    /// Code part of the line, trimmed, without any comment
    pub text: String,
    /// Set when the whole line is a comment
    pub comment: Option<String>,
    /// Comment trailing code on the same line
    pub eol_comment: Option<String>,
    pub position: Position,
}

impl Line {
    /// Tokens excluding comments
    pub fn code(&self) -> &[Token] {
        match self.tokens.last() {
            Some(t) if t.kind == TokenKind::Comment || t.kind == TokenKind::EolComment => {
                &self.tokens[..self.tokens.len() - 1]
            }
            _ => &self.tokens,
        }
    }

    pub fn is_comment(&self) -> bool {
        self.comment.is_some()
    }

    pub fn directive(&self) -> Option<Directive> {
        match self.tokens.first() {
            Some(t) if t.kind == TokenKind::Directive => Some(Directive::from_keyword(&t.text)),
            _ => None,
        }
    }

    /// For `.end <name>` lines, the name being closed
    pub fn end_of(&self) -> Option<&str> {
        match (self.directive(), self.code().get(1)) {
            (Some(Directive::End), Some(t)) => Some(&t.text),
            _ => None,
        }
    }

    /// Code text after the leading directive
    pub fn arguments(&self) -> &str {
        match self.code().first() {
            Some(t) if t.kind == TokenKind::Directive => self.text[t.text.len()..].trim(),
            _ => &self.text,
        }
    }
}

/// Iterator of lexed lines over a source string
pub struct Lexer<'s> {
    lines: Enumerate<Lines<'s>>,
}

impl<'s> Lexer<'s> {
    pub fn new(source: &'s str) -> Lexer<'s> {
        Lexer { lines: source.lines().enumerate() }
    }
}

impl<'s> Iterator for Lexer<'s> {
    type Item = Result<Line, SmaliError>;

    fn next(&mut self) -> Option<Self::Item> {
        for (ix, text) in self.lines.by_ref() {
            if text.trim().is_empty() {
                continue;
            }
            return Some(lex_line(text, ix + 1));
        }
        None
    }
}

/// Lexes a whole source, stopping at the first lex error
pub fn tokenize(source: &str) -> Result<Vec<Line>, SmaliError> {
    Lexer::new(source).collect()
}

fn comment_text(raw: &str) -> String {
    let body = &raw[1..];
    body.strip_prefix(' ').unwrap_or(body).trim_end().to_string()
}

fn is_break(c: char) -> bool {
    c.is_whitespace() || matches!(c, '{' | '}' | ',' | '=' | '"' | '#')
}

fn classify(word: &str, position: Position) -> Result<TokenKind, SmaliError> {
    let mut chars = word.chars();
    let first = chars.next().unwrap_or(' ');
    let second = chars.next();

    if word == ".." || word == "->" {
        return Ok(TokenKind::Punctuation);
    }
    if first == '.' && second.map_or(false, |c| c.is_ascii_alphabetic()) {
        return Ok(TokenKind::Directive);
    }
    let numeric_start = first.is_ascii_digit()
        || ((first == '-' || first == '+') && second.map_or(false, |c| c.is_ascii_digit()));
    if numeric_start {
        if is_numeric_literal(word) {
            return Ok(TokenKind::NumericLiteral);
        }
        // member names may start with a digit, as in `1:I` or `0()V`
        if !word.contains(&[':', '('][..]) {
            fail!(Lex @ position, "malformed numeric literal '{}'", word);
        }
    }
    if (first == 'L' || first == '[') && Type::parse(word).is_ok() {
        return Ok(TokenKind::TypeDescriptor);
    }
    Ok(TokenKind::Identifier)
}

fn lex_line(text: &str, line: usize) -> Result<Line, SmaliError> {
    let mut tokens: Vec<Token> = vec![];
    let mut comment = None;
    let mut eol_comment = None;
    let mut code_end = text.len();
    let column = |offset: usize| Position::new(line, text[..offset].chars().count() + 1);

    let mut offset = 0;
    while offset < text.len() {
        let rest = &text[offset..];
        let c = match rest.chars().next() {
            Some(c) => c,
            None => break,
        };
        if c.is_whitespace() {
            offset += c.len_utf8();
            continue;
        }
        let position = column(offset);

        let (kind, len) = match c {
            '#' => {
                let body = comment_text(rest);
                code_end = offset;
                let kind = if tokens.is_empty() {
                    comment = Some(body);
                    TokenKind::Comment
                } else {
                    eol_comment = Some(body);
                    TokenKind::EolComment
                };
                (kind, rest.len())
            }
            '"' | '\'' => match quoted_literal(c)(rest) {
                Ok((remaining, _)) => {
                    let kind = if c == '"' { TokenKind::StringLiteral } else { TokenKind::CharLiteral };
                    (kind, rest.len() - remaining.len())
                }
                Err(_) => fail!(Lex @ position, "unterminated or malformed literal {}", rest),
            },
            '{' | '}' | ',' | '=' => (TokenKind::Punctuation, 1),
            _ => {
                let len = rest.find(is_break).unwrap_or(rest.len());
                (classify(&rest[..len], position)?, len)
            }
        };

        tokens.push(Token {
            kind,
            text: rest[..len].to_string(),
            position,
        });
        offset += len;
    }

    let position = match tokens.first() {
        Some(t) => t.position,
        None => Position::new(line, 1),
    };
    Ok(Line {
        tokens,
        text: text[..code_end].trim().to_string(),
        comment,
        eol_comment,
        position,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn kinds(line: &Line) -> Vec<TokenKind> {
        line.tokens.iter().map(|t| t.kind).collect()
    }

    #[test]
    fn class_header() {
        let lines = tokenize(".class public final Lcom/example/A;\n\n.super Ljava/lang/Object;\n").unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            kinds(&lines[0]),
            vec![
                TokenKind::Directive,
                TokenKind::Identifier,
                TokenKind::Identifier,
                TokenKind::TypeDescriptor
            ]
        );
        assert_eq!(lines[0].directive(), Some(Directive::Class));
        assert_eq!(lines[0].arguments(), "public final Lcom/example/A;");
        assert_eq!(lines[1].position, Position::new(3, 1));
    }

    #[test]
    fn comments() {
        let lines = tokenize("    # leading\nconst/4 v0, 0x1 # set v0\n").unwrap();
        assert!(lines[0].is_comment());
        assert_eq!(lines[0].comment.as_deref(), Some("leading"));
        assert_eq!(lines[0].text, "");
        assert_eq!(lines[0].position, Position::new(1, 5));

        assert_eq!(lines[1].eol_comment.as_deref(), Some("set v0"));
        assert_eq!(lines[1].text, "const/4 v0, 0x1");
        assert_eq!(lines[1].code().len(), 4);
        assert_eq!(lines[1].tokens.last().unwrap().kind, TokenKind::EolComment);
    }

    #[test]
    fn hash_inside_string() {
        let lines = tokenize("const-string v0, \"a # b\" # real\n").unwrap();
        let s = &lines[0].tokens[3];
        assert_eq!(s.kind, TokenKind::StringLiteral);
        assert_eq!(s.text, "\"a # b\"");
        assert_eq!(lines[0].eol_comment.as_deref(), Some("real"));
        assert_eq!(lines[0].text, "const-string v0, \"a # b\"");
    }

    #[test]
    fn punctuation_and_numbers() {
        let lines = tokenize("invoke-virtual/range {v0 .. v3}, Lcom/A;->b()V\n.field x:I = -0x1\n").unwrap();
        let t = &lines[0].tokens;
        assert!(t[1].is_punct("{"));
        assert!(t[3].is_punct(".."));
        assert!(t[5].is_punct("}"));
        assert!(t[6].is_punct(","));
        assert_eq!(t[7].kind, TokenKind::Identifier);

        let t = &lines[1].tokens;
        assert!(t[2].is_punct("="));
        assert_eq!(t[3].kind, TokenKind::NumericLiteral);
        assert_eq!(lines[1].arguments(), "x:I = -0x1");
    }

    #[test]
    fn char_literal() {
        let lines = tokenize(".field c:C = '\\''\n").unwrap();
        assert_eq!(lines[0].tokens[3].kind, TokenKind::CharLiteral);
        assert_eq!(lines[0].tokens[3].text, "'\\''");
    }

    #[test]
    fn end_directive() {
        let lines = tokenize(".end method # done\n.end packed-switch\n").unwrap();
        assert_eq!(lines[0].end_of(), Some("method"));
        assert_eq!(lines[0].eol_comment.as_deref(), Some("done"));
        assert_eq!(lines[1].end_of(), Some("packed-switch"));
    }

    #[test]
    fn lex_errors() {
        let e = tokenize(".method a()V\n    const-string v0, \"open\n").unwrap_err();
        assert_eq!(e.kind, ErrorKind::Lex);
        assert_eq!(e.position, Some(Position::new(2, 22)));

        let e = tokenize(".field x:I = 0x\n").unwrap_err();
        assert_eq!(e.kind, ErrorKind::Lex);
        assert!(tokenize(".field x:I = 12ab\n").is_err());
    }

    #[test]
    fn lazy() {
        let mut lexer = Lexer::new(".class Lcom/A;\n\"bad\n");
        assert!(lexer.next().unwrap().is_ok());
        assert!(lexer.next().unwrap().is_err());
        assert!(lexer.next().is_none());
    }

    #[test]
    fn directive_keywords() {
        assert_eq!(Directive::from_keyword(".subannotation"), Directive::Subannotation);
        assert_eq!(Directive::from_keyword(".packed-switch"), Directive::Other(".packed-switch".to_string()));
        assert_eq!(Directive::from_keyword(".catchall"), Directive::CatchAll);
        assert_eq!(Directive::Restart.to_str(), ".restart");
        assert_eq!(Directive::Other(".array-data".to_string()).to_str(), ".array-data");
    }

    #[test]
    fn member_names_starting_with_digits() {
        let lines = tokenize(".field public static 1:I
.method 0(I)V
    sget v0, La/b;->1:I
").unwrap();
        assert_eq!(lines[0].tokens[3].kind, TokenKind::Identifier);
        assert_eq!(lines[0].tokens[3].text, "1:I");
        assert_eq!(lines[1].tokens[1].kind, TokenKind::Identifier);
        assert_eq!(lines[2].tokens.last().unwrap().text, "La/b;->1:I");

        let e = tokenize(".field x:I = 12ab
").unwrap_err();
        assert_eq!(e.kind, ErrorKind::Lex);
    }
}
