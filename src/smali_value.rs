//! Typed smali literals
//!
//! `SmaliValue` converts between literal syntax as it appears in field initialisers and
//! annotation elements (`0x1t`, `"text"`, `Lcom/example/Foo;`, `.enum ...`) and typed values.
//!
use std::fmt;
use std::str::FromStr;

use nom::branch::alt;
use nom::bytes::complete::{escaped, tag, tag_no_case};
use nom::character::complete::{char, digit1, hex_digit1, none_of, one_of};
use nom::combinator::{all_consuming, opt, recognize};
use nom::sequence::{delimited, pair, tuple};
use nom::IResult;
use num_traits::{NumCast, PrimInt, Signed};

use crate::error::SmaliError;
use crate::types::{parse_method_descriptor, PrimitiveKind, Type};

/// An annotation nested as a value, e.g. inside an array or another annotation
#[derive(Debug, Clone, PartialEq)]
pub struct SubAnnotation {
    pub annotation_type: Type,
    pub elements: Vec<(String, SmaliValue)>,
}

/// A smali literal value
///
/// # Examples
///
/// ```
///  use smali_visitor::smali_value::SmaliValue;
///
///  let v = SmaliValue::decode("0x1t").unwrap();
///  assert_eq!(v, SmaliValue::Byte(1));
///  assert_eq!(v.encode(), "0x1t");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum SmaliValue {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    Type(Type),
    Enum { owner: Type, name: String, value_type: Type },
    Array(Vec<SmaliValue>),
    SubAnnotation(SubAnnotation),
    Null,
    Bool(bool),
    Char(char),
    Short(i16),
    Byte(i8),
    Method { owner: Type, name: String, params: Vec<Type>, return_type: Type },
    Field { owner: Type, name: String, field_type: Type },
}

impl SmaliValue {
    /// Parses literal text into a typed value
    pub fn decode(text: &str) -> Result<SmaliValue, SmaliError> {
        let text = text.trim();
        if text.is_empty() {
            fail!(Literal, "empty literal");
        }

        match text {
            "null" => return Ok(SmaliValue::Null),
            "true" => return Ok(SmaliValue::Bool(true)),
            "false" => return Ok(SmaliValue::Bool(false)),
            _ => {}
        }

        if text.starts_with(".subannotation") {
            return decode_subannotation(text);
        }
        if let Some(rest) = text.strip_prefix(".enum") {
            return decode_enum(rest.trim(), text);
        }

        match text.chars().next() {
            Some('"') => {
                let inner = quoted_body(text, '"')?;
                Ok(SmaliValue::String(unescape(inner)?))
            }
            Some('\'') => {
                let inner = quoted_body(text, '\'')?;
                let s = unescape(inner)?;
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Ok(SmaliValue::Char(c)),
                    _ => fail!(Literal, "char literal {} must hold exactly one character", text),
                }
            }
            Some('{') => decode_array(text),
            _ => {
                if text.contains("->") {
                    return decode_reference(text);
                }
                if let Some(v) = decode_number(text)? {
                    return Ok(v);
                }
                match Type::parse(text) {
                    Ok(t) => Ok(SmaliValue::Type(t)),
                    Err(_) => fail!(Literal, "unrecognised literal '{}'", text),
                }
            }
        }
    }

    /// Renders the value in literal syntax, multi-line only for sub-annotations
    pub fn encode(&self) -> String {
        match self {
            SmaliValue::Int(v) => hex_literal(*v as i64),
            SmaliValue::Long(v) => hex_literal(*v) + "L",
            SmaliValue::Short(v) => hex_literal(*v as i64) + "s",
            SmaliValue::Byte(v) => hex_literal(*v as i64) + "t",
            SmaliValue::Float(v) => float_literal(*v as f64, v.is_nan(), format!("{:?}", v)) + "f",
            SmaliValue::Double(v) => float_literal(*v, v.is_nan(), format!("{:?}", v)),
            SmaliValue::String(s) => format!("\"{}\"", escape(s)),
            SmaliValue::Char(c) => format!("'{}'", escape(&c.to_string())),
            SmaliValue::Type(t) => t.descriptor(),
            SmaliValue::Enum { owner, name, value_type } => {
                format!(".enum {}->{}:{}", owner.descriptor(), name, value_type.descriptor())
            }
            SmaliValue::Method { owner, name, params, return_type } => format!(
                "{}->{}{}",
                owner.descriptor(),
                name,
                crate::types::method_descriptor(params, return_type)
            ),
            SmaliValue::Field { owner, name, field_type } => {
                format!("{}->{}:{}", owner.descriptor(), name, field_type.descriptor())
            }
            SmaliValue::Array(values) => {
                let parts: Vec<String> = values.iter().map(|v| v.encode()).collect();
                if parts.is_empty() {
                    "{}".to_string()
                } else if parts.iter().any(|p| p.contains('\n')) {
                    // one element per line once an element spans lines
                    let mut out = "{\n".to_string();
                    for (i, part) in parts.iter().enumerate() {
                        let comma = if i + 1 < parts.len() { "," } else { "" };
                        for line in format!("{}{}", part, comma).lines() {
                            out.push_str("    ");
                            out.push_str(line);
                            out.push('\n');
                        }
                    }
                    out.push('}');
                    out
                } else {
                    format!("{{ {} }}", parts.join(", "))
                }
            }
            SmaliValue::SubAnnotation(sub) => {
                let mut out = format!(".subannotation {}\n", sub.annotation_type.descriptor());
                for (name, value) in &sub.elements {
                    for line in format!("{} = {}", name, value.encode()).lines() {
                        out.push_str("    ");
                        out.push_str(line);
                        out.push('\n');
                    }
                }
                out.push_str(".end subannotation");
                out
            }
            SmaliValue::Null => "null".to_string(),
            SmaliValue::Bool(b) => b.to_string(),
        }
    }

    /// Name of the literal kind, used in diagnostics
    pub fn kind_name(&self) -> &str {
        match self {
            SmaliValue::Int(_) => "int",
            SmaliValue::Long(_) => "long",
            SmaliValue::Float(_) => "float",
            SmaliValue::Double(_) => "double",
            SmaliValue::String(_) => "string",
            SmaliValue::Type(_) => "type",
            SmaliValue::Enum { .. } => "enum",
            SmaliValue::Array(_) => "array",
            SmaliValue::SubAnnotation(_) => "subannotation",
            SmaliValue::Null => "null",
            SmaliValue::Bool(_) => "boolean",
            SmaliValue::Char(_) => "char",
            SmaliValue::Short(_) => "short",
            SmaliValue::Byte(_) => "byte",
            SmaliValue::Method { .. } => "method",
            SmaliValue::Field { .. } => "field",
        }
    }

    /// Whether this value can initialise a field of type `t`
    pub fn is_assignable_to(&self, t: &Type) -> bool {
        match (self, t) {
            (SmaliValue::Bool(_), Type::Primitive(PrimitiveKind::Boolean)) => true,
            (SmaliValue::Byte(_), Type::Primitive(PrimitiveKind::Byte)) => true,
            (SmaliValue::Short(_), Type::Primitive(PrimitiveKind::Short)) => true,
            (SmaliValue::Char(_), Type::Primitive(PrimitiveKind::Char)) => true,
            (SmaliValue::Int(_), Type::Primitive(PrimitiveKind::Int)) => true,
            (SmaliValue::Long(_), Type::Primitive(PrimitiveKind::Long)) => true,
            (SmaliValue::Float(_), Type::Primitive(PrimitiveKind::Float)) => true,
            (SmaliValue::Double(_), Type::Primitive(PrimitiveKind::Double)) => true,
            (SmaliValue::Null, t) => t.is_reference(),
            (SmaliValue::String(_), Type::Object(name)) => name == "java/lang/String",
            (SmaliValue::Type(_), Type::Object(name)) => name == "java/lang/Class",
            (SmaliValue::Enum { owner, .. }, t) => owner == t,
            (SmaliValue::Array(_), Type::Array { .. }) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SmaliValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

impl FromStr for SmaliValue {
    type Err = SmaliError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SmaliValue::decode(s)
    }
}

/// Shape of a numeric literal: optional sign, hex or decimal with fraction/exponent, optional suffix
pub(crate) fn numeric_literal(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        opt(one_of("+-")),
        alt((
            recognize(tuple((tag_no_case("0x"), hex_digit1, opt(one_of("tTsSlL"))))),
            recognize(tuple((
                digit1,
                opt(pair(char('.'), digit1)),
                opt(tuple((one_of("eE"), opt(one_of("+-")), digit1))),
                opt(one_of("tTsSlLfFdD")),
            ))),
        )),
    ))(input)
}

pub(crate) fn is_numeric_literal(text: &str) -> bool {
    all_consuming(numeric_literal)(text).is_ok()
}

/// Body of a quoted literal, escapes are kept as written
pub(crate) fn quoted_literal(quote: char) -> impl FnMut(&str) -> IResult<&str, &str> {
    let normal: &'static str = if quote == '"' { "\\\"" } else { "\\'" };
    move |input: &str| {
        delimited(
            char(quote),
            alt((escaped(none_of(normal), '\\', one_of("'\"tbnrfu\\")), tag(""))),
            char(quote),
        )(input)
    }
}

fn quoted_body(text: &str, quote: char) -> Result<&str, SmaliError> {
    match all_consuming(quoted_literal(quote))(text) {
        Ok((_, body)) => Ok(body),
        Err(_) => fail!(Literal, "malformed quoted literal {}", text),
    }
}

/// Resolves smali escape sequences, including `\uXXXX` surrogate pairs
pub fn unescape(body: &str) -> Result<String, SmaliError> {
    let mut out = String::with_capacity(body.len());
    let mut units: Vec<u16> = vec![];
    let mut chars = body.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            flush_units(&mut units, &mut out)?;
            out.push(c);
            continue;
        }
        let e = match chars.next() {
            Some(e) => e,
            None => fail!(Literal, "dangling escape in '{}'", body),
        };
        if e == 'u' {
            let hex: String = chars.by_ref().take(4).collect();
            match u16::from_str_radix(&hex, 16) {
                Ok(u) if hex.len() == 4 => units.push(u),
                _ => fail!(Literal, "bad unicode escape '\\u{}'", hex),
            }
            continue;
        }
        flush_units(&mut units, &mut out)?;
        out.push(match e {
            'n' => '\n',
            'r' => '\r',
            't' => '\t',
            'b' => '\u{8}',
            'f' => '\u{c}',
            '"' => '"',
            '\'' => '\'',
            '\\' => '\\',
            _ => fail!(Literal, "unknown escape '\\{}'", e),
        });
    }
    flush_units(&mut units, &mut out)?;
    Ok(out)
}

fn flush_units(units: &mut Vec<u16>, out: &mut String) -> Result<(), SmaliError> {
    if units.is_empty() {
        return Ok(());
    }
    for r in char::decode_utf16(units.drain(..)) {
        match r {
            Ok(c) => out.push(c),
            Err(e) => fail!(Literal, "unpaired surrogate {:#x}", e.unpaired_surrogate()),
        }
    }
    Ok(())
}

/// Escapes a string for a quoted literal, both quote characters are always escaped
pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    for c in s.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{8}' => out.push_str("\\b"),
            '\u{c}' => out.push_str("\\f"),
            '\\' => out.push_str("\\\\"),
            '"' | '\'' => {
                out.push('\\');
                out.push(c);
            }
            ' '..='~' => out.push(c),
            _ => {
                let mut buf = [0u16; 2];
                for u in c.encode_utf16(&mut buf) {
                    out.push_str(&format!("\\u{:04x}", u));
                }
            }
        }
    }
    out
}

fn hex_literal(value: i64) -> String {
    if value < 0 {
        format!("-{:#x}", value.unsigned_abs())
    } else {
        format!("{:#x}", value)
    }
}

fn float_literal(value: f64, nan: bool, debug: String) -> String {
    if nan {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value > 0.0 { "Infinity".to_string() } else { "-Infinity".to_string() }
    } else {
        debug
    }
}

/// Parses the digits of an integer literal into `T`, hex values may use the unsigned range
fn parse_literal_int<T>(negative: bool, digits: &str, radix: u32) -> Option<T>
where
    T: PrimInt + Signed,
{
    let magnitude = u64::from_str_radix(digits, radix).ok()? as i128;
    let value = if negative { -magnitude } else { magnitude };
    let min = T::min_value().to_i128()?;
    let max = T::max_value().to_i128()?;
    if value >= min && value <= max {
        return <T as NumCast>::from(value);
    }
    let bits = (std::mem::size_of::<T>() * 8) as u32;
    if radix == 16 && !negative && value < (1i128 << bits) {
        return <T as NumCast>::from(value - (1i128 << bits));
    }
    None
}

/// `Ok(None)` when the text is not numeric at all, `Err` when it is numeric but out of range
fn decode_number(text: &str) -> Result<Option<SmaliValue>, SmaliError> {
    let (negative, body) = match text.chars().next() {
        Some('-') => (true, &text[1..]),
        Some('+') => (false, &text[1..]),
        _ => (false, text),
    };

    if let Some(special) = decode_special_float(negative, body) {
        return Ok(Some(special));
    }
    if !is_numeric_literal(text) {
        return Ok(None);
    }

    let out_of_range = || err!(Literal, "literal '{}' is out of range", text);
    let last = body.chars().last().unwrap_or('0');

    if body.starts_with("0x") || body.starts_with("0X") {
        let digits = &body[2..];
        let (digits, suffix) = match last {
            't' | 'T' | 's' | 'S' | 'l' | 'L' => (&digits[..digits.len() - 1], Some(last.to_ascii_lowercase())),
            _ => (digits, None),
        };
        let value = match suffix {
            Some('t') => parse_literal_int::<i8>(negative, digits, 16).map(SmaliValue::Byte),
            Some('s') => parse_literal_int::<i16>(negative, digits, 16).map(SmaliValue::Short),
            Some(_) => parse_literal_int::<i64>(negative, digits, 16).map(SmaliValue::Long),
            None => parse_literal_int::<i32>(negative, digits, 16).map(SmaliValue::Int),
        };
        return value.map(Some).ok_or_else(out_of_range);
    }

    let (number, suffix) = match last {
        'a'..='z' | 'A'..='Z' => (&text[..text.len() - 1], Some(last.to_ascii_lowercase())),
        _ => (text, None),
    };
    let fractional = number.contains('.') || number.contains('e') || number.contains('E');
    let digits = number.trim_start_matches(['+', '-']);

    let value = match suffix {
        Some('f') => number.parse::<f32>().ok().map(SmaliValue::Float),
        Some('d') => number.parse::<f64>().ok().map(SmaliValue::Double),
        None if fractional => number.parse::<f64>().ok().map(SmaliValue::Double),
        _ if fractional => fail!(Literal, "integer suffix on fractional literal '{}'", text),
        Some('t') => parse_literal_int::<i8>(negative, digits, 10).map(SmaliValue::Byte),
        Some('s') => parse_literal_int::<i16>(negative, digits, 10).map(SmaliValue::Short),
        Some(_) => parse_literal_int::<i64>(negative, digits, 10).map(SmaliValue::Long),
        None => parse_literal_int::<i32>(negative, digits, 10).map(SmaliValue::Int),
    };
    value.map(Some).ok_or_else(out_of_range)
}

fn decode_special_float(negative: bool, body: &str) -> Option<SmaliValue> {
    let (word, float) = match body {
        "Infinity" | "Infinityd" | "NaN" | "NaNd" => (body.trim_end_matches('d'), false),
        "Infinityf" | "NaNf" => (body.trim_end_matches('f'), true),
        _ => return None,
    };
    let value = if word == "NaN" {
        f64::NAN
    } else if negative {
        f64::NEG_INFINITY
    } else {
        f64::INFINITY
    };
    Some(if float { SmaliValue::Float(value as f32) } else { SmaliValue::Double(value) })
}

fn decode_enum(reference: &str, text: &str) -> Result<SmaliValue, SmaliError> {
    match decode_reference(reference)? {
        SmaliValue::Field { owner, name, field_type } => Ok(SmaliValue::Enum { owner, name, value_type: field_type }),
        _ => fail!(Literal, "malformed enum reference '{}'", text),
    }
}

/// `Lowner;->name:Type` or `Lowner;->name(params)ret`
fn decode_reference(text: &str) -> Result<SmaliValue, SmaliError> {
    let (owner, member) = match text.split_once("->") {
        Some(parts) => parts,
        None => fail!(Literal, "malformed member reference '{}'", text),
    };
    let owner = Type::parse(owner).map_err(|e| err!(Literal, "{}", e.details))?;

    if let Some(ix) = member.find('(') {
        let (params, return_type) =
            parse_method_descriptor(&member[ix..]).map_err(|e| err!(Literal, "{}", e.details))?;
        return Ok(SmaliValue::Method { owner, name: member[..ix].to_string(), params, return_type });
    }
    match member.rsplit_once(':') {
        Some((name, t)) if !name.is_empty() => {
            let field_type = Type::parse(t).map_err(|e| err!(Literal, "{}", e.details))?;
            Ok(SmaliValue::Field { owner, name: name.to_string(), field_type })
        }
        _ => fail!(Literal, "malformed member reference '{}'", text),
    }
}

/// Visits the characters of `text` that are outside quoted literals
fn unquoted(text: &str, mut f: impl FnMut(usize, char)) {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match (quote, c) {
            (Some(_), '\\') => escaped = true,
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"') | (None, '\'') => quote = Some(c),
            (None, c) => f(i, c),
        }
    }
}

/// Opening minus closing braces outside quotes, positive while an array is still open
pub(crate) fn brace_depth(text: &str) -> isize {
    let mut depth = 0;
    unquoted(text, |_, c| match c {
        '{' => depth += 1,
        '}' => depth -= 1,
        _ => {}
    });
    depth
}

/// Splits on commas that are outside quotes and nested arrays
pub(crate) fn split_elements(body: &str) -> Vec<&str> {
    let mut parts = vec![];
    let mut depth = 0;
    let mut start = 0;
    unquoted(body, |i, c| match c {
        '{' => depth += 1,
        '}' => depth -= 1,
        ',' if depth == 0 => {
            parts.push(&body[start..i]);
            start = i + 1;
        }
        _ => {}
    });
    parts.push(&body[start..]);
    parts.into_iter().map(|p| p.trim()).filter(|p| !p.is_empty()).collect()
}

fn decode_array(text: &str) -> Result<SmaliValue, SmaliError> {
    let inner = match text.strip_prefix('{').and_then(|t| t.strip_suffix('}')) {
        Some(inner) => inner,
        None => fail!(Literal, "unterminated array literal '{}'", text),
    };
    let mut values = vec![];
    for element in split_elements(inner) {
        values.push(SmaliValue::decode(element)?);
    }
    Ok(SmaliValue::Array(values))
}

fn decode_subannotation(text: &str) -> Result<SmaliValue, SmaliError> {
    let mut lines = text.lines().map(|l| l.trim()).filter(|l| !l.is_empty());
    let header = lines.next().unwrap_or_default();
    let annotation_type = match header.strip_prefix(".subannotation") {
        Some(t) => Type::parse(t.trim()).map_err(|e| err!(Literal, "{}", e.details))?,
        None => fail!(Literal, "malformed subannotation '{}'", header),
    };

    let mut elements = vec![];
    while let Some(line) = lines.next() {
        if line == ".end subannotation" {
            return Ok(SmaliValue::SubAnnotation(SubAnnotation { annotation_type, elements }));
        }
        let (name, first) = match line.split_once('=') {
            Some((name, value)) => (name.trim(), value.trim()),
            None => fail!(Literal, "malformed subannotation element '{}'", line),
        };

        // Values spanning several lines: nested sub-annotations and open arrays
        let mut value = first.to_string();
        if opens_subannotation(first) {
            let mut nesting = 1;
            while nesting > 0 {
                let next = match lines.next() {
                    Some(next) => next,
                    None => fail!(Literal, "subannotation {} in {} is missing .end subannotation", name, annotation_type),
                };
                if opens_subannotation(next) {
                    nesting += 1;
                } else if next.trim_end_matches(',') == ".end subannotation" {
                    nesting -= 1;
                }
                value.push('\n');
                value.push_str(next);
            }
        } else if first.starts_with('{') {
            let mut depth = brace_depth(first);
            while depth > 0 {
                let next = match lines.next() {
                    Some(next) => next,
                    None => fail!(Literal, "unterminated array literal for {} in {}", name, annotation_type),
                };
                depth += brace_depth(next);
                value.push('\n');
                value.push_str(next);
            }
        }
        elements.push((name.to_string(), SmaliValue::decode(&value)?));
    }
    fail!(Literal, "subannotation {} is missing .end subannotation", annotation_type)
}

/* `.subannotation T` on its own or as the value of `name = ...` */
fn opens_subannotation(line: &str) -> bool {
    line.starts_with(".subannotation")
        || line
            .split_once('=')
            .map_or(false, |(_, v)| v.trim().starts_with(".subannotation"))
}
