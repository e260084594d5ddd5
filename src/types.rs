/* Type descriptors, access flags and annotation visibility shared by the reader and the writer. */
/* Descriptors are kept in the smali native (also JNI) format e.g. Ljava/lang/Object; */

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;
use nom::branch::alt;
use nom::bytes::complete::take_while1;
use nom::character::complete::{char, one_of};
use nom::combinator::all_consuming;
use nom::multi::{many0, many1_count};
use nom::sequence::delimited;
use nom::IResult;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::SmaliError;

/// The eight Java primitive kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimitiveKind {
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
}

impl PrimitiveKind {
    pub fn from_char(c: char) -> Option<PrimitiveKind> {
        Some(match c {
            'Z' => PrimitiveKind::Boolean,
            'B' => PrimitiveKind::Byte,
            'C' => PrimitiveKind::Char,
            'S' => PrimitiveKind::Short,
            'I' => PrimitiveKind::Int,
            'J' => PrimitiveKind::Long,
            'F' => PrimitiveKind::Float,
            'D' => PrimitiveKind::Double,
            _ => return None,
        })
    }

    pub fn to_char(&self) -> char {
        match self {
            PrimitiveKind::Boolean => 'Z',
            PrimitiveKind::Byte => 'B',
            PrimitiveKind::Char => 'C',
            PrimitiveKind::Short => 'S',
            PrimitiveKind::Int => 'I',
            PrimitiveKind::Long => 'J',
            PrimitiveKind::Float => 'F',
            PrimitiveKind::Double => 'D',
        }
    }

    pub fn to_java(&self) -> &str {
        match self {
            PrimitiveKind::Boolean => "boolean",
            PrimitiveKind::Byte => "byte",
            PrimitiveKind::Char => "char",
            PrimitiveKind::Short => "short",
            PrimitiveKind::Int => "int",
            PrimitiveKind::Long => "long",
            PrimitiveKind::Float => "float",
            PrimitiveKind::Double => "double",
        }
    }
}

/// Represents a parsed type descriptor: primitive, array, object or void
///
/// # Examples
///
/// ```
///  use smali_visitor::types::Type;
///
///  let t = Type::parse("[[Ljava/lang/String;").unwrap();
///  assert_eq!(t.dimensions(), 2);
///  assert_eq!(t.descriptor(), "[[Ljava/lang/String;");
///
///  let o = Type::from_class_name("com.basic.Test");
///  assert_eq!(o.descriptor(), "Lcom/basic/Test;");
///  assert_eq!(o.class_name().unwrap(), "com.basic.Test");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    Primitive(PrimitiveKind),
    /// `element` is never an array itself, nesting is counted by `dimensions`.
    Array { element: Box<Type>, dimensions: usize },
    /// Internal class name without the `L` and `;`, e.g. `java/lang/Object`.
    Object(String),
    Void,
}

impl Type {
    /// Parses a complete descriptor, trailing characters are an error.
    pub fn parse(descriptor: &str) -> Result<Type, SmaliError> {
        match all_consuming(parse_type)(descriptor) {
            Ok((_, t)) => Ok(t),
            Err(_) => Err(err!(Descriptor, "malformed type descriptor '{}'", descriptor)),
        }
    }

    pub fn object(internal_name: &str) -> Type {
        Type::Object(internal_name.to_string())
    }

    /// Builds an object type from a dotted Java class name
    pub fn from_class_name(class_name: &str) -> Type {
        Type::Object(class_name.replace('.', "/"))
    }

    pub fn array_of(element: Type, dimensions: usize) -> Type {
        match element {
            Type::Array { element, dimensions: d } => Type::Array { element, dimensions: d + dimensions },
            element => Type::Array { element: Box::new(element), dimensions },
        }
    }

    pub fn descriptor(&self) -> String {
        match self {
            Type::Primitive(p) => p.to_char().to_string(),
            Type::Array { element, dimensions } => "[".repeat(*dimensions) + &element.descriptor(),
            Type::Object(name) => format!("L{};", name),
            Type::Void => "V".to_string(),
        }
    }

    /// Dotted class name of an object type, `None` for everything else.
    pub fn class_name(&self) -> Option<String> {
        match self {
            Type::Object(name) => Some(name.replace('/', ".")),
            _ => None,
        }
    }

    pub fn to_java(&self) -> String {
        match self {
            Type::Primitive(p) => p.to_java().to_string(),
            Type::Array { element, dimensions } => element.to_java() + &"[]".repeat(*dimensions),
            Type::Object(name) => name.replace('/', "."),
            Type::Void => "void".to_string(),
        }
    }

    pub fn dimensions(&self) -> usize {
        match self {
            Type::Array { dimensions, .. } => *dimensions,
            _ => 0,
        }
    }

    pub fn is_object(&self) -> bool {
        matches!(self, Type::Object(_))
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, Type::Object(_) | Type::Array { .. })
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Type::Void)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.descriptor())
    }
}

impl FromStr for Type {
    type Err = SmaliError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Type::parse(s)
    }
}

fn is_class_name_char(c: char) -> bool {
    c != ';' && c != '(' && c != ')' && !c.is_whitespace()
}

fn parse_object(smali: &str) -> IResult<&str, Type> {
    let (o, name) = delimited(char('L'), take_while1(is_class_name_char), char(';'))(smali)?;
    Ok((o, Type::Object(name.to_string())))
}

fn parse_primitive(smali: &str) -> IResult<&str, Type> {
    let (o, c) = one_of("ZBCSIJFD")(smali)?;
    // one_of only lets through valid primitive characters
    let kind = PrimitiveKind::from_char(c).unwrap_or(PrimitiveKind::Int);
    Ok((o, Type::Primitive(kind)))
}

/// Any type except void, usable as a field type, parameter or array element
pub(crate) fn parse_value_type(smali: &str) -> IResult<&str, Type> {
    // Array
    if let Ok((o, dimensions)) = many1_count(char::<&str, nom::error::Error<&str>>('['))(smali) {
        let (o, element) = alt((parse_object, parse_primitive))(o)?;
        return Ok((o, Type::Array { element: Box::new(element), dimensions }));
    }
    alt((parse_object, parse_primitive))(smali)
}

pub(crate) fn parse_type(smali: &str) -> IResult<&str, Type> {
    if let Ok((o, _)) = char::<&str, nom::error::Error<&str>>('V')(smali) {
        return Ok((o, Type::Void));
    }
    parse_value_type(smali)
}

fn parse_method_descriptor_inner(smali: &str) -> IResult<&str, (Vec<Type>, Type)> {
    let (o, params) = delimited(char('('), many0(parse_value_type), char(')'))(smali)?;
    let (o, ret) = parse_type(o)?;
    Ok((o, (params, ret)))
}

/// Splits a method descriptor such as `(I[Ljava/lang/String;)V` into parameters and return type
pub fn parse_method_descriptor(descriptor: &str) -> Result<(Vec<Type>, Type), SmaliError> {
    match all_consuming(parse_method_descriptor_inner)(descriptor) {
        Ok((_, r)) => Ok(r),
        Err(_) => Err(err!(Descriptor, "malformed method descriptor '{}'", descriptor)),
    }
}

/// Renders parameters and return type back into a method descriptor
pub fn method_descriptor(params: &[Type], return_type: &Type) -> String {
    let mut s = "(".to_string();
    for p in params {
        s.push_str(&p.descriptor());
    }
    s.push(')');
    s.push_str(&return_type.descriptor());
    s
}

/// Splits a method declaration such as `<init>(I)V` into name, parameters and return type
pub fn parse_method_declaration(declaration: &str) -> Result<(String, Vec<Type>, Type), SmaliError> {
    let (name, descriptor) = match declaration.find('(') {
        Some(ix) if ix > 0 => declaration.split_at(ix),
        _ => fail!(Descriptor, "malformed method declaration '{}'", declaration),
    };
    let (params, ret) = parse_method_descriptor(descriptor)?;
    Ok((name.to_string(), params, ret))
}

/// Splits a field declaration such as `count:I` into name and type
pub fn parse_field_declaration(declaration: &str) -> Result<(String, Type), SmaliError> {
    match declaration.rfind(':') {
        Some(ix) if ix > 0 => {
            let field_type = Type::parse(&declaration[ix + 1..])?;
            if field_type.is_void() {
                fail!(Descriptor, "field '{}' cannot be void", &declaration[..ix]);
            }
            Ok((declaration[..ix].to_string(), field_type))
        }
        _ => fail!(Descriptor, "malformed field declaration '{}'", declaration),
    }
}

// Declaration order is the canonical rendering order.
bitflags! {
    /// Access and modifier flags of classes, fields and methods.
    ///
    /// Every flag owns a distinct bit so the set can be combined freely; the
    /// values are not the raw dex `access_flags`, which reuse bits between
    /// fields and methods (volatile/bridge, transient/varargs).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AccessType: u32 {
        const PUBLIC = 0x1;
        const PRIVATE = 0x2;
        const PROTECTED = 0x4;
        const STATIC = 0x8;
        const FINAL = 0x10;
        const SYNCHRONIZED = 0x20;
        const VOLATILE = 0x40;
        const BRIDGE = 0x80;
        const TRANSIENT = 0x100;
        const VARARGS = 0x200;
        const NATIVE = 0x400;
        const INTERFACE = 0x800;
        const ABSTRACT = 0x1000;
        const STRICTFP = 0x2000;
        const SYNTHETIC = 0x4000;
        const ANNOTATION = 0x8000;
        const ENUM = 0x10000;
        const CONSTRUCTOR = 0x20000;
        const DECLARED_SYNCHRONIZED = 0x40000;
    }
}

const ACCESS_KEYWORDS: [(AccessType, &str); 19] = [
    (AccessType::PUBLIC, "public"),
    (AccessType::PRIVATE, "private"),
    (AccessType::PROTECTED, "protected"),
    (AccessType::STATIC, "static"),
    (AccessType::FINAL, "final"),
    (AccessType::SYNCHRONIZED, "synchronized"),
    (AccessType::VOLATILE, "volatile"),
    (AccessType::BRIDGE, "bridge"),
    (AccessType::TRANSIENT, "transient"),
    (AccessType::VARARGS, "varargs"),
    (AccessType::NATIVE, "native"),
    (AccessType::INTERFACE, "interface"),
    (AccessType::ABSTRACT, "abstract"),
    (AccessType::STRICTFP, "strictfp"),
    (AccessType::SYNTHETIC, "synthetic"),
    (AccessType::ANNOTATION, "annotation"),
    (AccessType::ENUM, "enum"),
    (AccessType::CONSTRUCTOR, "constructor"),
    (AccessType::DECLARED_SYNCHRONIZED, "declared-synchronized"),
];

static KEYWORD_FLAGS: Lazy<HashMap<&'static str, AccessType>> = Lazy::new(|| {
    let mut m: HashMap<&'static str, AccessType> = ACCESS_KEYWORDS.iter().map(|(f, k)| (*k, *f)).collect();
    // older smali spelling
    m.insert("strict", AccessType::STRICTFP);
    m
});

impl AccessType {
    /// Looks up a single smali modifier keyword, e.g. `declared-synchronized`
    pub fn from_keyword(keyword: &str) -> Option<AccessType> {
        KEYWORD_FLAGS.get(keyword).copied()
    }

    pub fn is_keyword(keyword: &str) -> bool {
        KEYWORD_FLAGS.contains_key(keyword)
    }

    /// Combines a list of keywords, failing on the first unknown one
    pub fn from_keywords<S: AsRef<str>>(keywords: &[S]) -> Result<AccessType, SmaliError> {
        let mut flags = AccessType::empty();
        for k in keywords {
            match AccessType::from_keyword(k.as_ref()) {
                Some(f) => flags = flags.union(f),
                None => fail!(Syntax, "unknown access flag '{}'", k.as_ref()),
            }
        }
        Ok(flags)
    }

    /// The keywords of all set flags in canonical order
    pub fn keywords(&self) -> Vec<&'static str> {
        ACCESS_KEYWORDS
            .iter()
            .filter(|(f, _)| self.contains(*f))
            .map(|(_, k)| *k)
            .collect()
    }

    /// Space-joined keywords in canonical order, empty for an empty set
    pub fn render(&self) -> String {
        self.keywords().join(" ")
    }
}

impl fmt::Display for AccessType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

/// Simple enum to represent annotation visibility: build, runtime, system.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnnotationVisibility {
    Build,
    Runtime,
    System,
}

impl AnnotationVisibility {
    pub fn to_str(&self) -> &str {
        match self {
            Self::Build => "build",
            Self::Runtime => "runtime",
            Self::System => "system",
        }
    }
}

impl FromStr for AnnotationVisibility {
    type Err = SmaliError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "build" => Self::Build,
            "runtime" => Self::Runtime,
            "system" => Self::System,
            _ => fail!(Syntax, "unknown annotation visibility '{}'", s),
        })
    }
}

impl fmt::Display for AnnotationVisibility {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn parse_primitives_and_void() {
        assert_eq!(Type::parse("I").unwrap(), Type::Primitive(PrimitiveKind::Int));
        assert_eq!(Type::parse("Z").unwrap(), Type::Primitive(PrimitiveKind::Boolean));
        assert_eq!(Type::parse("V").unwrap(), Type::Void);
        assert_eq!(Type::parse("J").unwrap().to_java(), "long");
    }

    #[test]
    fn parse_arrays() {
        let t = Type::parse("[[I").unwrap();
        assert_eq!(
            t,
            Type::Array { element: Box::new(Type::Primitive(PrimitiveKind::Int)), dimensions: 2 }
        );
        assert_eq!(t.to_java(), "int[][]");
        let t = Type::parse("[Ljava/lang/String;").unwrap();
        assert_eq!(t.dimensions(), 1);
        assert_eq!(t.descriptor(), "[Ljava/lang/String;");
        assert_eq!(Type::array_of(t, 1).descriptor(), "[[Ljava/lang/String;");
    }

    #[test]
    fn object_class_name() {
        let t = Type::parse("Lcom/example/Foo$Bar;").unwrap();
        assert!(t.is_object());
        assert_eq!(t.class_name().unwrap(), "com.example.Foo$Bar");
        assert_eq!(Type::from_class_name("com.basic.Test").descriptor(), "Lcom/basic/Test;");
        assert_eq!(Type::parse("I").unwrap().class_name(), None);
    }

    #[test]
    fn malformed_descriptors() {
        for bad in ["", "X", "Lcom/Foo", "L;", "[V", "[", "II", "Lcom/Foo;I", "Lcom Foo;"] {
            let e = Type::parse(bad).unwrap_err();
            assert_eq!(e.kind, ErrorKind::Descriptor, "{bad}");
        }
    }

    #[test]
    fn method_descriptors() {
        let (params, ret) = parse_method_descriptor("(I[Ljava/lang/String;J)V").unwrap();
        assert_eq!(params.len(), 3);
        assert_eq!(params[1].descriptor(), "[Ljava/lang/String;");
        assert_eq!(ret, Type::Void);
        assert_eq!(method_descriptor(&params, &ret), "(I[Ljava/lang/String;J)V");
        assert!(parse_method_descriptor("(V)V").is_err());
        assert!(parse_method_descriptor("(I").is_err());

        let (name, params, ret) = parse_method_declaration("<init>()V").unwrap();
        assert_eq!(name, "<init>");
        assert!(params.is_empty());
        assert!(ret.is_void());
        assert!(parse_method_declaration("bogus").is_err());
        assert!(parse_method_declaration("(I)V").is_err());
    }

    #[test]
    fn field_declarations() {
        let (name, t) = parse_field_declaration("callTimeoutMillis:I").unwrap();
        assert_eq!(name, "callTimeoutMillis");
        assert_eq!(t.descriptor(), "I");
        assert!(parse_field_declaration("noType").is_err());
        assert!(parse_field_declaration("v:V").is_err());
    }

    #[test]
    fn access_set_semantics() {
        let a = AccessType::PUBLIC.union(AccessType::FINAL);
        let b = AccessType::FINAL.union(AccessType::PUBLIC);
        assert_eq!(a, b);
        assert!(a.contains(AccessType::PUBLIC));
        assert!(a.contains(AccessType::FINAL));
        assert!(!a.contains(AccessType::PRIVATE));
        assert_eq!(a.render(), "public final");
        assert_eq!(b.render(), "public final");
    }

    #[test]
    fn access_canonical_order() {
        let flags = AccessType::from_keywords(&["constructor", "static", "synthetic", "private"]).unwrap();
        assert_eq!(flags.render(), "private static synthetic constructor");
        assert_eq!(AccessType::empty().render(), "");
        assert_eq!(AccessType::from_keyword("strict"), Some(AccessType::STRICTFP));
        assert_eq!(
            AccessType::from_keyword("declared-synchronized"),
            Some(AccessType::DECLARED_SYNCHRONIZED)
        );
        assert!(AccessType::from_keywords(&["publik"]).is_err());
    }

    #[test]
    fn visibility() {
        assert_eq!("runtime".parse::<AnnotationVisibility>().unwrap(), AnnotationVisibility::Runtime);
        assert!("hidden".parse::<AnnotationVisibility>().is_err());
    }
}
