//! Smali reader
//!
//! `SmaliReader` walks a smali source line by line and reports every construct it
//! recognises to a `ClassVisitor`, in source order. Nested scopes (fields, methods,
//! annotations) are reported to the child visitors returned by the parent.
//!
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use log::{debug, trace, warn};
use nom::bytes::complete::{tag, take_while1};
use nom::character::complete::{char, space0, space1};
use nom::combinator::all_consuming;
use nom::sequence::preceded;
use nom::IResult;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, Position, SmaliError};
use crate::smali_lex::{Directive, Lexer, Line};
use crate::smali_value::{brace_depth, quoted_literal, unescape, SmaliValue};
use crate::types::{parse_field_declaration, parse_method_declaration, AccessType, AnnotationVisibility, Type};
use crate::visitor::{AnnotationVisitor, ClassVisitor, Discard, FieldVisitor, MethodVisitor, VisitResult, VisitorBase};

/// What the reader does with malformed input
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorMode {
    /// The first error aborts the parse
    #[default]
    Strict,
    /// Recoverable errors are recorded as diagnostics and the offending input is skipped
    Ignore,
}

impl ErrorMode {
    pub fn to_str(&self) -> &str {
        match self {
            ErrorMode::Strict => "strict",
            ErrorMode::Ignore => "ignore",
        }
    }
}

impl FromStr for ErrorMode {
    type Err = SmaliError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "strict" => Ok(ErrorMode::Strict),
            "ignore" => Ok(ErrorMode::Ignore),
            _ => Err(err!(Syntax, "unknown error mode '{}'", s)),
        }
    }
}

impl fmt::Display for ErrorMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_str())
    }
}

/// Reader configuration
///
/// # Examples
///
/// ```
///  use smali_visitor::smali_read::{ErrorMode, ReaderOptions};
///
///  let options = ReaderOptions::default().with_comments(true).with_errors(ErrorMode::Ignore);
///  assert!(options.comments);
///  assert!(!options.validate);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderOptions {
    /// Report comments to visitors
    pub comments: bool,
    /// The source has no class header, parsing starts with members
    pub snippet: bool,
    /// Run semantic checks while parsing
    pub validate: bool,
    pub errors: ErrorMode,
}

impl ReaderOptions {
    pub fn with_comments(mut self, comments: bool) -> Self {
        self.comments = comments;
        self
    }

    pub fn with_snippet(mut self, snippet: bool) -> Self {
        self.snippet = snippet;
        self
    }

    pub fn with_validate(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }

    pub fn with_errors(mut self, errors: ErrorMode) -> Self {
        self.errors = errors;
        self
    }
}

/// Parser states, `transition` is the table of directives each state accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReaderState {
    Start,
    Header,
    Body,
    Field,
    Method,
    Annotation,
    End,
}

impl ReaderState {
    /// The state an opening directive leads to, `None` if the directive is not allowed here.
    /// `.end` directives are not part of the table, they return to the enclosing state.
    pub fn transition(self, directive: &Directive) -> Option<ReaderState> {
        use ReaderState::*;

        match (self, directive) {
            (Start, Directive::Class) => Some(Header),
            (Header, Directive::Super | Directive::Implements | Directive::Source) => Some(Header),
            (Header | Body, Directive::Field) => Some(Field),
            (Header | Body, Directive::Method) => Some(Method),
            (Header | Body | Field | Method, Directive::Annotation) => Some(Annotation),
            (
                Method,
                Directive::Registers
                | Directive::Locals
                | Directive::Param
                | Directive::Line
                | Directive::Catch
                | Directive::CatchAll
                | Directive::Local
                | Directive::Restart
                | Directive::Prologue
                | Directive::Epilogue
                | Directive::Other(_),
            ) => Some(Method),
            (Annotation, Directive::Subannotation) => Some(Annotation),
            _ => None,
        }
    }

    pub fn to_str(&self) -> &str {
        match self {
            ReaderState::Start => "start",
            ReaderState::Header => "header",
            ReaderState::Body => "body",
            ReaderState::Field => "field",
            ReaderState::Method => "method",
            ReaderState::Annotation => "annotation",
            ReaderState::End => "end",
        }
    }
}

impl fmt::Display for ReaderState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_str())
    }
}

/// Reads smali source and drives a visitor
///
/// # Examples
///
/// ```
///  use smali_visitor::smali_read::{ReaderOptions, SmaliReader};
///  use smali_visitor::smali_write::SmaliWriter;
///
///  let mut writer = SmaliWriter::new();
///  let mut reader = SmaliReader::new(ReaderOptions::default());
///  reader.visit(".class public Lcom/example/A;\n.super Ljava/lang/Object;\n", &mut writer).unwrap();
///  assert!(writer.code().starts_with(".class public Lcom/example/A;"));
/// ```
#[derive(Debug, Default)]
pub struct SmaliReader {
    options: ReaderOptions,
    diagnostics: Vec<SmaliError>,
}

impl SmaliReader {
    pub fn new(options: ReaderOptions) -> SmaliReader {
        SmaliReader {
            options,
            diagnostics: vec![],
        }
    }

    pub fn options(&self) -> &ReaderOptions {
        &self.options
    }

    /// Errors skipped over by the last `visit` in `ErrorMode::Ignore`
    pub fn diagnostics(&self) -> &[SmaliError] {
        &self.diagnostics
    }

    /// Parses `source`, calling `visitor` for every construct found
    pub fn visit(&mut self, source: &str, visitor: &mut dyn ClassVisitor) -> Result<(), SmaliError> {
        self.diagnostics.clear();
        let mut parser = Parser {
            lexer: Lexer::new(source),
            pending: VecDeque::new(),
            options: self.options,
            diagnostics: &mut self.diagnostics,
            declared: HashSet::new(),
        };
        parser.class(visitor)
    }

    /// Reads a file and visits its contents
    pub fn visit_file<P: AsRef<Path>>(&mut self, path: P, visitor: &mut dyn ClassVisitor) -> Result<(), SmaliError> {
        let source = fs::read_to_string(path.as_ref())
            .map_err(|e| err!(Io, "unable to read {}: {}", path.as_ref().display(), e))?;
        self.visit(&source, visitor)
    }
}

struct MethodHeader {
    name: String,
    access: AccessType,
    params: Vec<Type>,
    return_type: Type,
}

struct FieldHeader {
    name: String,
    access: AccessType,
    field_type: Type,
    value: Option<SmaliValue>,
}

enum Step {
    Next,
    Close,
    /// A directive belonging to an enclosing scope, the current scope was never closed
    Parent,
}

struct Parser<'s, 'd> {
    lexer: Lexer<'s>,
    pending: VecDeque<Line>,
    options: ReaderOptions,
    diagnostics: &'d mut Vec<SmaliError>,
    declared: HashSet<String>,
}

impl<'s, 'd> Parser<'s, 'd> {
    fn next_line(&mut self) -> Result<Option<Line>, SmaliError> {
        if let Some(line) = self.pending.pop_front() {
            return Ok(Some(line));
        }
        loop {
            match self.lexer.next() {
                None => return Ok(None),
                Some(Ok(line)) => {
                    trace!("{}: {}", line.position.line, line.text);
                    return Ok(Some(line));
                }
                Some(Err(e)) => self.recover(e)?,
            }
        }
    }

    fn push_back(&mut self, line: Line) {
        self.pending.push_front(line);
    }

    /// Records a recoverable error in `ErrorMode::Ignore`, anything else is returned
    fn recover(&mut self, e: SmaliError) -> Result<(), SmaliError> {
        if self.options.errors == ErrorMode::Ignore && e.kind.is_recoverable() {
            warn!("{}", e);
            self.diagnostics.push(e);
            Ok(())
        } else {
            Err(e)
        }
    }

    fn comment<V: VisitorBase + ?Sized>(&self, v: &mut V, text: &str) -> VisitResult {
        if self.options.comments {
            v.visit_comment(text)?;
        }
        Ok(())
    }

    fn eol_comment<V: VisitorBase + ?Sized>(&self, v: &mut V, text: Option<&str>) -> VisitResult {
        match text {
            Some(text) if self.options.comments => v.visit_eol_comment(text),
            _ => Ok(()),
        }
    }

    fn validation(&self, failed: bool, position: Position, msg: String) -> Result<(), SmaliError> {
        if self.options.validate && failed {
            return Err(SmaliError::at(ErrorKind::Validation, position, &msg));
        }
        Ok(())
    }

    /// Closes a scope without its `.end`, `line` is handed back to the enclosing scope
    fn implicit_close<V: VisitorBase + ?Sized>(
        &mut self,
        v: &mut V,
        error: SmaliError,
        line: Option<Line>,
    ) -> Result<Option<String>, SmaliError> {
        self.recover(error)?;
        if let Some(line) = line {
            self.push_back(line);
        }
        v.visit_end()?;
        Ok(None)
    }

    /// Drops every line up to the matching `.end` or the next member
    fn skip_construct(&mut self, end: &str) -> Result<(), SmaliError> {
        debug!("skipping malformed {}", end);
        while let Some(line) = self.next_line()? {
            if line.end_of() == Some(end) {
                return Ok(());
            }
            if matches!(line.directive(), Some(Directive::Class | Directive::Field | Directive::Method)) {
                self.push_back(line);
                return Ok(());
            }
        }
        Ok(())
    }

    fn class(&mut self, visitor: &mut dyn ClassVisitor) -> Result<(), SmaliError> {
        let mut state = if self.options.snippet { ReaderState::Body } else { ReaderState::Start };

        while let Some(line) = self.next_line()? {
            if let Some(text) = &line.comment {
                self.comment(visitor, text)?;
                continue;
            }
            let position = line.position;
            if let Err(e) = self.class_line(visitor, &mut state, line) {
                self.recover(e.with_position(position))?;
            }
        }

        if state == ReaderState::Start {
            self.recover(err!(Syntax, "missing .class directive"))?;
        }
        state = ReaderState::End;
        debug!("reader reached {} state", state);
        visitor.visit_end()
    }

    fn class_line(
        &mut self,
        visitor: &mut dyn ClassVisitor,
        state: &mut ReaderState,
        line: Line,
    ) -> Result<(), SmaliError> {
        let directive = match line.directive() {
            Some(Directive::End) => fail!(Syntax @ line.position, "unexpected '{}'", line.text),
            Some(d) => d,
            None => fail!(Syntax @ line.position, "unexpected '{}' outside of a method", line.text),
        };
        let next = match state.transition(&directive) {
            Some(next) => next,
            None => fail!(Syntax @ line.position, "unexpected directive {} in {} state", directive, state),
        };
        *state = if next == ReaderState::Header { ReaderState::Header } else { ReaderState::Body };

        match next {
            ReaderState::Header => self.header_line(visitor, &directive, &line),
            ReaderState::Field => self.field(visitor, line),
            ReaderState::Method => self.method(visitor, line),
            _ => self.class_annotation(visitor, line),
        }
    }

    fn header_line(&mut self, visitor: &mut dyn ClassVisitor, directive: &Directive, line: &Line) -> VisitResult {
        let position = line.position;
        match directive {
            Directive::Class => {
                let (access, class_type) = class_header(line)?;
                self.validation(!class_type.is_object(), position, format!("class type {} is not an object type", class_type))?;
                debug!("class {}", class_type);
                visitor.visit_class(&class_type, access)?;
            }
            Directive::Super => {
                let super_type = single_type(line)?;
                self.validation(!super_type.is_object(), position, format!("super type {} is not an object type", super_type))?;
                visitor.visit_super(&super_type)?;
            }
            Directive::Implements => {
                let interface = single_type(line)?;
                self.validation(!interface.is_object(), position, format!("interface {} is not an object type", interface))?;
                visitor.visit_implements(&interface)?;
            }
            _ => match SmaliValue::decode(line.arguments()) {
                Ok(SmaliValue::String(source)) => visitor.visit_source(&source)?,
                _ => fail!(Syntax @ position, "expected a quoted file name, found '{}'", line.arguments()),
            },
        }
        self.eol_comment(visitor, line.eol_comment.as_deref())
    }

    fn class_annotation(&mut self, visitor: &mut dyn ClassVisitor, line: Line) -> VisitResult {
        let (visibility, annotation_type) = match self.annotation_header(&line) {
            Ok(h) => h,
            Err(e) => {
                self.recover(e)?;
                return self.skip_construct("annotation");
            }
        };
        let closing = self.annotation_child(visitor.visit_annotation(visibility, &annotation_type)?, &line, "annotation")?;
        self.eol_comment(visitor, closing.as_deref())
    }

    fn field(&mut self, visitor: &mut dyn ClassVisitor, line: Line) -> VisitResult {
        let header = match self.field_header(&line) {
            Ok(h) => h,
            Err(e) => {
                self.recover(e)?;
                self.field_body(&mut Discard, line.position)?;
                return Ok(());
            }
        };
        debug!("field {}", header.name);

        let closing = {
            let mut child: Box<dyn FieldVisitor + '_> =
                match visitor.visit_field(&header.name, header.access, &header.field_type, header.value.as_ref())? {
                    Some(c) => c,
                    None => Box::new(Discard),
                };
            self.eol_comment(&mut *child, line.eol_comment.as_deref())?;
            self.field_body(&mut *child, line.position)?
        };
        self.eol_comment(visitor, closing.as_deref())
    }

    fn field_header(&mut self, line: &Line) -> Result<FieldHeader, SmaliError> {
        let position = line.position;
        let (declaration, value) = match line.arguments().split_once('=') {
            Some((d, v)) => (d.trim(), Some(v.trim())),
            None => (line.arguments(), None),
        };
        let (access, declaration) = split_access(declaration, position)?;
        let (name, field_type) =
            parse_field_declaration(declaration).map_err(|e| err!(Syntax @ position, "{}", e.details))?;
        let value = match value {
            Some(v) => Some(SmaliValue::decode(v).map_err(|e| e.with_position(position))?),
            None => None,
        };

        if let Some(value) = &value {
            self.validation(
                !value.is_assignable_to(&field_type),
                position,
                format!("{} value {} cannot initialise field {} of type {}", value.kind_name(), value, name, field_type),
            )?;
            self.check_value(value, position)?;
        }
        let first = self.declared.insert(format!("field {}", name));
        self.validation(!first, position, format!("duplicate field {}", name))?;

        Ok(FieldHeader {
            name,
            access,
            field_type,
            value,
        })
    }

    /// Field annotations up to `.end field`, a field with no annotations may close implicitly
    fn field_body(&mut self, v: &mut dyn FieldVisitor, opened: Position) -> Result<Option<String>, SmaliError> {
        let mut annotated = false;
        let mut held: Vec<Line> = vec![];

        loop {
            let line = match self.next_line()? {
                Some(line) => line,
                None => {
                    for h in held.into_iter().rev() {
                        self.push_back(h);
                    }
                    if annotated {
                        return self.implicit_close(v, err!(Unterminated @ opened, "missing .end field"), None);
                    }
                    v.visit_end()?;
                    return Ok(None);
                }
            };
            if line.is_comment() {
                held.push(line);
                continue;
            }

            let end_of_field = line.end_of() == Some("field");
            if line.directive() != Some(Directive::Annotation) && !end_of_field {
                self.push_back(line);
                for h in held.into_iter().rev() {
                    self.push_back(h);
                }
                if annotated {
                    return self.implicit_close(v, err!(Unterminated @ opened, "missing .end field"), None);
                }
                v.visit_end()?;
                return Ok(None);
            }

            for h in held.drain(..) {
                if let Some(text) = &h.comment {
                    self.comment(v, text)?;
                }
            }
            if end_of_field {
                v.visit_end()?;
                return Ok(line.eol_comment.clone());
            }

            annotated = true;
            let (visibility, annotation_type) = match self.annotation_header(&line) {
                Ok(h) => h,
                Err(e) => {
                    self.recover(e)?;
                    self.skip_construct("annotation")?;
                    continue;
                }
            };
            let closing = self.annotation_child(v.visit_annotation(visibility, &annotation_type)?, &line, "annotation")?;
            self.eol_comment(v, closing.as_deref())?;
        }
    }

    fn method(&mut self, visitor: &mut dyn ClassVisitor, line: Line) -> VisitResult {
        let header = match self.method_header(&line) {
            Ok(h) => h,
            Err(e) => {
                self.recover(e)?;
                return self.skip_construct("method");
            }
        };
        debug!("method {}{}", header.name, crate::types::method_descriptor(&header.params, &header.return_type));

        let closing = {
            let mut child: Box<dyn MethodVisitor + '_> =
                match visitor.visit_method(&header.name, header.access, &header.params, &header.return_type)? {
                    Some(c) => c,
                    None => Box::new(Discard),
                };
            self.eol_comment(&mut *child, line.eol_comment.as_deref())?;
            self.method_body(&mut *child, &header, line.position)?
        };
        self.eol_comment(visitor, closing.as_deref())
    }

    fn method_header(&mut self, line: &Line) -> Result<MethodHeader, SmaliError> {
        let position = line.position;
        let (access, declaration) = split_access(line.arguments(), position)?;
        let (name, params, return_type) =
            parse_method_declaration(declaration).map_err(|e| err!(Syntax @ position, "{}", e.details))?;

        let initializer = name == "<init>" || name == "<clinit>";
        self.validation(
            initializer && !return_type.is_void(),
            position,
            format!("{} must return V, not {}", name, return_type),
        )?;
        self.validation(
            name == "<clinit>" && !params.is_empty(),
            position,
            "<clinit> cannot take parameters".to_string(),
        )?;
        let first = self.declared.insert(format!(
            "method {}{}",
            name,
            crate::types::method_descriptor(&params, &return_type)
        ));
        self.validation(!first, position, format!("duplicate method {}", declaration))?;

        Ok(MethodHeader {
            name,
            access,
            params,
            return_type,
        })
    }

    fn method_body(
        &mut self,
        v: &mut dyn MethodVisitor,
        header: &MethodHeader,
        opened: Position,
    ) -> Result<Option<String>, SmaliError> {
        let mut param_open = false;

        loop {
            let line = match self.next_line()? {
                Some(line) => line,
                None => {
                    let e = err!(Unterminated @ opened, "missing .end method for {}", header.name);
                    return self.implicit_close(v, e, None);
                }
            };
            if let Some(text) = &line.comment {
                self.comment(v, text)?;
                continue;
            }

            match self.method_line(v, &line, header, &mut param_open) {
                Ok(Step::Next) => {}
                Ok(Step::Close) => {
                    v.visit_end()?;
                    return Ok(line.eol_comment.clone());
                }
                Ok(Step::Parent) => {
                    let e = err!(Unterminated @ line.position, "missing .end method for {} before '{}'", header.name, line.text);
                    return self.implicit_close(v, e, Some(line));
                }
                Err(e) => self.recover(e.with_position(line.position))?,
            }
        }
    }

    fn method_line(
        &mut self,
        v: &mut dyn MethodVisitor,
        line: &Line,
        header: &MethodHeader,
        param_open: &mut bool,
    ) -> Result<Step, SmaliError> {
        let position = line.position;

        let directive = match line.directive() {
            Some(d) => d,
            None => {
                self.check_code(header, position)?;
                match line.text.strip_prefix(':') {
                    Some(label) => v.visit_label(label)?,
                    None => v.visit_instruction(&line.text)?,
                }
                self.eol_comment(v, line.eol_comment.as_deref())?;
                return Ok(Step::Next);
            }
        };

        if directive == Directive::End {
            match line.end_of() {
                Some("method") => return Ok(Step::Close),
                Some("param") => {
                    if !*param_open {
                        fail!(Syntax @ position, ".end param without an open .param");
                    }
                    *param_open = false;
                    v.visit_param_end()?;
                }
                Some("local") => v.visit_end_local(&local_register(line, line.arguments())?)?,
                Some("field") | Some("annotation") | Some("subannotation") => {
                    fail!(Syntax @ position, "unexpected '{}' in method {}", line.text, header.name)
                }
                _ => {
                    self.check_code(header, position)?;
                    v.visit_instruction(&line.text)?;
                }
            }
            self.eol_comment(v, line.eol_comment.as_deref())?;
            return Ok(Step::Next);
        }

        match ReaderState::Method.transition(&directive) {
            Some(ReaderState::Annotation) => {
                let (visibility, annotation_type) = match self.annotation_header(line) {
                    Ok(h) => h,
                    Err(e) => {
                        self.recover(e)?;
                        self.skip_construct("annotation")?;
                        return Ok(Step::Next);
                    }
                };
                let closing = self.annotation_child(v.visit_annotation(visibility, &annotation_type)?, line, "annotation")?;
                self.eol_comment(v, closing.as_deref())?;
                return Ok(Step::Next);
            }
            Some(_) => {}
            None => match directive {
                Directive::Class
                | Directive::Super
                | Directive::Implements
                | Directive::Source
                | Directive::Field
                | Directive::Method => return Ok(Step::Parent),
                _ => fail!(Syntax @ position, "unexpected directive {} in method {}", directive, header.name),
            },
        }

        match directive {
            Directive::Registers => {
                self.check_code(header, position)?;
                v.visit_registers(parse_count(line)?)?;
            }
            Directive::Locals => {
                self.check_code(header, position)?;
                v.visit_locals(parse_count(line)?)?;
            }
            Directive::Line => v.visit_line(parse_count(line)?)?,
            Directive::Param => {
                let (register, name) = param_arguments(line)?;
                *param_open = true;
                v.visit_param(&register, name.as_deref())?;
            }
            Directive::Catch | Directive::CatchAll => {
                self.check_code(header, position)?;
                let handler = catch_arguments(line)?;
                if directive == Directive::CatchAll {
                    if !handler.exception.is_empty() {
                        fail!(Syntax @ position, "unexpected exception type in '{}'", line.text);
                    }
                    v.visit_catchall(handler.start, handler.end, handler.handler)?;
                } else {
                    let exception = Type::parse(handler.exception).map_err(|e| e.with_position(position))?;
                    self.validation(
                        !exception.is_object(),
                        position,
                        format!("exception type {} is not an object type", exception),
                    )?;
                    v.visit_catch(&exception, handler.start, handler.end, handler.handler)?;
                }
            }
            Directive::Local => {
                let local = local_arguments(line)?;
                v.visit_local(
                    &local.register,
                    local.name.as_deref(),
                    local.local_type.as_ref(),
                    local.signature.as_deref(),
                )?;
            }
            Directive::Restart => v.visit_restart_local(&local_register(line, line.arguments())?)?,
            Directive::Prologue => v.visit_prologue()?,
            Directive::Epilogue => v.visit_epilogue()?,
            _ => {
                self.check_code(header, position)?;
                v.visit_instruction(&line.text)?;
            }
        }
        self.eol_comment(v, line.eol_comment.as_deref())?;
        Ok(Step::Next)
    }

    fn check_code(&self, header: &MethodHeader, position: Position) -> VisitResult {
        self.validation(
            header.access.intersects(AccessType::ABSTRACT | AccessType::NATIVE),
            position,
            format!("abstract or native method {} cannot have code", header.name),
        )
    }

    fn annotation_header(&mut self, line: &Line) -> Result<(AnnotationVisibility, Type), SmaliError> {
        let position = line.position;
        let args: Vec<&str> = line.arguments().split_whitespace().collect();
        if args.len() != 2 {
            fail!(Syntax @ position, "expected '.annotation <visibility> <type>', found '{}'", line.text);
        }
        let visibility = AnnotationVisibility::from_str(args[0]).map_err(|e| e.with_position(position))?;
        let annotation_type = Type::parse(args[1]).map_err(|e| e.with_position(position))?;
        self.validation(
            !annotation_type.is_object(),
            position,
            format!("annotation type {} is not an object type", annotation_type),
        )?;
        Ok((visibility, annotation_type))
    }

    /// Runs an annotation scope on the child returned by the parent, or on `Discard`
    fn annotation_child<'v>(
        &mut self,
        child: Option<Box<dyn AnnotationVisitor + 'v>>,
        line: &Line,
        end: &str,
    ) -> Result<Option<String>, SmaliError> {
        let mut child: Box<dyn AnnotationVisitor + 'v> = match child {
            Some(c) => c,
            None => Box::new(Discard),
        };
        self.eol_comment(&mut *child, line.eol_comment.as_deref())?;
        self.annotation_body(&mut *child, end, line.position)
    }

    fn annotation_body(
        &mut self,
        v: &mut dyn AnnotationVisitor,
        end: &str,
        opened: Position,
    ) -> Result<Option<String>, SmaliError> {
        loop {
            let line = match self.next_line()? {
                Some(line) => line,
                None => return self.implicit_close(v, err!(Unterminated @ opened, "missing .end {}", end), None),
            };
            if let Some(text) = &line.comment {
                self.comment(v, text)?;
                continue;
            }

            let end_of = line.end_of().map(str::to_string);
            match (line.directive(), end_of.as_deref()) {
                (None, _) => {
                    if let Err(e) = self.element(v, &line) {
                        self.recover(e.with_position(line.position))?;
                    }
                }
                (Some(Directive::End), Some(e)) if e == end => {
                    v.visit_end()?;
                    return Ok(line.eol_comment.clone());
                }
                (Some(Directive::End), Some("method" | "field" | "param" | "annotation")) | (Some(_), None) => {
                    let e = err!(Unterminated @ line.position, "missing .end {} before '{}'", end, line.text);
                    return self.implicit_close(v, e, Some(line));
                }
                (Some(_), Some(_)) => {
                    let e = err!(Syntax @ line.position, "unexpected '{}' in {}", line.text, end);
                    self.recover(e)?;
                }
            }
        }
    }

    fn element(&mut self, v: &mut dyn AnnotationVisitor, line: &Line) -> VisitResult {
        let position = line.position;
        let (name, value) = match line.text.split_once('=') {
            Some((n, value)) if !n.trim().is_empty() => (n.trim(), value.trim()),
            _ => fail!(Syntax @ position, "expected 'name = value', found '{}'", line.text),
        };

        if let Some(t) = value.strip_prefix(".subannotation") {
            let annotation_type = Type::parse(t.trim()).map_err(|e| e.with_position(position))?;
            self.validation(
                !annotation_type.is_object(),
                position,
                format!("annotation type {} is not an object type", annotation_type),
            )?;
            let closing = self.annotation_child(v.visit_subannotation(name, &annotation_type)?, line, "subannotation")?;
            return self.eol_comment(v, closing.as_deref());
        }

        let (text, remarks) = if value.starts_with('{') && brace_depth(value) > 0 {
            self.gather_array(value, position)?
        } else {
            (value.to_string(), vec![])
        };
        let value = SmaliValue::decode(&text).map_err(|e| e.with_position(position))?;
        self.check_value(&value, position)?;

        v.visit_value(name, &value)?;
        self.eol_comment(v, line.eol_comment.as_deref())?;
        for remark in remarks {
            match &remark.comment {
                Some(text) => self.comment(v, text)?,
                None => self.eol_comment(v, remark.eol_comment.as_deref())?,
            }
        }
        Ok(())
    }

    /// Collects the lines of a multi-line array value up to the brace that closes it.
    /// Lines carrying comments are returned alongside, in source order.
    fn gather_array(&mut self, first: &str, opened: Position) -> Result<(String, Vec<Line>), SmaliError> {
        let mut text = first.to_string();
        let mut depth = brace_depth(first);
        let mut remarks = vec![];

        while let Some(line) = self.next_line()? {
            if line.is_comment() {
                remarks.push(line);
                continue;
            }
            if matches!(line.end_of(), Some("annotation" | "field" | "method" | "param"))
                || matches!(line.directive(), Some(Directive::Class | Directive::Field | Directive::Method))
            {
                self.push_back(line);
                break;
            }
            text.push('\n');
            text.push_str(&line.text);
            depth += brace_depth(&line.text);
            if line.eol_comment.is_some() {
                remarks.push(line);
            }
            if depth <= 0 {
                return Ok((text, remarks));
            }
        }
        fail!(Unterminated @ opened, "unterminated array value")
    }

    /// Enum owners and annotation types nested in a value must be object types
    fn check_value(&self, value: &SmaliValue, position: Position) -> VisitResult {
        match value {
            SmaliValue::Enum { owner, .. } => {
                self.validation(!owner.is_object(), position, format!("enum owner {} is not an object type", owner))
            }
            SmaliValue::Array(values) => values.iter().try_for_each(|v| self.check_value(v, position)),
            SmaliValue::SubAnnotation(sub) => {
                self.validation(
                    !sub.annotation_type.is_object(),
                    position,
                    format!("annotation type {} is not an object type", sub.annotation_type),
                )?;
                sub.elements.iter().try_for_each(|(_, v)| self.check_value(v, position))
            }
            _ => Ok(()),
        }
    }
}

/// Splits `flags... declaration` into the access set and the last word
fn split_access(args: &str, position: Position) -> Result<(AccessType, &str), SmaliError> {
    let words: Vec<&str> = args.split_whitespace().collect();
    match words.split_last() {
        Some((last, flags)) => {
            let access = AccessType::from_keywords(flags).map_err(|e| e.with_position(position))?;
            Ok((access, last))
        }
        None => fail!(Syntax @ position, "missing declaration"),
    }
}

fn class_header(line: &Line) -> Result<(AccessType, Type), SmaliError> {
    let (access, descriptor) = split_access(line.arguments(), line.position)?;
    let class_type = Type::parse(descriptor).map_err(|e| e.with_position(line.position))?;
    Ok((access, class_type))
}

fn single_type(line: &Line) -> Result<Type, SmaliError> {
    let args = line.arguments();
    if args.is_empty() || args.contains(char::is_whitespace) {
        fail!(Syntax @ line.position, "expected a single type after {}", line.tokens[0].text);
    }
    Type::parse(args).map_err(|e| e.with_position(line.position))
}

fn parse_count(line: &Line) -> Result<u32, SmaliError> {
    line.arguments()
        .parse::<u32>()
        .map_err(|_| err!(Syntax @ line.position, "expected a count, found '{}'", line.text))
}

/// `.param p1` or `.param p1, "name"`
fn param_arguments(line: &Line) -> Result<(String, Option<String>), SmaliError> {
    let args = line.arguments();
    let (register, name) = match args.split_once(',') {
        Some((r, n)) => (r.trim(), Some(n.trim())),
        None => (args, None),
    };
    if register.is_empty() || register.contains(char::is_whitespace) {
        fail!(Syntax @ line.position, "malformed .param '{}'", line.text);
    }
    let name = match name.map(SmaliValue::decode) {
        None => None,
        Some(Ok(SmaliValue::String(s))) => Some(s),
        Some(_) => fail!(Syntax @ line.position, "parameter name must be a string in '{}'", line.text),
    };
    Ok((register.to_string(), name))
}

/// Operands of `.catch` and `.catchall`, labels without the leading ':'
struct CatchArguments<'l> {
    /// Empty for `.catchall`
    exception: &'l str,
    start: &'l str,
    end: &'l str,
    handler: &'l str,
}

/// `<exception> {:start .. :end} :handler`
fn catch_arguments(line: &Line) -> Result<CatchArguments<'_>, SmaliError> {
    let args = line.arguments();
    let malformed = || err!(Syntax @ line.position, "malformed try block '{}'", line.text);
    let ix = args.find('{').ok_or_else(malformed)?;
    match all_consuming(try_block)(&args[ix..]) {
        Ok((_, (start, end, handler))) => Ok(CatchArguments {
            exception: args[..ix].trim(),
            start,
            end,
            handler,
        }),
        Err(_) => Err(malformed()),
    }
}

fn try_label(input: &str) -> IResult<&str, &str> {
    preceded(char(':'), take_while1(|c: char| !c.is_whitespace() && c != '}'))(input)
}

/// `{:start .. :end} :handler`
fn try_block(input: &str) -> IResult<&str, (&str, &str, &str)> {
    let (input, _) = char('{')(input)?;
    let (input, _) = space0(input)?;
    let (input, start) = try_label(input)?;
    let (input, _) = space1(input)?;
    let (input, _) = tag("..")(input)?;
    let (input, _) = space1(input)?;
    let (input, end) = try_label(input)?;
    let (input, _) = space0(input)?;
    let (input, _) = char('}')(input)?;
    let (input, _) = space1(input)?;
    let (input, handler) = try_label(input)?;
    Ok((input, (start, end, handler)))
}

struct LocalArguments {
    register: String,
    name: Option<String>,
    local_type: Option<Type>,
    signature: Option<String>,
}

/// `.local v0`, `.local v0, "name":Type` or `.local v0, "name":Type, "signature"`; `null` stands for
/// a missing name
fn local_arguments(line: &Line) -> Result<LocalArguments, SmaliError> {
    let position = line.position;
    let malformed = || err!(Syntax @ position, "malformed .local '{}'", line.text);
    let (register, rest) = match line.arguments().split_once(',') {
        Some((r, rest)) => (r.trim(), Some(rest.trim())),
        None => (line.arguments(), None),
    };
    let register = local_register(line, register)?;
    let rest = match rest {
        Some(rest) => rest,
        None => {
            return Ok(LocalArguments {
                register,
                name: None,
                local_type: None,
                signature: None,
            })
        }
    };

    let (after_name, name) = match rest.strip_prefix("null") {
        Some(after) => (after, None),
        None => match quoted_literal('"')(rest) {
            Ok((after, body)) => (after, Some(unescape(body).map_err(|e| err!(Syntax @ position, "{}", e.details))?)),
            Err(_) => return Err(malformed()),
        },
    };
    let declared = after_name.trim_start().strip_prefix(':').ok_or_else(malformed)?;
    let (type_text, signature) = match declared.split_once(',') {
        Some((t, sig)) => (t.trim(), Some(sig.trim())),
        None => (declared.trim(), None),
    };
    let local_type = Type::parse(type_text).map_err(|e| e.with_position(position))?;
    let signature = match signature.map(SmaliValue::decode) {
        None => None,
        Some(Ok(SmaliValue::String(s))) => Some(s),
        Some(_) => return Err(malformed()),
    };

    Ok(LocalArguments {
        register,
        name,
        local_type: Some(local_type),
        signature,
    })
}

/// The register of `.local`, and of `.end local`/`.restart local` after their `local` keyword
fn local_register(line: &Line, args: &str) -> Result<String, SmaliError> {
    let register = match line.directive() {
        Some(Directive::End | Directive::Restart) => args.strip_prefix("local").map(str::trim),
        _ => Some(args.trim()),
    };
    match register {
        Some(r) if !r.is_empty() && !r.contains(char::is_whitespace) => Ok(r.to_string()),
        _ => fail!(Syntax @ line.position, "expected a single register in '{}'", line.text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::recorder::{Log, Recorder};
    use crate::visitor::Capability;

    fn read(source: &str, options: ReaderOptions) -> (Result<(), SmaliError>, Vec<String>, Vec<SmaliError>) {
        let log = Log::default();
        let mut recorder = Recorder::new("r", &log, Capability::Class);
        let mut reader = SmaliReader::new(options);
        let result = reader.visit(source, &mut recorder);
        let events = log.borrow().clone();
        (result, events, reader.diagnostics().to_vec())
    }

    #[test]
    fn transition_table() {
        use ReaderState::*;
        assert_eq!(Start.transition(&Directive::Class), Some(Header));
        assert_eq!(Start.transition(&Directive::Method), None);
        assert_eq!(Header.transition(&Directive::Super), Some(Header));
        assert_eq!(Body.transition(&Directive::Super), None);
        assert_eq!(Body.transition(&Directive::Field), Some(Field));
        assert_eq!(Field.transition(&Directive::Annotation), Some(Annotation));
        assert_eq!(Field.transition(&Directive::Method), None);
        assert_eq!(Method.transition(&Directive::Catch), Some(Method));
        assert_eq!(Method.transition(&Directive::Other(".packed-switch".to_string())), Some(Method));
        assert_eq!(Body.transition(&Directive::Local), None);
        assert_eq!(Method.transition(&Directive::Field), None);
        assert_eq!(Annotation.transition(&Directive::Subannotation), Some(Annotation));
        assert_eq!(End.transition(&Directive::Class), None);
    }

    #[test]
    fn error_mode_from_str() {
        assert_eq!("ignore".parse::<ErrorMode>().unwrap(), ErrorMode::Ignore);
        assert_eq!("strict".parse::<ErrorMode>().unwrap(), ErrorMode::Strict);
        assert!("lenient".parse::<ErrorMode>().is_err());
        assert_eq!(ReaderOptions::default().errors, ErrorMode::Strict);
    }

    #[test]
    fn error_mode_divergence() {
        let source = ".class public Lcom/example/A;\n.method bogus\n";

        let (result, events, diagnostics) = read(source, ReaderOptions::default().with_errors(ErrorMode::Ignore));
        assert!(result.is_ok());
        assert_eq!(events, vec!["r visit_class Lcom/example/A; public", "r visit_end"]);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].kind, ErrorKind::Syntax);

        let (result, events, _) = read(source, ReaderOptions::default());
        let e = result.unwrap_err();
        assert_eq!(e.kind, ErrorKind::Syntax);
        assert_eq!(e.position.map(|p| p.line), Some(2));
        assert_eq!(events, vec!["r visit_class Lcom/example/A; public"]);
    }

    #[test]
    fn header_and_members_in_order() {
        let source = "\
.class public final Lcom/example/A;
.super Ljava/lang/Object;
.implements Ljava/lang/Runnable;
.source \"A.java\"

.field private static final TAG:Ljava/lang/String; = \"tag\"

.method public run()V
    .registers 1
    .line 3
    return-void
.end method
";
        let (result, events, _) = read(source, ReaderOptions::default());
        result.unwrap();
        assert_eq!(
            events,
            vec![
                "r visit_class Lcom/example/A; public final",
                "r visit_super Ljava/lang/Object;",
                "r visit_implements Ljava/lang/Runnable;",
                "r visit_source A.java",
                "r visit_field TAG private static final Ljava/lang/String; \"tag\"",
                "r visit_end",
                "r visit_method run public ()V",
                "r visit_registers 1",
                "r visit_line 3",
                "r visit_instruction return-void",
                "r visit_end",
                "r visit_end",
            ]
        );
    }

    #[test]
    fn comments_are_opt_in() {
        let source = "# header\n.class Lcom/A; # cls\n.method a()V # open\n    nop # op\n.end method # close\n";
        let (_, events, _) = read(source, ReaderOptions::default());
        assert!(events.iter().all(|e| !e.contains("comment")));

        let (result, events, _) = read(source, ReaderOptions::default().with_comments(true));
        result.unwrap();
        assert_eq!(
            events,
            vec![
                "r visit_comment header",
                "r visit_class Lcom/A; ",
                "r visit_eol_comment cls",
                "r visit_method a  ()V",
                "r visit_eol_comment open",
                "r visit_instruction nop",
                "r visit_eol_comment op",
                "r visit_end",
                "r visit_eol_comment close",
                "r visit_end",
            ]
        );
    }

    #[test]
    fn field_closes_implicitly() {
        let source = "\
.class Lcom/A;
.field a:I
# between
.field b:I
.annotation runtime Lcom/Ann;
.end annotation
.end field
";
        let (result, events, _) = read(source, ReaderOptions::default().with_comments(true));
        result.unwrap();
        assert_eq!(
            events,
            vec![
                "r visit_class Lcom/A; ",
                "r visit_field a  I",
                "r visit_end",
                "r visit_comment between",
                "r visit_field b  I",
                "r visit_annotation runtime Lcom/Ann;",
                "r visit_end",
                "r visit_end",
                "r visit_end",
            ]
        );
    }

    #[test]
    fn annotation_values() {
        let source = "\
.class Lcom/A;
.annotation system Ldalvik/annotation/Signature;
    value = {
        \"Ljava/util/List<\",
        \"Ljava/lang/String;>;\"
    }
    level = .enum Lkotlin/DeprecationLevel;->ERROR:Lkotlin/DeprecationLevel;
    inner = .subannotation Lcom/Inner;
        count = 0x2
    .end subannotation
.end annotation
";
        let (result, events, _) = read(source, ReaderOptions::default().with_validate(true));
        result.unwrap();
        assert_eq!(
            events,
            vec![
                "r visit_class Lcom/A; ",
                "r visit_annotation system Ldalvik/annotation/Signature;",
                "r visit_value value { \"Ljava/util/List<\", \"Ljava/lang/String;>;\" }",
                "r visit_value level .enum Lkotlin/DeprecationLevel;->ERROR:Lkotlin/DeprecationLevel;",
                "r visit_subannotation inner Lcom/Inner;",
                "r visit_value count 0x2",
                "r visit_end",
                "r visit_end",
                "r visit_end",
            ]
        );
    }

    #[test]
    fn method_body_events() {
        let source = "\
.class Lcom/A;
.method public static f(ILjava/lang/String;)I
    .locals 2
    .param p1, \"name\"
        .annotation build Lcom/NonNull;
        .end annotation
    .end param
    :cond_0
    packed-switch p0, :pswitch_data_0
    .packed-switch 0x1
        :pswitch_0
    .end packed-switch
.end method
";
        let (result, events, _) = read(source, ReaderOptions::default());
        result.unwrap();
        assert_eq!(
            events,
            vec![
                "r visit_class Lcom/A; ",
                "r visit_method f public static (ILjava/lang/String;)I",
                "r visit_locals 2",
                "r visit_param p1 name",
                "r visit_annotation build Lcom/NonNull;",
                "r visit_end",
                "r visit_param_end",
                "r visit_label cond_0",
                "r visit_instruction packed-switch p0, :pswitch_data_0",
                "r visit_instruction .packed-switch 0x1",
                "r visit_label pswitch_0",
                "r visit_instruction .end packed-switch",
                "r visit_end",
                "r visit_end",
            ]
        );
    }

    #[test]
    fn try_blocks_and_debug_locals() {
        let source = "\
.class Lcom/A;
.method a()V
    .prologue
    :try_start_0
    .local v0, \"items\":Ljava/util/List;, \"Ljava/util/List<Ljava/lang/String;>;\"
    .local v1, null:I # unnamed
    .local v2
    .end local v0
    .restart local v0
    :try_end_0
    .catch Ljava/io/IOException; {:try_start_0 .. :try_end_0} :catch_0
    .catchall {:try_start_0 .. :try_end_0} :catchall_0
    .epilogue
.end method
";
        let (result, events, _) = read(source, ReaderOptions::default().with_comments(true).with_validate(true));
        result.unwrap();
        assert_eq!(
            events,
            vec![
                "r visit_class Lcom/A; ",
                "r visit_method a  ()V",
                "r visit_prologue",
                "r visit_label try_start_0",
                "r visit_local v0 items Ljava/util/List; Ljava/util/List<Ljava/lang/String;>;",
                "r visit_local v1 - I -",
                "r visit_eol_comment unnamed",
                "r visit_local v2 - - -",
                "r visit_end_local v0",
                "r visit_restart_local v0",
                "r visit_label try_end_0",
                "r visit_catch Ljava/io/IOException; try_start_0 try_end_0 catch_0",
                "r visit_catchall try_start_0 try_end_0 catchall_0",
                "r visit_epilogue",
                "r visit_end",
                "r visit_end",
            ]
        );
    }

    #[test]
    fn malformed_try_blocks() {
        let cases = [
            "    .catch Ljava/io/IOException; {:a :b} :c\n",
            "    .catch Ljava/io/IOException; {:a .. :b}\n",
            "    .catchall Ljava/io/IOException; {:a .. :b} :c\n",
            "    .local v0, name:I\n",
            "    .end local\n",
        ];
        for body in cases {
            let source = format!(".class Lcom/A;\n.method a()V\n{}.end method\n", body);
            let (result, _, _) = read(&source, ReaderOptions::default());
            assert_eq!(result.unwrap_err().kind, ErrorKind::Syntax, "{body}");

            let (result, events, diagnostics) = read(&source, ReaderOptions::default().with_errors(ErrorMode::Ignore));
            result.unwrap();
            assert_eq!(diagnostics.len(), 1, "{body}");
            assert_eq!(events.len(), 4, "{body}");
        }
    }

    #[test]
    fn member_names_starting_with_digits() {
        let source = ".class public La/b;\n.super Ljava/lang/Object;\n\n.field public static 1:I\n.method 0()V\n.end method\n";
        let (result, events, _) = read(source, ReaderOptions::default());
        result.unwrap();
        assert_eq!(events[2], "r visit_field 1 public static I");
        assert_eq!(events[4], "r visit_method 0  ()V");
    }

    #[test]
    fn array_of_subannotations() {
        let source = "\
.class Lcom/A;
.annotation runtime Landroidx/room/Entity;
    indices = {
        .subannotation Landroidx/room/Index;
            value = {
                \"name\"
            }
            unique = true
        .end subannotation,
        .subannotation Landroidx/room/Index;
            value = {
                \"id\",
                \"name\"
            }
        .end subannotation
    }
    tableName = \"items\"
.end annotation
";
        for errors in [ErrorMode::Strict, ErrorMode::Ignore] {
            let (result, events, diagnostics) = read(source, ReaderOptions::default().with_errors(errors));
            result.unwrap();
            assert!(diagnostics.is_empty());
            assert_eq!(events.len(), 6);
            assert!(events[2].starts_with("r visit_value indices {\n    .subannotation Landroidx/room/Index;"));
            assert!(events[2].contains("value = { \"id\", \"name\" }"));
            assert_eq!(events[3], "r visit_value tableName \"items\"");
        }
    }

    #[test]
    fn comments_inside_arrays() {
        let source = "\
.class Lcom/A;
.annotation system Ldalvik/annotation/MemberClasses;
    value = { # open
        Lcom/A$B;, # first
        # between
        Lcom/A$C;
    } # close
.end annotation
";
        let (result, events, _) = read(source, ReaderOptions::default().with_comments(true));
        result.unwrap();
        assert_eq!(
            events,
            vec![
                "r visit_class Lcom/A; ",
                "r visit_annotation system Ldalvik/annotation/MemberClasses;",
                "r visit_value value { Lcom/A$B;, Lcom/A$C; }",
                "r visit_eol_comment open",
                "r visit_eol_comment first",
                "r visit_comment between",
                "r visit_eol_comment close",
                "r visit_end",
                "r visit_end",
            ]
        );

        let (_, events, _) = read(source, ReaderOptions::default());
        assert!(events.iter().all(|e| !e.contains("comment")));
    }

    #[test]
    fn unclosed_array_is_recovered() {
        let source = ".class Lcom/A;\n.annotation runtime Lcom/Ann;\n    value = {\n        0x1\n.end annotation\n";
        let (result, _, _) = read(source, ReaderOptions::default());
        assert_eq!(result.unwrap_err().kind, ErrorKind::Unterminated);

        let (result, events, diagnostics) = read(source, ReaderOptions::default().with_errors(ErrorMode::Ignore));
        result.unwrap();
        assert_eq!(diagnostics[0].kind, ErrorKind::Unterminated);
        assert_eq!(events, vec!["r visit_class Lcom/A; ", "r visit_annotation runtime Lcom/Ann;", "r visit_end", "r visit_end"]);
    }

    #[test]
    fn unterminated_method() {
        let source = ".class Lcom/A;\n.method a()V\n    nop\n.method b()V\n.end method\n";
        let (result, _, _) = read(source, ReaderOptions::default());
        assert_eq!(result.unwrap_err().kind, ErrorKind::Unterminated);

        let (result, events, diagnostics) = read(source, ReaderOptions::default().with_errors(ErrorMode::Ignore));
        result.unwrap();
        assert_eq!(diagnostics[0].kind, ErrorKind::Unterminated);
        assert_eq!(
            events,
            vec![
                "r visit_class Lcom/A; ",
                "r visit_method a  ()V",
                "r visit_instruction nop",
                "r visit_end",
                "r visit_method b  ()V",
                "r visit_end",
                "r visit_end",
            ]
        );
    }

    #[test]
    fn lex_errors_are_recoverable() {
        let source = ".class Lcom/A;\n.method a()V\n    const-string v0, \"open\n    nop\n.end method\n";
        let (result, _, _) = read(source, ReaderOptions::default());
        assert_eq!(result.unwrap_err().kind, ErrorKind::Lex);

        let (result, events, diagnostics) = read(source, ReaderOptions::default().with_errors(ErrorMode::Ignore));
        result.unwrap();
        assert_eq!(diagnostics.len(), 1);
        assert!(events.contains(&"r visit_instruction nop".to_string()));
    }

    #[test]
    fn snippet_mode() {
        let source = ".method a()V\n    return-void\n.end method\n";
        let (result, _, _) = read(source, ReaderOptions::default());
        assert!(result.is_err());

        let (result, events, _) = read(source, ReaderOptions::default().with_snippet(true));
        result.unwrap();
        assert_eq!(events[0], "r visit_method a  ()V");
        assert_eq!(events.len(), 4);
    }

    #[test]
    fn validation() {
        let cases = [
            ".class I\n",
            ".class Lcom/A;\n.super [I\n",
            ".class Lcom/A;\n.field x:I = \"s\"\n",
            ".class Lcom/A;\n.field x:I\n.field x:I\n",
            ".class Lcom/A;\n.method <init>()I\n.end method\n",
            ".class Lcom/A;\n.method static <clinit>(I)V\n.end method\n",
            ".class Lcom/A;\n.method abstract a()V\n    .registers 1\n.end method\n",
            ".class Lcom/A;\n.method a()V\n.end method\n.method a()V\n.end method\n",
        ];
        for source in cases {
            let (result, _, _) = read(source, ReaderOptions::default());
            assert!(result.is_ok(), "{source}");
            let (result, _, _) = read(source, ReaderOptions::default().with_validate(true).with_errors(ErrorMode::Ignore));
            assert_eq!(result.unwrap_err().kind, ErrorKind::Validation, "{source}");
        }
    }

    #[test]
    fn literal_errors_always_propagate() {
        let source = ".class Lcom/A;\n.field x:B = 0x100t\n";
        let (result, _, _) = read(source, ReaderOptions::default().with_errors(ErrorMode::Ignore));
        let e = result.unwrap_err();
        assert_eq!(e.kind, ErrorKind::Literal);
        assert_eq!(e.position.map(|p| p.line), Some(2));
    }

    struct Skipper {
        events: Vec<String>,
    }

    impl VisitorBase for Skipper {
        fn visit_end(&mut self) -> VisitResult {
            self.events.push("end".to_string());
            Ok(())
        }
    }

    impl ClassVisitor for Skipper {
        fn visit_field(
            &mut self,
            name: &str,
            _access: AccessType,
            _field_type: &Type,
            _value: Option<&SmaliValue>,
        ) -> Result<Option<Box<dyn FieldVisitor + '_>>, SmaliError> {
            self.events.push(format!("field {}", name));
            Ok(None)
        }

        fn visit_method(
            &mut self,
            name: &str,
            _access: AccessType,
            _params: &[Type],
            _return_type: &Type,
        ) -> Result<Option<Box<dyn MethodVisitor + '_>>, SmaliError> {
            self.events.push(format!("method {}", name));
            Ok(None)
        }
    }

    #[test]
    fn declined_scopes_are_skipped() {
        let source = "\
.class Lcom/A;
.field f:I
.annotation runtime Lcom/Ann;
    value = 0x1
.end annotation
.end field
.method a()V
    .annotation runtime Lcom/Ann;
    .end annotation
    return-void
.end method
.method b()V
.end method
";
        let mut skipper = Skipper { events: vec![] };
        SmaliReader::new(ReaderOptions::default()).visit(source, &mut skipper).unwrap();
        assert_eq!(skipper.events, vec!["field f", "method a", "method b", "end"]);
    }

    struct Failing;

    impl VisitorBase for Failing {}

    impl ClassVisitor for Failing {
        fn visit_super(&mut self, _super_type: &Type) -> VisitResult {
            Err(SmaliError::visitor("stop"))
        }
    }

    #[test]
    fn visitor_errors_abort() {
        let mut reader = SmaliReader::new(ReaderOptions::default().with_errors(ErrorMode::Ignore));
        let e = reader
            .visit(".class Lcom/A;\n.super Ljava/lang/Object;\n", &mut Failing)
            .unwrap_err();
        assert_eq!(e.kind, ErrorKind::Visitor);
    }
}
