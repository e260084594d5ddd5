//! Smali writer
//!
//! `SmaliWriter` implements `ClassVisitor` and regenerates canonical smali from the calls
//! it receives. The field, method and annotation writers it hands out borrow its
//! `CodeCache`, so all output lands in one buffer in call order.
//!
use crate::error::SmaliError;
use crate::smali_value::{escape, SmaliValue};
use crate::types::{method_descriptor, AccessType, AnnotationVisibility, Type};
use crate::visitor::{
    child_slot, AnnotationVisitor, AnyVisitor, Capability, ClassVisitor, DelegateSlot, FieldVisitor, MethodVisitor,
    VisitResult, VisitorBase,
};

const INDENT: &str = "    ";

/// Append-only line buffer shared by a writer and its children
///
/// The last line stays open until the next one starts, so an end of line comment can
/// still be appended to it.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CodeCache {
    buffer: String,
    line_open: bool,
}

impl CodeCache {
    pub fn new() -> CodeCache {
        CodeCache::default()
    }

    fn close_line(&mut self) {
        if self.line_open {
            self.buffer.push('\n');
            self.line_open = false;
        }
    }

    /// Starts a new line at the given nesting level
    pub fn line(&mut self, indent: usize, text: &str) {
        self.close_line();
        self.buffer.push_str(&INDENT.repeat(indent));
        self.buffer.push_str(text);
        self.line_open = true;
    }

    /// Appends ` # text` to the open line, or writes the comment on its own line
    pub fn eol_comment(&mut self, indent: usize, text: &str) {
        if self.line_open {
            self.buffer.push(' ');
            self.buffer.push_str(&comment_text(text));
        } else {
            self.line(indent, &comment_text(text));
        }
    }

    pub fn blank(&mut self) {
        self.close_line();
        self.buffer.push('\n');
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Everything written so far, the last line terminated
    pub fn contents(&self) -> String {
        let mut out = self.buffer.clone();
        if self.line_open {
            out.push('\n');
        }
        out
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.line_open = false;
    }
}

fn comment_text(text: &str) -> String {
    if text.is_empty() {
        "#".to_string()
    } else {
        format!("# {}", text)
    }
}

/// Space-joins a directive, its flags (if any) and the rest of the line
fn directive_line(directive: &str, access: AccessType, rest: &str) -> String {
    let mut out = directive.to_string();
    if !access.is_empty() {
        out.push(' ');
        out.push_str(&access.render());
    }
    out.push(' ');
    out.push_str(rest);
    out
}

fn annotation_line(directive: &str, visibility: AnnotationVisibility, annotation_type: &Type) -> String {
    format!("{} {} {}", directive, visibility.to_str(), annotation_type)
}

/// Writes `prefix value suffix`, continuing multi-line encodings at the same indent
fn write_value(cache: &mut CodeCache, indent: usize, prefix: &str, value: &SmaliValue, suffix: &str) {
    let encoded = value.encode();
    let mut lines = encoded.lines().peekable();
    let mut first = true;
    while let Some(l) = lines.next() {
        let mut text = if first { format!("{}{}", prefix, l) } else { l.to_string() };
        if lines.peek().is_none() {
            text.push_str(suffix);
        }
        cache.line(indent, &text);
        first = false;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Last {
    Nothing,
    Header,
    Member,
    Comment,
}

/// Writer for a whole class
///
/// # Examples
///
/// ```
///  use smali_visitor::smali_write::SmaliWriter;
///  use smali_visitor::types::{AccessType, Type};
///  use smali_visitor::visitor::{ClassVisitor, VisitorBase};
///
///  let mut w = SmaliWriter::new();
///  w.visit_class(&Type::object("com/example/A"), AccessType::PUBLIC).unwrap();
///  w.visit_super(&Type::object("java/lang/Object")).unwrap();
///  w.visit_end().unwrap();
///  assert_eq!(w.code(), ".class public Lcom/example/A;\n.super Ljava/lang/Object;\n");
/// ```
#[derive(Debug)]
pub struct SmaliWriter<'a> {
    cache: CodeCache,
    delegate: DelegateSlot<'a>,
    last: Last,
}

impl<'a> Default for SmaliWriter<'a> {
    fn default() -> Self {
        SmaliWriter::new()
    }
}

impl<'a> SmaliWriter<'a> {
    pub fn new() -> SmaliWriter<'a> {
        SmaliWriter {
            cache: CodeCache::new(),
            delegate: DelegateSlot::new(Capability::Class),
            last: Last::Nothing,
        }
    }

    /// Forwards every call this writer receives to `delegate`, after writing it
    pub fn set_delegate(&mut self, delegate: AnyVisitor<'a>) -> Result<(), SmaliError> {
        self.delegate.assign(delegate)
    }

    /// Snapshot of the code written so far
    pub fn code(&self) -> String {
        self.cache.contents()
    }

    /// Clears the buffer and layout state, the delegate is kept
    pub fn reset(&mut self) {
        self.cache.reset();
        self.last = Last::Nothing;
    }

    /* One blank line between the header or a member and whatever top-level item follows */
    fn separate(&mut self) {
        if matches!(self.last, Last::Header | Last::Member) {
            self.cache.blank();
        }
    }

    fn header(&mut self, text: &str) {
        self.cache.line(0, text);
        self.last = Last::Header;
    }

    fn member(&mut self, text: &str) {
        self.separate();
        self.cache.line(0, text);
        self.last = Last::Member;
    }
}

impl<'a> VisitorBase for SmaliWriter<'a> {
    fn visit_comment(&mut self, text: &str) -> VisitResult {
        self.separate();
        self.cache.line(0, &comment_text(text));
        self.last = Last::Comment;
        self.delegate.visit_comment(text)
    }

    fn visit_eol_comment(&mut self, text: &str) -> VisitResult {
        self.cache.eol_comment(0, text);
        self.delegate.visit_eol_comment(text)
    }

    fn visit_end(&mut self) -> VisitResult {
        self.delegate.visit_end()
    }
}

impl<'a> ClassVisitor for SmaliWriter<'a> {
    fn visit_class(&mut self, class_type: &Type, access: AccessType) -> VisitResult {
        self.header(&directive_line(".class", access, &class_type.descriptor()));
        match self.delegate.class() {
            Some(d) => d.visit_class(class_type, access),
            None => Ok(()),
        }
    }

    fn visit_super(&mut self, super_type: &Type) -> VisitResult {
        self.header(&format!(".super {}", super_type));
        match self.delegate.class() {
            Some(d) => d.visit_super(super_type),
            None => Ok(()),
        }
    }

    fn visit_implements(&mut self, interface: &Type) -> VisitResult {
        self.header(&format!(".implements {}", interface));
        match self.delegate.class() {
            Some(d) => d.visit_implements(interface),
            None => Ok(()),
        }
    }

    fn visit_source(&mut self, source: &str) -> VisitResult {
        self.header(&format!(".source \"{}\"", escape(source)));
        match self.delegate.class() {
            Some(d) => d.visit_source(source),
            None => Ok(()),
        }
    }

    fn visit_field(
        &mut self,
        name: &str,
        access: AccessType,
        field_type: &Type,
        value: Option<&SmaliValue>,
    ) -> Result<Option<Box<dyn FieldVisitor + '_>>, SmaliError> {
        let mut declaration = format!("{}:{}", name, field_type);
        if let Some(v) = value {
            declaration.push_str(" = ");
            declaration.push_str(&v.encode());
        }
        self.member(&directive_line(".field", access, &declaration));

        let child = match self.delegate.class() {
            Some(d) => d.visit_field(name, access, field_type, value)?.map(AnyVisitor::Field),
            None => None,
        };
        let delegate = child_slot(Capability::Field, child)?;
        Ok(Some(Box::new(FieldWriter {
            cache: &mut self.cache,
            delegate,
            annotated: false,
        })))
    }

    fn visit_method(
        &mut self,
        name: &str,
        access: AccessType,
        params: &[Type],
        return_type: &Type,
    ) -> Result<Option<Box<dyn MethodVisitor + '_>>, SmaliError> {
        let declaration = format!("{}{}", name, method_descriptor(params, return_type));
        self.member(&directive_line(".method", access, &declaration));

        let child = match self.delegate.class() {
            Some(d) => d.visit_method(name, access, params, return_type)?.map(AnyVisitor::Method),
            None => None,
        };
        let delegate = child_slot(Capability::Method, child)?;
        Ok(Some(Box::new(MethodWriter {
            cache: &mut self.cache,
            delegate,
            param_open: false,
        })))
    }

    fn visit_annotation(
        &mut self,
        visibility: AnnotationVisibility,
        annotation_type: &Type,
    ) -> Result<Option<Box<dyn AnnotationVisitor + '_>>, SmaliError> {
        self.member(&annotation_line(".annotation", visibility, annotation_type));

        let child = match self.delegate.class() {
            Some(d) => d.visit_annotation(visibility, annotation_type)?.map(AnyVisitor::Annotation),
            None => None,
        };
        let delegate = child_slot(Capability::Annotation, child)?;
        Ok(Some(Box::new(AnnotationWriter::new(&mut self.cache, 0, ".end annotation", delegate))))
    }
}

/// Writes field annotations, `.end field` only when there were any
pub struct FieldWriter<'c> {
    cache: &'c mut CodeCache,
    delegate: DelegateSlot<'c>,
    annotated: bool,
}

impl<'c> VisitorBase for FieldWriter<'c> {
    fn visit_comment(&mut self, text: &str) -> VisitResult {
        self.cache.line(1, &comment_text(text));
        self.delegate.visit_comment(text)
    }

    fn visit_eol_comment(&mut self, text: &str) -> VisitResult {
        self.cache.eol_comment(1, text);
        self.delegate.visit_eol_comment(text)
    }

    fn visit_end(&mut self) -> VisitResult {
        if self.annotated {
            self.cache.line(0, ".end field");
        }
        self.delegate.visit_end()
    }
}

impl<'c> FieldVisitor for FieldWriter<'c> {
    fn visit_annotation(
        &mut self,
        visibility: AnnotationVisibility,
        annotation_type: &Type,
    ) -> Result<Option<Box<dyn AnnotationVisitor + '_>>, SmaliError> {
        self.annotated = true;
        self.cache.line(1, &annotation_line(".annotation", visibility, annotation_type));

        let child = match self.delegate.field() {
            Some(d) => d.visit_annotation(visibility, annotation_type)?.map(AnyVisitor::Annotation),
            None => None,
        };
        let delegate = child_slot(Capability::Annotation, child)?;
        Ok(Some(Box::new(AnnotationWriter::new(self.cache, 1, ".end annotation", delegate))))
    }
}

/// Writes a method body, one directive or instruction per line
pub struct MethodWriter<'c> {
    cache: &'c mut CodeCache,
    delegate: DelegateSlot<'c>,
    param_open: bool,
}

impl<'c> MethodWriter<'c> {
    fn body(&mut self, text: &str) {
        self.param_open = false;
        self.cache.line(1, text);
    }
}

impl<'c> VisitorBase for MethodWriter<'c> {
    fn visit_comment(&mut self, text: &str) -> VisitResult {
        self.cache.line(1, &comment_text(text));
        self.delegate.visit_comment(text)
    }

    fn visit_eol_comment(&mut self, text: &str) -> VisitResult {
        self.cache.eol_comment(1, text);
        self.delegate.visit_eol_comment(text)
    }

    fn visit_end(&mut self) -> VisitResult {
        self.param_open = false;
        self.cache.line(0, ".end method");
        self.delegate.visit_end()
    }
}

impl<'c> MethodVisitor for MethodWriter<'c> {
    fn visit_registers(&mut self, count: u32) -> VisitResult {
        self.body(&format!(".registers {}", count));
        match self.delegate.method() {
            Some(d) => d.visit_registers(count),
            None => Ok(()),
        }
    }

    fn visit_locals(&mut self, count: u32) -> VisitResult {
        self.body(&format!(".locals {}", count));
        match self.delegate.method() {
            Some(d) => d.visit_locals(count),
            None => Ok(()),
        }
    }

    fn visit_param(&mut self, register: &str, name: Option<&str>) -> VisitResult {
        match name {
            Some(n) => self.body(&format!(".param {}, \"{}\"", register, escape(n))),
            None => self.body(&format!(".param {}", register)),
        }
        self.param_open = true;
        match self.delegate.method() {
            Some(d) => d.visit_param(register, name),
            None => Ok(()),
        }
    }

    fn visit_param_end(&mut self) -> VisitResult {
        self.body(".end param");
        match self.delegate.method() {
            Some(d) => d.visit_param_end(),
            None => Ok(()),
        }
    }

    fn visit_line(&mut self, line: u32) -> VisitResult {
        self.body(&format!(".line {}", line));
        match self.delegate.method() {
            Some(d) => d.visit_line(line),
            None => Ok(()),
        }
    }

    fn visit_label(&mut self, label: &str) -> VisitResult {
        self.body(&format!(":{}", label));
        match self.delegate.method() {
            Some(d) => d.visit_label(label),
            None => Ok(()),
        }
    }

    fn visit_catch(&mut self, exception: &Type, start: &str, end: &str, handler: &str) -> VisitResult {
        self.body(&format!(".catch {} {{:{} .. :{}}} :{}", exception, start, end, handler));
        match self.delegate.method() {
            Some(d) => d.visit_catch(exception, start, end, handler),
            None => Ok(()),
        }
    }

    fn visit_catchall(&mut self, start: &str, end: &str, handler: &str) -> VisitResult {
        self.body(&format!(".catchall {{:{} .. :{}}} :{}", start, end, handler));
        match self.delegate.method() {
            Some(d) => d.visit_catchall(start, end, handler),
            None => Ok(()),
        }
    }

    fn visit_local(
        &mut self,
        register: &str,
        name: Option<&str>,
        local_type: Option<&Type>,
        signature: Option<&str>,
    ) -> VisitResult {
        let mut text = format!(".local {}", register);
        if name.is_some() || local_type.is_some() {
            match name {
                Some(n) => text.push_str(&format!(", \"{}\"", escape(n))),
                None => text.push_str(", null"),
            }
            if let Some(t) = local_type {
                text.push_str(&format!(":{}", t));
            }
        }
        if let Some(sig) = signature {
            text.push_str(&format!(", \"{}\"", escape(sig)));
        }
        self.body(&text);
        match self.delegate.method() {
            Some(d) => d.visit_local(register, name, local_type, signature),
            None => Ok(()),
        }
    }

    fn visit_end_local(&mut self, register: &str) -> VisitResult {
        self.body(&format!(".end local {}", register));
        match self.delegate.method() {
            Some(d) => d.visit_end_local(register),
            None => Ok(()),
        }
    }

    fn visit_restart_local(&mut self, register: &str) -> VisitResult {
        self.body(&format!(".restart local {}", register));
        match self.delegate.method() {
            Some(d) => d.visit_restart_local(register),
            None => Ok(()),
        }
    }

    fn visit_prologue(&mut self) -> VisitResult {
        self.body(".prologue");
        match self.delegate.method() {
            Some(d) => d.visit_prologue(),
            None => Ok(()),
        }
    }

    fn visit_epilogue(&mut self) -> VisitResult {
        self.body(".epilogue");
        match self.delegate.method() {
            Some(d) => d.visit_epilogue(),
            None => Ok(()),
        }
    }

    fn visit_instruction(&mut self, text: &str) -> VisitResult {
        self.body(text);
        match self.delegate.method() {
            Some(d) => d.visit_instruction(text),
            None => Ok(()),
        }
    }

    fn visit_annotation(
        &mut self,
        visibility: AnnotationVisibility,
        annotation_type: &Type,
    ) -> Result<Option<Box<dyn AnnotationVisitor + '_>>, SmaliError> {
        // parameter annotations nest one level deeper
        let indent = if self.param_open { 2 } else { 1 };
        self.cache.line(indent, &annotation_line(".annotation", visibility, annotation_type));

        let child = match self.delegate.method() {
            Some(d) => d.visit_annotation(visibility, annotation_type)?.map(AnyVisitor::Annotation),
            None => None,
        };
        let delegate = child_slot(Capability::Annotation, child)?;
        Ok(Some(Box::new(AnnotationWriter::new(self.cache, indent, ".end annotation", delegate))))
    }
}

/// Writes annotation elements, also used for sub-annotations
pub struct AnnotationWriter<'c> {
    cache: &'c mut CodeCache,
    indent: usize,
    end: &'static str,
    delegate: DelegateSlot<'c>,
}

impl<'c> AnnotationWriter<'c> {
    fn new(cache: &'c mut CodeCache, indent: usize, end: &'static str, delegate: DelegateSlot<'c>) -> Self {
        AnnotationWriter {
            cache,
            indent,
            end,
            delegate,
        }
    }
}

impl<'c> VisitorBase for AnnotationWriter<'c> {
    fn visit_comment(&mut self, text: &str) -> VisitResult {
        self.cache.line(self.indent + 1, &comment_text(text));
        self.delegate.visit_comment(text)
    }

    fn visit_eol_comment(&mut self, text: &str) -> VisitResult {
        self.cache.eol_comment(self.indent + 1, text);
        self.delegate.visit_eol_comment(text)
    }

    fn visit_end(&mut self) -> VisitResult {
        self.cache.line(self.indent, self.end);
        self.delegate.visit_end()
    }
}

impl<'c> AnnotationVisitor for AnnotationWriter<'c> {
    fn visit_value(&mut self, name: &str, value: &SmaliValue) -> VisitResult {
        let indent = self.indent + 1;
        match value {
            SmaliValue::Array(values) if !values.is_empty() => {
                self.cache.line(indent, &format!("{} = {{", name));
                for (i, v) in values.iter().enumerate() {
                    let comma = if i + 1 < values.len() { "," } else { "" };
                    write_value(self.cache, indent + 1, "", v, comma);
                }
                self.cache.line(indent, "}");
            }
            _ => write_value(self.cache, indent, &format!("{} = ", name), value, ""),
        }
        match self.delegate.annotation() {
            Some(d) => d.visit_value(name, value),
            None => Ok(()),
        }
    }

    fn visit_subannotation(
        &mut self,
        name: &str,
        annotation_type: &Type,
    ) -> Result<Option<Box<dyn AnnotationVisitor + '_>>, SmaliError> {
        let indent = self.indent + 1;
        self.cache.line(indent, &format!("{} = .subannotation {}", name, annotation_type));

        let child = match self.delegate.annotation() {
            Some(d) => d.visit_subannotation(name, annotation_type)?.map(AnyVisitor::Annotation),
            None => None,
        };
        let delegate = child_slot(Capability::Annotation, child)?;
        Ok(Some(Box::new(AnnotationWriter::new(self.cache, indent, ".end subannotation", delegate))))
    }
}
