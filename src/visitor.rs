//! Visitor traits driven by `SmaliReader`
//!
//! Every callback has a no-op default, so implementors only override what they need.
//! Methods that open a nested scope return an optional child visitor which borrows the
//! parent; returning `None` makes the reader skip the scope without further calls.
//!
//! A visitor can chain a delegate of the same capability through a `DelegateSlot`.
//!
use std::fmt;

use crate::error::SmaliError;
use crate::smali_value::SmaliValue;
use crate::types::{AccessType, AnnotationVisibility, Type};

pub type VisitResult = Result<(), SmaliError>;

/// Callbacks shared by all visitors
pub trait VisitorBase {
    /// A whole-line comment, only called when the reader has comments enabled
    fn visit_comment(&mut self, _text: &str) -> VisitResult {
        Ok(())
    }

    /// A comment trailing the line that opened or closed this visitor's scope
    fn visit_eol_comment(&mut self, _text: &str) -> VisitResult {
        Ok(())
    }

    /// Called exactly once when the scope closes
    fn visit_end(&mut self) -> VisitResult {
        Ok(())
    }
}

pub trait ClassVisitor: VisitorBase {
    fn visit_class(&mut self, _class_type: &Type, _access: AccessType) -> VisitResult {
        Ok(())
    }

    fn visit_super(&mut self, _super_type: &Type) -> VisitResult {
        Ok(())
    }

    fn visit_implements(&mut self, _interface: &Type) -> VisitResult {
        Ok(())
    }

    fn visit_source(&mut self, _source: &str) -> VisitResult {
        Ok(())
    }

    fn visit_field(
        &mut self,
        _name: &str,
        _access: AccessType,
        _field_type: &Type,
        _value: Option<&SmaliValue>,
    ) -> Result<Option<Box<dyn FieldVisitor + '_>>, SmaliError> {
        Ok(None)
    }

    fn visit_method(
        &mut self,
        _name: &str,
        _access: AccessType,
        _params: &[Type],
        _return_type: &Type,
    ) -> Result<Option<Box<dyn MethodVisitor + '_>>, SmaliError> {
        Ok(None)
    }

    fn visit_annotation(
        &mut self,
        _visibility: AnnotationVisibility,
        _annotation_type: &Type,
    ) -> Result<Option<Box<dyn AnnotationVisitor + '_>>, SmaliError> {
        Ok(None)
    }
}

pub trait FieldVisitor: VisitorBase {
    fn visit_annotation(
        &mut self,
        _visibility: AnnotationVisibility,
        _annotation_type: &Type,
    ) -> Result<Option<Box<dyn AnnotationVisitor + '_>>, SmaliError> {
        Ok(None)
    }
}

pub trait MethodVisitor: VisitorBase {
    fn visit_registers(&mut self, _count: u32) -> VisitResult {
        Ok(())
    }

    fn visit_locals(&mut self, _count: u32) -> VisitResult {
        Ok(())
    }

    /// `.param p1, "name"`, annotations until `visit_param_end` belong to this parameter
    fn visit_param(&mut self, _register: &str, _name: Option<&str>) -> VisitResult {
        Ok(())
    }

    fn visit_param_end(&mut self) -> VisitResult {
        Ok(())
    }

    fn visit_line(&mut self, _line: u32) -> VisitResult {
        Ok(())
    }

    /// Label name without the leading ':'
    fn visit_label(&mut self, _label: &str) -> VisitResult {
        Ok(())
    }

    /// `.catch <exception> {:start .. :end} :handler`, labels without the leading ':'
    fn visit_catch(&mut self, _exception: &Type, _start: &str, _end: &str, _handler: &str) -> VisitResult {
        Ok(())
    }

    /// `.catchall {:start .. :end} :handler`
    fn visit_catchall(&mut self, _start: &str, _end: &str, _handler: &str) -> VisitResult {
        Ok(())
    }

    /// Debug information for a local variable, `.local v0, "name":Type[, "signature"]`.
    /// A bare `.local v0` has neither name nor type.
    fn visit_local(
        &mut self,
        _register: &str,
        _name: Option<&str>,
        _local_type: Option<&Type>,
        _signature: Option<&str>,
    ) -> VisitResult {
        Ok(())
    }

    fn visit_end_local(&mut self, _register: &str) -> VisitResult {
        Ok(())
    }

    fn visit_restart_local(&mut self, _register: &str) -> VisitResult {
        Ok(())
    }

    fn visit_prologue(&mut self) -> VisitResult {
        Ok(())
    }

    fn visit_epilogue(&mut self) -> VisitResult {
        Ok(())
    }

    /// Any other line of the method body, kept as written
    fn visit_instruction(&mut self, _text: &str) -> VisitResult {
        Ok(())
    }

    fn visit_annotation(
        &mut self,
        _visibility: AnnotationVisibility,
        _annotation_type: &Type,
    ) -> Result<Option<Box<dyn AnnotationVisitor + '_>>, SmaliError> {
        Ok(None)
    }
}

pub trait AnnotationVisitor: VisitorBase {
    fn visit_value(&mut self, _name: &str, _value: &SmaliValue) -> VisitResult {
        Ok(())
    }

    fn visit_subannotation(
        &mut self,
        _name: &str,
        _annotation_type: &Type,
    ) -> Result<Option<Box<dyn AnnotationVisitor + '_>>, SmaliError> {
        Ok(None)
    }
}

impl<T: VisitorBase + ?Sized> VisitorBase for &mut T {
    fn visit_comment(&mut self, text: &str) -> VisitResult {
        (**self).visit_comment(text)
    }

    fn visit_eol_comment(&mut self, text: &str) -> VisitResult {
        (**self).visit_eol_comment(text)
    }

    fn visit_end(&mut self) -> VisitResult {
        (**self).visit_end()
    }
}

impl<T: ClassVisitor + ?Sized> ClassVisitor for &mut T {
    fn visit_class(&mut self, class_type: &Type, access: AccessType) -> VisitResult {
        (**self).visit_class(class_type, access)
    }

    fn visit_super(&mut self, super_type: &Type) -> VisitResult {
        (**self).visit_super(super_type)
    }

    fn visit_implements(&mut self, interface: &Type) -> VisitResult {
        (**self).visit_implements(interface)
    }

    fn visit_source(&mut self, source: &str) -> VisitResult {
        (**self).visit_source(source)
    }

    fn visit_field(
        &mut self,
        name: &str,
        access: AccessType,
        field_type: &Type,
        value: Option<&SmaliValue>,
    ) -> Result<Option<Box<dyn FieldVisitor + '_>>, SmaliError> {
        (**self).visit_field(name, access, field_type, value)
    }

    fn visit_method(
        &mut self,
        name: &str,
        access: AccessType,
        params: &[Type],
        return_type: &Type,
    ) -> Result<Option<Box<dyn MethodVisitor + '_>>, SmaliError> {
        (**self).visit_method(name, access, params, return_type)
    }

    fn visit_annotation(
        &mut self,
        visibility: AnnotationVisibility,
        annotation_type: &Type,
    ) -> Result<Option<Box<dyn AnnotationVisitor + '_>>, SmaliError> {
        (**self).visit_annotation(visibility, annotation_type)
    }
}

impl<T: FieldVisitor + ?Sized> FieldVisitor for &mut T {
    fn visit_annotation(
        &mut self,
        visibility: AnnotationVisibility,
        annotation_type: &Type,
    ) -> Result<Option<Box<dyn AnnotationVisitor + '_>>, SmaliError> {
        (**self).visit_annotation(visibility, annotation_type)
    }
}

impl<T: MethodVisitor + ?Sized> MethodVisitor for &mut T {
    fn visit_registers(&mut self, count: u32) -> VisitResult {
        (**self).visit_registers(count)
    }

    fn visit_locals(&mut self, count: u32) -> VisitResult {
        (**self).visit_locals(count)
    }

    fn visit_param(&mut self, register: &str, name: Option<&str>) -> VisitResult {
        (**self).visit_param(register, name)
    }

    fn visit_param_end(&mut self) -> VisitResult {
        (**self).visit_param_end()
    }

    fn visit_line(&mut self, line: u32) -> VisitResult {
        (**self).visit_line(line)
    }

    fn visit_label(&mut self, label: &str) -> VisitResult {
        (**self).visit_label(label)
    }

    fn visit_catch(&mut self, exception: &Type, start: &str, end: &str, handler: &str) -> VisitResult {
        (**self).visit_catch(exception, start, end, handler)
    }

    fn visit_catchall(&mut self, start: &str, end: &str, handler: &str) -> VisitResult {
        (**self).visit_catchall(start, end, handler)
    }

    fn visit_local(
        &mut self,
        register: &str,
        name: Option<&str>,
        local_type: Option<&Type>,
        signature: Option<&str>,
    ) -> VisitResult {
        (**self).visit_local(register, name, local_type, signature)
    }

    fn visit_end_local(&mut self, register: &str) -> VisitResult {
        (**self).visit_end_local(register)
    }

    fn visit_restart_local(&mut self, register: &str) -> VisitResult {
        (**self).visit_restart_local(register)
    }

    fn visit_prologue(&mut self) -> VisitResult {
        (**self).visit_prologue()
    }

    fn visit_epilogue(&mut self) -> VisitResult {
        (**self).visit_epilogue()
    }

    fn visit_instruction(&mut self, text: &str) -> VisitResult {
        (**self).visit_instruction(text)
    }

    fn visit_annotation(
        &mut self,
        visibility: AnnotationVisibility,
        annotation_type: &Type,
    ) -> Result<Option<Box<dyn AnnotationVisitor + '_>>, SmaliError> {
        (**self).visit_annotation(visibility, annotation_type)
    }
}

impl<T: AnnotationVisitor + ?Sized> AnnotationVisitor for &mut T {
    fn visit_value(&mut self, name: &str, value: &SmaliValue) -> VisitResult {
        (**self).visit_value(name, value)
    }

    fn visit_subannotation(
        &mut self,
        name: &str,
        annotation_type: &Type,
    ) -> Result<Option<Box<dyn AnnotationVisitor + '_>>, SmaliError> {
        (**self).visit_subannotation(name, annotation_type)
    }
}

/// Visitor that accepts every event and returns no children
#[derive(Debug, Default, Clone, Copy)]
pub struct Discard;

impl VisitorBase for Discard {}
impl ClassVisitor for Discard {}
impl FieldVisitor for Discard {}
impl MethodVisitor for Discard {}
impl AnnotationVisitor for Discard {}

/// The callback set a visitor implements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Class,
    Field,
    Method,
    Annotation,
}

impl Capability {
    pub fn to_str(&self) -> &str {
        match self {
            Capability::Class => "class",
            Capability::Field => "field",
            Capability::Method => "method",
            Capability::Annotation => "annotation",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_str())
    }
}

/// A boxed visitor of any capability
pub enum AnyVisitor<'a> {
    Class(Box<dyn ClassVisitor + 'a>),
    Field(Box<dyn FieldVisitor + 'a>),
    Method(Box<dyn MethodVisitor + 'a>),
    Annotation(Box<dyn AnnotationVisitor + 'a>),
}

impl<'a> AnyVisitor<'a> {
    pub fn capability(&self) -> Capability {
        match self {
            AnyVisitor::Class(_) => Capability::Class,
            AnyVisitor::Field(_) => Capability::Field,
            AnyVisitor::Method(_) => Capability::Method,
            AnyVisitor::Annotation(_) => Capability::Annotation,
        }
    }
}

impl<'a> fmt::Debug for AnyVisitor<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "AnyVisitor::{}", self.capability())
    }
}

macro_rules! dispatch_base {
    ($any:expr, $v:ident => $call:expr) => {
        match $any {
            AnyVisitor::Class($v) => $call,
            AnyVisitor::Field($v) => $call,
            AnyVisitor::Method($v) => $call,
            AnyVisitor::Annotation($v) => $call,
        }
    };
}

/* Shared callbacks, routed to whichever visitor the enum holds */
impl<'a> AnyVisitor<'a> {
    pub fn visit_comment(&mut self, text: &str) -> VisitResult {
        dispatch_base!(self, v => (**v).visit_comment(text))
    }

    pub fn visit_eol_comment(&mut self, text: &str) -> VisitResult {
        dispatch_base!(self, v => (**v).visit_eol_comment(text))
    }

    pub fn visit_end(&mut self) -> VisitResult {
        dispatch_base!(self, v => (**v).visit_end())
    }
}

/// Holds at most one delegate, which must match the holder's capability
///
/// # Examples
///
/// ```
///  use smali_visitor::visitor::{AnyVisitor, Capability, DelegateSlot, Discard};
///
///  let mut slot = DelegateSlot::new(Capability::Method);
///  assert!(slot.assign(AnyVisitor::Field(Box::new(Discard))).is_err());
///  assert!(slot.assign(AnyVisitor::Method(Box::new(Discard))).is_ok());
///  assert!(slot.method().is_some());
/// ```
#[derive(Debug)]
pub struct DelegateSlot<'a> {
    capability: Capability,
    delegate: Option<AnyVisitor<'a>>,
}

impl<'a> DelegateSlot<'a> {
    pub fn new(capability: Capability) -> DelegateSlot<'a> {
        DelegateSlot {
            capability,
            delegate: None,
        }
    }

    pub fn capability(&self) -> Capability {
        self.capability
    }

    pub fn is_set(&self) -> bool {
        self.delegate.is_some()
    }

    /// Replaces the delegate, failing without change when the capability differs
    pub fn assign(&mut self, delegate: AnyVisitor<'a>) -> Result<(), SmaliError> {
        if delegate.capability() != self.capability {
            fail!(
                CapabilityMismatch,
                "cannot delegate a {} visitor to a {} visitor",
                self.capability,
                delegate.capability()
            );
        }
        self.delegate = Some(delegate);
        Ok(())
    }

    pub fn clear(&mut self) -> Option<AnyVisitor<'a>> {
        self.delegate.take()
    }

    pub fn class(&mut self) -> Option<&mut (dyn ClassVisitor + 'a)> {
        match self.delegate.as_mut() {
            Some(AnyVisitor::Class(v)) => Some(v.as_mut()),
            _ => None,
        }
    }

    pub fn field(&mut self) -> Option<&mut (dyn FieldVisitor + 'a)> {
        match self.delegate.as_mut() {
            Some(AnyVisitor::Field(v)) => Some(v.as_mut()),
            _ => None,
        }
    }

    pub fn method(&mut self) -> Option<&mut (dyn MethodVisitor + 'a)> {
        match self.delegate.as_mut() {
            Some(AnyVisitor::Method(v)) => Some(v.as_mut()),
            _ => None,
        }
    }

    pub fn annotation(&mut self) -> Option<&mut (dyn AnnotationVisitor + 'a)> {
        match self.delegate.as_mut() {
            Some(AnyVisitor::Annotation(v)) => Some(v.as_mut()),
            _ => None,
        }
    }

    pub fn visit_comment(&mut self, text: &str) -> VisitResult {
        match self.delegate.as_mut() {
            Some(d) => d.visit_comment(text),
            None => Ok(()),
        }
    }

    pub fn visit_eol_comment(&mut self, text: &str) -> VisitResult {
        match self.delegate.as_mut() {
            Some(d) => d.visit_eol_comment(text),
            None => Ok(()),
        }
    }

    pub fn visit_end(&mut self) -> VisitResult {
        match self.delegate.as_mut() {
            Some(d) => d.visit_end(),
            None => Ok(()),
        }
    }
}

/// Slot for a child visitor, pre-filled with the delegate's own child if it returned one
pub fn child_slot<'a>(capability: Capability, child: Option<AnyVisitor<'a>>) -> Result<DelegateSlot<'a>, SmaliError> {
    let mut slot = DelegateSlot::new(capability);
    if let Some(child) = child {
        slot.assign(child)?;
    }
    Ok(slot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    struct Counter<'c> {
        ends: &'c mut u32,
    }

    impl<'c> VisitorBase for Counter<'c> {
        fn visit_end(&mut self) -> VisitResult {
            *self.ends += 1;
            Ok(())
        }
    }

    impl<'c> AnnotationVisitor for Counter<'c> {}

    #[test]
    fn mismatch_is_rejected() {
        let mut slot = DelegateSlot::new(Capability::Class);
        let e = slot.assign(AnyVisitor::Annotation(Box::new(Discard))).unwrap_err();
        assert_eq!(e.kind, ErrorKind::CapabilityMismatch);
        assert!(!slot.is_set());
        assert!(slot.class().is_none());
    }

    #[test]
    fn forwards_base_callbacks() {
        let mut ends = 0;
        {
            let mut slot = DelegateSlot::new(Capability::Annotation);
            slot.assign(AnyVisitor::Annotation(Box::new(Counter { ends: &mut ends }))).unwrap();
            slot.visit_end().unwrap();
            slot.visit_comment("ignored").unwrap();
            assert!(slot.annotation().is_some());
            assert!(slot.field().is_none());
        }
        assert_eq!(ends, 1);
    }

    #[test]
    fn empty_slot_is_a_no_op() {
        let mut slot = DelegateSlot::new(Capability::Field);
        assert!(slot.visit_end().is_ok());
        assert!(slot.clear().is_none());
    }

    #[test]
    fn child_slot_checks_capability() {
        assert!(child_slot(Capability::Method, Some(AnyVisitor::Method(Box::new(Discard)))).is_ok());
        assert!(child_slot(Capability::Method, None).is_ok());
        assert!(child_slot(Capability::Method, Some(AnyVisitor::Class(Box::new(Discard)))).is_err());
    }

    #[test]
    fn discard_returns_no_children() {
        let mut d = Discard;
        let t = Type::object("a/B");
        assert!(ClassVisitor::visit_annotation(&mut d, AnnotationVisibility::Runtime, &t).unwrap().is_none());
        assert!(d.visit_method("m", AccessType::PUBLIC, &[], &Type::Void).unwrap().is_none());
    }
}
