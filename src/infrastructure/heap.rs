//! Heap runtime.
//!
//! A small dynamic object model: classes with superclasses and included
//! modules, modules, plain objects carrying named instance fields, and a few
//! immediate value kinds. Objects are never reclaimed, so an `ObjRef` stays a
//! valid identity for as long as the heap lives.

use crate::domain::object_importer::truncate_chars;
use crate::error::IntrospectError;
use crate::ports::{Archetype, Introspector, ObjectId};
use std::cell::RefCell;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjRef(usize);

impl ObjRef {
    pub fn index(&self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone)]
enum Payload {
    Plain,
    Class {
        name: String,
        superclass: Option<ObjRef>,
        includes: Vec<ObjRef>,
    },
    Module {
        name: String,
        includes: Vec<ObjRef>,
    },
    Int(i64),
    Float(f64),
    Str(String),
    Sym(String),
    Bool(bool),
    Nil,
    Array(Vec<ObjRef>),
    /// A value the runtime refuses to describe.
    Opaque(String),
}

#[derive(Debug, Clone)]
struct HeapObject {
    class: ObjRef,
    payload: Payload,
    ivars: Vec<(String, ObjRef)>,
}

/// Classes and modules every heap starts with.
#[derive(Debug, Clone, Copy)]
pub struct CoreClasses {
    pub basic_object: ObjRef,
    pub object: ObjRef,
    pub module: ObjRef,
    pub class: ObjRef,
    pub kernel: ObjRef,
    pub integer: ObjRef,
    pub float: ObjRef,
    pub string: ObjRef,
    pub symbol: ObjRef,
    pub nil_class: ObjRef,
    pub true_class: ObjRef,
    pub false_class: ObjRef,
    pub array: ObjRef,
}

pub struct Heap {
    objects: RefCell<Vec<HeapObject>>,
    core: CoreClasses,
    nil: ObjRef,
    true_value: ObjRef,
    false_value: ObjRef,
}

fn push(objects: &mut Vec<HeapObject>, class: ObjRef, payload: Payload) -> ObjRef {
    objects.push(HeapObject {
        class,
        payload,
        ivars: Vec::new(),
    });
    ObjRef(objects.len() - 1)
}

fn class_payload(name: &str, superclass: Option<ObjRef>) -> Payload {
    Payload::Class {
        name: name.to_string(),
        superclass,
        includes: Vec::new(),
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Heap {
    pub fn new() -> Self {
        let mut o = Vec::new();
        // Class is allocated fourth; every core class points at it up front.
        let class_ref = ObjRef(3);
        let basic_object = push(&mut o, class_ref, class_payload("BasicObject", None));
        let object = push(&mut o, class_ref, class_payload("Object", Some(basic_object)));
        let module = push(&mut o, class_ref, class_payload("Module", Some(object)));
        let class = push(&mut o, class_ref, class_payload("Class", Some(module)));
        let kernel = push(
            &mut o,
            module,
            Payload::Module {
                name: "Kernel".to_string(),
                includes: Vec::new(),
            },
        );
        if let Payload::Class { includes, .. } = &mut o[object.0].payload {
            includes.push(kernel);
        }
        let integer = push(&mut o, class, class_payload("Integer", Some(object)));
        let float = push(&mut o, class, class_payload("Float", Some(object)));
        let string = push(&mut o, class, class_payload("String", Some(object)));
        let symbol = push(&mut o, class, class_payload("Symbol", Some(object)));
        let nil_class = push(&mut o, class, class_payload("NilClass", Some(object)));
        let true_class = push(&mut o, class, class_payload("TrueClass", Some(object)));
        let false_class = push(&mut o, class, class_payload("FalseClass", Some(object)));
        let array = push(&mut o, class, class_payload("Array", Some(object)));

        let nil = push(&mut o, nil_class, Payload::Nil);
        let true_value = push(&mut o, true_class, Payload::Bool(true));
        let false_value = push(&mut o, false_class, Payload::Bool(false));

        Self {
            objects: RefCell::new(o),
            core: CoreClasses {
                basic_object,
                object,
                module,
                class,
                kernel,
                integer,
                float,
                string,
                symbol,
                nil_class,
                true_class,
                false_class,
                array,
            },
            nil,
            true_value,
            false_value,
        }
    }

    pub fn core(&self) -> &CoreClasses {
        &self.core
    }

    pub fn len(&self) -> usize {
        self.objects.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, obj: ObjRef) -> bool {
        obj.0 < self.len()
    }

    fn alloc(&self, class: ObjRef, payload: Payload) -> ObjRef {
        push(&mut self.objects.borrow_mut(), class, payload)
    }

    /// Defines a class; `None` inherits from `Object`.
    pub fn define_class(&self, name: &str, superclass: Option<ObjRef>) -> ObjRef {
        let superclass = superclass.unwrap_or(self.core.object);
        self.alloc(self.core.class, class_payload(name, Some(superclass)))
    }

    pub fn define_module(&self, name: &str) -> ObjRef {
        self.alloc(
            self.core.module,
            Payload::Module {
                name: name.to_string(),
                includes: Vec::new(),
            },
        )
    }

    /// Mixes `module` into a class or module. Other receivers are left untouched.
    pub fn include_module(&self, target: ObjRef, module: ObjRef) {
        let mut objects = self.objects.borrow_mut();
        match objects.get_mut(target.0).map(|o| &mut o.payload) {
            Some(Payload::Class { includes, .. }) | Some(Payload::Module { includes, .. }) => {
                if !includes.contains(&module) {
                    includes.push(module);
                }
            }
            _ => {}
        }
    }

    pub fn set_superclass(&self, class: ObjRef, superclass: Option<ObjRef>) {
        if let Some(Payload::Class { superclass: slot, .. }) =
            self.objects.borrow_mut().get_mut(class.0).map(|o| &mut o.payload)
        {
            *slot = superclass;
        }
    }

    pub fn new_object(&self, class: ObjRef) -> ObjRef {
        self.alloc(class, Payload::Plain)
    }

    /// An object whose representation and fields cannot be read.
    pub fn opaque(&self, class: ObjRef, description: &str) -> ObjRef {
        self.alloc(class, Payload::Opaque(description.to_string()))
    }

    pub fn int(&self, value: i64) -> ObjRef {
        self.alloc(self.core.integer, Payload::Int(value))
    }

    pub fn float(&self, value: f64) -> ObjRef {
        self.alloc(self.core.float, Payload::Float(value))
    }

    pub fn string(&self, value: &str) -> ObjRef {
        self.alloc(self.core.string, Payload::Str(value.to_string()))
    }

    pub fn symbol(&self, value: &str) -> ObjRef {
        self.alloc(self.core.symbol, Payload::Sym(value.to_string()))
    }

    pub fn array(&self, items: Vec<ObjRef>) -> ObjRef {
        self.alloc(self.core.array, Payload::Array(items))
    }

    /// Appends to an array. Other receivers are left untouched.
    pub fn push_item(&self, array: ObjRef, item: ObjRef) {
        if let Some(Payload::Array(items)) = self.objects.borrow_mut().get_mut(array.0).map(|o| &mut o.payload) {
            items.push(item);
        }
    }

    pub fn nil(&self) -> ObjRef {
        self.nil
    }

    pub fn boolean(&self, value: bool) -> ObjRef {
        if value {
            self.true_value
        } else {
            self.false_value
        }
    }

    /// Class of `obj`. References this heap never handed out report `BasicObject`.
    pub fn class_of(&self, obj: ObjRef) -> ObjRef {
        self.objects
            .borrow()
            .get(obj.0)
            .map_or(self.core.basic_object, |o| o.class)
    }

    pub fn set_class(&self, obj: ObjRef, class: ObjRef) {
        if let Some(entry) = self.objects.borrow_mut().get_mut(obj.0) {
            entry.class = class;
        }
    }

    pub fn set_ivar(&self, obj: ObjRef, name: &str, value: ObjRef) {
        let mut objects = self.objects.borrow_mut();
        let ivars = match objects.get_mut(obj.0) {
            Some(entry) => &mut entry.ivars,
            None => return,
        };
        match ivars.iter_mut().find(|(n, _)| n == name) {
            Some(slot) => slot.1 = value,
            None => ivars.push((name.to_string(), value)),
        }
    }

    pub fn ivar(&self, obj: ObjRef, name: &str) -> Option<ObjRef> {
        self.objects
            .borrow()
            .get(obj.0)?
            .ivars
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }

    /// Name of a class or module.
    pub fn name_of(&self, obj: ObjRef) -> Option<String> {
        match self.objects.borrow().get(obj.0).map(|o| &o.payload) {
            Some(Payload::Class { name, .. }) | Some(Payload::Module { name, .. }) => Some(name.clone()),
            _ => None,
        }
    }

    fn checked(&self, obj: ObjRef) -> Result<(), IntrospectError> {
        if self.contains(obj) {
            Ok(())
        } else {
            Err(IntrospectError::UnknownObject(obj.0 as u64))
        }
    }

    /// One-level description used for nested values, so cycles never recurse.
    fn short(&self, obj: ObjRef) -> String {
        let objects = self.objects.borrow();
        let entry = &objects[obj.0];
        match &entry.payload {
            Payload::Class { name, .. } | Payload::Module { name, .. } => name.clone(),
            Payload::Int(i) => i.to_string(),
            Payload::Float(f) => format!("{:?}", f),
            Payload::Str(s) => format!("{:?}", s),
            Payload::Sym(s) => format!(":{}", s),
            Payload::Bool(b) => b.to_string(),
            Payload::Nil => "nil".to_string(),
            Payload::Array(items) if items.is_empty() => "[]".to_string(),
            Payload::Array(_) => "[...]".to_string(),
            Payload::Plain | Payload::Opaque(_) => {
                let class_name = match &objects[entry.class.0].payload {
                    Payload::Class { name, .. } => name.clone(),
                    _ => "?".to_string(),
                };
                format!("#<{}:{:#018x}>", class_name, obj.0)
            }
        }
    }
}

impl Introspector for Heap {
    type Value = ObjRef;

    fn identity(&self, value: &ObjRef) -> ObjectId {
        ObjectId(value.0 as u64)
    }

    fn represent(&self, value: &ObjRef, max_len: usize) -> Result<String, IntrospectError> {
        self.checked(*value)?;
        let (payload, ivars) = {
            let objects = self.objects.borrow();
            let entry = &objects[value.0];
            (entry.payload.clone(), entry.ivars.clone())
        };
        let text = match payload {
            Payload::Opaque(description) => return Err(IntrospectError::Unsupported(description)),
            Payload::Array(items) => {
                let parts: Vec<String> = items.iter().map(|i| self.short(*i)).collect();
                format!("[{}]", parts.join(", "))
            }
            Payload::Plain if !ivars.is_empty() => {
                let head = self.short(*value);
                let fields: Vec<String> = ivars
                    .iter()
                    .map(|(name, v)| format!("{}={}", name, self.short(*v)))
                    .collect();
                format!("{} {}>", head.trim_end_matches('>'), fields.join(", "))
            }
            _ => self.short(*value),
        };
        Ok(truncate_chars(text, max_len))
    }

    fn type_of(&self, value: &ObjRef) -> ObjRef {
        self.class_of(*value)
    }

    fn archetype(&self, value: &ObjRef) -> Archetype {
        if !self.contains(*value) {
            return Archetype::Instance;
        }
        let class = self.class_of(*value);
        if class == self.core.class {
            Archetype::Class
        } else if class == self.core.module {
            Archetype::Module
        } else {
            Archetype::Instance
        }
    }

    fn superclass_of(&self, value: &ObjRef) -> Option<ObjRef> {
        match self.objects.borrow().get(value.0).map(|o| &o.payload) {
            Some(Payload::Class { superclass, .. }) => *superclass,
            _ => None,
        }
    }

    fn included_capabilities_of(&self, value: &ObjRef) -> Vec<ObjRef> {
        match self.objects.borrow().get(value.0).map(|o| &o.payload) {
            Some(Payload::Class { includes, .. }) | Some(Payload::Module { includes, .. }) => includes.clone(),
            _ => Vec::new(),
        }
    }

    fn instance_fields(&self, value: &ObjRef) -> Result<Vec<(String, ObjRef)>, IntrospectError> {
        self.checked(*value)?;
        let objects = self.objects.borrow();
        let entry = &objects[value.0];
        if let Payload::Opaque(description) = &entry.payload {
            return Err(IntrospectError::Unsupported(description.clone()));
        }
        Ok(entry.ivars.clone())
    }
}
