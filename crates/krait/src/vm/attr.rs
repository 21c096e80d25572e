//! Attribute access: the generic lookup algorithm, stores and deletes, and
//! the `LoadMethod` fast path.
//!
//! Generic `getattr(obj, name)`:
//! 1. look `name` up along `type(obj)`'s MRO, remembering the entry and its
//!    descriptor classification;
//! 2. a data descriptor wins immediately;
//! 3. otherwise the instance dict wins;
//! 4. otherwise a non-data descriptor binds;
//! 5. otherwise a plain type attribute is returned;
//! 6. otherwise `AttributeError`.

use std::rc::Rc;

use crate::{
    exception::{ExcType, RunError, RunResult},
    object::Object,
    types::{Slot, SlotImpl, TypeAttr, TypeRef},
    vm::ThreadState,
};

/// The instance `__dict__` of a value, if its representation carries one.
fn instance_dict(obj: &Object) -> Option<&std::cell::RefCell<indexmap::IndexMap<Rc<str>, Object, ahash::RandomState>>> {
    match obj {
        Object::Instance(inst) => Some(&inst.dict),
        _ => None,
    }
}

impl ThreadState {
    /// Full attribute lookup, honoring a type's `getattr` override.
    pub fn getattr(&mut self, obj: &Object, name: &Rc<str>) -> RunResult<Object> {
        if let Object::Type(t) = obj {
            return self.type_getattr(&Rc::clone(t), name);
        }
        let class = obj.class(self.interp());
        match class.lookup_slot(obj, Slot::GetAttr) {
            Some(SlotImpl::GetAttr(f)) => f(obj, name, self),
            Some(_) => Err(RunError::internal("getattr slot has wrong arity")),
            None => self.generic_getattr(obj, name),
        }
    }

    /// The generic lookup algorithm (steps 1-6 above).
    pub fn generic_getattr(&mut self, obj: &Object, name: &Rc<str>) -> RunResult<Object> {
        let class = obj.class(self.interp());
        let type_attr = class.lookup(name);

        if let Some(attr) = &type_attr
            && attr.is_data_descriptor()
        {
            return attr.get(obj, self);
        }

        if let Some(dict) = instance_dict(obj)
            && let Some(value) = dict.borrow().get(&**name)
        {
            return Ok(value.clone());
        }

        match type_attr {
            Some(attr) => attr.get(obj, self),
            None => Err(ExcType::no_attribute(class.name(), name)),
        }
    }

    /// Attribute store: data descriptors first, then the instance dict.
    pub fn setattr(&mut self, obj: &Object, name: &Rc<str>, value: Object) -> RunResult<()> {
        if let Object::Type(t) = obj {
            t.set_attr(Rc::clone(name), crate::types::PyType::attr_from_value(name, value));
            return Ok(());
        }
        let class = obj.class(self.interp());
        if let Some(attr) = class.lookup(name)
            && let Some(()) = attr.set(obj, value.clone(), self)?
        {
            return Ok(());
        }
        match instance_dict(obj) {
            Some(dict) => {
                dict.borrow_mut().insert(Rc::clone(name), value);
                Ok(())
            }
            None => Err(ExcType::no_attribute(class.name(), name)),
        }
    }

    /// Attribute delete, with the same priority as stores.
    pub fn delattr(&mut self, obj: &Object, name: &Rc<str>) -> RunResult<()> {
        if let Object::Type(t) = obj {
            return match t.remove_attr(name) {
                Some(_) => Ok(()),
                None => Err(RunError::exc(
                    ExcType::AttributeError,
                    format!("type object '{}' has no attribute '{name}'", t.name()),
                )),
            };
        }
        let class = obj.class(self.interp());
        if let Some(attr) = class.lookup(name)
            && let Some(()) = attr.delete(obj, self)?
        {
            return Ok(());
        }
        match instance_dict(obj) {
            Some(dict) => match dict.borrow_mut().shift_remove(&**name) {
                Some(_) => Ok(()),
                None => Err(ExcType::no_attribute(class.name(), name)),
            },
            None => Err(ExcType::no_attribute(class.name(), name)),
        }
    }

    /// The `LoadMethod` lookup.
    ///
    /// When the type keeps the generic `getattr` and the resolved entry is
    /// a method descriptor not shadowed by the instance dict, the
    /// descriptor's underlying callable and the receiver come back as an
    /// unbound pair, skipping the bound-method allocation. Otherwise the
    /// first half of the pair is the empty marker and the second is the
    /// ordinary `getattr` result.
    pub fn load_method(&mut self, obj: &Object, name: &Rc<str>) -> RunResult<(Object, Object)> {
        if matches!(obj, Object::Type(_)) {
            return Ok((Object::Undefined, self.getattr(obj, name)?));
        }
        let class = obj.class(self.interp());
        if class.flags().custom_getattr || class.has_slot(Slot::GetAttr) {
            return Ok((Object::Undefined, self.getattr(obj, name)?));
        }

        if let Some(TypeAttr::Method(descr)) = class.lookup(name) {
            let shadowed = instance_dict(obj).is_some_and(|dict| dict.borrow().contains_key(&**name));
            if !shadowed {
                return Ok((descr.func.clone(), obj.clone()));
            }
        }
        Ok((Object::Undefined, self.getattr(obj, name)?))
    }

    /// Attribute lookup on a type object itself.
    ///
    /// Entries found along the type's own MRO come back unbound (a method
    /// descriptor yields its underlying callable); descriptors that only
    /// make sense on instances are rejected. Entries on the metatype are
    /// invoked against the type object.
    fn type_getattr(&mut self, class: &TypeRef, name: &Rc<str>) -> RunResult<Object> {
        if let Some(attr) = class.lookup(name) {
            return match attr {
                TypeAttr::Plain(value) => Ok(value),
                TypeAttr::Method(descr) => Ok(descr.func.clone()),
                TypeAttr::GetSet(_) | TypeAttr::Member(_) => Err(RunError::exc(
                    ExcType::AttributeError,
                    format!(
                        "attribute '{name}' of '{}' objects is only readable on instances",
                        class.name()
                    ),
                )),
            };
        }

        let metatype = Rc::clone(&self.interp().types.type_);
        let as_object = Object::Type(Rc::clone(class));
        if let Some(attr) = metatype.lookup(name) {
            return attr.get(&as_object, self);
        }

        Err(RunError::exc(
            ExcType::AttributeError,
            format!("type object '{}' has no attribute '{name}'", class.name()),
        ))
    }
}
