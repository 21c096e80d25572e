//! The function object: a `Code` bound to globals, builtins, an
//! interpreter, defaults and a closure. Also home to argument binding,
//! which fills a frame's fast-locals array from a call's arguments.

use std::{cell::RefCell, rc::Rc};

use crate::{
    cell::Cell,
    code::{Code, CodeFlags},
    exception::{ExcType, RunError, RunResult},
    interp::Interpreter,
    object::Object,
    types::dict::Dict,
    vm::call::CallArgs,
};

/// A defined function ready for execution.
#[derive(Debug)]
pub struct Function {
    code: Rc<Code>,
    globals: Rc<RefCell<Dict>>,
    builtins: Rc<RefCell<Dict>>,
    interp: Rc<Interpreter>,
    /// Positional default values, aligned with the tail of the positional
    /// parameters.
    defaults: Option<Rc<[Object]>>,
    /// Keyword-only default values.
    kwdefaults: Option<Rc<RefCell<Dict>>>,
    /// The annotations mapping, carried but not interpreted by the core.
    annotations: Option<Object>,
    /// Cells captured from the defining scope, installed into the frame's
    /// free-variable slots by `CopyFreeVars`.
    closure: Rc<[Rc<Cell>]>,
}

impl Function {
    /// Creates a function binding `code` to the given namespaces.
    #[must_use]
    #[expect(clippy::too_many_arguments, reason = "mirrors the MakeFunction operand set")]
    pub fn new(
        code: Rc<Code>,
        globals: Rc<RefCell<Dict>>,
        builtins: Rc<RefCell<Dict>>,
        interp: Rc<Interpreter>,
        defaults: Option<Rc<[Object]>>,
        kwdefaults: Option<Rc<RefCell<Dict>>>,
        annotations: Option<Object>,
        closure: Rc<[Rc<Cell>]>,
    ) -> Self {
        Self {
            code,
            globals,
            builtins,
            interp,
            defaults,
            kwdefaults,
            annotations,
            closure,
        }
    }

    /// Creates a module-level function: fresh globals, the interpreter's
    /// builtins, no defaults, no closure.
    #[must_use]
    pub fn module(code: Rc<Code>, interp: &Rc<Interpreter>) -> Self {
        Self::with_globals(code, Rc::new(RefCell::new(Dict::new())), interp)
    }

    /// Creates a function against an existing globals dict.
    #[must_use]
    pub fn with_globals(code: Rc<Code>, globals: Rc<RefCell<Dict>>, interp: &Rc<Interpreter>) -> Self {
        Self {
            code,
            globals,
            builtins: interp.builtins_dict(),
            interp: Rc::clone(interp),
            defaults: None,
            kwdefaults: None,
            annotations: None,
            closure: Rc::from(Vec::new()),
        }
    }

    /// The compiled body.
    #[must_use]
    pub fn code(&self) -> &Code {
        &self.code
    }

    /// The compiled body, shared.
    #[must_use]
    pub fn code_rc(&self) -> Rc<Code> {
        Rc::clone(&self.code)
    }

    /// The qualified name, taken from the code object.
    #[must_use]
    pub fn qualname(&self) -> &str {
        &self.code.qualname
    }

    /// The globals dict this function runs against.
    #[must_use]
    pub fn globals(&self) -> &Rc<RefCell<Dict>> {
        &self.globals
    }

    /// The builtins mapping consulted after globals.
    #[must_use]
    pub fn builtins(&self) -> &Rc<RefCell<Dict>> {
        &self.builtins
    }

    /// The interpreter this function is bound to.
    #[must_use]
    pub fn interp(&self) -> &Rc<Interpreter> {
        &self.interp
    }

    /// Positional defaults, if any.
    #[must_use]
    pub fn defaults(&self) -> Option<&[Object]> {
        self.defaults.as_deref()
    }

    /// The annotations mapping, if any.
    #[must_use]
    pub fn annotations(&self) -> Option<&Object> {
        self.annotations.as_ref()
    }

    /// The captured closure cells.
    #[must_use]
    pub fn closure(&self) -> &[Rc<Cell>] {
        &self.closure
    }

    /// Binds call arguments into a fast-locals array.
    ///
    /// Implements the full parameter protocol: positional binding,
    /// keyword binding by name, positional and keyword-only defaults, and
    /// the `*args` / `**kwargs` collectors when the code's traits reserve
    /// slots for them.
    pub(crate) fn bind_args(&self, fast: &mut [Object], args: CallArgs) -> RunResult<()> {
        let code = &*self.code;
        let argcount = code.argcount;
        let kwonly = code.kwonlyargcount;
        let total_params = argcount + kwonly;
        let has_varargs = code.flags.contains(CodeFlags::VARARGS);
        let has_varkw = code.flags.contains(CodeFlags::VARKEYWORDS);
        let name = self.qualname().to_owned();

        let CallArgs { args: pos, kwargs } = args;

        if total_params
            + usize::from(has_varargs)
            + usize::from(has_varkw)
            > fast.len()
        {
            return Err(RunError::internal("parameter slots exceed the fast-locals layout"));
        }

        // Positional arguments.
        let n_direct = pos.len().min(argcount);
        for (slot, value) in pos.iter().take(n_direct).enumerate() {
            fast[slot] = value.clone();
        }
        if pos.len() > argcount {
            if has_varargs {
                let extra: Vec<Object> = pos[argcount..].to_vec();
                fast[total_params] = Object::tuple(extra);
            } else {
                return Err(RunError::exc(
                    ExcType::TypeError,
                    format!(
                        "{name}() takes {argcount} positional argument{} but {} were given",
                        if argcount == 1 { "" } else { "s" },
                        pos.len()
                    ),
                ));
            }
        } else if has_varargs {
            fast[total_params] = Object::tuple(Vec::new());
        }

        // Keyword arguments.
        let mut varkw = if has_varkw { Some(Dict::new()) } else { None };
        for (kw_name, value) in kwargs {
            let param_slot = code.layout.vars()[..total_params]
                .iter()
                .position(|v| *v.name == *kw_name)
                // Positional-only parameters are invisible to keywords.
                .filter(|&slot| slot >= code.posonlyargcount);
            match param_slot {
                Some(slot) => {
                    if !fast[slot].is_undefined() {
                        return Err(RunError::exc(
                            ExcType::TypeError,
                            format!("{name}() got multiple values for argument '{kw_name}'"),
                        ));
                    }
                    fast[slot] = value;
                }
                None => match &mut varkw {
                    Some(map) => map.insert_str(&kw_name, value),
                    None => {
                        return Err(RunError::exc(
                            ExcType::TypeError,
                            format!("{name}() got an unexpected keyword argument '{kw_name}'"),
                        ));
                    }
                },
            }
        }
        if let Some(map) = varkw {
            fast[total_params + usize::from(has_varargs)] = Object::Dict(Rc::new(RefCell::new(map)));
        }

        // Positional defaults align with the tail of the positional params.
        if let Some(defaults) = &self.defaults {
            let first_default = argcount.saturating_sub(defaults.len());
            for (i, default) in defaults.iter().enumerate() {
                let slot = first_default + i;
                if slot < argcount && fast[slot].is_undefined() {
                    fast[slot] = default.clone();
                }
            }
        }

        // Keyword-only defaults.
        if kwonly > 0
            && let Some(kwdefaults) = &self.kwdefaults
        {
            let kwdefaults = kwdefaults.borrow();
            for slot in argcount..total_params {
                if fast[slot].is_undefined()
                    && let Some(default) = kwdefaults.get_str(&code.layout.vars()[slot].name)
                {
                    fast[slot] = default;
                }
            }
        }

        // Anything still unbound is a missing argument.
        let missing_positional: Vec<&str> = (0..argcount)
            .filter(|&slot| fast[slot].is_undefined())
            .map(|slot| code.layout.name_of(slot))
            .collect();
        if !missing_positional.is_empty() {
            return Err(RunError::exc(
                ExcType::TypeError,
                format!(
                    "{name}() missing {} required positional argument{}: {}",
                    missing_positional.len(),
                    if missing_positional.len() == 1 { "" } else { "s" },
                    format_param_names(&missing_positional)
                ),
            ));
        }
        let missing_kwonly: Vec<&str> = (argcount..total_params)
            .filter(|&slot| fast[slot].is_undefined())
            .map(|slot| code.layout.name_of(slot))
            .collect();
        if !missing_kwonly.is_empty() {
            return Err(RunError::exc(
                ExcType::TypeError,
                format!(
                    "{name}() missing {} required keyword-only argument{}: {}",
                    missing_kwonly.len(),
                    if missing_kwonly.len() == 1 { "" } else { "s" },
                    format_param_names(&missing_kwonly)
                ),
            ));
        }

        Ok(())
    }
}

/// Formats a list of parameter names for error messages.
///
/// Examples:
/// - `["a"]` -> `'a'`
/// - `["a", "b"]` -> `'a' and 'b'`
/// - `["a", "b", "c"]` -> `'a', 'b' and 'c'`
fn format_param_names(names: &[&str]) -> String {
    match names {
        [] => String::new(),
        [only] => format!("'{only}'"),
        [first, second] => format!("'{first}' and '{second}'"),
        [init @ .., last] => {
            let rest: Vec<String> = init.iter().map(|n| format!("'{n}'")).collect();
            format!("{} and '{last}'", rest.join(", "))
        }
    }
}
