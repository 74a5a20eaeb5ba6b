//! The runtime object model: tagged heap objects and value operations.
//!
//! Every heap slot holds one [`HeapObject`]: flags, an ordered field list,
//! and a payload that is a plain value, a bytecode function, or a native
//! function. Field entries reference other heap slots by id and never own
//! them; the collector is the only owner.
//!
//! Numeric coercion rules live here: int op int stays int, a float on
//! either side promotes to float, comparisons always yield integer 0/1,
//! and modulus/bitwise/shift operators demand integers.

use super::{
    exception::{RunError, RunResult},
    heap::HeapId,
    state::NativeCtx,
};

/// Signature of a bindable native function.
///
/// Arguments arrive already popped from the value stack, in source order.
/// The callee pushes exactly one result (possibly null).
pub type NativeFn = fn(&mut NativeCtx<'_>, &[HeapId]) -> RunResult<()>;

/// The primary value payload of a heap object.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Str(String),
    /// Only the object's field list matters.
    Structure,
    /// Opaque handle to host-side data (an open file, a library handle).
    Native(NativeHandle),
}

/// Reference to host-side data kept outside the script heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeHandle {
    /// What the handle points at, e.g. `"file"`.
    pub tag: &'static str,
    /// Index into the host's table for this kind of data.
    pub handle: usize,
}

/// A function value: an address into the bytecode stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Function {
    pub address: u64,
    pub nargs: u32,
    pub is_variadic: bool,
}

/// Payload of one heap object.
#[derive(Debug, Clone)]
pub enum ObjectKind {
    Variable(Value),
    Function(Function),
    Native(NativeFn),
}

/// One heap-allocated object.
#[derive(Debug, Clone)]
pub struct HeapObject {
    /// Lifetime ends at the next pop.
    pub temporary: bool,
    /// Assignment target protection.
    pub constant: bool,
    /// Mark bit for the collector.
    pub marked: bool,
    /// Ordered named members, referencing other heap slots.
    pub fields: Vec<(String, HeapId)>,
    pub kind: ObjectKind,
}

impl HeapObject {
    #[must_use]
    pub fn variable(value: Value) -> Self {
        Self {
            temporary: false,
            constant: false,
            marked: false,
            fields: Vec::new(),
            kind: ObjectKind::Variable(value),
        }
    }

    #[must_use]
    pub fn function(function: Function) -> Self {
        Self {
            temporary: false,
            constant: false,
            marked: false,
            fields: Vec::new(),
            kind: ObjectKind::Function(function),
        }
    }

    #[must_use]
    pub fn native(func: NativeFn) -> Self {
        Self {
            temporary: false,
            constant: false,
            marked: false,
            fields: Vec::new(),
            kind: ObjectKind::Native(func),
        }
    }

    /// The user-visible type name.
    #[must_use]
    pub fn type_string(&self) -> String {
        match &self.kind {
            ObjectKind::Variable(value) => value.type_string(),
            ObjectKind::Function(_) => "func".to_owned(),
            ObjectKind::Native(_) => "native function".to_owned(),
        }
    }

    /// The contained plain value, or an invalid-type error for functions.
    pub fn value(&self) -> RunResult<&Value> {
        match &self.kind {
            ObjectKind::Variable(value) => Ok(value),
            _ => Err(RunError::InvalidType {
                type_string: self.type_string(),
            }),
        }
    }

    pub fn value_mut(&mut self) -> RunResult<&mut Value> {
        match &mut self.kind {
            ObjectKind::Variable(value) => Ok(value),
            ObjectKind::Function(_) => Err(RunError::InvalidType {
                type_string: "func".to_owned(),
            }),
            ObjectKind::Native(_) => Err(RunError::InvalidType {
                type_string: "native function".to_owned(),
            }),
        }
    }

    /// Adds a named member; the name must be new.
    pub fn add_field(&mut self, name: &str, id: HeapId) -> RunResult<()> {
        if self.fields.iter().any(|(n, _)| n == name) {
            return Err(RunError::Custom(format!("member '{name}' already exists")));
        }
        self.fields.push((name.to_owned(), id));
        Ok(())
    }

    /// Finds a member by name.
    #[must_use]
    pub fn field_by_name(&self, name: &str) -> Option<HeapId> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, id)| *id)
    }

    /// Finds a member by position.
    #[must_use]
    pub fn field_by_index(&self, index: usize) -> Option<HeapId> {
        self.fields.get(index).map(|(_, id)| *id)
    }
}

impl Value {
    #[must_use]
    pub fn type_string(&self) -> String {
        match self {
            Self::Null => "null".to_owned(),
            Self::Int(_) => "integer".to_owned(),
            Self::Float(_) => "float".to_owned(),
            Self::Str(_) => "string".to_owned(),
            Self::Structure => "structure".to_owned(),
            Self::Native(handle) => format!("native {}", handle.tag),
        }
    }

    /// Truthiness for conditions: nonzero numbers are true; anything else
    /// has no boolean form.
    pub fn as_bool(&self) -> RunResult<bool> {
        match self {
            Self::Int(v) => Ok(*v != 0),
            Self::Float(v) => Ok(*v != 0.0),
            _ => Err(RunError::Conversion {
                from: self.type_string(),
                to: "bool",
            }),
        }
    }

    /// Textual form of a scalar; structures are rendered by the heap, which
    /// can see their fields.
    #[must_use]
    pub fn scalar_string(&self) -> Option<String> {
        match self {
            Self::Null => Some("<null>".to_owned()),
            Self::Int(v) => Some(v.to_string()),
            Self::Float(v) => Some(format_float(*v)),
            Self::Str(s) => Some(s.clone()),
            _ => None,
        }
    }

    fn bin_error(&self, op: &'static str, other: &Self) -> RunError {
        RunError::BinOp {
            op,
            left: self.type_string(),
            right: other.type_string(),
        }
    }

    /// `self += other` under numeric promotion; string concatenation is
    /// handled by the caller, which can render the right operand.
    pub fn add(&mut self, other: &Self) -> RunResult<()> {
        match (&mut *self, other) {
            (Self::Int(a), Self::Int(b)) => *a = a.wrapping_add(*b),
            (Self::Float(a), Self::Float(b)) => *a += *b,
            (Self::Float(a), Self::Int(b)) => *a += *b as f64,
            (Self::Int(a), Self::Float(b)) => *self = Self::Float(*a as f64 + *b),
            _ => return Err(self.bin_error("+", other)),
        }
        Ok(())
    }

    pub fn subtract(&mut self, other: &Self) -> RunResult<()> {
        match (&mut *self, other) {
            (Self::Int(a), Self::Int(b)) => *a = a.wrapping_sub(*b),
            (Self::Float(a), Self::Float(b)) => *a -= *b,
            (Self::Float(a), Self::Int(b)) => *a -= *b as f64,
            (Self::Int(a), Self::Float(b)) => *self = Self::Float(*a as f64 - *b),
            _ => return Err(self.bin_error("-", other)),
        }
        Ok(())
    }

    pub fn multiply(&mut self, other: &Self) -> RunResult<()> {
        match (&mut *self, other) {
            (Self::Int(a), Self::Int(b)) => *a = a.wrapping_mul(*b),
            (Self::Float(a), Self::Float(b)) => *a *= *b,
            (Self::Float(a), Self::Int(b)) => *a *= *b as f64,
            (Self::Int(a), Self::Float(b)) => *self = Self::Float(*a as f64 * *b),
            _ => return Err(self.bin_error("*", other)),
        }
        Ok(())
    }

    pub fn power(&mut self, other: &Self) -> RunResult<()> {
        match (&mut *self, other) {
            (Self::Int(a), Self::Int(b)) => *a = (*a as f64).powf(*b as f64) as i64,
            (Self::Float(a), Self::Float(b)) => *a = a.powf(*b),
            (Self::Float(a), Self::Int(b)) => *a = a.powf(*b as f64),
            (Self::Int(a), Self::Float(b)) => *self = Self::Float((*a as f64).powf(*b)),
            _ => return Err(self.bin_error("pow", other)),
        }
        Ok(())
    }

    /// Division truncates toward zero for integer operands.
    pub fn divide(&mut self, other: &Self) -> RunResult<()> {
        match (&mut *self, other) {
            (Self::Int(a), Self::Int(b)) => {
                *a = a.checked_div(*b).ok_or(RunError::DivisionByZero)?;
            }
            (Self::Float(a), Self::Float(b)) => *a /= *b,
            (Self::Float(a), Self::Int(b)) => *a /= *b as f64,
            (Self::Int(a), Self::Float(b)) => *self = Self::Float(*a as f64 / *b),
            _ => return Err(self.bin_error("/", other)),
        }
        Ok(())
    }

    pub fn modulus(&mut self, other: &Self) -> RunResult<()> {
        match (&mut *self, other) {
            (Self::Int(a), Self::Int(b)) => {
                *a = a.checked_rem(*b).ok_or(RunError::DivisionByZero)?;
            }
            _ => return Err(self.bin_error("mod", other)),
        }
        Ok(())
    }

    pub fn bit_and(&mut self, other: &Self) -> RunResult<()> {
        self.int_op("&", other, |a, b| a & b)
    }

    pub fn bit_or(&mut self, other: &Self) -> RunResult<()> {
        self.int_op("|", other, |a, b| a | b)
    }

    pub fn bit_xor(&mut self, other: &Self) -> RunResult<()> {
        self.int_op("^", other, |a, b| a ^ b)
    }

    pub fn shift_left(&mut self, other: &Self) -> RunResult<()> {
        self.int_op("<<", other, |a, b| a.wrapping_shl(b as u32))
    }

    pub fn shift_right(&mut self, other: &Self) -> RunResult<()> {
        self.int_op(">>", other, |a, b| a.wrapping_shr(b as u32))
    }

    pub fn logical_and(&mut self, other: &Self) -> RunResult<()> {
        self.int_op("&&", other, |a, b| i64::from(a != 0 && b != 0))
    }

    pub fn logical_or(&mut self, other: &Self) -> RunResult<()> {
        self.int_op("||", other, |a, b| i64::from(a != 0 || b != 0))
    }

    fn int_op(&mut self, op: &'static str, other: &Self, f: impl FnOnce(i64, i64) -> i64) -> RunResult<()> {
        match (&mut *self, other) {
            (Self::Int(a), Self::Int(b)) => {
                *a = f(*a, *b);
                Ok(())
            }
            _ => Err(self.bin_error(op, other)),
        }
    }

    /// `==`: with null on either side, true iff both are null.
    pub fn equals(&mut self, other: &Self) -> RunResult<()> {
        let result = match (&*self, other) {
            (Self::Null, _) | (_, Self::Null) => {
                matches!((&*self, other), (Self::Null, Self::Null))
            }
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Float(a), Self::Int(b)) => *a == *b as f64,
            (Self::Int(a), Self::Float(b)) => *a as f64 == *b,
            (Self::Str(a), Self::Str(b)) => a == b,
            _ => return Err(self.bin_error("==", other)),
        };
        *self = Self::Int(i64::from(result));
        Ok(())
    }

    pub fn not_equals(&mut self, other: &Self) -> RunResult<()> {
        self.equals(other)?;
        if let Self::Int(v) = self {
            *v = i64::from(*v == 0);
        }
        Ok(())
    }

    pub fn less(&mut self, other: &Self) -> RunResult<()> {
        self.compare("<", other, |ord| ord == std::cmp::Ordering::Less)
    }

    pub fn greater(&mut self, other: &Self) -> RunResult<()> {
        self.compare(">", other, |ord| ord == std::cmp::Ordering::Greater)
    }

    pub fn less_equal(&mut self, other: &Self) -> RunResult<()> {
        self.compare("<=", other, |ord| ord != std::cmp::Ordering::Greater)
    }

    pub fn greater_equal(&mut self, other: &Self) -> RunResult<()> {
        self.compare(">=", other, |ord| ord != std::cmp::Ordering::Less)
    }

    /// Numeric ordering with promotion; string ordering is lexicographic.
    fn compare(
        &mut self,
        op: &'static str,
        other: &Self,
        test: impl FnOnce(std::cmp::Ordering) -> bool,
    ) -> RunResult<()> {
        let ordering = match (&*self, other) {
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Float(a), Self::Float(b)) => a.partial_cmp(b).ok_or_else(|| self.bin_error(op, other))?,
            (Self::Float(a), Self::Int(b)) => a
                .partial_cmp(&(*b as f64))
                .ok_or_else(|| self.bin_error(op, other))?,
            (Self::Int(a), Self::Float(b)) => (*a as f64)
                .partial_cmp(b)
                .ok_or_else(|| self.bin_error(op, other))?,
            (Self::Str(a), Self::Str(b)) => a.cmp(b),
            _ => return Err(self.bin_error(op, other)),
        };
        *self = Self::Int(i64::from(test(ordering)));
        Ok(())
    }

    /// `!`: null negates to 1, numbers flip their truthiness.
    pub fn logical_not(&mut self) -> RunResult<()> {
        match self {
            Self::Null => *self = Self::Int(1),
            Self::Int(v) => *v = i64::from(*v == 0),
            Self::Float(v) => *self = Self::Int(i64::from(*v == 0.0)),
            _ => {
                return Err(RunError::UnOp {
                    op: "!",
                    operand: self.type_string(),
                });
            }
        }
        Ok(())
    }

    pub fn negate(&mut self) -> RunResult<()> {
        match self {
            Self::Int(v) => *v = v.wrapping_neg(),
            Self::Float(v) => *v = -*v,
            _ => {
                return Err(RunError::UnOp {
                    op: "-",
                    operand: self.type_string(),
                });
            }
        }
        Ok(())
    }
}

/// Canonical float formatting (`2.0`, `3.14`), shared by `print`,
/// `Convert.toString`, and string concatenation.
#[must_use]
pub fn format_float(value: f64) -> String {
    if value.is_finite() {
        ryu::Buffer::new().format(value).to_owned()
    } else {
        value.to_string()
    }
}
