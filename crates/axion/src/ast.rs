//! The abstract syntax tree and compile-time constant folding.
//!
//! Nodes are a tagged enum behind a small header carrying the node id,
//! location, owning module name (used for identifier mangling), and any
//! `attribute { ... }` strings the parser attached.
//!
//! The semantic analyzer writes resolution results back into `Variable` and
//! `FunctionCall` nodes so the code generator can run without a symbol
//! table of its own.

use crate::{
    location::SourceLocation,
    syntax::{BinaryOp, UnaryOp},
};

/// Identity of an AST node, assigned by the parser.
///
/// Use counts are keyed by the id of the *declaration* node, so clones made
/// during analysis (alias targets, inline bodies) keep counting against the
/// original declaration.
pub type NodeId = u32;

/// One AST node: common header plus tagged payload.
#[derive(Debug, Clone)]
pub struct Ast {
    pub id: NodeId,
    pub location: SourceLocation,
    /// Name of the module this node was declared in.
    pub module: String,
    /// Attribute strings attached via `attribute { "..." } stmt`.
    pub attributes: Vec<String>,
    pub kind: AstKind,
}

/// Resolution results the analyzer records on a variable reference.
#[derive(Debug, Clone)]
pub struct VariableNode {
    pub name: String,
    pub is_alias: bool,
    /// The aliased expression, cloned from the alias declaration.
    pub alias_to: Option<Box<Ast>>,
    pub is_const: bool,
    /// True when the symbol currently holds a plain literal.
    pub is_literal: bool,
    /// The literal value, for const-literal inlining.
    pub current_value: Option<Box<Ast>>,
}

impl VariableNode {
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_alias: false,
            alias_to: None,
            is_const: false,
            is_literal: false,
            current_value: None,
        }
    }
}

/// Resolution results the analyzer records on a function call.
#[derive(Debug, Clone)]
pub struct FunctionCallNode {
    pub name: String,
    pub arguments: Vec<Ast>,
    pub is_alias: bool,
    pub alias_to: Option<Box<Ast>>,
    /// Clone of the called definition when it carries the `inline`
    /// attribute; the code generator splices it at the call site.
    pub inline_definition: Option<Box<Ast>>,
}

#[derive(Debug, Clone)]
pub enum AstKind {
    Module {
        name: String,
        children: Vec<Ast>,
    },
    Imports {
        children: Vec<Ast>,
    },
    Import {
        import_str: String,
        relative_path: String,
        is_module_import: bool,
    },
    /// Empty statement (a bare `;`).
    Statement,
    Block {
        children: Vec<Ast>,
    },
    /// Expression-as-statement wrapper; `should_clear_stack` pops the unused
    /// result.
    Expression {
        child: Box<Ast>,
        should_clear_stack: bool,
    },
    BinaryOp {
        op: BinaryOp,
        left: Box<Ast>,
        right: Box<Ast>,
    },
    UnaryOp {
        op: UnaryOp,
        child: Box<Ast>,
    },
    ArrayAccess {
        object: Box<Ast>,
        index: Box<Ast>,
    },
    MemberAccess {
        left_str: String,
        left: Box<Ast>,
        right: Box<Ast>,
    },
    ModuleAccess {
        module_name: String,
        right: Box<Ast>,
    },
    VariableDeclaration {
        name: String,
        assignment: Box<Ast>,
        is_const: bool,
    },
    Alias {
        name: String,
        alias_to: Box<Ast>,
    },
    UseModule {
        name: String,
    },
    Variable(VariableNode),
    Integer(i64),
    Float(f64),
    StringLiteral(String),
    True,
    False,
    Null,
    SelfObject,
    New {
        identifier: String,
        constructor: Box<Ast>,
    },
    FunctionDefinition {
        name: String,
        arguments: Vec<String>,
        block: Box<Ast>,
        is_variadic: bool,
        is_native: bool,
    },
    FunctionExpression {
        arguments: Vec<String>,
        block: Box<Ast>,
    },
    FunctionCall(FunctionCallNode),
    Class {
        name: String,
        members: Vec<Ast>,
    },
    Enum {
        name: String,
        /// Member name plus its integer literal node (auto-incremented from
        /// 0 unless overridden in source).
        members: Vec<(String, Box<Ast>)>,
    },
    If {
        conditional: Box<Ast>,
        block: Box<Ast>,
        else_block: Option<Box<Ast>>,
    },
    Print {
        arguments: Vec<Ast>,
    },
    Return {
        value: Box<Ast>,
    },
    For {
        initializer: Option<Box<Ast>>,
        conditional: Box<Ast>,
        afterthought: Option<Box<Ast>>,
        block: Box<Ast>,
    },
    While {
        conditional: Box<Ast>,
        block: Box<Ast>,
    },
    TryCatch {
        try_block: Box<Ast>,
        catch_block: Box<Ast>,
        /// Const declaration for the caught exception object, if named.
        exception_object: Option<Box<Ast>>,
    },
}

impl Ast {
    #[must_use]
    pub fn new(id: NodeId, location: SourceLocation, module: impl Into<String>, kind: AstKind) -> Self {
        Self {
            id,
            location,
            module: module.into(),
            attributes: Vec::new(),
            kind,
        }
    }

    /// Does this node carry the given attribute string?
    #[must_use]
    pub fn has_attribute(&self, attr: &str) -> bool {
        self.attributes.iter().any(|a| a == attr)
    }

    /// Is this node a plain literal after parsing (integer, float, or
    /// string)?
    #[must_use]
    pub fn is_literal_node(&self) -> bool {
        matches!(
            self.kind,
            AstKind::Integer(_) | AstKind::Float(_) | AstKind::StringLiteral(_)
        )
    }

    fn literal(&self, kind: AstKind) -> Self {
        Self::new(self.id, self.location.clone(), self.module.clone(), kind)
    }

    /// Attempts to replace this node with an equivalent simpler one.
    ///
    /// Returns `None` when no compile-time simplification applies. Binary
    /// and unary operators fold only literal operands; short-circuit
    /// operators fold only when both sides are literal integers. Division
    /// and modulus by a zero literal are left alone so the error surfaces
    /// at runtime.
    #[must_use]
    pub fn optimize(&self) -> Option<Self> {
        match &self.kind {
            AstKind::Expression {
                child,
                should_clear_stack,
            } => {
                let folded = child.optimize()?;
                Some(self.literal(AstKind::Expression {
                    child: Box::new(folded),
                    should_clear_stack: *should_clear_stack,
                }))
            }
            AstKind::BinaryOp { op, left, right } => self.optimize_binary(*op, left, right),
            AstKind::UnaryOp { op, child } => self.optimize_unary(*op, child),
            _ => None,
        }
    }

    fn optimize_binary(&self, op: BinaryOp, left: &Self, right: &Self) -> Option<Self> {
        let left_opt = left.optimize();
        let right_opt = right.optimize();
        let left_use = left_opt.as_ref().unwrap_or(left);
        let right_use = right_opt.as_ref().unwrap_or(right);

        if op.is_assignment() {
            // Cannot be computed during compilation, only tidied.
            return match (left_opt, right_opt) {
                (Some(l), Some(r)) => Some(self.literal(AstKind::BinaryOp {
                    op,
                    left: Box::new(l),
                    right: Box::new(r),
                })),
                _ => None,
            };
        }

        let folded = fold_binary(op, left_use, right_use)?;
        Some(self.literal(folded))
    }

    fn optimize_unary(&self, op: UnaryOp, child: &Self) -> Option<Self> {
        let child_opt = child.optimize();
        let child_use = child_opt.as_ref().unwrap_or(child);

        if let Some(folded) = fold_unary(op, child_use) {
            return Some(self.literal(folded));
        }

        child_opt.map(|folded| {
            self.literal(AstKind::UnaryOp {
                op,
                child: Box::new(folded),
            })
        })
    }
}

/// Folds one binary operation over literal operands.
///
/// Promotion rules: int op int yields int; a float on either side yields
/// float; modulus, bitwise, and shift operators require integers;
/// comparisons always yield integer 0/1.
fn fold_binary(op: BinaryOp, left: &Ast, right: &Ast) -> Option<AstKind> {
    use AstKind::{Float, Integer};

    let ints = match (&left.kind, &right.kind) {
        (Integer(a), Integer(b)) => Some((*a, *b)),
        _ => None,
    };
    let floats = match (&left.kind, &right.kind) {
        (Float(a), Float(b)) => Some((*a, *b)),
        (Float(a), Integer(b)) => Some((*a, *b as f64)),
        (Integer(a), Float(b)) => Some((*a as f64, *b)),
        _ => None,
    };

    match op {
        BinaryOp::Add => match (ints, floats) {
            (Some((a, b)), _) => Some(Integer(a.wrapping_add(b))),
            (_, Some((a, b))) => Some(Float(a + b)),
            _ => None,
        },
        BinaryOp::Subtract => match (ints, floats) {
            (Some((a, b)), _) => Some(Integer(a.wrapping_sub(b))),
            (_, Some((a, b))) => Some(Float(a - b)),
            _ => None,
        },
        BinaryOp::Multiply => match (ints, floats) {
            (Some((a, b)), _) => Some(Integer(a.wrapping_mul(b))),
            (_, Some((a, b))) => Some(Float(a * b)),
            _ => None,
        },
        BinaryOp::Divide | BinaryOp::FloorDivide => match (ints, floats) {
            (Some((a, b)), _) => a.checked_div(b).map(Integer),
            (_, Some((a, b))) => Some(Float(a / b)),
            _ => None,
        },
        BinaryOp::Modulus => ints.and_then(|(a, b)| a.checked_rem(b)).map(Integer),
        BinaryOp::BitXor => ints.map(|(a, b)| Integer(a ^ b)),
        BinaryOp::BitAnd => ints.map(|(a, b)| Integer(a & b)),
        BinaryOp::BitOr => ints.map(|(a, b)| Integer(a | b)),
        BinaryOp::ShiftLeft => ints.map(|(a, b)| Integer(a.wrapping_shl(b as u32))),
        BinaryOp::ShiftRight => ints.map(|(a, b)| Integer(a.wrapping_shr(b as u32))),
        BinaryOp::LogicalAnd => ints.map(|(a, b)| Integer(i64::from(a != 0 && b != 0))),
        BinaryOp::LogicalOr => ints.map(|(a, b)| Integer(i64::from(a != 0 || b != 0))),
        BinaryOp::Equals => compare(ints, floats, |o| o == std::cmp::Ordering::Equal),
        BinaryOp::NotEqual => compare(ints, floats, |o| o != std::cmp::Ordering::Equal),
        BinaryOp::Less => compare(ints, floats, |o| o == std::cmp::Ordering::Less),
        BinaryOp::Greater => compare(ints, floats, |o| o == std::cmp::Ordering::Greater),
        BinaryOp::LessEqual => compare(ints, floats, |o| o != std::cmp::Ordering::Greater),
        BinaryOp::GreaterEqual => compare(ints, floats, |o| o != std::cmp::Ordering::Less),
        BinaryOp::Power => match (ints, floats) {
            (Some((a, b)), _) => {
                let exp = u32::try_from(b).ok()?;
                a.checked_pow(exp).map(Integer)
            }
            (_, Some((a, b))) => Some(Float(a.powf(b))),
            _ => None,
        },
        _ => None,
    }
}

/// Comparison folding; works for numeric pairs only, yielding integer 0/1.
fn compare(
    ints: Option<(i64, i64)>,
    floats: Option<(f64, f64)>,
    test: impl Fn(std::cmp::Ordering) -> bool,
) -> Option<AstKind> {
    if let Some((a, b)) = ints {
        return Some(AstKind::Integer(i64::from(test(a.cmp(&b)))));
    }
    if let Some((a, b)) = floats {
        let ord = a.partial_cmp(&b)?;
        return Some(AstKind::Integer(i64::from(test(ord))));
    }
    None
}

/// Folds one unary operation over a literal operand.
fn fold_unary(op: UnaryOp, child: &Ast) -> Option<AstKind> {
    use AstKind::{Float, Integer};

    match (op, &child.kind) {
        (UnaryOp::LogicalNot, Integer(v)) => Some(Integer(i64::from(*v == 0))),
        (UnaryOp::LogicalNot, Float(v)) => Some(Integer(i64::from(*v == 0.0))),
        (UnaryOp::BitComplement, Integer(v)) => Some(Integer(!*v)),
        (UnaryOp::Negative, Integer(v)) => Some(Integer(v.wrapping_neg())),
        (UnaryOp::Negative, Float(v)) => Some(Float(-*v)),
        _ => None,
    }
}
