//! Shared compiler state: diagnostics, scope levels, symbols, use counts,
//! imported modules, and jump labels.
//!
//! The semantic analyzer populates this while walking the AST; the code
//! generator reads it back (use counts, labels, level types) on its own
//! walk. Identifiers are mangled as `ModuleName_original` so one flat
//! namespace can hold every module's locals; [`make_variable_name`] is the
//! only place that builds such a name.

use ahash::AHashMap;
use indexmap::IndexMap;

use crate::{
    ast::{Ast, NodeId},
    error::{BuildMessage, ErrorLevel, ErrorType},
    location::SourceLocation,
};

/// Scope depth of the module itself.
pub const GLOBAL_LEVEL: usize = 0;

/// What kind of construct opened a scope level.
///
/// `return` needs this to count how many levels sit between it and the
/// enclosing function scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LevelType {
    #[default]
    Default,
    Function,
    Loop,
    Condition,
}

/// A declared identifier, as seen by the analyzer and code generator.
#[derive(Debug, Clone, Default)]
pub struct Symbol {
    /// Id of the declaration node; use counts are keyed by it.
    pub decl_id: Option<NodeId>,
    pub decl_location: SourceLocation,
    /// Name before mangling.
    pub original_name: String,
    pub is_alias: bool,
    /// Clone of the aliased expression, emitted in place of references.
    pub alias_to: Option<Box<Ast>>,
    pub is_const: bool,
    /// True while the symbol is known to hold a plain literal.
    pub is_literal: bool,
    /// The literal value, for const-literal inlining.
    pub current_value: Option<Box<Ast>>,
    pub is_native: bool,
    /// Required argument count for native functions.
    pub nargs: usize,
    pub is_function: bool,
    pub is_inline: bool,
    /// Clone of an inline function's definition, spliced at call sites.
    pub definition: Option<Box<Ast>>,
}

/// One scope level and the symbols it owns.
///
/// Symbols are dropped with the level when it pops; lookups scan levels
/// innermost-first and, within a level, in declaration order.
#[derive(Debug, Default)]
pub struct LevelInfo {
    pub level_type: LevelType,
    pub locals: Vec<(String, Symbol)>,
}

/// A jump target collected during code generation.
///
/// `location` is the offset into the emitted instruction bytes; the
/// bytecode emitter rebases it onto the final file when writing the
/// `store_address` prologue.
#[derive(Debug, Clone, Copy)]
pub struct Label {
    pub id: u32,
    pub location: u64,
}

/// A native function made visible to scripts, described for the analyzer.
#[derive(Debug, Clone)]
pub struct ExternalFunction {
    pub name: String,
    pub nargs: usize,
}

/// A native module definition: a name plus its functions.
///
/// Built fluently: `ModuleDefine::new("Clock").define("start", 0)`.
#[derive(Debug, Clone)]
pub struct ModuleDefine {
    pub name: String,
    pub methods: Vec<ExternalFunction>,
}

impl ModuleDefine {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            methods: Vec::new(),
        }
    }

    #[must_use]
    pub fn define(mut self, name: &str, nargs: usize) -> Self {
        self.methods.push(ExternalFunction {
            name: name.to_owned(),
            nargs,
        });
        self
    }
}

/// Mangles an identifier with its declaring module's name.
#[must_use]
pub fn make_variable_name(original: &str, module: &str) -> String {
    format!("{module}_{original}")
}

/// State threaded through semantic analysis and code generation.
pub struct CompilerState {
    pub errors: Vec<BuildMessage>,
    /// Reference counts keyed by declaration node id.
    pub use_counts: AHashMap<NodeId, usize>,
    /// Imported modules keyed by resolved path (native modules by name).
    /// Insertion order is preserved so emission stays deterministic.
    pub other_modules: IndexMap<String, Ast>,
    /// Enum member tables keyed by the enum's mangled name.
    pub enums: AHashMap<String, Vec<(String, i64)>>,
    pub levels: Vec<LevelInfo>,
    pub level: usize,
    pub function_level: usize,
    pub block_id_counter: u32,
    /// Next fresh AST node id; advanced when analysis synthesizes nodes or
    /// parses imported files.
    pub node_id_counter: NodeId,
}

impl CompilerState {
    #[must_use]
    pub fn new(node_id_counter: NodeId) -> Self {
        Self {
            errors: Vec::new(),
            use_counts: AHashMap::new(),
            other_modules: IndexMap::new(),
            enums: AHashMap::new(),
            levels: vec![LevelInfo::default()],
            level: GLOBAL_LEVEL,
            function_level: 0,
            block_id_counter: 0,
            node_id_counter,
        }
    }

    pub fn current_level(&mut self) -> &mut LevelInfo {
        &mut self.levels[self.level]
    }

    /// Walks scope levels innermost-first looking for a mangled name.
    #[must_use]
    pub fn find_variable(&self, name: &str, only_this_scope: bool) -> Option<&Symbol> {
        let mut start = self.level as isize;
        while start >= GLOBAL_LEVEL as isize {
            let level = &self.levels[start as usize];
            if let Some((_, symbol)) = level.locals.iter().find(|(n, _)| n == name) {
                return Some(symbol);
            }
            if only_this_scope {
                break;
            }
            start -= 1;
        }
        None
    }

    /// Like [`Self::find_variable`] but yields a mutable symbol, for the
    /// analyzer's literal-propagation updates.
    pub fn find_variable_mut(&mut self, name: &str, only_this_scope: bool) -> Option<&mut Symbol> {
        let mut start = self.level as isize;
        while start >= GLOBAL_LEVEL as isize {
            let found = self.levels[start as usize]
                .locals
                .iter()
                .position(|(n, _)| n == name);
            if let Some(idx) = found {
                return Some(&mut self.levels[start as usize].locals[idx].1);
            }
            if only_this_scope {
                break;
            }
            start -= 1;
        }
        None
    }

    /// Resolves a module name: either the module the reference lives in, or
    /// any imported/native module. Returns the canonical module name.
    #[must_use]
    pub fn find_module(&self, name: &str, current_module: &str) -> Option<String> {
        if current_module == name {
            return Some(current_module.to_owned());
        }
        self.other_modules.values().find_map(|module| match &module.kind {
            crate::ast::AstKind::Module { name: module_name, .. } if module_name == name => {
                Some(module_name.clone())
            }
            _ => None,
        })
    }

    /// Allocates a fresh node id for nodes synthesized after parsing.
    pub fn fresh_node_id(&mut self) -> NodeId {
        let id = self.node_id_counter;
        self.node_id_counter += 1;
        id
    }

    #[must_use]
    pub fn use_count(&self, id: NodeId) -> usize {
        self.use_counts.get(&id).copied().unwrap_or(0)
    }

    pub fn increment_use_count(&mut self, id: NodeId) {
        *self.use_counts.entry(id).or_insert(0) += 1;
    }

    /// True when any accumulated diagnostic is fatal.
    #[must_use]
    pub fn has_fatal_errors(&self) -> bool {
        self.errors.iter().any(|e| e.level == ErrorLevel::Fatal)
    }

    pub fn error(&mut self, error_type: ErrorType, location: SourceLocation, text: String) {
        self.errors
            .push(BuildMessage::new(error_type, ErrorLevel::Fatal, location, text));
    }

    pub fn warning(&mut self, error_type: ErrorType, location: SourceLocation, text: String) {
        self.errors
            .push(BuildMessage::new(error_type, ErrorLevel::Warning, location, text));
    }

    pub fn info(&mut self, error_type: ErrorType, location: SourceLocation, text: String) {
        self.errors
            .push(BuildMessage::new(error_type, ErrorLevel::Info, location, text));
    }
}
