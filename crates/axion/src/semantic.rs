//! Semantic analysis: one pass over the AST that builds the scope stack,
//! resolves identifiers, enforces const/redeclaration/alias rules, counts
//! uses, records literal values for inlining, and loads imported modules.
//!
//! Resolution results are written back into the AST (`Variable` and
//! `FunctionCall` nodes) so the code generator never needs the symbol
//! table for lookups, only for use counts and level types.

use std::fs;

use crate::{
    ast::{Ast, AstKind},
    error::ErrorType,
    lexer::Lexer,
    location::SourceLocation,
    parser::Parser,
    state::{CompilerState, GLOBAL_LEVEL, LevelInfo, LevelType, ModuleDefine, Symbol, make_variable_name},
};

/// AST walker that fills in [`CompilerState`] and annotates the tree.
pub struct SemanticAnalyzer<'a> {
    state: &'a mut CompilerState,
}

impl<'a> SemanticAnalyzer<'a> {
    pub fn new(state: &'a mut CompilerState) -> Self {
        Self { state }
    }

    /// Analyzes a whole module, then resets the scope stack so the code
    /// generator can rebuild it on its own walk.
    pub fn analyze(&mut self, module: &mut Ast) {
        if let AstKind::Module { children, .. } = &mut module.kind {
            for child in children {
                self.accept(child);
            }
        }

        self.warn_unused_in_current_level();

        self.state.block_id_counter = 0;
        self.state.level = GLOBAL_LEVEL;
        self.state.levels.clear();
        self.state.levels.push(LevelInfo::default());
    }

    /// Registers a native module: its functions become global symbols under
    /// their mangled names, and the module name becomes resolvable.
    pub fn add_module(&mut self, def: &ModuleDefine) {
        if self.state.find_module(&def.name, "").is_some() {
            self.state.error(
                ErrorType::ModuleAlreadyDefined,
                SourceLocation::default(),
                format!("module '{}' has already been defined", def.name),
            );
            return;
        }

        for method in &def.methods {
            let mangled = make_variable_name(&method.name, &def.name);
            let symbol = Symbol {
                original_name: method.name.clone(),
                is_native: true,
                nargs: method.nargs,
                ..Symbol::default()
            };
            self.state.current_level().locals.push((mangled, symbol));
        }

        let id = self.state.fresh_node_id();
        let module_ast = Ast::new(id, SourceLocation::default(), def.name.clone(), AstKind::Module {
            name: def.name.clone(),
            children: Vec::new(),
        });
        self.state.other_modules.insert(def.name.clone(), module_ast);
    }

    fn accept(&mut self, node: &mut Ast) {
        // Split borrows: take the kind apart, leave the header readable.
        match &mut node.kind {
            AstKind::Module { children, .. } | AstKind::Imports { children } => {
                for child in children {
                    self.accept(child);
                }
            }
            AstKind::Import { .. } => self.accept_import(node),
            AstKind::Statement | AstKind::Class { .. } | AstKind::New { .. } | AstKind::SelfObject => {}
            AstKind::Block { .. } => self.accept_block(node),
            AstKind::Expression { child, .. } => self.accept(child),
            AstKind::BinaryOp { .. } => self.accept_binary_op(node),
            AstKind::UnaryOp { .. } => self.accept_unary_op(node),
            AstKind::ArrayAccess { object, index } => {
                self.accept(object);
                self.accept(index);
            }
            AstKind::MemberAccess { .. } => self.accept_member_access(node),
            AstKind::ModuleAccess { .. } => self.accept_module_access(node),
            AstKind::VariableDeclaration { .. } => self.accept_variable_declaration(node),
            AstKind::Alias { .. } => self.accept_alias(node),
            AstKind::UseModule { .. } => {
                let loc = node.location.clone();
                self.state.error(
                    ErrorType::UnsupportedFeature,
                    loc,
                    "'using module' is not supported".to_owned(),
                );
            }
            AstKind::Variable(_) => self.accept_variable(node),
            AstKind::Integer(_)
            | AstKind::Float(_)
            | AstKind::StringLiteral(_)
            | AstKind::True
            | AstKind::False
            | AstKind::Null => {}
            AstKind::FunctionDefinition { .. } => self.accept_function_definition(node),
            AstKind::FunctionExpression { .. } => self.accept_function_expression(node),
            AstKind::FunctionCall(_) => self.accept_function_call(node),
            AstKind::Enum { .. } => self.accept_enum(node),
            AstKind::If {
                conditional,
                block,
                else_block,
            } => {
                self.accept(conditional);

                self.increase_block(LevelType::Condition);
                self.accept(block);
                self.decrease_block();

                if let Some(else_block) = else_block {
                    self.increase_block(LevelType::Condition);
                    self.accept(else_block);
                    self.decrease_block();
                }
            }
            AstKind::Print { arguments } => {
                for arg in arguments {
                    self.accept(arg);
                }
            }
            AstKind::Return { value } => self.accept(value),
            AstKind::For { .. } => self.accept_for_loop(node),
            AstKind::While { .. } => self.accept_while_loop(node),
            AstKind::TryCatch { .. } => self.accept_try_catch(node),
        }
    }

    /// Loads, parses, and analyzes an imported file. Each path is processed
    /// once; importing two files that declare the same module name is an
    /// error.
    fn accept_import(&mut self, node: &mut Ast) {
        let AstKind::Import {
            import_str,
            relative_path,
            ..
        } = &node.kind
        else {
            return;
        };
        let (import_str, relative_path) = (import_str.clone(), relative_path.clone());
        let location = node.location.clone();

        if self.state.level != GLOBAL_LEVEL {
            self.state.error(
                ErrorType::ImportOutsideGlobal,
                location,
                "imports must be declared at module level".to_owned(),
            );
            return;
        }

        let path = format!("{relative_path}{import_str}");
        if self.state.other_modules.contains_key(&path) {
            return;
        }

        let Ok(source) = fs::read_to_string(&path) else {
            self.state.error(
                ErrorType::ImportNotFound,
                location,
                format!("could not import '{import_str}' (looked in '{path}')"),
            );
            return;
        };

        let (tokens, lex_errors) = Lexer::new(&source, &path).scan_tokens();
        let mut parser = Parser::new(tokens, lex_errors, &path);
        parser.set_node_id_base(self.state.node_id_counter);
        let unit = parser.parse();
        self.state.node_id_counter = parser.next_node_id();

        let Some(mut unit) = unit else {
            self.state.errors.append(&mut parser.errors);
            return;
        };

        let unit_name = match &unit.kind {
            AstKind::Module { name, .. } => name.clone(),
            _ => return,
        };

        let already_imported = self.state.other_modules.values().any(|m| {
            matches!(&m.kind, AstKind::Module { name, .. } if *name == unit_name)
        });
        if already_imported {
            self.state.error(
                ErrorType::ModuleAlreadyDefined,
                location,
                format!("module '{unit_name}' has already been defined"),
            );
            return;
        }

        self.state.errors.append(&mut parser.errors);

        if let AstKind::Module { children, .. } = &mut unit.kind {
            for child in children {
                self.accept(child);
            }
        }
        self.state.other_modules.insert(path, unit);
    }

    /// Walks a block's statements, warning once about code after a
    /// `return`.
    fn accept_block(&mut self, node: &mut Ast) {
        let AstKind::Block { children } = &mut node.kind else { return };

        let mut in_dead_code = false;
        let mut warning_shown = false;
        // children must be walked in place; collect warning spots first
        let mut warn_at: Option<SourceLocation> = None;

        for child in children.iter_mut() {
            self.accept(child);

            if matches!(child.kind, AstKind::Return { .. }) {
                in_dead_code = true;
            } else if in_dead_code && !warning_shown && !matches!(child.kind, AstKind::Statement) {
                warn_at = Some(child.location.clone());
                warning_shown = true;
            }
        }

        if let Some(loc) = warn_at {
            self.state
                .warning(ErrorType::UnreachableCode, loc, "unreachable code".to_owned());
        }
    }

    fn accept_unary_op(&mut self, node: &mut Ast) {
        let AstKind::UnaryOp { op, child } = &mut node.kind else { return };

        // no opcode can express in-place increment or decrement
        if matches!(*op, crate::syntax::UnaryOp::Increment | crate::syntax::UnaryOp::Decrement) {
            let (op, loc) = (*op, node.location.clone());
            self.state.error(
                ErrorType::UnsupportedFeature,
                loc,
                format!("the '{}' operator is not supported", crate::syntax::unary_op_to_str(op)),
            );
        }

        self.accept(child);
    }

    /// Assignment bookkeeping: const and inline violations, plus literal
    /// propagation into the target's symbol for later inlining.
    fn accept_binary_op(&mut self, node: &mut Ast) {
        let AstKind::BinaryOp { op, left, right } = &mut node.kind else {
            return;
        };
        let op = *op;

        self.accept(left);
        self.accept(right);

        if !op.is_assignment() {
            return;
        }

        use crate::syntax::BinaryOp;
        // the opcode set has no instructions for these compound forms
        if matches!(
            op,
            BinaryOp::ModulusAssign | BinaryOp::BitAndAssign | BinaryOp::BitXorAssign | BinaryOp::BitOrAssign
        ) {
            let loc = left.location.clone();
            self.state.error(
                ErrorType::UnsupportedFeature,
                loc,
                format!(
                    "the '{}' operator is not supported",
                    crate::syntax::binary_op_to_str(op)
                ),
            );
            return;
        }
        let left_module = left.module.clone();
        if op == BinaryOp::Assign
            && let AstKind::Variable(var) = &mut left.kind
            && !var.is_const
        {
            // peel the expression wrapper to inspect the actual value
            let right_side = match &right.kind {
                AstKind::Expression { child, .. } => child.as_ref(),
                _ => right.as_ref(),
            };
            let folded = right_side.optimize();
            let right_side = folded.as_ref().unwrap_or(right_side);

            let is_literal = right_side.is_literal_node();
            let literal = if is_literal { Some(Box::new(right_side.clone())) } else { None };

            var.is_literal = is_literal;
            var.current_value.clone_from(&literal);

            let mangled = make_variable_name(&var.name, &left_module);
            if let Some(symbol) = self.state.find_variable_mut(&mangled, false) {
                symbol.is_literal = is_literal;
                symbol.current_value = literal;
            }
        }

        match &left.kind {
            AstKind::Variable(var) => {
                if var.is_const {
                    let (name, loc) = (var.name.clone(), left.location.clone());
                    self.state.error(
                        ErrorType::ConstIdentifier,
                        loc,
                        format!("'{name}' is const and cannot be modified"),
                    );
                }
                if left.has_attribute("inline") || right.has_attribute("inline") {
                    let loc = left.location.clone();
                    self.state.error(
                        ErrorType::ProhibitedActionAttribute,
                        loc,
                        "this action is prohibited on an 'inline' declaration".to_owned(),
                    );
                }
            }
            AstKind::MemberAccess { .. } | AstKind::ArrayAccess { .. } => {}
            _ => {
                let loc = left.location.clone();
                self.state.error(
                    ErrorType::ExpectedIdentifier,
                    loc,
                    "the target of an assignment must be an identifier".to_owned(),
                );
            }
        }
    }

    /// Member access resolves, in order: a module prefix, an enum prefix
    /// (rewritten to the member's literal), then an ordinary object member.
    fn accept_member_access(&mut self, node: &mut Ast) {
        let module = node.module.clone();
        let AstKind::MemberAccess { left_str, left, right } = &mut node.kind else {
            return;
        };

        if let Some(found) = self.state.find_module(left_str, &module) {
            right.module = found;
            self.accept(right);
            return;
        }

        let enum_key = make_variable_name(left_str, &module);
        if self.state.enums.contains_key(&enum_key) {
            let enum_name = left_str.clone();
            let location = node.location.clone();
            let member = match &right.kind {
                AstKind::Variable(var) => Some(var.name.clone()),
                _ => None,
            };

            let Some(member) = member else {
                self.state.error(
                    ErrorType::IllegalExpression,
                    location,
                    "an enum member cannot be invoked or indexed".to_owned(),
                );
                return;
            };

            let value = self.state.enums[&enum_key]
                .iter()
                .find(|(name, _)| *name == member)
                .map(|(_, value)| *value);
            match value {
                Some(value) => node.kind = AstKind::Integer(value),
                None => self.state.error(
                    ErrorType::UndeclaredIdentifier,
                    location,
                    format!("'{member}' is not a member of enum '{enum_name}'"),
                ),
            }
            return;
        }

        self.accept(left);
        match &mut right.kind {
            AstKind::MemberAccess { .. } => self.accept(right),
            AstKind::Variable(_) | AstKind::FunctionCall(_) => {}
            _ => {
                let loc = node.location.clone();
                self.state.error(
                    ErrorType::InternalError,
                    loc,
                    "malformed member access".to_owned(),
                );
            }
        }
    }

    fn accept_module_access(&mut self, node: &mut Ast) {
        let AstKind::ModuleAccess { module_name, right } = &mut node.kind else {
            return;
        };

        if let Some(found) = self.state.find_module(module_name, "") {
            right.module = found;
            self.accept(right);
        } else {
            let (name, loc) = (module_name.clone(), node.location.clone());
            self.state.error(
                ErrorType::ModuleNotImported,
                loc,
                format!("module '{name}' has not been imported"),
            );
        }
    }

    fn accept_variable_declaration(&mut self, node: &mut Ast) {
        let module = node.module.clone();
        let location = node.location.clone();
        let AstKind::VariableDeclaration {
            name,
            assignment,
            is_const,
        } = &mut node.kind
        else {
            return;
        };

        let mangled = make_variable_name(name, &module);
        if self.state.find_variable(&mangled, true).is_some() {
            let name = name.clone();
            self.state.error(
                ErrorType::RedeclaredIdentifier,
                location,
                format!("identifier '{name}' has already been declared in this scope"),
            );
            return;
        }
        if self.state.find_module(name, &module).is_some() {
            let name = name.clone();
            self.state.error(
                ErrorType::IdentifierIsModule,
                location,
                format!("'{name}' is the name of a module"),
            );
            return;
        }

        let right_side = match &assignment.kind {
            AstKind::Expression { child, .. } => child.as_ref(),
            _ => assignment.as_ref(),
        };
        let folded = right_side.optimize();
        let right_side = folded.as_ref().unwrap_or(right_side);
        let is_literal = right_side.is_literal_node();

        let symbol = Symbol {
            decl_id: Some(node.id),
            decl_location: location,
            original_name: name.clone(),
            is_const: *is_const,
            is_literal,
            current_value: is_literal.then(|| Box::new(right_side.clone())),
            ..Symbol::default()
        };
        self.state.current_level().locals.push((mangled, symbol));

        self.accept(assignment);
    }

    fn accept_alias(&mut self, node: &mut Ast) {
        let module = node.module.clone();
        let location = node.location.clone();
        let AstKind::Alias { name, alias_to } = &mut node.kind else {
            return;
        };

        let mangled = make_variable_name(name, &module);
        if self.state.find_variable(&mangled, true).is_some() {
            let name = name.clone();
            self.state.error(
                ErrorType::RedeclaredIdentifier,
                location,
                format!("identifier '{name}' has already been declared in this scope"),
            );
            return;
        }
        if self.state.find_module(name, &module).is_some() {
            let name = name.clone();
            self.state.error(
                ErrorType::IdentifierIsModule,
                location,
                format!("'{name}' is the name of a module"),
            );
            return;
        }

        self.accept(alias_to);

        let symbol = Symbol {
            decl_id: Some(node.id),
            decl_location: location,
            original_name: name.clone(),
            is_alias: true,
            alias_to: Some(alias_to.clone()),
            ..Symbol::default()
        };
        self.state.current_level().locals.push((mangled, symbol));
    }

    /// Resolves a variable reference and copies the symbol's knowledge into
    /// the node for the code generator.
    fn accept_variable(&mut self, node: &mut Ast) {
        let module = node.module.clone();
        let location = node.location.clone();
        let AstKind::Variable(var) = &mut node.kind else { return };

        let mangled = make_variable_name(&var.name, &module);
        let Some(symbol) = self.state.find_variable(&mangled, false) else {
            let name = var.name.clone();
            self.state.error(
                ErrorType::UndeclaredIdentifier,
                location,
                format!("identifier '{name}' has not been declared"),
            );
            return;
        };

        var.is_alias = symbol.is_alias;
        if symbol.is_alias {
            var.alias_to.clone_from(&symbol.alias_to);
        }
        var.is_const = symbol.is_const;
        var.is_literal = symbol.is_literal;
        var.current_value.clone_from(&symbol.current_value);

        let decl_id = symbol.decl_id;
        let inline_function = symbol.is_function && symbol.is_inline;
        let inlineable_literal = var.is_const && var.is_literal && var.current_value.is_some();

        if inline_function {
            self.state.error(
                ErrorType::ProhibitedActionAttribute,
                location,
                "an 'inline' function cannot be referenced as a value".to_owned(),
            );
        }

        // const literals are inlined, so reading one is not a use
        if let Some(id) = decl_id
            && !inlineable_literal
        {
            self.state.increment_use_count(id);
        }
    }

    fn accept_function_definition(&mut self, node: &mut Ast) {
        let module = node.module.clone();
        let location = node.location.clone();
        let is_inline = node.has_attribute("inline");
        let node_id = node.id;
        let AstKind::FunctionDefinition {
            name,
            arguments,
            block,
            ..
        } = &mut node.kind
        else {
            return;
        };
        let name = name.clone();
        let arguments = arguments.clone();

        let mangled = make_variable_name(&name, &module);
        if self.state.find_variable(&mangled, true).is_some() {
            self.state.error(
                ErrorType::RedeclaredIdentifier,
                location,
                format!("identifier '{name}' has already been declared in this scope"),
            );
            return;
        }
        if self.state.find_module(&name, &module).is_some() {
            self.state.error(
                ErrorType::IdentifierIsModule,
                location,
                format!("'{name}' is the name of a module"),
            );
            return;
        }

        if !is_inline {
            let symbol = Symbol {
                decl_id: Some(node_id),
                decl_location: location.clone(),
                original_name: name.clone(),
                is_function: true,
                ..Symbol::default()
            };
            self.state.current_level().locals.push((mangled.clone(), symbol));
        }

        self.ensure_final_return(block, &name, &location);

        self.increase_block(LevelType::Function);
        for param in &arguments {
            let param_name = make_variable_name(param, &module);
            let symbol = Symbol {
                original_name: param.clone(),
                decl_id: Some(node_id),
                ..Symbol::default()
            };
            self.state.current_level().locals.push((param_name, symbol));
        }
        self.accept(block);
        self.decrease_block();

        if is_inline {
            // declared after the body so an inline function cannot recurse
            let symbol = Symbol {
                decl_id: Some(node_id),
                decl_location: location,
                original_name: name,
                is_const: true,
                is_function: true,
                is_inline: true,
                definition: Some(Box::new(node.clone())),
                ..Symbol::default()
            };
            self.state.current_level().locals.push((mangled, symbol));
        }
    }

    fn accept_function_expression(&mut self, node: &mut Ast) {
        let module = node.module.clone();
        let location = node.location.clone();
        let AstKind::FunctionExpression { arguments, block } = &mut node.kind else {
            return;
        };
        let arguments = arguments.clone();
        let node_id = node.id;

        self.ensure_final_return(block, "unnamed", &location);

        self.increase_block(LevelType::Function);
        for param in &arguments {
            let param_name = make_variable_name(param, &module);
            let symbol = Symbol {
                original_name: param.clone(),
                decl_id: Some(node_id),
                ..Symbol::default()
            };
            self.state.current_level().locals.push((param_name, symbol));
        }
        self.accept(block);
        self.decrease_block();
    }

    /// Appends `return null` when a body does not end in a return,
    /// emitting the missing-final-return info diagnostic.
    fn ensure_final_return(&mut self, block: &mut Ast, name: &str, fn_location: &SourceLocation) {
        let AstKind::Block { children } = &mut block.kind else { return };

        if children.is_empty() {
            let loc = block.location.clone();
            self.state.info(
                ErrorType::EmptyFunctionBody,
                loc.clone(),
                format!("function '{name}' has an empty body"),
            );
            self.state.info(
                ErrorType::MissingFinalReturn,
                fn_location.clone(),
                format!("function '{name}' is missing a final return; 'return null' was added"),
            );
            let ret = self.synthesize_return_null(&loc, &block.module);
            children.push(ret);
            return;
        }

        // ignore trailing empty statements when looking for the return
        let has_return = children
            .iter()
            .rev()
            .find(|child| !matches!(child.kind, AstKind::Statement))
            .is_some_and(|child| matches!(child.kind, AstKind::Return { .. }));

        if !has_return {
            let loc = children.last().map_or_else(|| block.location.clone(), |c| c.location.clone());
            self.state.info(
                ErrorType::MissingFinalReturn,
                fn_location.clone(),
                format!("function '{name}' is missing a final return; 'return null' was added"),
            );
            let ret = self.synthesize_return_null(&loc, &block.module);
            children.push(ret);
        }
    }

    fn synthesize_return_null(&mut self, location: &SourceLocation, module: &str) -> Ast {
        let null_id = self.state.fresh_node_id();
        let null = Ast::new(null_id, location.clone(), module, AstKind::Null);
        let ret_id = self.state.fresh_node_id();
        Ast::new(ret_id, location.clone(), module, AstKind::Return {
            value: Box::new(null),
        })
    }

    fn accept_function_call(&mut self, node: &mut Ast) {
        let module = node.module.clone();
        let location = node.location.clone();
        let AstKind::FunctionCall(call) = &mut node.kind else { return };

        let mangled = make_variable_name(&call.name, &module);
        let Some(symbol) = self.state.find_variable(&mangled, false) else {
            let name = call.name.clone();
            self.state.error(
                ErrorType::UndeclaredIdentifier,
                location,
                format!("identifier '{name}' has not been declared"),
            );
            return;
        };

        if symbol.is_alias {
            call.is_alias = true;
            call.alias_to.clone_from(&symbol.alias_to);
        }
        if symbol.is_inline {
            call.inline_definition.clone_from(&symbol.definition);
        }
        let decl_id = symbol.decl_id;

        if let Some(id) = decl_id {
            self.state.increment_use_count(id);
        }

        for arg in call.arguments.iter_mut().rev() {
            self.accept(arg);
        }
    }

    /// Each enum member becomes a const alias of its integer literal; the
    /// enum type itself never exists at runtime. The member table is also
    /// recorded so `Enum.Member` accesses can be rewritten.
    fn accept_enum(&mut self, node: &mut Ast) {
        let module = node.module.clone();
        let AstKind::Enum { name, members } = &mut node.kind else { return };

        let mut table = Vec::new();
        for (member_name, literal) in members.iter() {
            let AstKind::Integer(value) = literal.kind else { continue };
            table.push((member_name.clone(), value));

            let mangled = make_variable_name(member_name, &module);
            if self.state.find_variable(&mangled, true).is_some() {
                let (member_name, loc) = (member_name.clone(), literal.location.clone());
                self.state.error(
                    ErrorType::RedeclaredIdentifier,
                    loc,
                    format!("identifier '{member_name}' has already been declared in this scope"),
                );
                continue;
            }
            if self.state.find_module(member_name, &module).is_some() {
                let (member_name, loc) = (member_name.clone(), literal.location.clone());
                self.state.error(
                    ErrorType::IdentifierIsModule,
                    loc,
                    format!("'{member_name}' is the name of a module"),
                );
                continue;
            }

            let symbol = Symbol {
                decl_id: Some(literal.id),
                decl_location: literal.location.clone(),
                original_name: member_name.clone(),
                is_alias: true,
                is_const: true,
                alias_to: Some(literal.clone()),
                ..Symbol::default()
            };
            self.state.current_level().locals.push((mangled, symbol));
        }

        self.state.enums.insert(make_variable_name(name, &module), table);
    }

    fn accept_for_loop(&mut self, node: &mut Ast) {
        let AstKind::For {
            initializer,
            conditional,
            afterthought,
            block,
        } = &mut node.kind
        else {
            return;
        };

        if let AstKind::Block { children } = &block.kind
            && children.is_empty()
        {
            let loc = block.location.clone();
            self.state
                .info(ErrorType::EmptyStatementBody, loc, "loop body is empty".to_owned());
        }

        if let Some(initializer) = initializer {
            self.accept(initializer);
        }
        self.accept(conditional);

        self.increase_block(LevelType::Loop);
        self.accept(block);
        self.decrease_block();

        if let Some(afterthought) = afterthought {
            self.accept(afterthought);
        }
    }

    fn accept_while_loop(&mut self, node: &mut Ast) {
        let AstKind::While { conditional, block } = &mut node.kind else {
            return;
        };

        self.accept(conditional);

        if let AstKind::Block { children } = &block.kind
            && children.is_empty()
        {
            let loc = block.location.clone();
            self.state
                .info(ErrorType::EmptyStatementBody, loc, "loop body is empty".to_owned());
        }

        self.increase_block(LevelType::Loop);
        self.accept(block);
        self.decrease_block();
    }

    fn accept_try_catch(&mut self, node: &mut Ast) {
        let AstKind::TryCatch {
            try_block,
            catch_block,
            exception_object,
        } = &mut node.kind
        else {
            return;
        };

        for (body, what) in [(&*try_block, "try"), (&*catch_block, "catch")] {
            if let AstKind::Block { children } = &body.kind
                && children.is_empty()
            {
                let loc = body.location.clone();
                self.state.info(
                    ErrorType::EmptyStatementBody,
                    loc,
                    format!("{what} body is empty"),
                );
            }
        }

        self.increase_block(LevelType::Default);
        self.accept(try_block);
        self.decrease_block();

        self.increase_block(LevelType::Default);
        if let Some(exception_object) = exception_object {
            self.accept(exception_object);
        }
        self.accept(catch_block);
        self.decrease_block();
    }

    fn increase_block(&mut self, level_type: LevelType) {
        self.state.level += 1;
        let level = LevelInfo {
            level_type,
            ..LevelInfo::default()
        };
        if self.state.level == self.state.levels.len() {
            self.state.levels.push(level);
        } else {
            self.state.levels[self.state.level] = level;
        }
    }

    fn decrease_block(&mut self) {
        self.warn_unused_in_current_level();
        self.state.levels[self.state.level] = LevelInfo::default();
        self.state.level -= 1;
    }

    fn warn_unused_in_current_level(&mut self) {
        let mut unused = Vec::new();
        for (_, symbol) in &self.state.levels[self.state.level].locals {
            if let Some(id) = symbol.decl_id
                && self.state.use_count(id) == 0
            {
                unused.push((symbol.original_name.clone(), symbol.decl_location.clone()));
            }
        }
        for (name, location) in unused {
            self.state.info(
                ErrorType::UnusedIdentifier,
                location,
                format!("identifier '{name}' is declared but never used"),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::ErrorLevel, lexer::Lexer};

    fn analyze_source(source: &str) -> (Option<Ast>, CompilerState) {
        let (tokens, lex_errors) = Lexer::new(source, "test.ax").scan_tokens();
        let mut parser = Parser::new(tokens, lex_errors, "test.ax");
        let unit = parser.parse();
        let mut state = CompilerState::new(parser.next_node_id());
        state.errors.append(&mut parser.errors);

        let unit = unit.map(|mut unit| {
            SemanticAnalyzer::new(&mut state).analyze(&mut unit);
            unit
        });
        (unit, state)
    }

    fn fatal_types(state: &CompilerState) -> Vec<ErrorType> {
        state
            .errors
            .iter()
            .filter(|e| e.level == ErrorLevel::Fatal)
            .map(|e| e.error_type)
            .collect()
    }

    #[test]
    fn test_undeclared_identifier() {
        let (_, state) = analyze_source("module M; print x;");
        assert_eq!(fatal_types(&state), vec![ErrorType::UndeclaredIdentifier]);
    }

    #[test]
    fn test_redeclaration_same_scope() {
        let (_, state) = analyze_source("module M; var x = 1; var x = 2;");
        assert!(fatal_types(&state).contains(&ErrorType::RedeclaredIdentifier));
    }

    #[test]
    fn test_shadowing_inner_scope_allowed() {
        let (_, state) = analyze_source("module M; var x = 1; if x: { var x = 2; print x; } print x;");
        assert!(fatal_types(&state).is_empty(), "{:?}", state.errors);
    }

    #[test]
    fn test_inner_declaration_invisible_outside() {
        let (_, state) = analyze_source("module M; var c = 1; if c: { var y = 2; print y; } print y;");
        assert!(fatal_types(&state).contains(&ErrorType::UndeclaredIdentifier));
    }

    #[test]
    fn test_const_assignment_rejected() {
        // the only const declaration surface is a catch's exception object
        let (_, state) = analyze_source("module M; try { print 1; } catch (e) { e = 2; }");
        assert!(fatal_types(&state).contains(&ErrorType::ConstIdentifier));
    }

    #[test]
    fn test_missing_final_return_synthesized() {
        let (unit, state) = analyze_source("module M; func f { print 1; }");
        assert!(
            state
                .errors
                .iter()
                .any(|e| e.error_type == ErrorType::MissingFinalReturn && e.level == ErrorLevel::Info)
        );

        let unit = unit.unwrap();
        let AstKind::Module { children, .. } = &unit.kind else { panic!() };
        let AstKind::FunctionDefinition { block, .. } = &children[1].kind else {
            panic!("expected function definition");
        };
        let AstKind::Block { children: body, .. } = &block.kind else { panic!() };
        assert!(matches!(body.last().unwrap().kind, AstKind::Return { .. }));
    }

    #[test]
    fn test_unreachable_code_warning() {
        let (_, state) = analyze_source("module M; func f { return 1; print 2; }");
        assert!(
            state
                .errors
                .iter()
                .any(|e| e.error_type == ErrorType::UnreachableCode && e.level == ErrorLevel::Warning)
        );
    }

    #[test]
    fn test_unused_identifier_info() {
        let (_, state) = analyze_source("module M; var lonely = 1;");
        assert!(
            state
                .errors
                .iter()
                .any(|e| e.error_type == ErrorType::UnusedIdentifier && e.level == ErrorLevel::Info)
        );
    }

    #[test]
    fn test_use_counts_recorded() {
        let (unit, state) = analyze_source("module M; var x = 1; print x, x;");
        let unit = unit.unwrap();
        let AstKind::Module { children, .. } = &unit.kind else { panic!() };
        let decl_id = children
            .iter()
            .find(|c| matches!(c.kind, AstKind::VariableDeclaration { .. }))
            .unwrap()
            .id;
        assert_eq!(state.use_count(decl_id), 2);
    }

    #[test]
    fn test_enum_member_access_rewritten() {
        let (unit, state) = analyze_source("module M; enum Color { Red, Green = 10, Blue } print Color.Green;");
        assert!(fatal_types(&state).is_empty(), "{:?}", state.errors);

        let unit = unit.unwrap();
        let AstKind::Module { children, .. } = &unit.kind else { panic!() };
        let AstKind::Print { arguments } = &children[2].kind else {
            panic!("expected print");
        };
        let AstKind::Expression { child, .. } = &arguments[0].kind else { panic!() };
        assert!(matches!(child.kind, AstKind::Integer(10)));
    }

    #[test]
    fn test_unknown_enum_member() {
        let (_, state) = analyze_source("module M; enum E { A } print E.Nope;");
        assert!(fatal_types(&state).contains(&ErrorType::UndeclaredIdentifier));
    }

    #[test]
    fn test_using_module_unsupported() {
        let (_, state) = analyze_source("module M; using module Whatever;");
        assert!(fatal_types(&state).contains(&ErrorType::UnsupportedFeature));
    }

    #[test]
    fn test_alias_resolves_to_target() {
        let (_, state) = analyze_source("module M; var x = 1; x = 2; alias y = x; print y;");
        assert!(fatal_types(&state).is_empty(), "{:?}", state.errors);
    }

    #[test]
    fn test_native_module_symbols() {
        let mut state = CompilerState::new(0);
        let def = ModuleDefine::new("Console").define("println", 1).define("readln", 0);
        SemanticAnalyzer::new(&mut state).add_module(&def);

        assert!(state.find_variable("Console_println", true).is_some());
        assert!(state.find_module("Console", "M").is_some());
    }

    #[test]
    fn test_declaring_module_name_is_error() {
        let (_, state) = analyze_source("module M; import 'no_such_file.ax'; var M = 1;");
        // the import fails, but declaring an identifier named like the
        // current module is still caught
        assert!(fatal_types(&state).contains(&ErrorType::IdentifierIsModule));
    }
}
