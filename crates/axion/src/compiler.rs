//! Code generation: a second AST walk that emits the instruction stream.
//!
//! The generator rebuilds the scope level stack (types only, no symbols)
//! so `return` can count how many levels separate it from the enclosing
//! function scope. Control flow uses jump labels resolved at emission time;
//! block structure uses the frame instructions (`ifl`/`dfl`) paired by
//! [`Compiler::increase_block`] / [`Compiler::decrease_block`].

use ahash::AHashSet;

use crate::{
    ast::{Ast, AstKind},
    bytecode::{CodeBuilder, Opcode},
    state::{CompilerState, GLOBAL_LEVEL, LevelInfo, LevelType, make_variable_name},
    syntax::{BinaryOp, UnaryOp},
};

/// Optimization switches; all on by default.
#[derive(Debug, Clone, Copy)]
pub struct CompileOptions {
    pub constant_folding: bool,
    pub remove_unused: bool,
    pub remove_dead_code: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            constant_folding: true,
            remove_unused: true,
            remove_dead_code: true,
        }
    }
}

/// Walks the analyzed AST and fills a [`CodeBuilder`].
pub struct Compiler<'a> {
    state: &'a mut CompilerState,
    options: CompileOptions,
    builder: CodeBuilder,
    /// Import paths whose code has already been spliced in.
    emitted_imports: AHashSet<String>,
}

impl<'a> Compiler<'a> {
    pub fn new(state: &'a mut CompilerState) -> Self {
        Self::with_options(state, CompileOptions::default())
    }

    pub fn with_options(state: &'a mut CompilerState, options: CompileOptions) -> Self {
        Self {
            state,
            options,
            builder: CodeBuilder::new(),
            emitted_imports: AHashSet::new(),
        }
    }

    /// Generates code for the module, refusing to run when any fatal
    /// diagnostic has accumulated.
    pub fn compile(mut self, module: &mut Ast) -> Option<CodeBuilder> {
        if self.state.has_fatal_errors() {
            return None;
        }

        if let AstKind::Module { children, .. } = &mut module.kind {
            for child in children {
                self.accept(child);
            }
        }

        Some(self.builder)
    }

    fn accept(&mut self, node: &mut Ast) {
        match &mut node.kind {
            AstKind::Module { children, .. } | AstKind::Imports { children } => {
                for child in children {
                    self.accept(child);
                }
            }
            AstKind::Import { .. } => self.accept_import(node),
            AstKind::Statement
            | AstKind::Alias { .. }
            | AstKind::UseModule { .. }
            | AstKind::Class { .. }
            | AstKind::Enum { .. }
            | AstKind::SelfObject
            | AstKind::New { .. }
            | AstKind::ModuleAccess { .. } => {}
            AstKind::Block { .. } => self.accept_block(node),
            AstKind::Expression { .. } => self.accept_expression(node),
            AstKind::BinaryOp { .. } => self.accept_binary_op(node),
            AstKind::UnaryOp { .. } => self.accept_unary_op(node),
            AstKind::ArrayAccess { object, index } => {
                self.accept(object);
                self.accept(index);
                self.builder.emit(Opcode::ArrayIndex);
            }
            AstKind::MemberAccess { .. } => self.accept_member_access(node),
            AstKind::VariableDeclaration { .. } => self.accept_variable_declaration(node),
            AstKind::Variable(_) => self.accept_variable(node),
            AstKind::Integer(value) => {
                let value = *value;
                self.builder.emit_load_integer(value);
            }
            AstKind::Float(value) => {
                let value = *value;
                self.builder.emit_load_float(value);
            }
            AstKind::StringLiteral(text) => {
                let text = text.clone();
                self.builder.emit_with_string(Opcode::LoadString, &text);
            }
            AstKind::True => self.builder.emit_load_integer(1),
            AstKind::False => self.builder.emit_load_integer(0),
            AstKind::Null => self.builder.emit(Opcode::LoadNull),
            AstKind::FunctionDefinition { .. } => self.accept_function_definition(node),
            AstKind::FunctionExpression { .. } => self.accept_function_expression(node),
            AstKind::FunctionCall(_) => self.accept_function_call(node),
            AstKind::If { .. } => self.accept_if(node),
            AstKind::Print { .. } => self.accept_print(node),
            AstKind::Return { .. } => self.accept_return(node),
            AstKind::For { .. } => self.accept_for_loop(node),
            AstKind::While { .. } => self.accept_while_loop(node),
            AstKind::TryCatch { .. } => self.accept_try_catch(node),
        }
    }

    /// Splices the imported module's code in place of the import, once per
    /// resolved path.
    fn accept_import(&mut self, node: &Ast) {
        let AstKind::Import {
            import_str,
            relative_path,
            ..
        } = &node.kind
        else {
            return;
        };

        let path = format!("{relative_path}{import_str}");
        if !self.emitted_imports.insert(path.clone()) {
            return;
        }

        // the module was analyzed in place; emit from a working copy
        let Some(module) = self.state.other_modules.get(&path).cloned() else {
            return;
        };
        let mut module = module;
        if let AstKind::Module { children, .. } = &mut module.kind {
            for child in children {
                self.accept(child);
            }
        }
    }

    fn accept_block(&mut self, node: &mut Ast) {
        let AstKind::Block { children } = &mut node.kind else { return };

        for child in children {
            let is_return = matches!(child.kind, AstKind::Return { .. });
            self.accept(child);

            // anything after a return in the same block is dead
            if self.options.remove_dead_code && is_return {
                break;
            }
        }
    }

    fn accept_expression(&mut self, node: &mut Ast) {
        let AstKind::Expression {
            child,
            should_clear_stack,
        } = &mut node.kind
        else {
            return;
        };
        let should_clear_stack = *should_clear_stack;

        if self.options.constant_folding
            && let Some(folded) = child.optimize()
        {
            **child = folded;
        }
        self.accept(child);

        if should_clear_stack {
            self.builder.emit(Opcode::Pop);
        }
    }

    fn accept_binary_op(&mut self, node: &mut Ast) {
        let AstKind::BinaryOp { op, left, right } = &mut node.kind else {
            return;
        };
        let op = *op;

        // a > b emits as b < a, a >= b as b <= a
        if op == BinaryOp::Greater || op == BinaryOp::GreaterEqual {
            self.accept(right);
            self.accept(left);
            let opcode = if op == BinaryOp::Greater {
                Opcode::Less
            } else {
                Opcode::LessEql
            };
            self.builder.emit(opcode);
            return;
        }

        self.accept(left);
        self.accept(right);

        let opcode = match op {
            BinaryOp::Power => Opcode::Pow,
            BinaryOp::Multiply => Opcode::Mul,
            BinaryOp::Divide | BinaryOp::FloorDivide => Opcode::Div,
            BinaryOp::Modulus => Opcode::Mod,
            BinaryOp::Add => Opcode::Add,
            BinaryOp::Subtract => Opcode::Sub,
            BinaryOp::LogicalAnd => Opcode::And,
            BinaryOp::LogicalOr => Opcode::Or,
            BinaryOp::Equals => Opcode::Eql,
            BinaryOp::NotEqual => Opcode::Neql,
            BinaryOp::Less => Opcode::Less,
            BinaryOp::LessEqual => Opcode::LessEql,
            BinaryOp::BitAnd => Opcode::BitAnd,
            BinaryOp::BitOr => Opcode::BitOr,
            BinaryOp::BitXor => Opcode::BitXor,
            BinaryOp::ShiftLeft => Opcode::LeftShift,
            BinaryOp::ShiftRight => Opcode::RightShift,
            BinaryOp::Assign => Opcode::Assign,
            BinaryOp::AddAssign => Opcode::AddAssign,
            BinaryOp::SubtractAssign => Opcode::SubAssign,
            BinaryOp::MultiplyAssign => Opcode::MulAssign,
            BinaryOp::DivideAssign => Opcode::DivAssign,
            // rejected during analysis
            BinaryOp::Greater
            | BinaryOp::GreaterEqual
            | BinaryOp::ModulusAssign
            | BinaryOp::BitAndAssign
            | BinaryOp::BitXorAssign
            | BinaryOp::BitOrAssign => return,
        };
        self.builder.emit(opcode);
    }

    fn accept_unary_op(&mut self, node: &mut Ast) {
        let AstKind::UnaryOp { op, child } = &mut node.kind else { return };
        let op = *op;

        self.accept(child);

        match op {
            UnaryOp::LogicalNot => self.builder.emit(Opcode::UnaryNot),
            UnaryOp::Negative => self.builder.emit(Opcode::UnaryMinus),
            // ~x is x ^ -1; the opcode set has no complement instruction
            UnaryOp::BitComplement => {
                self.builder.emit_load_integer(-1);
                self.builder.emit(Opcode::BitXor);
            }
            // identity; ++/-- are rejected during analysis
            UnaryOp::Positive | UnaryOp::Increment | UnaryOp::Decrement => {}
        }
    }

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

        self.accept(left);
        match &mut right.kind {
            AstKind::MemberAccess { .. } => {
                let member = match &right.kind {
                    AstKind::MemberAccess { left_str, .. } => left_str.clone(),
                    _ => unreachable!(),
                };
                self.accept(right);
                self.builder.emit_with_string(Opcode::LoadMember, &member);
            }
            AstKind::Variable(var) => {
                let name = var.name.clone();
                self.builder.emit_with_string(Opcode::LoadMember, &name);
            }
            AstKind::FunctionCall(call) => {
                let name = call.name.clone();
                let nargs = call.arguments.len();
                for arg in &mut call.arguments {
                    self.accept(arg);
                }
                self.builder.emit_with_string(Opcode::LoadMember, &name);
                self.builder
                    .emit_with_u32(Opcode::InvokeObject, u32::try_from(nargs).unwrap_or(u32::MAX));
            }
            _ => {}
        }
    }

    fn accept_variable_declaration(&mut self, node: &mut Ast) {
        let module = node.module.clone();
        let use_count = self.state.use_count(node.id);
        let AstKind::VariableDeclaration { name, assignment, .. } = &mut node.kind else {
            return;
        };
        let name = name.clone();

        // the initializer may have side effects, so it always runs
        self.accept(assignment);

        if use_count != 0 || !self.options.remove_unused {
            let mangled = make_variable_name(&name, &module);
            self.builder.emit_with_string(Opcode::StoreAsLocal, &mangled);
        } else {
            self.builder.emit(Opcode::Pop);
        }
    }

    fn accept_variable(&mut self, node: &mut Ast) {
        let module = node.module.clone();
        let AstKind::Variable(var) = &mut node.kind else { return };

        if var.is_alias {
            if let Some(alias_to) = &mut var.alias_to {
                let mut target = alias_to.clone();
                self.accept(&mut target);
            }
            return;
        }

        if self.options.constant_folding
            && var.is_const
            && var.is_literal
            && var.current_value.is_some()
        {
            let mut literal = var.current_value.clone().expect("checked above");
            self.accept(&mut literal);
            return;
        }

        let mangled = make_variable_name(&var.name, &module);
        self.builder.emit_with_string(Opcode::LoadLocal, &mangled);
    }

    /// Emits a function definition: create the function value, store it,
    /// then the body guarded by a jump so defining it does not run it.
    fn accept_function_definition(&mut self, node: &mut Ast) {
        let module = node.module.clone();
        let use_count = self.state.use_count(node.id);
        let is_inline = node.has_attribute("inline");
        let AstKind::FunctionDefinition {
            name,
            arguments,
            block,
            is_variadic,
            ..
        } = &mut node.kind
        else {
            return;
        };

        if self.options.remove_unused && use_count == 0 {
            return;
        }
        if is_inline {
            // spliced at call sites, never materialized
            return;
        }

        let is_global = self.state.function_level == 0;
        self.state.function_level += 1;

        self.state.block_id_counter += 1;
        let body_id = self.state.block_id_counter;
        self.state.block_id_counter += 1;
        let after_id = self.state.block_id_counter;

        let mangled = make_variable_name(name, &module);
        let nargs = u32::try_from(arguments.len()).unwrap_or(u32::MAX);

        self.builder.emit_new_function(is_global, nargs, *is_variadic, body_id);
        self.builder.emit_with_string(Opcode::StoreAsLocal, &mangled);

        self.builder.mark_label(body_id);
        self.builder.emit_with_u32(Opcode::Jump, after_id);

        self.increase_block(LevelType::Function);
        for argument in arguments.iter().rev() {
            let arg_name = make_variable_name(argument, &module);
            self.builder.emit_with_string(Opcode::StoreAsLocal, &arg_name);
        }
        self.accept(block);
        self.decrease_block();

        // placed after the block close so the body finishes its frame
        // before control returns
        self.builder.emit(Opcode::Return);
        self.builder.mark_label(after_id);

        self.state.function_level -= 1;
    }

    fn accept_function_expression(&mut self, node: &mut Ast) {
        let module = node.module.clone();
        let AstKind::FunctionExpression { arguments, block } = &mut node.kind else {
            return;
        };

        let is_global = self.state.function_level == 0;
        self.state.function_level += 1;

        self.state.block_id_counter += 1;
        let body_id = self.state.block_id_counter;
        self.state.block_id_counter += 1;
        let after_id = self.state.block_id_counter;

        let nargs = u32::try_from(arguments.len()).unwrap_or(u32::MAX);
        self.builder.emit_new_function(is_global, nargs, false, body_id);

        self.builder.mark_label(body_id);
        self.builder.emit_with_u32(Opcode::Jump, after_id);

        self.increase_block(LevelType::Function);
        for argument in arguments.iter().rev() {
            let arg_name = make_variable_name(argument, &module);
            self.builder.emit_with_string(Opcode::StoreAsLocal, &arg_name);
        }
        self.accept(block);
        self.decrease_block();

        self.builder.emit(Opcode::Return);
        self.builder.mark_label(after_id);

        self.state.function_level -= 1;
    }

    /// Calls push arguments left to right. Inline targets have their body
    /// spliced here instead of being invoked.
    fn accept_function_call(&mut self, node: &mut Ast) {
        let module = node.module.clone();
        let AstKind::FunctionCall(call) = &mut node.kind else { return };
        let nargs = u32::try_from(call.arguments.len()).unwrap_or(u32::MAX);

        for arg in &mut call.arguments {
            self.accept(arg);
        }

        if call.is_alias {
            if let Some(alias_to) = &call.alias_to {
                let mut target = alias_to.clone();
                self.accept(&mut target);
            }
            self.builder.emit_with_u32(Opcode::InvokeObject, nargs);
            return;
        }

        if let Some(definition) = &call.inline_definition {
            let mut definition = definition.clone();
            self.splice_inline_body(&mut definition);
            return;
        }

        let mangled = make_variable_name(&call.name, &module);
        self.builder.emit_with_string(Opcode::LoadLocal, &mangled);
        self.builder.emit_with_u32(Opcode::InvokeObject, nargs);
    }

    fn splice_inline_body(&mut self, definition: &mut Ast) {
        let def_module = definition.module.clone();
        let AstKind::FunctionDefinition {
            arguments, block, ..
        } = &mut definition.kind
        else {
            return;
        };

        self.state.function_level += 1;
        self.builder.emit(Opcode::Irl);
        self.increase_block(LevelType::Function);

        for argument in arguments.iter().rev() {
            let arg_name = make_variable_name(argument, &def_module);
            self.builder.emit_with_string(Opcode::StoreAsLocal, &arg_name);
        }

        self.accept(block);
        self.decrease_block();
        self.state.function_level -= 1;
    }

    /// `if`: test, conditionally skip the then-block, optionally skip the
    /// else-block, and finally pop the condition that stayed on the stack.
    fn accept_if(&mut self, node: &mut Ast) {
        let AstKind::If {
            conditional,
            block,
            else_block,
        } = &mut node.kind
        else {
            return;
        };

        self.state.block_id_counter += 1;
        let after_if_id = self.state.block_id_counter;

        self.accept(conditional);
        self.builder.emit_with_u32(Opcode::JumpIfFalse, after_if_id);

        self.builder.emit(Opcode::Irl);
        self.increase_block(LevelType::Condition);
        self.accept(block);
        self.decrease_block();

        self.builder.mark_label(after_if_id);

        if let Some(else_block) = else_block {
            self.state.block_id_counter += 1;
            let after_else_id = self.state.block_id_counter;

            self.builder.emit_with_u32(Opcode::JumpIfTrue, after_else_id);

            self.builder.emit(Opcode::Irl);
            self.increase_block(LevelType::Condition);
            self.accept(else_block);
            self.decrease_block();

            self.builder.mark_label(after_else_id);
        }

        self.builder.emit(Opcode::Pop);
    }

    /// Arguments are emitted in reverse so the VM's pops print them left to
    /// right.
    fn accept_print(&mut self, node: &mut Ast) {
        let AstKind::Print { arguments } = &mut node.kind else { return };
        let count = u32::try_from(arguments.len()).unwrap_or(u32::MAX);

        for arg in arguments.iter_mut().rev() {
            self.accept(arg);
        }
        self.builder.emit_with_u32(Opcode::Print, count);
    }

    /// `return`: push the value, then drop one read level per scope between
    /// here and the enclosing function.
    fn accept_return(&mut self, node: &mut Ast) {
        let AstKind::Return { value } = &mut node.kind else { return };

        self.accept(value);

        let mut start = self.state.level;
        let mut counter: u8 = 1;
        while start > GLOBAL_LEVEL && self.state.levels[start].level_type != LevelType::Function {
            counter = counter.saturating_add(1);
            start -= 1;
        }

        self.builder.emit(Opcode::Drl);
        self.builder.push_u8(counter);
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

        let empty_body = matches!(&block.kind, AstKind::Block { children } if children.is_empty());
        if self.options.remove_dead_code && empty_body {
            return;
        }

        self.state.block_id_counter += 1;
        let top_id = self.state.block_id_counter;
        self.state.block_id_counter += 1;
        let bottom_id = self.state.block_id_counter;

        // the initializer gets its own enclosing block
        self.builder.emit(Opcode::Irl);
        self.increase_block(LevelType::Default);

        if let Some(initializer) = initializer {
            self.accept(initializer);
        }

        self.builder.mark_label(top_id);

        self.accept(conditional);
        self.builder.emit_with_u32(Opcode::JumpIfFalse, bottom_id);

        self.builder.emit(Opcode::Irl);
        self.increase_block(LevelType::Loop);
        self.accept(block);
        self.decrease_block();

        if let Some(afterthought) = afterthought {
            self.accept(afterthought);
            self.builder.emit(Opcode::Pop);
        }

        // the conditional's value
        self.builder.emit(Opcode::Pop);
        self.builder.emit_with_u32(Opcode::Jump, top_id);

        self.builder.mark_label(bottom_id);
        // the final (false) conditional value
        self.builder.emit(Opcode::Pop);

        self.decrease_block();
    }

    fn accept_while_loop(&mut self, node: &mut Ast) {
        let AstKind::While { conditional, block } = &mut node.kind else {
            return;
        };

        let empty_body = matches!(&block.kind, AstKind::Block { children } if children.is_empty());
        if self.options.remove_dead_code && empty_body {
            return;
        }

        self.state.block_id_counter += 1;
        let top_id = self.state.block_id_counter;
        self.state.block_id_counter += 1;
        let bottom_id = self.state.block_id_counter;

        self.builder.mark_label(top_id);

        self.accept(conditional);
        self.builder.emit_with_u32(Opcode::JumpIfFalse, bottom_id);

        self.builder.emit(Opcode::Irl);
        self.increase_block(LevelType::Loop);
        self.accept(block);
        self.decrease_block();

        // the conditional's value
        self.builder.emit(Opcode::Pop);
        self.builder.emit_with_u32(Opcode::Jump, top_id);

        self.builder.mark_label(bottom_id);
        // the final (false) conditional value
        self.builder.emit(Opcode::Pop);
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

        let empty_try = matches!(&try_block.kind, AstKind::Block { children } if children.is_empty());
        if self.options.remove_dead_code && empty_try {
            return;
        }

        self.builder.emit(Opcode::TryCatchBlock);

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
        self.builder.emit(Opcode::Ifl);
    }

    fn decrease_block(&mut self) {
        self.state.levels[self.state.level] = LevelInfo::default();
        self.state.level -= 1;
        self.builder.emit(Opcode::Dfl);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lexer::Lexer, parser::Parser, semantic::SemanticAnalyzer};

    fn compile_source(source: &str) -> (Vec<u8>, CompilerState) {
        let (tokens, lex_errors) = Lexer::new(source, "test.ax").scan_tokens();
        let mut parser = Parser::new(tokens, lex_errors, "test.ax");
        let mut unit = parser.parse().expect("parse failed");
        let mut state = CompilerState::new(parser.next_node_id());
        state.errors.append(&mut parser.errors);

        SemanticAnalyzer::new(&mut state).analyze(&mut unit);
        assert!(!state.has_fatal_errors(), "{:?}", state.errors);

        let builder = Compiler::new(&mut state).compile(&mut unit).expect("codegen refused");
        let (bytes, ..) = builder.into_parts();
        (bytes, state)
    }

    fn opcodes(bytes: &[u8]) -> Vec<Opcode> {
        // decode just enough to walk instruction starts
        let mut out = Vec::new();
        let mut pos = 0usize;
        while pos < bytes.len() {
            let op = Opcode::from_byte(bytes[pos]).expect("bad opcode in stream");
            out.push(op);
            pos += 1;
            pos += match op {
                Opcode::Drl => 1,
                Opcode::Jump | Opcode::JumpIfTrue | Opcode::JumpIfFalse | Opcode::InvokeObject | Opcode::Print => 4,
                Opcode::Break | Opcode::Continue => 4,
                Opcode::LoadInteger | Opcode::LoadFloat => 8,
                Opcode::StoreAddress => 12,
                Opcode::NewFunction => 14,
                Opcode::StoreAsLocal
                | Opcode::NewVariable
                | Opcode::NewNativeObject
                | Opcode::NewMember
                | Opcode::LoadMember
                | Opcode::LoadLocal
                | Opcode::LoadString => {
                    let len = i32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap());
                    4 + usize::try_from(len).unwrap()
                }
                Opcode::InvokeNative => {
                    let len = i32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap());
                    4 + usize::try_from(len).unwrap() + 4
                }
                _ => 0,
            };
        }
        out
    }

    #[test]
    fn test_literal_print_folds() {
        let (bytes, _) = compile_source("module M; print 2 + 3 * 4;");
        let ops = opcodes(&bytes);
        // folded to one literal; no arithmetic opcodes survive
        assert_eq!(ops, vec![Opcode::LoadInteger, Opcode::Print]);
        // the folded value is 14
        assert_eq!(&bytes[1..9], &14i64.to_le_bytes());
    }

    #[test]
    fn test_unused_declaration_popped() {
        let (bytes, _) = compile_source("module M; var unused = 1;");
        let ops = opcodes(&bytes);
        assert_eq!(ops, vec![Opcode::LoadInteger, Opcode::Pop]);
    }

    #[test]
    fn test_used_declaration_stored() {
        let (bytes, _) = compile_source("module M; var x = 1; print x;");
        let ops = opcodes(&bytes);
        assert!(ops.contains(&Opcode::StoreAsLocal));
        assert!(ops.contains(&Opcode::LoadLocal));
    }

    #[test]
    fn test_greater_swaps_to_less() {
        let (bytes, _) = compile_source("module M; var a = 1; var b = 2; print a > b;");
        let ops = opcodes(&bytes);
        assert!(ops.contains(&Opcode::Less));
        assert!(!ops.contains(&Opcode::Greater));
    }

    #[test]
    fn test_if_shape() {
        let (bytes, _) = compile_source("module M; var c = 1; if c: print 1;");
        let ops = opcodes(&bytes);
        let jump_pos = ops.iter().position(|o| *o == Opcode::JumpIfFalse).unwrap();
        assert_eq!(ops[jump_pos + 1], Opcode::Irl);
        assert_eq!(ops[jump_pos + 2], Opcode::Ifl);
        // the condition is popped at the end
        assert_eq!(*ops.last().unwrap(), Opcode::Pop);
    }

    #[test]
    fn test_while_shape() {
        let (bytes, state) = compile_source("module M; var i = 0; while i < 3 { i += 1; }");
        let ops = opcodes(&bytes);
        assert!(ops.contains(&Opcode::JumpIfFalse));
        assert!(ops.contains(&Opcode::Jump));
        // two labels were laid down for the loop
        assert!(state.block_id_counter >= 2);
    }

    #[test]
    fn test_function_definition_shape() {
        let (bytes, _) = compile_source("module M; func f(a) { return a; } print f(1);");
        let ops = opcodes(&bytes);
        let newf = ops.iter().position(|o| *o == Opcode::NewFunction).unwrap();
        assert_eq!(ops[newf + 1], Opcode::StoreAsLocal);
        assert_eq!(ops[newf + 2], Opcode::Jump);
        assert_eq!(ops[newf + 3], Opcode::Ifl);
        assert!(ops.contains(&Opcode::Return));
        assert!(ops.contains(&Opcode::InvokeObject));
    }

    #[test]
    fn test_unused_function_elided() {
        let (bytes, _) = compile_source("module M; func ghost { return 1; }");
        let ops = opcodes(&bytes);
        assert!(!ops.contains(&Opcode::NewFunction));
    }

    #[test]
    fn test_return_counts_levels() {
        let (bytes, _) = compile_source("module M; func f(n) { if n: return 1; return 2; } print f(0);");
        // the return inside the if must drop two read levels, the direct
        // return one
        let mut drls = Vec::new();
        let mut pos = 0usize;
        while pos < bytes.len() {
            if bytes[pos] == Opcode::Drl as u8 {
                drls.push(bytes[pos + 1]);
            }
            let op = Opcode::from_byte(bytes[pos]).unwrap();
            pos += 1 + match op {
                Opcode::Drl => 1,
                Opcode::Jump | Opcode::JumpIfTrue | Opcode::JumpIfFalse | Opcode::InvokeObject | Opcode::Print => 4,
                Opcode::LoadInteger | Opcode::LoadFloat => 8,
                Opcode::NewFunction => 14,
                Opcode::StoreAsLocal | Opcode::LoadLocal | Opcode::LoadString => {
                    let len = i32::from_le_bytes(bytes[pos + 1..pos + 5].try_into().unwrap());
                    4 + usize::try_from(len).unwrap()
                }
                _ => 0,
            };
        }
        assert_eq!(drls, vec![2, 1]);
    }

    #[test]
    fn test_print_args_reversed() {
        let (bytes, _) = compile_source("module M; print 1, 2;");
        let ops = opcodes(&bytes);
        assert_eq!(ops, vec![Opcode::LoadInteger, Opcode::LoadInteger, Opcode::Print]);
        // first pushed literal is the rightmost argument
        assert_eq!(&bytes[1..9], &2i64.to_le_bytes());
    }

    #[test]
    fn test_const_literal_inlined() {
        // enum members are const literal aliases: reading one re-emits the
        // literal instead of a local load
        let (bytes, _) = compile_source("module M; enum E { A = 5 } print A;");
        let ops = opcodes(&bytes);
        assert_eq!(ops, vec![Opcode::LoadInteger, Opcode::Print]);
        assert_eq!(&bytes[1..9], &5i64.to_le_bytes());
    }

    #[test]
    fn test_inline_function_spliced() {
        let source = "module M; attribute { 'inline' } func double(x) { return x * 2; } print double(4);";
        let (bytes, _) = compile_source(source);
        let ops = opcodes(&bytes);
        assert!(!ops.contains(&Opcode::NewFunction));
        assert!(!ops.contains(&Opcode::InvokeObject));
        // the spliced body stores the argument into a frame local
        assert!(ops.contains(&Opcode::StoreAsLocal));
    }

    #[test]
    fn test_try_catch_shape() {
        let (bytes, _) = compile_source("module M; try { print 1; } catch (e) { print 2; }");
        let ops = opcodes(&bytes);
        assert_eq!(ops[0], Opcode::TryCatchBlock);
        assert_eq!(ops[1], Opcode::Ifl);
        // catch block follows the try block's close
        let dfl = ops.iter().position(|o| *o == Opcode::Dfl).unwrap();
        assert_eq!(ops[dfl + 1], Opcode::Ifl);
    }

    #[test]
    fn test_deterministic_output() {
        let source = "module M; var x = 1; func f(a) { return a + x; } print f(2);";
        let (a, _) = compile_source(source);
        let (b, _) = compile_source(source);
        assert_eq!(a, b);
    }
}
