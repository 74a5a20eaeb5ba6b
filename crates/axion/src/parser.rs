//! Recursive-descent parser: tokens in, module AST out.
//!
//! One token of lookahead with occasional peeking further. The parser
//! recovers from most syntax errors (emitting a diagnostic and consuming at
//! least one token) so later errors stay useful; a missing `module` header
//! is the only unrecoverable shape.

use crate::{
    ast::{Ast, AstKind, FunctionCallNode, NodeId, VariableNode},
    error::{BuildMessage, ErrorLevel, ErrorType},
    location::SourceLocation,
    syntax::{Keyword, binary_op_from_str, keyword_to_str, precedence, unary_op_from_str},
    token::{Token, TokenKind},
};

/// Parser over a lexed token buffer.
pub struct Parser {
    tokens: Vec<Token>,
    position: usize,
    filepath: String,
    module_name: String,
    next_node_id: NodeId,
    /// Names of variables currently being declared, for `new` expressions.
    variable_names: Vec<String>,
    pub errors: Vec<BuildMessage>,
}

impl Parser {
    /// Creates a parser, inheriting any diagnostics the lexer produced.
    #[must_use]
    pub fn new(tokens: Vec<Token>, lexer_errors: Vec<BuildMessage>, filepath: &str) -> Self {
        Self {
            tokens,
            position: 0,
            filepath: filepath.to_owned(),
            module_name: String::new(),
            next_node_id: 0,
            variable_names: Vec::new(),
            errors: lexer_errors,
        }
    }

    /// Starts node-id numbering above ids already handed out, so imported
    /// modules never collide with the importing unit in the use-count
    /// table.
    pub fn set_node_id_base(&mut self, base: NodeId) {
        self.next_node_id = base;
    }

    /// The next unassigned node id; callers continue numbering from here.
    #[must_use]
    pub fn next_node_id(&self) -> NodeId {
        self.next_node_id
    }

    /// Parses a whole compilation unit.
    ///
    /// The first required construct is `module <Identifier>`; everything
    /// after it is a statement of the module.
    pub fn parse(&mut self) -> Option<Ast> {
        if !self.match_read_keyword(Keyword::Module) {
            self.error(ErrorType::ExpectedModule, self.location(), "expected a module declaration".to_owned());
            return None;
        }

        let ident = self.expect_read(TokenKind::Identifier)?;
        let module_name = ident.text.clone();
        if module_name.chars().next().is_some_and(char::is_lowercase) {
            self.info(
                ErrorType::ModuleNameBeginsLowercase,
                ident.location.clone(),
                format!("module name '{module_name}' should begin with an uppercase letter"),
            );
        }

        self.module_name.clone_from(&module_name);

        let mut children = Vec::new();
        while self.position < self.tokens.len() {
            if let Some(stmt) = self.parse_statement() {
                children.push(stmt);
            }
        }

        Some(self.make(ident.location, AstKind::Module {
            name: module_name,
            children,
        }))
    }

    fn make(&mut self, location: SourceLocation, kind: AstKind) -> Ast {
        let id = self.next_node_id;
        self.next_node_id += 1;
        Ast::new(id, location, self.module_name.clone(), kind)
    }

    fn location(&self) -> SourceLocation {
        if self.tokens.is_empty() {
            return SourceLocation::start_of(&self.filepath);
        }
        match self.peek(0).or_else(|| self.peek_back(1)) {
            Some(token) => token.location.clone(),
            None => SourceLocation::start_of(&self.filepath),
        }
    }

    fn peek(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.position + n)
    }

    fn peek_back(&self, n: usize) -> Option<&Token> {
        self.position.checked_sub(n).and_then(|idx| self.tokens.get(idx))
    }

    fn read(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn matches(&self, kind: TokenKind) -> bool {
        self.peek(0).is_some_and(|t| t.kind == kind)
    }

    fn matches_text(&self, kind: TokenKind, text: &str) -> bool {
        self.peek(0).is_some_and(|t| t.kind == kind && t.text == text)
    }

    fn matches_keyword(&self, keyword: Keyword) -> bool {
        self.matches_text(TokenKind::Keyword, keyword_to_str(keyword))
    }

    fn match_read(&mut self, kind: TokenKind) -> bool {
        if self.matches(kind) {
            self.position += 1;
            return true;
        }
        false
    }

    fn match_read_token(&mut self, kind: TokenKind) -> Option<Token> {
        if self.matches(kind) {
            return self.read();
        }
        None
    }

    fn match_read_text(&mut self, kind: TokenKind, text: &str) -> bool {
        if self.matches_text(kind, text) {
            self.position += 1;
            return true;
        }
        false
    }

    fn match_read_keyword(&mut self, keyword: Keyword) -> bool {
        self.match_read_text(TokenKind::Keyword, keyword_to_str(keyword))
    }

    /// Reads a token of the given kind or reports the appropriate
    /// diagnostic, consuming the offending token so parsing can continue.
    fn expect_read(&mut self, kind: TokenKind) -> Option<Token> {
        if let Some(token) = self.match_read_token(kind) {
            return Some(token);
        }

        match self.read() {
            Some(bad) => match kind {
                TokenKind::Identifier => {
                    self.error(
                        ErrorType::ExpectedIdentifier,
                        bad.location,
                        "expected an identifier".to_owned(),
                    );
                }
                TokenKind::OpenParenthesis
                | TokenKind::CloseParenthesis
                | TokenKind::OpenBrace
                | TokenKind::CloseBrace
                | TokenKind::OpenBracket
                | TokenKind::CloseBracket
                | TokenKind::Semicolon
                | TokenKind::Colon
                | TokenKind::Comma => {
                    self.error(ErrorType::ExpectedToken, bad.location, format!("expected {kind}"));
                }
                _ => {
                    let text = bad.text.clone();
                    self.error(
                        ErrorType::UnexpectedToken,
                        bad.location,
                        format!("unexpected token '{text}'"),
                    );
                }
            },
            None => {
                self.error(
                    ErrorType::UnexpectedEof,
                    self.location(),
                    "unexpected end of file".to_owned(),
                );
            }
        }
        None
    }

    fn expect_read_keyword(&mut self, keyword: Keyword) -> Option<Token> {
        let current = self.peek(0).cloned();
        if self.match_read_text(TokenKind::Keyword, keyword_to_str(keyword)) {
            return current;
        }

        match self.read() {
            Some(bad) => {
                self.error(
                    ErrorType::ExpectedToken,
                    bad.location,
                    format!("expected '{}'", keyword_to_str(keyword)),
                );
            }
            None => {
                self.error(
                    ErrorType::UnexpectedEof,
                    self.location(),
                    "unexpected end of file".to_owned(),
                );
            }
        }
        None
    }

    /// Precedence of the operator at the cursor, or -1 when the next token
    /// is not a binary operator.
    fn op_precedence(&mut self) -> i32 {
        let Some(current) = self.peek(0) else { return -1 };
        if current.kind != TokenKind::Operator {
            return -1;
        }

        match binary_op_from_str(&current.text) {
            Some(op) => precedence(op),
            None => {
                let (text, location) = (current.text.clone(), current.location.clone());
                self.error(
                    ErrorType::IllegalOperator,
                    location,
                    format!("illegal operator '{text}'"),
                );
                -1
            }
        }
    }

    fn parse_statement(&mut self) -> Option<Ast> {
        if self.match_read(TokenKind::Semicolon) {
            let loc = self.location();
            return Some(self.make(loc, AstKind::Statement));
        }

        let node = if self.matches(TokenKind::Keyword) {
            self.warn_missing_semicolon_before_keyword();

            let text = self.peek(0).map(|t| t.text.clone()).unwrap_or_default();
            match text.as_str() {
                "var" => self.parse_variable_declaration(),
                "alias" => self.parse_alias(),
                "using" => self.parse_using(),
                "attribute" => self.parse_attribute(),
                "class" => self.parse_class(),
                "enum" => self.parse_enum(),
                "import" => self.parse_imports(),
                "func" => self.parse_function_definition(),
                "if" => self.parse_if_statement(),
                "return" => self.parse_return_statement(),
                "for" => self.parse_for_loop(),
                "while" => self.parse_while_loop(),
                "print" => self.parse_print_statement(),
                "try" => self.parse_try_catch(),
                "else" => {
                    self.error(
                        ErrorType::ElseOutsideIf,
                        self.location(),
                        "'else' outside of an if statement".to_owned(),
                    );
                    self.read();
                    None
                }
                "true" | "false" | "null" | "self" | "new" => self.parse_expression(true),
                _ => {
                    self.error(
                        ErrorType::UnsupportedFeature,
                        self.location(),
                        format!("'{text}' is reserved but not supported"),
                    );
                    self.read();
                    None
                }
            }
        } else if self.matches(TokenKind::OpenBrace) {
            self.parse_code_block()
        } else {
            let node = self.parse_expression(true);
            if node.is_none() {
                self.error(
                    ErrorType::IllegalExpression,
                    self.location(),
                    "illegal expression".to_owned(),
                );
            }
            node
        };

        self.match_read(TokenKind::Semicolon);
        node
    }

    fn warn_missing_semicolon_before_keyword(&mut self) {
        let Some(before) = self.peek_back(1) else { return };
        let ok = matches!(
            before.kind,
            TokenKind::Semicolon
                | TokenKind::OpenBrace
                | TokenKind::CloseBrace
                | TokenKind::Colon
                | TokenKind::Period
                | TokenKind::RightArrow
                | TokenKind::LeftArrow
        );
        if !ok {
            let loc = before.location.clone();
            self.warning(ErrorType::ExpectedSemicolon, loc, "expected ';'".to_owned());
        }
    }

    /// `import 'file'` or `import { 'a', 'b' }`.
    fn parse_imports(&mut self) -> Option<Ast> {
        let tok = self.expect_read_keyword(Keyword::Import)?;

        if !self.match_read(TokenKind::OpenBrace) {
            return self.parse_import();
        }

        let mut imports = Vec::new();
        while self.peek(0).is_some() {
            if self.match_read(TokenKind::CloseBrace) {
                break;
            }
            if let Some(import) = self.parse_import() {
                imports.push(import);
            }
            if self.match_read(TokenKind::CloseBrace) || self.expect_read(TokenKind::Comma).is_none() {
                break;
            }
        }

        Some(self.make(tok.location, AstKind::Imports { children: imports }))
    }

    fn parse_import(&mut self) -> Option<Ast> {
        let local_path = match self.filepath.rfind(['/', '\\']) {
            Some(idx) => format!("{}/", &self.filepath[..idx]),
            None => String::new(),
        };

        let (token, is_module_import) = if let Some(tok) = self.match_read_token(TokenKind::String) {
            (tok, false)
        } else if let Some(tok) = self.match_read_token(TokenKind::Identifier) {
            (tok, true)
        } else {
            let loc = self.location();
            let text = self.read().map(|t| t.text).unwrap_or_default();
            self.error(ErrorType::UnexpectedToken, loc, format!("unexpected token '{text}'"));
            return None;
        };

        if format!("{local_path}{}", token.text) == self.filepath {
            self.error(
                ErrorType::ImportCurrentFile,
                token.location,
                "a file cannot import itself".to_owned(),
            );
            return None;
        }

        let import_str = token.text.clone();
        Some(self.make(token.location, AstKind::Import {
            import_str,
            relative_path: local_path,
            is_module_import,
        }))
    }

    /// `var x;`, `var x = expr;`, or `var x: expr;`.
    fn parse_variable_declaration(&mut self) -> Option<Ast> {
        let tok = self.expect_read_keyword(Keyword::Var)?;

        if !self.matches(TokenKind::Identifier) {
            self.error(
                ErrorType::ExpectedIdentifier,
                self.location(),
                "expected an identifier".to_owned(),
            );
            return None;
        }

        let ident = self.expect_read(TokenKind::Identifier)?;
        let name = ident.text.clone();
        if name.chars().next().is_some_and(char::is_uppercase) {
            self.info(
                ErrorType::VariableNameBeginsUppercase,
                ident.location,
                format!("variable name '{name}' should begin with a lowercase letter"),
            );
        }

        self.variable_names.push(name.clone());
        let assignment = if self.match_read_text(TokenKind::Operator, "=") || self.match_read(TokenKind::Colon) {
            self.parse_expression(false)
        } else {
            let loc = self.location();
            Some(self.make(loc, AstKind::Null))
        };
        self.variable_names.pop();

        let assignment = assignment?;
        Some(self.make(tok.location, AstKind::VariableDeclaration {
            name,
            assignment: Box::new(assignment),
            is_const: false,
        }))
    }

    /// `alias name = identifier-path;`
    fn parse_alias(&mut self) -> Option<Ast> {
        let tok = self.expect_read_keyword(Keyword::Alias)?;

        if !self.matches(TokenKind::Identifier) {
            self.error(
                ErrorType::ExpectedIdentifier,
                self.location(),
                "expected an identifier".to_owned(),
            );
            return None;
        }

        let name = self.read()?.text;
        if self.match_read_text(TokenKind::Operator, "=") || self.match_read(TokenKind::Colon) {
            if self.matches(TokenKind::Identifier) {
                let alias_to = self.parse_identifier()?;
                return Some(self.make(tok.location, AstKind::Alias {
                    name,
                    alias_to: Box::new(alias_to),
                }));
            }
            self.error(
                ErrorType::AliasMustBeIdentifier,
                tok.location,
                format!("alias '{name}' must refer to an identifier"),
            );
        } else {
            self.error(
                ErrorType::AliasMissingAssignment,
                tok.location,
                format!("alias '{name}' requires an assignment"),
            );
        }
        None
    }

    /// `using M.ident;` desugars to an alias; `using module M` is reserved.
    fn parse_using(&mut self) -> Option<Ast> {
        let tok = self.expect_read_keyword(Keyword::Using)?;

        if self.match_read_keyword(Keyword::Module) {
            let mut identifier = String::new();
            while self.matches(TokenKind::Identifier) {
                identifier = self.read()?.text;
                if !self.match_read(TokenKind::Period) {
                    break;
                }
            }
            return Some(self.make(tok.location, AstKind::UseModule { name: identifier }));
        }

        if self.matches(TokenKind::Identifier) {
            // the alias takes the path's final segment as its name
            let mut name = String::new();
            let mut n = 0;
            while let Some(t) = self.peek(n) {
                if t.kind != TokenKind::Identifier {
                    break;
                }
                name.clone_from(&t.text);
                n += 1;
                match self.peek(n) {
                    Some(t) if t.kind == TokenKind::Period => n += 1,
                    _ => break,
                }
            }

            let alias_to = self.parse_identifier()?;
            return Some(self.make(tok.location, AstKind::Alias {
                name,
                alias_to: Box::new(alias_to),
            }));
        }

        self.error(
            ErrorType::ExpectedIdentifier,
            self.location(),
            "expected an identifier".to_owned(),
        );
        None
    }

    /// `attribute { "inline" } <stmt>` attaches attribute strings to the
    /// following statement.
    fn parse_attribute(&mut self) -> Option<Ast> {
        self.expect_read_keyword(Keyword::Attribute)?;
        let mut attributes = Vec::new();

        self.expect_read(TokenKind::OpenBrace)?;
        while self.matches(TokenKind::String) {
            attributes.push(self.read()?.text);
            if !self.match_read(TokenKind::Comma) {
                break;
            }
        }
        self.expect_read(TokenKind::CloseBrace)?;

        let mut stmt = self.parse_statement()?;
        stmt.attributes = attributes;
        Some(stmt)
    }

    fn parse_binary_op(&mut self, expr_precedence: i32, mut left: Ast) -> Option<Ast> {
        loop {
            let tok_precedence = self.op_precedence();
            if tok_precedence < expr_precedence {
                return Some(left);
            }

            let tok = self.expect_read(TokenKind::Operator)?;
            let Some(op) = binary_op_from_str(&tok.text) else {
                self.error(
                    ErrorType::IllegalOperator,
                    tok.location,
                    format!("illegal operator '{}'", tok.text),
                );
                return None;
            };

            let mut right = self.parse_term()?;

            let next_precedence = self.op_precedence();
            if tok_precedence < next_precedence {
                right = self.parse_binary_op(tok_precedence + 1, right)?;
            }

            left = self.make(tok.location, AstKind::BinaryOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            });
        }
    }

    fn parse_unary_op(&mut self) -> Option<Ast> {
        let tok = self.expect_read(TokenKind::Operator)?;
        let Some(op) = unary_op_from_str(&tok.text) else {
            self.error(
                ErrorType::IllegalOperator,
                tok.location,
                format!("illegal operator '{}'", tok.text),
            );
            return None;
        };

        let value = self.parse_term()?;
        Some(self.make(tok.location, AstKind::UnaryOp {
            op,
            child: Box::new(value),
        }))
    }

    fn parse_class(&mut self) -> Option<Ast> {
        let tok = self.expect_read_keyword(Keyword::Class)?;
        let ident = self.expect_read(TokenKind::Identifier)?;
        let mut members = Vec::new();

        self.expect_read(TokenKind::OpenBrace)?;
        while self.peek(0).is_some() && !self.match_read(TokenKind::CloseBrace) {
            if let Some(member) = self.parse_statement() {
                members.push(member);
            }
        }

        Some(self.make(tok.location, AstKind::Class {
            name: ident.text,
            members,
        }))
    }

    /// `enum E { A, B = 10, C }` — members auto-increment from 0 unless
    /// overridden.
    fn parse_enum(&mut self) -> Option<Ast> {
        let tok = self.expect_read_keyword(Keyword::Enum)?;
        let ident = self.expect_read(TokenKind::Identifier)?;
        let mut members: Vec<(String, Box<Ast>)> = Vec::new();
        let mut next_value: i64 = 0;

        self.expect_read(TokenKind::OpenBrace)?;
        while self.peek(0).is_some() {
            if self.match_read(TokenKind::CloseBrace) {
                break;
            }

            let key = self.expect_read(TokenKind::Identifier)?;
            if self.match_read_text(TokenKind::Operator, "=") || self.match_read(TokenKind::Colon) {
                let value = self.expect_read(TokenKind::Integer)?;
                next_value = value.text.parse().unwrap_or(0);
            }
            let literal = self.make(key.location, AstKind::Integer(next_value));
            members.push((key.text, Box::new(literal)));
            next_value += 1;

            if self.match_read(TokenKind::CloseBrace) || self.expect_read(TokenKind::Comma).is_none() {
                break;
            }
        }

        Some(self.make(tok.location, AstKind::Enum {
            name: ident.text,
            members,
        }))
    }

    fn parse_parenthesis(&mut self) -> Option<Ast> {
        self.read();
        let expr = self.parse_expression(false)?;
        self.expect_read(TokenKind::CloseParenthesis)?;
        Some(expr)
    }

    fn parse_integer_literal(&mut self) -> Option<Ast> {
        let tok = self.expect_read(TokenKind::Integer)?;
        let value: i64 = tok.text.parse().unwrap_or(i64::MAX);
        Some(self.make(tok.location, AstKind::Integer(value)))
    }

    fn parse_float_literal(&mut self) -> Option<Ast> {
        let tok = self.expect_read(TokenKind::Float)?;
        let value: f64 = tok.text.parse().unwrap_or(0.0);
        Some(self.make(tok.location, AstKind::Float(value)))
    }

    /// An identifier term: plain variable, function call, array index, or
    /// dotted member access chain.
    fn parse_identifier(&mut self) -> Option<Ast> {
        self.warn_missing_semicolon_before_identifier();

        let tok = self.expect_read(TokenKind::Identifier)?;
        let identifier = tok.text.clone();

        let mut result = if self.match_read(TokenKind::OpenParenthesis) {
            let mut arguments = Vec::new();

            if !self.matches(TokenKind::CloseParenthesis) {
                loop {
                    let arg = self.parse_expression(false)?;
                    arguments.push(arg);

                    if self.matches(TokenKind::CloseParenthesis) {
                        break;
                    }
                    if !self.matches(TokenKind::Comma) {
                        let loc = self.location();
                        let text = self.peek(0).map(|t| t.text.clone()).unwrap_or_default();
                        self.error(ErrorType::UnexpectedToken, loc, format!("unexpected token '{text}'"));
                        return None;
                    }
                    self.read(); // the comma
                }
            }
            self.read(); // the close parenthesis

            self.make(tok.location.clone(), AstKind::FunctionCall(FunctionCallNode {
                name: identifier.clone(),
                arguments,
                is_alias: false,
                alias_to: None,
                inline_definition: None,
            }))
        } else {
            self.make(
                tok.location.clone(),
                AstKind::Variable(VariableNode::named(identifier.clone())),
            )
        };

        if self.match_read(TokenKind::OpenBracket) {
            let index = self.parse_expression(false)?;
            self.expect_read(TokenKind::CloseBracket)?;
            result = self.make(tok.location.clone(), AstKind::ArrayAccess {
                object: Box::new(result),
                index: Box::new(index),
            });
        }

        if self.match_read(TokenKind::Period) {
            let next = if self.matches(TokenKind::Identifier) {
                self.parse_identifier()?
            } else {
                self.error(
                    ErrorType::ExpectedIdentifier,
                    self.location(),
                    "expected an identifier".to_owned(),
                );
                self.read();
                return None;
            };

            result = self.make(tok.location, AstKind::MemberAccess {
                left_str: identifier,
                left: Box::new(result),
                right: Box::new(next),
            });
        }

        Some(result)
    }

    fn warn_missing_semicolon_before_identifier(&mut self) {
        let Some(before) = self.peek_back(1) else { return };
        let ok = matches!(
            before.kind,
            TokenKind::Semicolon
                | TokenKind::Operator
                | TokenKind::Keyword
                | TokenKind::OpenBrace
                | TokenKind::CloseBrace
                | TokenKind::OpenBracket
                | TokenKind::OpenParenthesis
                | TokenKind::Period
                | TokenKind::Colon
                | TokenKind::Comma
                | TokenKind::RightArrow
        );
        if !ok {
            let loc = before.location.clone();
            self.warning(ErrorType::ExpectedSemicolon, loc, "expected ';'".to_owned());
        }
    }

    fn parse_string_literal(&mut self) -> Option<Ast> {
        let tok = self.expect_read(TokenKind::String)?;
        let text = tok.text.clone();
        Some(self.make(tok.location, AstKind::StringLiteral(text)))
    }

    fn parse_self(&mut self) -> Option<Ast> {
        let tok = self.expect_read_keyword(Keyword::SelfObject)?;
        let mut result = self.make(tok.location.clone(), AstKind::SelfObject);

        if self.match_read(TokenKind::Period) {
            let left_str = self.peek(0).map(|t| t.text.clone()).unwrap_or_default();
            if self.matches(TokenKind::Identifier) {
                let next = self.parse_identifier()?;
                result = self.make(tok.location, AstKind::MemberAccess {
                    left_str,
                    left: Box::new(result),
                    right: Box::new(next),
                });
            } else {
                let loc = self.location();
                let text = self.read().map(|t| t.text).unwrap_or_default();
                self.error(ErrorType::UnexpectedToken, loc, format!("unexpected token '{text}'"));
            }
        }

        Some(result)
    }

    fn parse_new(&mut self) -> Option<Ast> {
        let tok = self.expect_read_keyword(Keyword::New)?;
        let identifier = self.variable_names.last().cloned().unwrap_or_default();

        if self.matches(TokenKind::Identifier) {
            let constructor = self.parse_identifier()?;
            Some(self.make(tok.location, AstKind::New {
                identifier,
                constructor: Box::new(constructor),
            }))
        } else {
            let loc = self.location();
            let text = self.read().map(|t| t.text).unwrap_or_default();
            self.error(ErrorType::UnexpectedToken, loc, format!("unexpected token '{text}'"));
            None
        }
    }

    fn parse_term(&mut self) -> Option<Ast> {
        if self.peek(0).is_none() {
            self.read();
            return None;
        }

        if self.matches(TokenKind::OpenParenthesis) {
            self.parse_parenthesis()
        } else if self.matches(TokenKind::Integer) {
            self.parse_integer_literal()
        } else if self.matches(TokenKind::Float) {
            self.parse_float_literal()
        } else if self.matches(TokenKind::Identifier) {
            self.parse_identifier()
        } else if self.matches(TokenKind::String) {
            self.parse_string_literal()
        } else if self.matches_keyword(Keyword::True) {
            let tok = self.read()?;
            Some(self.make(tok.location, AstKind::True))
        } else if self.matches_keyword(Keyword::False) {
            let tok = self.read()?;
            Some(self.make(tok.location, AstKind::False))
        } else if self.matches_keyword(Keyword::Null) {
            let tok = self.read()?;
            Some(self.make(tok.location, AstKind::Null))
        } else if self.matches_keyword(Keyword::SelfObject) {
            self.parse_self()
        } else if self.matches_keyword(Keyword::New) {
            self.parse_new()
        } else if self.matches_keyword(Keyword::Func) {
            self.parse_function_expression()
        } else if self.matches(TokenKind::Operator) {
            self.parse_unary_op()
        } else {
            let loc = self.location();
            let text = self.read().map(|t| t.text).unwrap_or_default();
            self.error(ErrorType::UnexpectedToken, loc, format!("unexpected token '{text}'"));
            None
        }
    }

    /// Parses a full expression and wraps it in an `Expression` node; when
    /// `pop_after` is set the statement form discards the unused result.
    fn parse_expression(&mut self, pop_after: bool) -> Option<Ast> {
        let mut term = self.parse_term()?;

        if self.matches(TokenKind::Operator) {
            term = self.parse_binary_op(0, term)?;
        }

        let loc = self.location();
        Some(self.make(loc, AstKind::Expression {
            child: Box::new(term),
            should_clear_stack: pop_after,
        }))
    }

    fn parse_code_block(&mut self) -> Option<Ast> {
        let tok = self.expect_read(TokenKind::OpenBrace)?;
        let mut children = Vec::new();
        while self.peek(0).is_some() && !self.match_read(TokenKind::CloseBrace) {
            if let Some(stmt) = self.parse_statement() {
                children.push(stmt);
            }
        }

        Some(self.make(tok.location, AstKind::Block { children }))
    }

    /// Block body for constructs that also accept `-> stmt` or `: stmt`
    /// single-statement forms.
    fn parse_statement_block(&mut self) -> Option<Ast> {
        let loc = self.location();
        let mut children = Vec::new();
        if let Some(stmt) = self.parse_statement() {
            children.push(stmt);
        }
        Some(self.make(loc, AstKind::Block { children }))
    }

    fn parse_function_definition(&mut self) -> Option<Ast> {
        let tok = self.expect_read_keyword(Keyword::Func)?;
        let ident = self.expect_read(TokenKind::Identifier)?;

        let name = ident.text.clone();
        if name.chars().next().is_some_and(char::is_uppercase) {
            self.info(
                ErrorType::FunctionNameBeginsUppercase,
                ident.location,
                format!("function name '{name}' should begin with a lowercase letter"),
            );
        }

        let mut arguments = Vec::new();
        let mut is_variadic = false;

        if self.match_read(TokenKind::OpenParenthesis) {
            while let Some(arg) = self.match_read_token(TokenKind::Identifier) {
                if is_variadic {
                    self.error(
                        ErrorType::ArgumentAfterVarargs,
                        self.location(),
                        "no arguments may follow a variadic argument".to_owned(),
                    );
                }

                arguments.push(arg.text);

                if self.match_read(TokenKind::Ellipsis) {
                    is_variadic = true;
                }
                if !self.match_read(TokenKind::Comma) {
                    break;
                }
            }
            self.expect_read(TokenKind::CloseParenthesis)?;
        }

        let block = if self.matches(TokenKind::OpenBrace) {
            self.parse_statement()?
        } else {
            self.expect_read(TokenKind::RightArrow)?;
            self.parse_statement_block()?
        };

        Some(self.make(tok.location, AstKind::FunctionDefinition {
            name,
            arguments,
            block: Box::new(block),
            is_variadic,
            is_native: false,
        }))
    }

    /// `func [: arg, ...] { body }` as a value.
    fn parse_function_expression(&mut self) -> Option<Ast> {
        let tok = self.expect_read_keyword(Keyword::Func)?;

        let mut arguments = Vec::new();
        if self.match_read(TokenKind::Colon) {
            loop {
                let arg = self.expect_read(TokenKind::Identifier)?;
                arguments.push(arg.text);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
                self.read(); // the comma
            }
        }

        let block = if self.matches(TokenKind::OpenBrace) {
            self.parse_statement()?
        } else {
            self.expect_read(TokenKind::RightArrow)?;
            self.parse_statement_block()?
        };

        Some(self.make(tok.location, AstKind::FunctionExpression {
            arguments,
            block: Box::new(block),
        }))
    }

    /// Body of an `if`/`else`/`while`/`try`/`catch` arm: a brace block, a
    /// `:`-introduced single statement, or a bare `;` for an empty body.
    fn parse_conditional_block(&mut self) -> Option<Ast> {
        if self.matches(TokenKind::OpenBrace) {
            return self.parse_statement();
        }
        if self.match_read(TokenKind::Colon) {
            return self.parse_statement_block();
        }
        if self.match_read(TokenKind::Semicolon) {
            let loc = self.location();
            return Some(self.make(loc, AstKind::Block { children: Vec::new() }));
        }

        let loc = self.location();
        let text = self.read().map(|t| t.text).unwrap_or_default();
        self.error(ErrorType::UnexpectedToken, loc, format!("unexpected token '{text}'"));
        None
    }

    fn parse_if_statement(&mut self) -> Option<Ast> {
        let tok = self.expect_read_keyword(Keyword::If)?;
        let conditional = self.parse_expression(false)?;
        let if_block = self.parse_conditional_block()?;

        let else_block = if self.match_read_keyword(Keyword::Else) {
            Some(Box::new(self.parse_conditional_block()?))
        } else {
            None
        };

        Some(self.make(tok.location, AstKind::If {
            conditional: Box::new(conditional),
            block: Box::new(if_block),
            else_block,
        }))
    }

    fn parse_print_statement(&mut self) -> Option<Ast> {
        let tok = self.expect_read_keyword(Keyword::Print)?;

        let parenthesis = self.match_read(TokenKind::OpenParenthesis);

        let mut arguments = Vec::new();
        loop {
            if let Some(arg) = self.parse_expression(false) {
                arguments.push(arg);
            }
            if !self.match_read(TokenKind::Comma) {
                break;
            }
        }

        if parenthesis {
            self.expect_read(TokenKind::CloseParenthesis)?;
        }

        Some(self.make(tok.location, AstKind::Print { arguments }))
    }

    fn parse_return_statement(&mut self) -> Option<Ast> {
        let tok = self.expect_read_keyword(Keyword::Return)?;
        let value = self.parse_expression(false)?;

        Some(self.make(tok.location, AstKind::Return {
            value: Box::new(value),
        }))
    }

    /// `for (initializer; conditional; afterthought) body` — any of the
    /// three clauses may be omitted; a missing conditional means `true`.
    fn parse_for_loop(&mut self) -> Option<Ast> {
        let tok = self.expect_read_keyword(Keyword::For)?;
        self.expect_read(TokenKind::OpenParenthesis)?;

        let initializer = if self.match_read(TokenKind::Semicolon) {
            None
        } else {
            let init = self.parse_statement();
            // parse_statement consumes a trailing semicolon when present
            init.map(Box::new)
        };

        let conditional = if self.match_read(TokenKind::Semicolon) {
            let loc = self.location();
            self.make(loc, AstKind::True)
        } else {
            let cond = self.parse_expression(false)?;
            self.expect_read(TokenKind::Semicolon)?;
            cond
        };

        let afterthought = if self.match_read(TokenKind::CloseParenthesis) {
            None
        } else {
            let after = self.parse_expression(false)?;
            self.expect_read(TokenKind::CloseParenthesis)?;
            Some(Box::new(after))
        };

        let block = if self.matches(TokenKind::OpenBrace) {
            self.parse_statement()?
        } else {
            self.parse_statement_block()?
        };

        Some(self.make(tok.location, AstKind::For {
            initializer,
            conditional: Box::new(conditional),
            afterthought,
            block: Box::new(block),
        }))
    }

    fn parse_while_loop(&mut self) -> Option<Ast> {
        let tok = self.expect_read_keyword(Keyword::While)?;
        let conditional = self.parse_expression(false)?;
        let block = self.parse_conditional_block()?;

        Some(self.make(tok.location, AstKind::While {
            conditional: Box::new(conditional),
            block: Box::new(block),
        }))
    }

    /// `try <block> catch [(e)] <block>`; the exception object declaration
    /// is const so the handler cannot reassign it.
    fn parse_try_catch(&mut self) -> Option<Ast> {
        let tok = self.expect_read_keyword(Keyword::Try)?;

        let try_block = if self.matches(TokenKind::OpenBrace) {
            self.parse_statement()?
        } else if self.match_read(TokenKind::Colon) {
            self.parse_statement_block()?
        } else {
            let loc = self.location();
            let text = self.read().map(|t| t.text).unwrap_or_default();
            self.error(ErrorType::UnexpectedToken, loc, format!("unexpected token '{text}'"));
            return None;
        };

        self.expect_read_keyword(Keyword::Catch)?;

        let mut exception_object = None;
        if self.match_read(TokenKind::OpenParenthesis) {
            if let Some(identifier) = self.expect_read(TokenKind::Identifier) {
                exception_object = Some(self.make_exception_declaration(&identifier));
            }
            self.expect_read(TokenKind::CloseParenthesis)?;
        } else if self.matches(TokenKind::Identifier) {
            if let Some(identifier) = self.expect_read(TokenKind::Identifier) {
                exception_object = Some(self.make_exception_declaration(&identifier));
            }
        }

        let catch_block = self.parse_conditional_block()?;

        Some(self.make(tok.location, AstKind::TryCatch {
            try_block: Box::new(try_block),
            catch_block: Box::new(catch_block),
            exception_object: exception_object.map(Box::new),
        }))
    }

    fn make_exception_declaration(&mut self, identifier: &Token) -> Ast {
        let null = self.make(identifier.location.clone(), AstKind::Null);
        self.make(identifier.location.clone(), AstKind::VariableDeclaration {
            name: identifier.text.clone(),
            assignment: Box::new(null),
            is_const: true,
        })
    }

    fn error(&mut self, error_type: ErrorType, location: SourceLocation, text: String) {
        self.errors
            .push(BuildMessage::new(error_type, ErrorLevel::Fatal, location, text));
    }

    fn warning(&mut self, error_type: ErrorType, location: SourceLocation, text: String) {
        self.errors
            .push(BuildMessage::new(error_type, ErrorLevel::Warning, location, text));
    }

    fn info(&mut self, error_type: ErrorType, location: SourceLocation, text: String) {
        self.errors
            .push(BuildMessage::new(error_type, ErrorLevel::Info, location, text));
    }
}
