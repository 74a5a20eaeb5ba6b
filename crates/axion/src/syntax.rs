//! Keyword and operator tables.
//!
//! The operator table drives both the lexer's greedy longest-match scan and
//! the parser's precedence climbing. Precedences are highest-binds-tightest.

/// Reserved words of the language.
///
/// Several keywords are reserved without having semantics yet (`do`,
/// `foreach`, `switch`, ...); the parser reports those as unsupported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    If,
    Else,
    Do,
    While,
    For,
    Foreach,
    Switch,
    Case,
    Break,
    Continue,
    Default,
    Return,
    Goto,
    Try,
    Catch,
    Throw,
    Class,
    Enum,
    Struct,
    Void,
    True,
    False,
    Null,
    Var,
    Alias,
    Using,
    Attribute,
    Static,
    Public,
    Private,
    Protect,
    Const,
    Func,
    Super,
    Module,
    Package,
    Import,
    Typeof,
    Is,
    As,
    Cast,
    Print,
    SelfObject,
    New,
    Delete,
}

const KEYWORDS: &[(&str, Keyword)] = &[
    ("if", Keyword::If),
    ("else", Keyword::Else),
    ("do", Keyword::Do),
    ("while", Keyword::While),
    ("for", Keyword::For),
    ("foreach", Keyword::Foreach),
    ("switch", Keyword::Switch),
    ("case", Keyword::Case),
    ("break", Keyword::Break),
    ("continue", Keyword::Continue),
    ("default", Keyword::Default),
    ("return", Keyword::Return),
    ("goto", Keyword::Goto),
    ("try", Keyword::Try),
    ("catch", Keyword::Catch),
    ("throw", Keyword::Throw),
    ("class", Keyword::Class),
    ("enum", Keyword::Enum),
    ("struct", Keyword::Struct),
    ("void", Keyword::Void),
    ("true", Keyword::True),
    ("false", Keyword::False),
    ("null", Keyword::Null),
    ("var", Keyword::Var),
    ("alias", Keyword::Alias),
    ("using", Keyword::Using),
    ("attribute", Keyword::Attribute),
    ("static", Keyword::Static),
    ("pub", Keyword::Public),
    ("priv", Keyword::Private),
    ("protect", Keyword::Protect),
    ("const", Keyword::Const),
    ("func", Keyword::Func),
    ("super", Keyword::Super),
    ("module", Keyword::Module),
    ("package", Keyword::Package),
    ("import", Keyword::Import),
    ("typeof", Keyword::Typeof),
    ("is", Keyword::Is),
    ("as", Keyword::As),
    ("cast", Keyword::Cast),
    ("print", Keyword::Print),
    ("self", Keyword::SelfObject),
    ("new", Keyword::New),
    ("delete", Keyword::Delete),
];

/// Looks up a reserved word, returning `None` for plain identifiers.
#[must_use]
pub fn keyword_from_str(text: &str) -> Option<Keyword> {
    KEYWORDS.iter().find(|(name, _)| *name == text).map(|(_, kw)| *kw)
}

/// Returns the source spelling of a keyword.
#[must_use]
pub fn keyword_to_str(keyword: Keyword) -> &'static str {
    KEYWORDS
        .iter()
        .find(|(_, kw)| *kw == keyword)
        .map(|(name, _)| *name)
        .expect("keyword missing from table")
}

/// Binary operators, including the assignment family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Power,
    Multiply,
    Divide,
    FloorDivide,
    Modulus,
    Add,
    Subtract,

    BitXor,
    BitAnd,
    BitOr,
    BitAndAssign,
    BitXorAssign,
    BitOrAssign,
    ShiftLeft,
    ShiftRight,

    LogicalAnd,
    LogicalOr,

    Equals,
    NotEqual,
    Less,
    Greater,
    LessEqual,
    GreaterEqual,

    Assign,
    AddAssign,
    SubtractAssign,
    MultiplyAssign,
    DivideAssign,
    ModulusAssign,
}

impl BinaryOp {
    /// Is this one of the assignment operators?
    #[must_use]
    pub fn is_assignment(self) -> bool {
        matches!(
            self,
            Self::Assign
                | Self::AddAssign
                | Self::SubtractAssign
                | Self::MultiplyAssign
                | Self::DivideAssign
                | Self::ModulusAssign
                | Self::BitAndAssign
                | Self::BitXorAssign
                | Self::BitOrAssign
        )
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    LogicalNot,
    Negative,
    Positive,
    BitComplement,
    Increment,
    Decrement,
}

const BINARY_OPERATORS: &[(&str, BinaryOp)] = &[
    ("**", BinaryOp::Power),
    ("*", BinaryOp::Multiply),
    ("/", BinaryOp::FloorDivide),
    ("\\", BinaryOp::Divide),
    ("%", BinaryOp::Modulus),
    ("+", BinaryOp::Add),
    ("-", BinaryOp::Subtract),
    ("^", BinaryOp::BitXor),
    ("&", BinaryOp::BitAnd),
    ("|", BinaryOp::BitOr),
    ("<<", BinaryOp::ShiftLeft),
    (">>", BinaryOp::ShiftRight),
    ("&&", BinaryOp::LogicalAnd),
    ("||", BinaryOp::LogicalOr),
    ("==", BinaryOp::Equals),
    ("!=", BinaryOp::NotEqual),
    ("<", BinaryOp::Less),
    (">", BinaryOp::Greater),
    ("<=", BinaryOp::LessEqual),
    (">=", BinaryOp::GreaterEqual),
    ("=", BinaryOp::Assign),
    ("+=", BinaryOp::AddAssign),
    ("-=", BinaryOp::SubtractAssign),
    ("*=", BinaryOp::MultiplyAssign),
    ("/=", BinaryOp::DivideAssign),
    ("%=", BinaryOp::ModulusAssign),
    ("&=", BinaryOp::BitAndAssign),
    ("^=", BinaryOp::BitXorAssign),
    ("|=", BinaryOp::BitOrAssign),
];

const UNARY_OPERATORS: &[(&str, UnaryOp)] = &[
    ("!", UnaryOp::LogicalNot),
    ("+", UnaryOp::Positive),
    ("-", UnaryOp::Negative),
    ("~", UnaryOp::BitComplement),
    ("++", UnaryOp::Increment),
    ("--", UnaryOp::Decrement),
];

#[must_use]
pub fn binary_op_from_str(text: &str) -> Option<BinaryOp> {
    BINARY_OPERATORS.iter().find(|(s, _)| *s == text).map(|(_, op)| *op)
}

#[must_use]
pub fn unary_op_from_str(text: &str) -> Option<UnaryOp> {
    UNARY_OPERATORS.iter().find(|(s, _)| *s == text).map(|(_, op)| *op)
}

#[must_use]
pub fn binary_op_to_str(op: BinaryOp) -> &'static str {
    BINARY_OPERATORS
        .iter()
        .find(|(_, o)| *o == op)
        .map(|(s, _)| *s)
        .expect("binary operator missing from table")
}

#[must_use]
pub fn unary_op_to_str(op: UnaryOp) -> &'static str {
    UNARY_OPERATORS
        .iter()
        .find(|(_, o)| *o == op)
        .map(|(s, _)| *s)
        .expect("unary operator missing from table")
}

/// Is this text any operator, unary or binary? Used by the lexer's greedy
/// two-character match.
#[must_use]
pub fn is_operator(text: &str) -> bool {
    binary_op_from_str(text).is_some() || unary_op_from_str(text).is_some()
}

/// Binding strength of a binary operator; larger binds tighter.
///
/// The assignment family is the weakest and effectively right-associative:
/// climbing restarts at `precedence + 1` only for tighter operators.
#[must_use]
pub fn precedence(op: BinaryOp) -> i32 {
    match op {
        BinaryOp::Power => 13,
        BinaryOp::Multiply | BinaryOp::Divide | BinaryOp::FloorDivide | BinaryOp::Modulus => 12,
        BinaryOp::Add | BinaryOp::Subtract => 11,
        BinaryOp::ShiftLeft | BinaryOp::ShiftRight => 10,
        BinaryOp::Less | BinaryOp::Greater | BinaryOp::LessEqual | BinaryOp::GreaterEqual => 9,
        BinaryOp::Equals | BinaryOp::NotEqual => 8,
        BinaryOp::BitAnd => 7,
        BinaryOp::BitXor => 6,
        BinaryOp::BitOr => 5,
        BinaryOp::LogicalAnd => 4,
        BinaryOp::LogicalOr => 3,
        _ => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_round_trip() {
        assert_eq!(keyword_from_str("while"), Some(Keyword::While));
        assert_eq!(keyword_to_str(Keyword::While), "while");
        assert_eq!(keyword_from_str("whilst"), None);
    }

    #[test]
    fn test_two_char_operators_recognized() {
        assert!(is_operator("<<"));
        assert!(is_operator("&&"));
        assert!(is_operator("+="));
        assert!(!is_operator("=>"));
    }

    #[test]
    fn test_precedence_ordering() {
        assert!(precedence(BinaryOp::Power) > precedence(BinaryOp::Multiply));
        assert!(precedence(BinaryOp::Multiply) > precedence(BinaryOp::Add));
        assert!(precedence(BinaryOp::Add) > precedence(BinaryOp::ShiftLeft));
        assert!(precedence(BinaryOp::Equals) > precedence(BinaryOp::BitAnd));
        assert!(precedence(BinaryOp::LogicalOr) > precedence(BinaryOp::Assign));
    }
}
