//! XPath 1.0 subset
//!
//! One evaluator shared by the XML catalog tree and parsed HTML pages. The
//! tree is reached through the [`XPathNode`] trait, so each backend only
//! has to expose parent/children/attributes.
//!
//! Supported: absolute and relative location paths, `//`, `.`, `..`, `@`,
//! the child, descendant, descendant-or-self, self, parent, attribute,
//! ancestor, ancestor-or-self, following-sibling and preceding-sibling
//! axes, `*`, `prefix:*`, `text()`, `node()`, predicates, unions, boolean,
//! comparison and arithmetic operators (`+ - * div mod`), and the core
//! string, number and boolean functions.
//!
//! Node-sets come back in document order without duplicates. Text nodes
//! sort after their parent's attributes and before its child elements.
//!
//! Unprefixed name tests match the local name in any namespace, so
//! `//offer` works on feeds that declare a default namespace.

use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Prefix -> namespace URI bindings supplied with a mapping
pub type Namespaces = BTreeMap<String, String>;

#[derive(Debug, Clone, Error)]
#[error("invalid XPath `{expr}`: {reason}")]
pub struct XPathError {
    pub expr: String,
    pub reason: String,
}

/// Tree access needed by the evaluator.
///
/// Nodes are elements or the document node; text and attributes surface as
/// plain string items.
pub trait XPathNode: Clone {
    /// HTML names compare ASCII case-insensitively
    const CASE_SENSITIVE: bool = true;

    fn same_node(&self, other: &Self) -> bool;

    fn parent(&self) -> Option<Self>;

    /// Element children in document order
    fn children(&self) -> Vec<Self>;

    /// Direct text children in document order
    fn texts(&self) -> Vec<String>;

    /// Local element name; `None` for the document node
    fn local_name(&self) -> Option<String>;

    fn prefix(&self) -> Option<String> {
        None
    }

    fn namespace_uri(&self) -> Option<String> {
        None
    }

    /// `(qualified name, value)` pairs
    fn attributes(&self) -> Vec<(String, String)>;

    /// Concatenation of all descendant text
    fn string_value(&self) -> String;

    /// Sort key in document order. Keys compare lexicographically, and a
    /// node's key followed by `0` sorts after the node and before every
    /// node that comes after it, its descendants included.
    ///
    /// The default numbers element children from 1 on the way to the root.
    fn order_key(&self) -> Vec<usize> {
        let mut key = Vec::new();
        let mut current = self.clone();
        while let Some(parent) = current.parent() {
            let index = parent
                .children()
                .iter()
                .position(|c| c.same_node(&current))
                .map_or(0, |i| i + 1);
            key.push(index);
            current = parent;
        }
        key.reverse();
        key
    }
}

/// One selected item
#[derive(Debug, Clone)]
pub enum Item<N> {
    Node(N),
    /// Text node, attribute value or scalar expression result
    Value(String),
}

impl<N: XPathNode> Item<N> {
    pub fn string_value(&self) -> String {
        match self {
            Item::Node(node) => node.string_value(),
            Item::Value(value) => value.clone(),
        }
    }

    pub fn node(&self) -> Option<&N> {
        match self {
            Item::Node(node) => Some(node),
            Item::Value(_) => None,
        }
    }
}

/// A parsed expression, ready to be evaluated against many context nodes
#[derive(Debug, Clone)]
pub struct XPath {
    source: String,
    expr: Expr,
}

impl fmt::Display for XPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl XPath {
    pub fn parse(source: &str) -> Result<XPath, XPathError> {
        let fail = |reason: String| XPathError {
            expr: source.to_string(),
            reason,
        };

        let tokens = tokenize(source).map_err(fail)?;
        if tokens.is_empty() {
            return Err(fail("empty expression".to_string()));
        }

        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_expr().map_err(fail)?;
        if let Some(token) = parser.peek() {
            return Err(fail(format!("unexpected {token:?}")));
        }

        Ok(XPath {
            source: source.to_string(),
            expr,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Evaluate against a context node. Scalar results become one `Value` item.
    pub fn select<N: XPathNode>(&self, context: &N, namespaces: &Namespaces) -> Vec<Item<N>> {
        let item = Located::node(context.clone());
        let ctx = Context {
            item: &item,
            position: 1,
            size: 1,
            namespaces,
        };

        match eval(&self.expr, &ctx) {
            Value::Nodes(items) => items.into_iter().map(|located| located.item).collect(),
            Value::Str(s) => vec![Item::Value(s)],
            Value::Num(n) => vec![Item::Value(number_to_string(n))],
            Value::Bool(b) => vec![Item::Value(b.to_string())],
        }
    }

    /// String value of the first selected item
    pub fn first_string<N: XPathNode>(
        &self,
        context: &N,
        namespaces: &Namespaces,
    ) -> Option<String> {
        self.select(context, namespaces)
            .first()
            .map(Item::string_value)
    }

    /// Selected element nodes only
    pub fn select_nodes<N: XPathNode>(&self, context: &N, namespaces: &Namespaces) -> Vec<N> {
        self.select(context, namespaces)
            .into_iter()
            .filter_map(|item| match item {
                Item::Node(node) => Some(node),
                Item::Value(_) => None,
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tokenizer

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Slash,
    DoubleSlash,
    LBracket,
    RBracket,
    LParen,
    RParen,
    At,
    Comma,
    Pipe,
    Dot,
    DotDot,
    Star,
    ColonColon,
    Eq,
    Neq,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Literal(String),
    Number(f64),
    /// NCName or QName, possibly `prefix:*`
    Name(String),
}

fn is_name_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-' || c == '.'
}

fn tokenize(source: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let (token, width) = match c {
            '/' if next == Some('/') => (Token::DoubleSlash, 2),
            '/' => (Token::Slash, 1),
            '[' => (Token::LBracket, 1),
            ']' => (Token::RBracket, 1),
            '(' => (Token::LParen, 1),
            ')' => (Token::RParen, 1),
            '@' => (Token::At, 1),
            ',' => (Token::Comma, 1),
            '|' => (Token::Pipe, 1),
            '*' => (Token::Star, 1),
            '+' => (Token::Plus, 1),
            '-' => (Token::Minus, 1),
            '=' => (Token::Eq, 1),
            '!' if next == Some('=') => (Token::Neq, 2),
            '<' if next == Some('=') => (Token::Le, 2),
            '<' => (Token::Lt, 1),
            '>' if next == Some('=') => (Token::Ge, 2),
            '>' => (Token::Gt, 1),
            ':' if next == Some(':') => (Token::ColonColon, 2),
            '.' if next == Some('.') => (Token::DotDot, 2),
            '.' if next.is_some_and(|n| n.is_ascii_digit()) => {
                let (number, width) = lex_number(&chars[i..]);
                (Token::Number(number), width)
            }
            '.' => (Token::Dot, 1),
            '"' | '\'' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|&q| q == c)
                    .ok_or_else(|| "unterminated string literal".to_string())?;
                let literal: String = chars[i + 1..i + 1 + end].iter().collect();
                (Token::Literal(literal), end + 2)
            }
            d if d.is_ascii_digit() => {
                let (number, width) = lex_number(&chars[i..]);
                (Token::Number(number), width)
            }
            s if is_name_start(s) => {
                let width = lex_name(&chars[i..]);
                let name: String = chars[i..i + width].iter().collect();
                (Token::Name(name), width)
            }
            other => return Err(format!("unexpected character `{other}`")),
        };

        tokens.push(token);
        i += width;
    }

    Ok(tokens)
}

fn lex_number(chars: &[char]) -> (f64, usize) {
    let mut width = 0;
    let mut seen_dot = false;
    while width < chars.len() {
        let c = chars[width];
        if c.is_ascii_digit() {
            width += 1;
        } else if c == '.' && !seen_dot {
            seen_dot = true;
            width += 1;
        } else {
            break;
        }
    }
    let text: String = chars[..width].iter().collect();
    (text.parse().unwrap_or(f64::NAN), width)
}

/// Width of a name, including one `prefix:` part (or `prefix:*`)
fn lex_name(chars: &[char]) -> usize {
    let mut width = 1;
    while width < chars.len() && is_name_char(chars[width]) {
        width += 1;
    }

    // `a:b` and `a:*`, but not the `::` axis separator
    if chars.get(width) == Some(&':') && chars.get(width + 1) != Some(&':') {
        match chars.get(width + 1) {
            Some('*') => return width + 2,
            Some(&c) if is_name_start(c) => {
                width += 2;
                while width < chars.len() && is_name_char(chars[width]) {
                    width += 1;
                }
            }
            _ => {}
        }
    }

    width
}

// ---------------------------------------------------------------------------
// AST

#[derive(Debug, Clone, Copy, PartialEq)]
enum Axis {
    Child,
    Descendant,
    DescendantOrSelf,
    SelfAxis,
    Parent,
    Attribute,
    Ancestor,
    AncestorOrSelf,
    FollowingSibling,
    PrecedingSibling,
}

impl Axis {
    fn from_name(name: &str) -> Option<Axis> {
        let axis = match name {
            "child" => Axis::Child,
            "descendant" => Axis::Descendant,
            "descendant-or-self" => Axis::DescendantOrSelf,
            "self" => Axis::SelfAxis,
            "parent" => Axis::Parent,
            "attribute" => Axis::Attribute,
            "ancestor" => Axis::Ancestor,
            "ancestor-or-self" => Axis::AncestorOrSelf,
            "following-sibling" => Axis::FollowingSibling,
            "preceding-sibling" => Axis::PrecedingSibling,
            _ => return None,
        };
        Some(axis)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum NodeTest {
    Name { prefix: Option<String>, local: String },
    /// `*` or `prefix:*`
    Wildcard(Option<String>),
    Text,
    Node,
}

#[derive(Debug, Clone)]
struct Step {
    axis: Axis,
    test: NodeTest,
    predicates: Vec<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CmpOp {
    Eq,
    Neq,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Func {
    Contains,
    StartsWith,
    NormalizeSpace,
    Not,
    Position,
    Last,
    String,
    Count,
    StringLength,
    Concat,
    True,
    False,
    Number,
    Boolean,
    Name,
    LocalName,
    Translate,
    SubstringBefore,
    SubstringAfter,
    Substring,
    Sum,
    Floor,
    Ceiling,
    Round,
    Lang,
}

impl Func {
    /// Function, minimum and maximum argument count
    fn lookup(name: &str) -> Option<(Func, usize, usize)> {
        let entry = match name {
            "contains" => (Func::Contains, 2, 2),
            "starts-with" => (Func::StartsWith, 2, 2),
            "normalize-space" => (Func::NormalizeSpace, 0, 1),
            "not" => (Func::Not, 1, 1),
            "position" => (Func::Position, 0, 0),
            "last" => (Func::Last, 0, 0),
            "string" => (Func::String, 0, 1),
            "count" => (Func::Count, 1, 1),
            "string-length" => (Func::StringLength, 0, 1),
            "concat" => (Func::Concat, 2, usize::MAX),
            "true" => (Func::True, 0, 0),
            "false" => (Func::False, 0, 0),
            "number" => (Func::Number, 0, 1),
            "boolean" => (Func::Boolean, 1, 1),
            "name" => (Func::Name, 0, 1),
            "local-name" => (Func::LocalName, 0, 1),
            "translate" => (Func::Translate, 3, 3),
            "substring-before" => (Func::SubstringBefore, 2, 2),
            "substring-after" => (Func::SubstringAfter, 2, 2),
            "substring" => (Func::Substring, 2, 3),
            "sum" => (Func::Sum, 1, 1),
            "floor" => (Func::Floor, 1, 1),
            "ceiling" => (Func::Ceiling, 1, 1),
            "round" => (Func::Round, 1, 1),
            "lang" => (Func::Lang, 1, 1),
            _ => return None,
        };
        Some(entry)
    }
}

#[derive(Debug, Clone)]
enum Expr {
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Compare(CmpOp, Box<Expr>, Box<Expr>),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
    Mod(Box<Expr>, Box<Expr>),
    Neg(Box<Expr>),
    Union(Box<Expr>, Box<Expr>),
    /// Location path; `absolute` starts at the document node
    Path { absolute: bool, steps: Vec<Step> },
    /// Primary expression with predicates and trailing steps
    Filter {
        primary: Box<Expr>,
        predicates: Vec<Expr>,
        steps: Vec<Step>,
    },
    Literal(String),
    Number(f64),
    Call(Func, Vec<Expr>),
}

// ---------------------------------------------------------------------------
// Parser

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

type ParseResult<T> = Result<T, String>;

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token) -> ParseResult<()> {
        match self.advance() {
            Some(ref found) if found == token => Ok(()),
            Some(found) => Err(format!("expected {token:?}, found {found:?}")),
            None => Err(format!("expected {token:?}, found end of expression")),
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if matches!(self.peek(), Some(Token::Name(name)) if name == keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse_expr(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_and()?;
        while self.eat_keyword("or") {
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_equality()?;
        while self.eat_keyword("and") {
            let right = self.parse_equality()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_relational()?;
        loop {
            let op = match self.peek() {
                Some(Token::Eq) => CmpOp::Eq,
                Some(Token::Neq) => CmpOp::Neq,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.parse_relational()?;
            left = Expr::Compare(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_relational(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Some(Token::Lt) => CmpOp::Lt,
                Some(Token::Le) => CmpOp::Le,
                Some(Token::Gt) => CmpOp::Gt,
                Some(Token::Ge) => CmpOp::Ge,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.parse_additive()?;
            left = Expr::Compare(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_additive(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            if self.eat(&Token::Plus) {
                let right = self.parse_multiplicative()?;
                left = Expr::Add(Box::new(left), Box::new(right));
            } else if self.eat(&Token::Minus) {
                let right = self.parse_multiplicative()?;
                left = Expr::Sub(Box::new(left), Box::new(right));
            } else {
                return Ok(left);
            }
        }
    }

    /// After an operand, `*` multiplies and `div`/`mod` are operators
    fn parse_multiplicative(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let build: fn(Box<Expr>, Box<Expr>) -> Expr = if self.eat(&Token::Star) {
                Expr::Mul
            } else if self.eat_keyword("div") {
                Expr::Div
            } else if self.eat_keyword("mod") {
                Expr::Mod
            } else {
                return Ok(left);
            };
            let right = self.parse_unary()?;
            left = build(Box::new(left), Box::new(right));
        }
    }

    fn parse_unary(&mut self) -> ParseResult<Expr> {
        if self.eat(&Token::Minus) {
            return Ok(Expr::Neg(Box::new(self.parse_unary()?)));
        }
        self.parse_union()
    }

    fn parse_union(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_path()?;
        while self.eat(&Token::Pipe) {
            let right = self.parse_path()?;
            left = Expr::Union(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_path(&mut self) -> ParseResult<Expr> {
        match self.peek() {
            Some(Token::Slash) => {
                self.pos += 1;
                let steps = if self.starts_step() {
                    self.parse_relative_steps()?
                } else {
                    Vec::new()
                };
                Ok(Expr::Path {
                    absolute: true,
                    steps,
                })
            }
            Some(Token::DoubleSlash) => {
                self.pos += 1;
                let mut steps = vec![descendant_or_self()];
                steps.extend(self.parse_relative_steps()?);
                Ok(Expr::Path {
                    absolute: true,
                    steps,
                })
            }
            _ if self.starts_step() => Ok(Expr::Path {
                absolute: false,
                steps: self.parse_relative_steps()?,
            }),
            _ => self.parse_filter(),
        }
    }

    fn starts_step(&self) -> bool {
        match self.peek() {
            Some(Token::At | Token::Dot | Token::DotDot | Token::Star) => true,
            Some(Token::Name(name)) => match self.peek_at(1) {
                Some(Token::LParen) => is_node_type(name),
                _ => true,
            },
            _ => false,
        }
    }

    fn parse_relative_steps(&mut self) -> ParseResult<Vec<Step>> {
        let mut steps = vec![self.parse_step()?];
        loop {
            if self.eat(&Token::Slash) {
                steps.push(self.parse_step()?);
            } else if self.eat(&Token::DoubleSlash) {
                steps.push(descendant_or_self());
                steps.push(self.parse_step()?);
            } else {
                return Ok(steps);
            }
        }
    }

    fn parse_step(&mut self) -> ParseResult<Step> {
        if self.eat(&Token::Dot) {
            return Ok(Step {
                axis: Axis::SelfAxis,
                test: NodeTest::Node,
                predicates: self.parse_predicates()?,
            });
        }
        if self.eat(&Token::DotDot) {
            return Ok(Step {
                axis: Axis::Parent,
                test: NodeTest::Node,
                predicates: self.parse_predicates()?,
            });
        }

        let axis = if self.eat(&Token::At) {
            Axis::Attribute
        } else if let (Some(Token::Name(name)), Some(Token::ColonColon)) =
            (self.peek(), self.peek_at(1))
        {
            let axis = Axis::from_name(name).ok_or_else(|| format!("unknown axis `{name}`"))?;
            self.pos += 2;
            axis
        } else {
            Axis::Child
        };

        let test = self.parse_node_test()?;
        let predicates = self.parse_predicates()?;
        Ok(Step {
            axis,
            test,
            predicates,
        })
    }

    fn parse_node_test(&mut self) -> ParseResult<NodeTest> {
        match self.advance() {
            Some(Token::Star) => Ok(NodeTest::Wildcard(None)),
            Some(Token::Name(name)) => {
                if is_node_type(&name) && self.peek() == Some(&Token::LParen) {
                    self.pos += 1;
                    self.expect(&Token::RParen)?;
                    return match name.as_str() {
                        "text" => Ok(NodeTest::Text),
                        "node" => Ok(NodeTest::Node),
                        other => Err(format!("`{other}()` is not supported")),
                    };
                }
                match name.split_once(':') {
                    Some((prefix, "*")) => Ok(NodeTest::Wildcard(Some(prefix.to_string()))),
                    Some((prefix, local)) => Ok(NodeTest::Name {
                        prefix: Some(prefix.to_string()),
                        local: local.to_string(),
                    }),
                    None => Ok(NodeTest::Name {
                        prefix: None,
                        local: name,
                    }),
                }
            }
            Some(other) => Err(format!("expected a node test, found {other:?}")),
            None => Err("expected a node test, found end of expression".to_string()),
        }
    }

    fn parse_predicates(&mut self) -> ParseResult<Vec<Expr>> {
        let mut predicates = Vec::new();
        while self.eat(&Token::LBracket) {
            predicates.push(self.parse_expr()?);
            self.expect(&Token::RBracket)?;
        }
        Ok(predicates)
    }

    fn parse_filter(&mut self) -> ParseResult<Expr> {
        let primary = self.parse_primary()?;
        let predicates = self.parse_predicates()?;

        let mut steps = Vec::new();
        loop {
            if self.eat(&Token::Slash) {
                steps.push(self.parse_step()?);
            } else if self.eat(&Token::DoubleSlash) {
                steps.push(descendant_or_self());
                steps.push(self.parse_step()?);
            } else {
                break;
            }
        }

        if predicates.is_empty() && steps.is_empty() {
            return Ok(primary);
        }
        Ok(Expr::Filter {
            primary: Box::new(primary),
            predicates,
            steps,
        })
    }

    fn parse_primary(&mut self) -> ParseResult<Expr> {
        match self.advance() {
            Some(Token::Literal(s)) => Ok(Expr::Literal(s)),
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::LParen) => {
                let expr = self.parse_expr()?;
                self.expect(&Token::RParen)?;
                Ok(expr)
            }
            Some(Token::Name(name)) if self.peek() == Some(&Token::LParen) => {
                self.pos += 1;
                let (func, min, max) =
                    Func::lookup(&name).ok_or_else(|| format!("unknown function `{name}()`"))?;

                let mut args = Vec::new();
                if !self.eat(&Token::RParen) {
                    loop {
                        args.push(self.parse_expr()?);
                        if self.eat(&Token::Comma) {
                            continue;
                        }
                        self.expect(&Token::RParen)?;
                        break;
                    }
                }

                if args.len() < min || args.len() > max {
                    return Err(format!("wrong number of arguments to `{name}()`"));
                }
                Ok(Expr::Call(func, args))
            }
            Some(other) => Err(format!("unexpected {other:?}")),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}

fn is_node_type(name: &str) -> bool {
    matches!(name, "text" | "node" | "comment" | "processing-instruction")
}

fn descendant_or_self() -> Step {
    Step {
        axis: Axis::DescendantOrSelf,
        test: NodeTest::Node,
        predicates: Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// Evaluation

/// An item and its document-order key
#[derive(Debug, Clone)]
struct Located<N> {
    key: Vec<usize>,
    item: Item<N>,
}

const ATTRIBUTE_SLOT: usize = 0;
const TEXT_SLOT: usize = 1;

impl<N: XPathNode> Located<N> {
    fn node(node: N) -> Self {
        Self {
            key: node.order_key(),
            item: Item::Node(node),
        }
    }

    /// Attribute value or text node number `index` of the node keyed `owner`
    fn owned(owner: &[usize], slot: usize, index: usize, value: String) -> Self {
        let mut key = Vec::with_capacity(owner.len() + 3);
        key.extend_from_slice(owner);
        key.extend([0, slot, index]);
        Self {
            key,
            item: Item::Value(value),
        }
    }
}

/// Sort into document order and drop duplicates
fn document_order<N>(mut items: Vec<Located<N>>) -> Vec<Located<N>> {
    items.sort_by(|a, b| a.key.cmp(&b.key));
    items.dedup_by(|a, b| a.key == b.key);
    items
}

enum Value<N> {
    Nodes(Vec<Located<N>>),
    Str(String),
    Num(f64),
    Bool(bool),
}

impl<N: XPathNode> Value<N> {
    fn boolean(&self) -> bool {
        match self {
            Value::Nodes(items) => !items.is_empty(),
            Value::Str(s) => !s.is_empty(),
            Value::Num(n) => *n != 0.0 && !n.is_nan(),
            Value::Bool(b) => *b,
        }
    }

    fn string(&self) -> String {
        match self {
            Value::Nodes(items) => items
                .first()
                .map(|located| located.item.string_value())
                .unwrap_or_default(),
            Value::Str(s) => s.clone(),
            Value::Num(n) => number_to_string(*n),
            Value::Bool(b) => b.to_string(),
        }
    }

    fn number(&self) -> f64 {
        match self {
            Value::Num(n) => *n,
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            other => string_to_number(&other.string()),
        }
    }

    /// Scalars have no nodes
    fn into_nodes(self) -> Vec<Located<N>> {
        match self {
            Value::Nodes(items) => items,
            _ => Vec::new(),
        }
    }
}

struct Context<'a, N> {
    item: &'a Located<N>,
    position: usize,
    size: usize,
    namespaces: &'a Namespaces,
}

fn eval<N: XPathNode>(expr: &Expr, ctx: &Context<'_, N>) -> Value<N> {
    let num = |e: &Expr| eval(e, ctx).number();
    match expr {
        Expr::Or(a, b) => Value::Bool(eval(a, ctx).boolean() || eval(b, ctx).boolean()),
        Expr::And(a, b) => Value::Bool(eval(a, ctx).boolean() && eval(b, ctx).boolean()),
        Expr::Compare(op, a, b) => Value::Bool(compare(*op, &eval(a, ctx), &eval(b, ctx))),
        Expr::Add(a, b) => Value::Num(num(a) + num(b)),
        Expr::Sub(a, b) => Value::Num(num(a) - num(b)),
        Expr::Mul(a, b) => Value::Num(num(a) * num(b)),
        Expr::Div(a, b) => Value::Num(num(a) / num(b)),
        // truncating remainder, sign of the dividend
        Expr::Mod(a, b) => Value::Num(num(a) % num(b)),
        Expr::Neg(a) => Value::Num(-num(a)),
        Expr::Union(a, b) => {
            let mut items = eval(a, ctx).into_nodes();
            items.extend(eval(b, ctx).into_nodes());
            Value::Nodes(document_order(items))
        }
        Expr::Path { absolute, steps } => {
            let start = if *absolute {
                match &ctx.item.item {
                    Item::Node(node) => Located::node(document_of(node)),
                    Item::Value(_) => return Value::Nodes(Vec::new()),
                }
            } else {
                ctx.item.clone()
            };
            Value::Nodes(apply_steps(vec![start], steps, ctx.namespaces))
        }
        Expr::Filter {
            primary,
            predicates,
            steps,
        } => {
            let items = match eval(primary, ctx) {
                Value::Nodes(items) => items,
                // Predicates and steps only make sense on node-sets
                _ => return Value::Nodes(Vec::new()),
            };
            let items = filter_predicates(items, predicates, ctx.namespaces);
            Value::Nodes(apply_steps(items, steps, ctx.namespaces))
        }
        Expr::Literal(s) => Value::Str(s.clone()),
        Expr::Number(n) => Value::Num(*n),
        Expr::Call(func, args) => call(*func, args, ctx),
    }
}

fn document_of<N: XPathNode>(node: &N) -> N {
    let mut current = node.clone();
    while let Some(parent) = current.parent() {
        current = parent;
    }
    current
}

fn apply_steps<N: XPathNode>(
    start: Vec<Located<N>>,
    steps: &[Step],
    namespaces: &Namespaces,
) -> Vec<Located<N>> {
    let mut current = start;

    for step in steps {
        let mut next: Vec<Located<N>> = Vec::new();

        for located in &current {
            let Item::Node(node) = &located.item else {
                // Text and attribute values have no children
                if step.axis == Axis::SelfAxis && step.test == NodeTest::Node {
                    next.push(located.clone());
                }
                continue;
            };

            // positions in predicates count along the axis
            let candidates = axis_items(node, &located.key, step, namespaces);
            next.extend(filter_predicates(candidates, &step.predicates, namespaces));
        }

        current = document_order(next);
        if current.is_empty() {
            break;
        }
    }

    current
}

fn filter_predicates<N: XPathNode>(
    mut items: Vec<Located<N>>,
    predicates: &[Expr],
    namespaces: &Namespaces,
) -> Vec<Located<N>> {
    for predicate in predicates {
        let size = items.len();
        items = items
            .into_iter()
            .enumerate()
            .filter(|(index, item)| {
                let ctx = Context {
                    item,
                    position: index + 1,
                    size,
                    namespaces,
                };
                match eval(predicate, &ctx) {
                    Value::Num(n) => n == (index + 1) as f64,
                    other => other.boolean(),
                }
            })
            .map(|(_, item)| item)
            .collect();
    }
    items
}

fn owned_texts<N: XPathNode>(out: &mut Vec<Located<N>>, owner: &[usize], texts: Vec<String>) {
    out.extend(
        texts
            .into_iter()
            .enumerate()
            .map(|(i, text)| Located::owned(owner, TEXT_SLOT, i, text)),
    );
}

/// Candidates of one step from one context node, in proximity order:
/// nearest first on the ancestor and preceding-sibling axes
fn axis_items<N: XPathNode>(
    node: &N,
    key: &[usize],
    step: &Step,
    namespaces: &Namespaces,
) -> Vec<Located<N>> {
    if step.axis == Axis::Attribute {
        return node
            .attributes()
            .into_iter()
            .enumerate()
            .filter(|(_, (name, _))| attribute_matches::<N>(name, &step.test))
            .map(|(i, (_, value))| Located::owned(key, ATTRIBUTE_SLOT, i, value))
            .collect();
    }

    let nodes: Vec<N> = match step.axis {
        Axis::Child => node.children(),
        Axis::Descendant => {
            let mut out = Vec::new();
            collect_descendants(node, &mut out);
            out
        }
        Axis::DescendantOrSelf => {
            let mut out = vec![node.clone()];
            collect_descendants(node, &mut out);
            out
        }
        Axis::SelfAxis => vec![node.clone()],
        Axis::Parent => node.parent().into_iter().collect(),
        Axis::Ancestor | Axis::AncestorOrSelf => {
            let mut out = Vec::new();
            if step.axis == Axis::AncestorOrSelf {
                out.push(node.clone());
            }
            let mut current = node.parent();
            while let Some(parent) = current {
                current = parent.parent();
                out.push(parent);
            }
            out
        }
        Axis::FollowingSibling | Axis::PrecedingSibling => siblings(node, step.axis),
        Axis::Attribute => Vec::new(),
    };

    match &step.test {
        NodeTest::Text => {
            let mut texts = Vec::new();
            match step.axis {
                // text() children of every node on the axis
                Axis::Child => owned_texts(&mut texts, key, node.texts()),
                Axis::Descendant | Axis::DescendantOrSelf => {
                    if step.axis == Axis::Descendant {
                        owned_texts(&mut texts, key, node.texts());
                    }
                    for n in &nodes {
                        owned_texts(&mut texts, &n.order_key(), n.texts());
                    }
                }
                _ => {}
            }
            texts
        }
        test => nodes
            .into_iter()
            .filter(|n| element_matches(n, test, namespaces))
            .map(Located::node)
            .collect(),
    }
}

fn collect_descendants<N: XPathNode>(node: &N, out: &mut Vec<N>) {
    for child in node.children() {
        out.push(child.clone());
        collect_descendants(&child, out);
    }
}

fn siblings<N: XPathNode>(node: &N, axis: Axis) -> Vec<N> {
    let Some(parent) = node.parent() else {
        return Vec::new();
    };
    let children = parent.children();
    let Some(index) = children.iter().position(|c| c.same_node(node)) else {
        return Vec::new();
    };

    if axis == Axis::FollowingSibling {
        children[index + 1..].to_vec()
    } else {
        children[..index].iter().rev().cloned().collect()
    }
}

fn names_equal<N: XPathNode>(a: &str, b: &str) -> bool {
    if N::CASE_SENSITIVE {
        a == b
    } else {
        a.eq_ignore_ascii_case(b)
    }
}

fn element_matches<N: XPathNode>(node: &N, test: &NodeTest, namespaces: &Namespaces) -> bool {
    match test {
        NodeTest::Node => true,
        NodeTest::Text => false,
        NodeTest::Wildcard(None) => node.local_name().is_some(),
        NodeTest::Wildcard(Some(prefix)) => {
            node.local_name().is_some() && prefix_matches(node, prefix, namespaces)
        }
        NodeTest::Name { prefix, local } => {
            let Some(name) = node.local_name() else {
                return false;
            };
            if !names_equal::<N>(&name, local) {
                return false;
            }
            match prefix {
                None => true,
                Some(prefix) => prefix_matches(node, prefix, namespaces),
            }
        }
    }
}

/// Bound prefixes compare namespace URIs; unbound ones compare the prefix
/// as written in the document.
fn prefix_matches<N: XPathNode>(node: &N, prefix: &str, namespaces: &Namespaces) -> bool {
    match namespaces.get(prefix) {
        Some(uri) => node.namespace_uri().as_deref() == Some(uri.as_str()),
        None => node.prefix().as_deref() == Some(prefix),
    }
}

fn attribute_matches<N: XPathNode>(qualified: &str, test: &NodeTest) -> bool {
    let local = qualified.rsplit(':').next().unwrap_or(qualified);
    match test {
        NodeTest::Node | NodeTest::Wildcard(None) => true,
        NodeTest::Wildcard(Some(prefix)) => qualified
            .split_once(':')
            .is_some_and(|(p, _)| p == prefix),
        NodeTest::Name {
            prefix: Some(prefix),
            local: name,
        } => names_equal::<N>(qualified, &format!("{prefix}:{name}")),
        NodeTest::Name { prefix: None, local: name } => {
            names_equal::<N>(qualified, name) || names_equal::<N>(local, name)
        }
        NodeTest::Text => false,
    }
}

fn compare<N: XPathNode>(op: CmpOp, a: &Value<N>, b: &Value<N>) -> bool {
    match (a, b) {
        (Value::Nodes(xs), Value::Nodes(ys)) => xs.iter().any(|x| {
            let x = x.item.string_value();
            ys.iter().any(|y| compare_strings(op, &x, &y.item.string_value()))
        }),
        (Value::Nodes(xs), other) => xs
            .iter()
            .any(|x| compare_scalar(op, &Value::Str(x.item.string_value()), other)),
        (other, Value::Nodes(ys)) => ys
            .iter()
            .any(|y| compare_scalar(op, other, &Value::Str(y.item.string_value()))),
        _ => compare_scalar(op, a, b),
    }
}

fn compare_strings(op: CmpOp, a: &str, b: &str) -> bool {
    match op {
        CmpOp::Eq => a == b,
        CmpOp::Neq => a != b,
        _ => compare_numbers(op, string_to_number(a), string_to_number(b)),
    }
}

fn compare_scalar<N: XPathNode>(op: CmpOp, a: &Value<N>, b: &Value<N>) -> bool {
    match op {
        CmpOp::Eq | CmpOp::Neq => {
            let equal = match (a, b) {
                (Value::Bool(_), _) | (_, Value::Bool(_)) => a.boolean() == b.boolean(),
                (Value::Num(_), _) | (_, Value::Num(_)) => a.number() == b.number(),
                _ => a.string() == b.string(),
            };
            (op == CmpOp::Eq) == equal
        }
        _ => compare_numbers(op, a.number(), b.number()),
    }
}

fn compare_numbers(op: CmpOp, a: f64, b: f64) -> bool {
    match op {
        CmpOp::Eq => a == b,
        CmpOp::Neq => a != b,
        CmpOp::Lt => a < b,
        CmpOp::Le => a <= b,
        CmpOp::Gt => a > b,
        CmpOp::Ge => a >= b,
    }
}

fn call<N: XPathNode>(func: Func, args: &[Expr], ctx: &Context<'_, N>) -> Value<N> {
    let arg = |i: usize| eval(&args[i], ctx);
    // Functions whose single optional argument defaults to the context item
    let string_arg = || match args.first() {
        Some(expr) => eval(expr, ctx).string(),
        None => ctx.item.item.string_value(),
    };
    let node_arg = || -> Option<N> {
        match args.first() {
            Some(expr) => eval(expr, ctx)
                .into_nodes()
                .into_iter()
                .find_map(|located| located.item.node().cloned()),
            None => ctx.item.item.node().cloned(),
        }
    };

    match func {
        Func::Contains => Value::Bool(arg(0).string().contains(&arg(1).string())),
        Func::StartsWith => Value::Bool(arg(0).string().starts_with(&arg(1).string())),
        Func::NormalizeSpace => {
            Value::Str(string_arg().split_whitespace().collect::<Vec<_>>().join(" "))
        }
        Func::Not => Value::Bool(!arg(0).boolean()),
        Func::Position => Value::Num(ctx.position as f64),
        Func::Last => Value::Num(ctx.size as f64),
        Func::String => Value::Str(string_arg()),
        Func::Count => match arg(0) {
            Value::Nodes(items) => Value::Num(items.len() as f64),
            _ => Value::Num(f64::NAN),
        },
        Func::StringLength => Value::Num(string_arg().chars().count() as f64),
        Func::Concat => Value::Str(args.iter().map(|a| eval(a, ctx).string()).collect()),
        Func::True => Value::Bool(true),
        Func::False => Value::Bool(false),
        Func::Number => match args.first() {
            Some(expr) => Value::Num(eval(expr, ctx).number()),
            None => Value::Num(string_to_number(&ctx.item.item.string_value())),
        },
        Func::Boolean => Value::Bool(arg(0).boolean()),
        Func::Name => Value::Str(
            node_arg()
                .and_then(|n| {
                    let local = n.local_name()?;
                    Some(match n.prefix() {
                        Some(prefix) => format!("{prefix}:{local}"),
                        None => local,
                    })
                })
                .unwrap_or_default(),
        ),
        Func::LocalName => Value::Str(node_arg().and_then(|n| n.local_name()).unwrap_or_default()),
        Func::Translate => {
            let from: Vec<char> = arg(1).string().chars().collect();
            let to: Vec<char> = arg(2).string().chars().collect();
            let translated = arg(0)
                .string()
                .chars()
                .filter_map(|c| match from.iter().position(|&f| f == c) {
                    Some(i) => to.get(i).copied(),
                    None => Some(c),
                })
                .collect();
            Value::Str(translated)
        }
        Func::SubstringBefore => {
            let s = arg(0).string();
            let pat = arg(1).string();
            Value::Str(s.find(&pat).map(|i| s[..i].to_string()).unwrap_or_default())
        }
        Func::SubstringAfter => {
            let s = arg(0).string();
            let pat = arg(1).string();
            Value::Str(
                s.find(&pat)
                    .map(|i| s[i + pat.len()..].to_string())
                    .unwrap_or_default(),
            )
        }
        Func::Substring => {
            let s: Vec<char> = arg(0).string().chars().collect();
            let start = arg(1).number().round();
            let end = match args.get(2) {
                Some(len) => start + eval(len, ctx).number().round(),
                None => f64::INFINITY,
            };
            // 1-based, inclusive start, exclusive end
            let out = s
                .iter()
                .enumerate()
                .filter(|(i, _)| {
                    let p = (*i + 1) as f64;
                    p >= start && p < end
                })
                .map(|(_, c)| *c)
                .collect();
            Value::Str(out)
        }
        Func::Sum => match arg(0) {
            Value::Nodes(items) => Value::Num(
                items
                    .iter()
                    .map(|located| string_to_number(&located.item.string_value()))
                    .sum(),
            ),
            _ => Value::Num(f64::NAN),
        },
        Func::Floor => Value::Num(arg(0).number().floor()),
        Func::Ceiling => Value::Num(arg(0).number().ceil()),
        // halves round towards positive infinity
        Func::Round => {
            let n = arg(0).number();
            Value::Num(if n.is_finite() { (n + 0.5).floor() } else { n })
        }
        Func::Lang => {
            let wanted = arg(0).string().to_lowercase();
            let declared = ctx.item.item.node().and_then(declared_lang);
            Value::Bool(declared.is_some_and(|lang| {
                lang == wanted
                    || lang
                        .strip_prefix(&wanted)
                        .is_some_and(|rest| rest.starts_with('-'))
            }))
        }
    }
}

/// Nearest `xml:lang` or `lang` attribute on the node or an ancestor
fn declared_lang<N: XPathNode>(node: &N) -> Option<String> {
    let mut current = Some(node.clone());
    while let Some(n) = current {
        let lang = n
            .attributes()
            .into_iter()
            .find(|(name, _)| name == "xml:lang" || name.eq_ignore_ascii_case("lang"));
        if let Some((_, value)) = lang {
            return Some(value.to_lowercase());
        }
        current = n.parent();
    }
    None
}

fn string_to_number(s: &str) -> f64 {
    s.trim().parse().unwrap_or(f64::NAN)
}

fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal in-memory tree: (name, attrs, text, children)
    #[derive(Debug)]
    struct El {
        name: &'static str,
        attrs: Vec<(&'static str, &'static str)>,
        text: &'static str,
        children: Vec<usize>,
        parent: Option<usize>,
    }

    struct Tree {
        nodes: Vec<El>,
    }

    #[derive(Clone, Copy)]
    struct N<'a> {
        tree: &'a Tree,
        id: usize,
    }

    impl XPathNode for N<'_> {
        fn same_node(&self, other: &Self) -> bool {
            self.id == other.id
        }
        fn parent(&self) -> Option<Self> {
            self.tree.nodes[self.id].parent.map(|id| N { tree: self.tree, id })
        }
        fn children(&self) -> Vec<Self> {
            self.tree.nodes[self.id]
                .children
                .iter()
                .map(|&id| N { tree: self.tree, id })
                .collect()
        }
        fn texts(&self) -> Vec<String> {
            let text = self.tree.nodes[self.id].text;
            if text.is_empty() {
                vec![]
            } else {
                vec![text.to_string()]
            }
        }
        fn local_name(&self) -> Option<String> {
            let name = self.tree.nodes[self.id].name;
            (!name.is_empty()).then(|| name.to_string())
        }
        fn attributes(&self) -> Vec<(String, String)> {
            self.tree.nodes[self.id]
                .attrs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect()
        }
        fn string_value(&self) -> String {
            let mut out: String = self.texts().concat();
            for child in self.children() {
                out.push_str(&child.string_value());
            }
            out
        }
    }

    fn add(
        nodes: &mut Vec<El>,
        name: &'static str,
        attrs: Vec<(&'static str, &'static str)>,
        text: &'static str,
        parent: Option<usize>,
    ) -> usize {
        let id = nodes.len();
        nodes.push(El {
            name,
            attrs,
            text,
            children: vec![],
            parent,
        });
        if let Some(p) = parent {
            nodes[p].children.push(id);
        }
        id
    }

    /// <catalog><offer id="1"><name>A</name><price>10</price></offer>
    ///          <offer id="2"><name>B</name><price>20</price>
    ///            <picture>p1</picture><picture>p2</picture></offer></catalog>
    fn fixture() -> Tree {
        let mut nodes = Vec::new();
        let doc = add(&mut nodes, "", vec![], "", None);
        let catalog = add(&mut nodes, "catalog", vec![("xml:lang", "en-GB")], "", Some(doc));
        let o1 = add(&mut nodes, "offer", vec![("id", "1")], "", Some(catalog));
        add(&mut nodes, "name", vec![], "A", Some(o1));
        add(&mut nodes, "price", vec![], "10", Some(o1));
        let attrs = vec![("id", "2"), ("available", "true")];
        let o2 = add(&mut nodes, "offer", attrs, "", Some(catalog));
        add(&mut nodes, "name", vec![], "B", Some(o2));
        add(&mut nodes, "price", vec![], "20", Some(o2));
        add(&mut nodes, "picture", vec![], "p1", Some(o2));
        add(&mut nodes, "picture", vec![], "p2", Some(o2));
        Tree { nodes }
    }

    /// <div class="g"><section><img src="/1.jpg"></section><img src="/2.jpg">
    ///   <div><img src="/3.jpg"></div><img src="/4.jpg"></div>
    fn gallery() -> Tree {
        let mut nodes = Vec::new();
        let doc = add(&mut nodes, "", vec![], "", None);
        let outer = add(&mut nodes, "div", vec![("class", "g")], "", Some(doc));
        let section = add(&mut nodes, "section", vec![], "", Some(outer));
        // children are linked in document order, ids are not
        let inner = add(&mut nodes, "div", vec![], "", None);
        add(&mut nodes, "img", vec![("src", "/1.jpg")], "", Some(section));
        let img2 = add(&mut nodes, "img", vec![("src", "/2.jpg")], "", None);
        let img4 = add(&mut nodes, "img", vec![("src", "/4.jpg")], "", Some(outer));
        add(&mut nodes, "img", vec![("src", "/3.jpg")], "", Some(inner));
        for (id, at) in [(img2, 1), (inner, 2)] {
            nodes[id].parent = Some(outer);
            nodes[outer].children.insert(at, id);
        }
        Tree { nodes }
    }

    fn strings(tree: &Tree, context: usize, expr: &str) -> Vec<String> {
        let xpath = XPath::parse(expr).unwrap();
        xpath
            .select(&N { tree, id: context }, &Namespaces::new())
            .iter()
            .map(Item::string_value)
            .collect()
    }

    #[test]
    fn test_descendant_paths() {
        let tree = fixture();
        assert_eq!(strings(&tree, 0, "//offer/name"), vec!["A", "B"]);
        assert_eq!(strings(&tree, 0, "/catalog/offer/@id"), vec!["1", "2"]);
        assert_eq!(strings(&tree, 0, "count(//picture)"), vec!["2"]);
    }

    #[test]
    fn test_relative_to_item() {
        let tree = fixture();
        // node 5 is the second offer
        assert_eq!(strings(&tree, 5, "name"), vec!["B"]);
        assert_eq!(strings(&tree, 5, "./picture/text()"), vec!["p1", "p2"]);
        assert_eq!(strings(&tree, 5, "@available"), vec!["true"]);
        assert_eq!(strings(&tree, 5, "../offer[1]/name"), vec!["A"]);
    }

    #[test]
    fn test_predicates() {
        let tree = fixture();
        assert_eq!(strings(&tree, 0, "//offer[@id='2']/price"), vec!["20"]);
        assert_eq!(strings(&tree, 0, "//offer[price > 15]/name"), vec!["B"]);
        assert_eq!(strings(&tree, 0, "//offer[last()]/@id"), vec!["2"]);
        assert_eq!(strings(&tree, 0, "//offer[not(picture)]/name"), vec!["A"]);
        assert_eq!(
            strings(&tree, 0, "//offer[contains(name, 'B')]/picture[2]"),
            vec!["p2"]
        );
    }

    #[test]
    fn test_union_in_document_order() {
        let tree = fixture();
        assert_eq!(strings(&tree, 2, "name | price"), vec!["A", "10"]);
        assert_eq!(strings(&tree, 2, "price | name | name"), vec!["A", "10"]);
    }

    #[test]
    fn test_results_in_document_order() {
        let tree = gallery();
        let srcs = vec!["/1.jpg", "/2.jpg", "/3.jpg", "/4.jpg"];
        assert_eq!(strings(&tree, 0, "//img/@src"), srcs);
        assert_eq!(strings(&tree, 0, "//div[@class='g']//img/@src"), srcs);
        assert_eq!(strings(&tree, 0, "//div//img/@src"), srcs);
        assert_eq!(strings(&tree, 0, "(//img)[2]/@src"), vec!["/2.jpg"]);
        assert_eq!(strings(&tree, 0, "(//img)[last()]/@src"), vec!["/4.jpg"]);
        assert_eq!(
            strings(&tree, 0, "//div/img/@src | //section/img/@src"),
            srcs
        );
        // reverse axes still count positions from the context node
        assert_eq!(
            strings(&tree, 0, "//img[@src='/4.jpg']/preceding-sibling::*[1]/img/@src"),
            vec!["/3.jpg"]
        );
        assert_eq!(strings(&tree, 0, "count(//img/ancestor::div)"), vec!["2"]);
    }

    #[test]
    fn test_attributes_and_text_order_within_a_node() {
        let tree = fixture();
        assert_eq!(
            strings(&tree, 0, "//offer[2]/picture/text() | //offer[2]/@*"),
            vec!["2", "true", "p1", "p2"]
        );
    }

    #[test]
    fn test_arithmetic_operators() {
        let tree = fixture();
        assert_eq!(strings(&tree, 0, "count(//offer) * 2"), vec!["4"]);
        assert_eq!(strings(&tree, 0, "7 div 2"), vec!["3.5"]);
        assert_eq!(strings(&tree, 0, "7 mod 3"), vec!["1"]);
        assert_eq!(strings(&tree, 0, "-7 mod 3"), vec!["-1"]);
        assert_eq!(strings(&tree, 0, "1 + 2 * 3"), vec!["7"]);
        assert_eq!(strings(&tree, 0, "//picture[position() mod 2 = 1]"), vec!["p1"]);
        assert_eq!(strings(&tree, 0, "//offer[price * 2 > 30]/name"), vec!["B"]);
        assert_eq!(strings(&tree, 0, "//catalog/*/name"), vec!["A", "B"]);
    }

    #[test]
    fn test_number_functions() {
        let tree = fixture();
        assert_eq!(strings(&tree, 0, "sum(//price)"), vec!["30"]);
        assert_eq!(strings(&tree, 0, "floor(2.7)"), vec!["2"]);
        assert_eq!(strings(&tree, 0, "ceiling(2.1)"), vec!["3"]);
        assert_eq!(strings(&tree, 0, "round(2.5)"), vec!["3"]);
        assert_eq!(strings(&tree, 0, "round(-2.5)"), vec!["-2"]);
        assert_eq!(strings(&tree, 0, "sum(//picture)"), vec!["NaN"]);
    }

    #[test]
    fn test_lang() {
        let tree = fixture();
        assert_eq!(strings(&tree, 0, "//offer[lang('en')]/@id"), vec!["1", "2"]);
        assert_eq!(strings(&tree, 0, "//offer[lang('EN-gb')]/@id"), vec!["1", "2"]);
        assert!(strings(&tree, 0, "//offer[lang('de')]/@id").is_empty());
        assert!(strings(&tree, 0, "//offer[lang('en-G')]/@id").is_empty());
    }

    #[test]
    fn test_scalar_results() {
        let tree = fixture();
        assert_eq!(
            strings(&tree, 2, "concat(name, ' - ', price)"),
            vec!["A - 10"]
        );
        assert_eq!(strings(&tree, 2, "normalize-space('  a   b ')"), vec!["a b"]);
    }

    #[test]
    fn test_no_match_is_empty() {
        let tree = fixture();
        assert!(strings(&tree, 0, "//missing").is_empty());
        assert!(strings(&tree, 2, "@missing").is_empty());
    }

    #[test]
    fn test_parse_errors() {
        assert!(XPath::parse("").is_err());
        assert!(XPath::parse("//offer[").is_err());
        assert!(XPath::parse("frobnicate(1)").is_err());
        assert!(XPath::parse("bogus::x").is_err());
        assert!(XPath::parse("'unterminated").is_err());
        assert!(XPath::parse("2 *").is_err());
        assert!(XPath::parse("round(1, 2)").is_err());
        let err = XPath::parse("//a[").unwrap_err();
        assert!(err.to_string().starts_with("invalid XPath `//a[`"));
    }

    #[test]
    fn test_names_with_dashes_and_prefixes() {
        let tokens = tokenize("g:image_link | stock-qty | ns:*").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Name("g:image_link".into()),
                Token::Pipe,
                Token::Name("stock-qty".into()),
                Token::Pipe,
                Token::Name("ns:*".into()),
            ]
        );
    }
}
