//! Compiler from infix equation source to stack-machine programs.
//!
//! The pipeline mirrors what the instrument's own configuration tooling
//! accepts: tokenize, fold unary sign runs into the following atom, check
//! token order, build an n-ary token tree, rebalance it by operator
//! precedence, fold constant subexpressions, then emit bytecode through the
//! [Equation] builder.

use std::collections::VecDeque;

use crate::error::Error;

use super::Equation;

const FUNCTIONS: [&str; 6] = ["exp", "ln", "log", "abs", "int", "sqrt"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Unknown,
    Channel,
    Operator,
    Function,
    Float,
    OpenBracket,
    CloseBracket,
    /// `+` or `-` in a position where it may be a sign rather than a
    /// binary operator.
    UnaryOperator,
}

/// A source token with its span in the (lowercased) input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub text: String,
    pub kind: TokenKind,
    pub begin: usize,
    pub end: usize,
    /// Whitespace separated this token from the previous one. Decides
    /// whether a sign run may fold into this token.
    pub leading_whitespace: bool,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "\"{}\" @ {}-{}", self.text, self.begin, self.end)
    }
}

/// Errors from the equation compiler, carrying the offending tokens.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("{message} {token}")]
    Token { message: &'static str, token: Token },

    #[error("{message} {tokens:?}")]
    MultiToken {
        message: &'static str,
        tokens: Vec<Token>,
    },

    #[error("{message}")]
    Tree {
        message: &'static str,
        value: Option<Token>,
    },

    #[error("{message} (missing token)")]
    MissingToken { message: &'static str },
}

fn token_error(message: &'static str, token: &Token) -> ParseError {
    ParseError::Token {
        message,
        token: token.clone(),
    }
}

/// Split a leading sign off a folded token.
fn strip_negation(text: &str) -> (&str, bool) {
    match text.strip_prefix('-') {
        Some(rest) => (rest, true),
        None => (text, false),
    }
}

/// Numeric value and double-ness of a float token, honoring the `f`/`d`
/// suffix letters.
fn parse_float_text(token: &Token) -> Result<(f64, bool), ParseError> {
    let (text, double) = match token.text.strip_suffix(['f', 'd']) {
        Some(rest) => (rest, token.text.ends_with('d')),
        None => (token.text.as_str(), false),
    };
    match text.parse::<f64>() {
        Ok(value) => Ok((value, double)),
        Err(_) => Err(token_error("invalid float token", token)),
    }
}

fn parse_channel_text(token: &Token) -> Result<(u16, bool), ParseError> {
    let (text, negate) = strip_negation(&token.text);
    let number = text
        .strip_prefix('c')
        .and_then(|digits| digits.parse::<u16>().ok())
        .ok_or_else(|| token_error("invalid channel token", token))?;
    if number == 0 {
        return Err(token_error(
            "invalid channel token (channel number must be greater than 0)",
            token,
        ));
    }
    Ok((number, negate))
}

fn validate_token(token: &Token) -> Result<(), ParseError> {
    match token.kind {
        TokenKind::Unknown => Err(token_error("unknown token type for token", token)),
        TokenKind::Channel => parse_channel_text(token).map(|_| ()),
        TokenKind::Float => parse_float_text(token).map(|_| ()),
        TokenKind::Operator => match token.text.as_str() {
            "*" | "/" | "^" | "**" => Ok(()),
            _ => Err(token_error("invalid operator token", token)),
        },
        TokenKind::UnaryOperator => match token.text.as_str() {
            "+" | "-" => Ok(()),
            _ => Err(token_error("invalid maybe-unary operator token", token)),
        },
        TokenKind::Function => {
            let (name, _) = strip_negation(&token.text);
            if FUNCTIONS.contains(&name) {
                Ok(())
            } else {
                Err(token_error("invalid function token", token))
            }
        }
        TokenKind::OpenBracket | TokenKind::CloseBracket => Ok(()),
    }
}

/// Match state of the token being accumulated: 0 = none, 1 = numeric or
/// channel literal, 2 = identifier.
#[derive(Default)]
struct Tokenizer {
    tokens: Vec<Token>,
    text: String,
    kind: Option<TokenKind>,
    match_type: u8,
    begin: usize,
    leading_whitespace: bool,
}

impl Tokenizer {
    fn push_validated(&mut self, token: Token) -> Result<(), ParseError> {
        validate_token(&token)?;
        self.tokens.push(token);
        Ok(())
    }

    /// Flush the accumulated token (if any), then optionally push `also` as
    /// a single-character token of the given kind.
    fn push_current(
        &mut self,
        pos: usize,
        also: Option<char>,
        kind: Option<TokenKind>,
    ) -> Result<(), ParseError> {
        if !self.text.is_empty() {
            let token = Token {
                text: std::mem::take(&mut self.text),
                kind: self.kind.unwrap_or(TokenKind::Unknown),
                begin: self.begin,
                end: pos - 1,
                leading_whitespace: self.leading_whitespace,
            };
            self.push_validated(token)?;
            self.kind = kind;
            self.match_type = 0;
            self.leading_whitespace = false;
        }
        self.begin = pos;
        if let Some(c) = also {
            let token = Token {
                text: c.to_string(),
                kind: kind.unwrap_or(TokenKind::Unknown),
                begin: pos,
                end: pos,
                leading_whitespace: self.leading_whitespace,
            };
            self.push_validated(token)?;
            self.leading_whitespace = false;
        }
        Ok(())
    }

    fn push_if_not_type(
        &mut self,
        match_type: u8,
        pos: usize,
        kind: TokenKind,
    ) -> Result<(), ParseError> {
        if self.match_type != match_type {
            self.push_current(pos, None, Some(kind))?;
        }
        self.kind = Some(kind);
        self.match_type = match_type;
        Ok(())
    }
}

/// Split source text into validated tokens.
pub fn tokenize(src: &str) -> Result<Vec<Token>, ParseError> {
    let src = src.to_lowercase();
    let mut t = Tokenizer::default();

    for (i, c) in src.char_indices() {
        match c {
            '*' => {
                if !t.text.is_empty() && t.text != "*" {
                    t.push_current(i, None, Some(TokenKind::Operator))?;
                }
                t.kind = Some(TokenKind::Operator);
                t.text.push(c);
                if t.text == "**" {
                    t.push_current(i, None, None)?;
                }
            }
            '+' | '-' => {
                if t.match_type == 1 && t.text.ends_with('e') {
                    // exponent sign inside a numeric literal
                    t.text.push(c);
                } else {
                    t.push_current(i, Some(c), Some(TokenKind::UnaryOperator))?;
                }
            }
            '/' | '^' => t.push_current(i, Some(c), Some(TokenKind::Operator))?,
            '(' => t.push_current(i, Some(c), Some(TokenKind::OpenBracket))?,
            ')' => t.push_current(i, Some(c), Some(TokenKind::CloseBracket))?,
            '0'..='9' | '.' => {
                let mut kind = TokenKind::Float;
                if t.text.starts_with('c') {
                    // channels are a `c` followed by a number
                    kind = TokenKind::Channel;
                    if t.text.len() == 1 {
                        t.match_type = 1;
                    }
                }
                t.push_if_not_type(1, i, kind)?;
                t.text.push(c);
            }
            ' ' => {
                t.push_current(i, None, None)?;
                t.leading_whitespace = true;
            }
            'f' | 'd' if t.match_type == 1 && t.kind == Some(TokenKind::Float) => {
                // width suffix terminates the literal
                t.text.push(c);
                t.push_current(i + 1, None, None)?;
            }
            _ => {
                if c == 'e' && t.match_type == 1 {
                    t.text.push(c);
                } else {
                    t.push_if_not_type(2, i, TokenKind::Function)?;
                    t.text.push(c);
                }
            }
        }
    }

    t.push_current(src.len(), None, None)?;
    Ok(t.tokens)
}

/// Fold runs of `+`/`-` that sit where a sign can (program start, after an
/// operator, after `(`) into the following atom. Whitespace inside a run is
/// an error; a whitespace-prefixed atom is never folded.
pub fn fold_unary(tokens: Vec<Token>) -> Result<Vec<Token>, ParseError> {
    let mut out: Vec<Token> = Vec::new();
    let mut first_unary: Option<usize> = None;

    for (i, token) in tokens.iter().enumerate() {
        if token.kind == TokenKind::UnaryOperator {
            if first_unary.is_none() {
                if i > 0 {
                    let prev = &tokens[i - 1];
                    if prev.kind != TokenKind::Operator
                        && prev.kind != TokenKind::UnaryOperator
                        && prev.kind != TokenKind::OpenBracket
                    {
                        // binary position; leave it alone
                        out.push(token.clone());
                        continue;
                    }
                }
                first_unary = Some(i);
                continue;
            }
            if token.leading_whitespace {
                return Err(ParseError::MultiToken {
                    message: "invalid expression (unary operator chain cannot have whitespace inside of it)",
                    tokens: tokens[first_unary.unwrap()..=i].to_vec(),
                });
            }
            continue;
        }

        if token.leading_whitespace {
            out.push(token.clone());
            first_unary = None;
            continue;
        }

        let Some(first) = first_unary else {
            out.push(token.clone());
            continue;
        };

        let minus_count = tokens[first..i].iter().filter(|t| t.text == "-").count();
        let mut text = token.text.clone();
        if minus_count % 2 == 1 {
            match text.strip_prefix('-') {
                Some(rest) => text = rest.to_string(),
                None => text.insert(0, '-'),
            }
        }

        let folded = Token {
            text,
            kind: token.kind,
            begin: tokens[first].begin,
            end: token.end,
            leading_whitespace: false,
        };
        validate_token(&folded)?;
        out.push(folded);
        first_unary = None;
    }

    Ok(out)
}

/// Position symbols for order validation: the token kinds plus the two
/// pseudo-tokens bracketing the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sym {
    Begin,
    End,
    Kind(TokenKind),
}

fn allowed_prev(sym: Sym) -> &'static [Sym] {
    use TokenKind::*;
    match sym {
        Sym::Kind(Channel) | Sym::Kind(Float) | Sym::Kind(Function) => &[
            Sym::Kind(Unknown),
            Sym::Kind(Operator),
            Sym::Kind(OpenBracket),
            Sym::Kind(UnaryOperator),
            Sym::Begin,
        ],
        Sym::Kind(Operator) | Sym::Kind(CloseBracket) | Sym::End => &[
            Sym::Kind(Channel),
            Sym::Kind(Float),
            Sym::Kind(CloseBracket),
        ],
        Sym::Kind(OpenBracket) => &[
            Sym::Kind(Unknown),
            Sym::Kind(Operator),
            Sym::Kind(Function),
            Sym::Kind(OpenBracket),
            Sym::Kind(UnaryOperator),
            Sym::Begin,
        ],
        Sym::Kind(UnaryOperator) => &[
            Sym::Kind(Unknown),
            Sym::Kind(Channel),
            Sym::Kind(Operator),
            Sym::Kind(Float),
            Sym::Kind(CloseBracket),
            Sym::Kind(UnaryOperator),
            Sym::Begin,
        ],
        Sym::Kind(Unknown) | Sym::Begin => &[],
    }
}

/// Check adjacency rules and bracket balance over the whole stream.
pub fn validate_order(tokens: &[Token]) -> Result<(), ParseError> {
    if tokens.is_empty() {
        return Ok(());
    }

    let mut bracket_depth: i32 = 0;
    for i in 0..=tokens.len() {
        let sym = match tokens.get(i) {
            Some(token) => Sym::Kind(token.kind),
            None => Sym::End,
        };
        let prev = match i {
            0 => Sym::Begin,
            _ => Sym::Kind(tokens[i - 1].kind),
        };

        if sym == Sym::Kind(TokenKind::OpenBracket) {
            bracket_depth += 1;
        } else if sym == Sym::Kind(TokenKind::CloseBracket) {
            bracket_depth -= 1;
            if bracket_depth < 0 {
                return Err(token_error(
                    "invalid expression (closing bracket without opening bracket)",
                    &tokens[i],
                ));
            }
        }

        if !allowed_prev(sym).contains(&prev) {
            let mut involved = Vec::new();
            if i > 0 {
                involved.push(tokens[i - 1].clone());
            }
            if let Some(token) = tokens.get(i) {
                involved.push(token.clone());
            }
            return Err(ParseError::MultiToken {
                message: "invalid token order (token cannot follow token)",
                tokens: involved,
            });
        }
    }

    if bracket_depth != 0 {
        return Err(ParseError::MultiToken {
            message: "invalid expression (unclosed brackets)",
            tokens: tokens.to_vec(),
        });
    }
    Ok(())
}

/// An n-ary token tree node: children plus an optional anchor token
/// (function name, operator, or leaf value).
#[derive(Debug, Clone, Default, PartialEq)]
struct TreeNode {
    nodes: Vec<TreeNode>,
    value: Option<Token>,
}

impl TreeNode {
    fn leaf(token: Token) -> Self {
        TreeNode {
            nodes: Vec::new(),
            value: Some(token),
        }
    }

    fn float_value(&self) -> Option<&Token> {
        self.value
            .as_ref()
            .filter(|token| token.kind == TokenKind::Float)
    }
}

fn build_tree(tokens: &mut VecDeque<Token>, value: Option<Token>) -> Result<TreeNode, ParseError> {
    let mut tree = TreeNode {
        nodes: Vec::new(),
        value,
    };

    while let Some(token) = tokens.pop_front() {
        match token.kind {
            TokenKind::Function => {
                let bracket = tokens.pop_front().ok_or(ParseError::MissingToken {
                    message: "function must be followed by an opening bracket",
                })?;
                if bracket.kind != TokenKind::OpenBracket {
                    return Err(ParseError::MultiToken {
                        message: "invalid expression (function must be followed by an opening bracket)",
                        tokens: vec![token, bracket],
                    });
                }
                tree.nodes.push(build_tree(tokens, Some(token))?);
            }
            TokenKind::OpenBracket => tree.nodes.push(build_tree(tokens, None)?),
            TokenKind::CloseBracket => break,
            _ => tree.nodes.push(TreeNode::leaf(token)),
        }
    }

    if tree.nodes.is_empty() {
        return Err(ParseError::Tree {
            message: "invalid expression (empty tree)",
            value: tree.value,
        });
    }
    // a bare bracketed subtree collapses to its single child
    if tree.nodes.len() == 1 && tree.value.is_none() {
        return Ok(tree.nodes.pop().unwrap());
    }
    Ok(tree)
}

fn operator_precedence(text: &str) -> i64 {
    // kept 1000 apart; constant-adjacency nudges them for folding
    match text {
        "+" | "-" => 1000,
        "*" | "/" => 2000,
        _ => 3000,
    }
}

/// Rebalance flat `X op Y op Z ...` nodes into three-child trees, splitting
/// at the operator with the lowest adjusted precedence (leftmost on ties).
/// Operators adjacent to float literals are nudged away from the pivot so
/// constant pairs bind deepest and fold away.
fn simplify(node: &mut TreeNode) -> Result<(), ParseError> {
    for child in &mut node.nodes {
        simplify(child)?;
    }
    simplify_shallow(node)
}

fn simplify_shallow(node: &mut TreeNode) -> Result<(), ParseError> {
    if node.nodes.len() == 1 && node.value.is_none() {
        let child = node.nodes.pop().unwrap();
        node.value = child.value;
        node.nodes = child.nodes;
        return Ok(());
    }

    // 1-3 node subtrees are already in emit shape
    if node.nodes.len() < 4 {
        return Ok(());
    }

    let mut best: Option<(usize, i64)> = None;
    for (i, sub) in node.nodes.iter().enumerate() {
        let Some(token) = &sub.value else { continue };
        if token.kind != TokenKind::Operator && token.kind != TokenKind::UnaryOperator {
            continue;
        }

        let mut precedence = operator_precedence(&token.text);
        if i > 0 && node.nodes[i - 1].float_value().is_some() {
            precedence += 1;
        }
        if node
            .nodes
            .get(i + 1)
            .is_some_and(|next| next.float_value().is_some())
        {
            precedence += 1;
        }

        if best.is_none_or(|(_, best_precedence)| precedence < best_precedence) {
            best = Some((i, precedence));
        }
    }

    let Some((pivot, _)) = best else {
        return Err(ParseError::Tree {
            message: "invalid token tree (no operators found)",
            value: node.value.clone(),
        });
    };

    let right = node.nodes.split_off(pivot + 1);
    let op = node.nodes.pop().unwrap();
    let left = std::mem::take(&mut node.nodes);

    let mut left_node = TreeNode {
        nodes: left,
        value: None,
    };
    let op_node = TreeNode {
        nodes: Vec::new(),
        value: op.value,
    };
    let mut right_node = TreeNode {
        nodes: right,
        value: None,
    };

    simplify_shallow(&mut left_node)?;
    simplify_shallow(&mut right_node)?;

    node.nodes = vec![left_node, op_node, right_node];
    Ok(())
}

fn float_token(value: f64, double: bool, begin: usize, end: usize) -> Token {
    let text = if double {
        format!("{value}d")
    } else {
        format!("{value}")
    };
    Token {
        text,
        kind: TokenKind::Float,
        begin,
        end,
        leading_whitespace: false,
    }
}

/// Evaluate constant subexpressions bottom-up, replacing them with float
/// tokens. Domain violations and division by zero follow IEEE-754; the
/// resulting NaN or infinity still encodes.
fn fold_constants(node: &mut TreeNode) -> Result<(), ParseError> {
    for child in &mut node.nodes {
        fold_constants(child)?;
    }

    if node.nodes.len() == 1 {
        if node.value.is_none() {
            let child = node.nodes.pop().unwrap();
            node.value = child.value;
            node.nodes = child.nodes;
            return Ok(());
        }

        let Some(child) = node.nodes[0].float_value() else {
            return Ok(());
        };
        let anchor = node.value.clone().unwrap();
        if anchor.kind != TokenKind::Function {
            return Err(token_error("invalid constant expression", &anchor));
        }

        let (value, double) = parse_float_text(child)?;
        let (name, negate) = strip_negation(&anchor.text);
        let mut value = match name {
            "exp" => value.exp(),
            "ln" => value.ln(),
            "log" => value.log10(),
            "abs" => value.abs(),
            "int" => value.trunc(),
            "sqrt" => value.sqrt(),
            _ => {
                return Err(token_error(
                    "unhandled function token for constant expression",
                    &anchor,
                ))
            }
        };
        if negate {
            value = -value;
        }

        let end = child.end;
        node.value = Some(float_token(value, double, anchor.begin, end));
        node.nodes.clear();
        return Ok(());
    }

    if node.nodes.len() != 3 {
        return Ok(());
    }

    let (Some(left), Some(right)) = (node.nodes[0].float_value(), node.nodes[2].float_value())
    else {
        return Ok(());
    };

    let op = node.nodes[1]
        .value
        .as_ref()
        .ok_or(ParseError::MissingToken {
            message: "operator token for constant expression",
        })?;
    if op.kind != TokenKind::Operator && op.kind != TokenKind::UnaryOperator {
        return Err(token_error("invalid operator token for constant expression", op));
    }

    let (left_value, left_double) = parse_float_text(left)?;
    let (right_value, right_double) = parse_float_text(right)?;
    let value = match op.text.as_str() {
        "+" => left_value + right_value,
        "-" => left_value - right_value,
        "*" => left_value * right_value,
        "/" => left_value / right_value,
        "^" | "**" => left_value.powf(right_value),
        _ => {
            return Err(token_error(
                "unhandled operator token for constant expression",
                op,
            ))
        }
    };

    let (begin, end) = (left.begin, right.end);
    node.value = Some(float_token(value, left_double || right_double, begin, end));
    node.nodes.clear();
    Ok(())
}

fn emit_token(token: &Token, eq: &mut Equation) -> Result<(), Error> {
    match token.kind {
        TokenKind::Channel => {
            let (channel, negate) = parse_channel_text(token)?;
            eq.push_channel(channel)?;
            if negate {
                eq.unary_minus()?;
            }
        }
        TokenKind::Float => {
            let (value, double) = parse_float_text(token)?;
            if double {
                eq.push_double(value)?;
            } else {
                eq.push_float(value as f32)?;
            }
        }
        TokenKind::Operator | TokenKind::UnaryOperator => {
            match token.text.as_str() {
                "+" => eq.add()?,
                "-" => eq.subtract()?,
                "*" => eq.multiply()?,
                "/" => eq.divide()?,
                "^" | "**" => eq.power()?,
                _ => return Err(token_error("unhandled operator token for emit", token).into()),
            };
        }
        TokenKind::Function => {
            let (name, negate) = strip_negation(&token.text);
            match name {
                "exp" => eq.exp()?,
                "ln" => eq.ln()?,
                "log" => eq.log()?,
                "abs" => eq.abs()?,
                "int" => eq.int()?,
                "sqrt" => eq.sqrt()?,
                _ => return Err(token_error("unhandled function token for emit", token).into()),
            };
            if negate {
                eq.unary_minus()?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn emit_tree(node: &TreeNode, eq: &mut Equation) -> Result<(), Error> {
    match node.nodes.len() {
        1 => emit_tree(&node.nodes[0], eq)?,
        2 => {
            let op = node.nodes[0].value.as_ref().ok_or(ParseError::Tree {
                message: "invalid token tree (missing unary operator node value)",
                value: node.value.clone(),
            })?;
            emit_tree(&node.nodes[1], eq)?;
            emit_token(op, eq)?;
        }
        3 => {
            let op = node.nodes[1].value.as_ref().ok_or(ParseError::Tree {
                message: "invalid token tree (missing binary operator node value)",
                value: node.value.clone(),
            })?;

            if op.text == "+" || op.text == "*" {
                // commutative: pick whichever operand order peaks lower
                let mut left_first = Equation::new();
                emit_tree(&node.nodes[0], &mut left_first)?;
                emit_tree(&node.nodes[2], &mut left_first)?;

                let mut right_first = Equation::new();
                emit_tree(&node.nodes[2], &mut right_first)?;
                emit_tree(&node.nodes[0], &mut right_first)?;

                if right_first.max_stack_depth() < left_first.max_stack_depth() {
                    eq.append(&right_first)?;
                } else {
                    eq.append(&left_first)?;
                }
            } else {
                emit_tree(&node.nodes[0], eq)?;
                emit_tree(&node.nodes[2], eq)?;
            }
            emit_token(op, eq)?;
        }
        _ => {}
    }

    if let Some(value) = &node.value {
        emit_token(value, eq)?;
    }
    Ok(())
}

/// Compile equation source into a validated program.
pub fn compile(src: &str) -> Result<Equation, Error> {
    let tokens = tokenize(src)?;
    let tokens = fold_unary(tokens)?;
    validate_order(&tokens)?;

    let mut tokens: VecDeque<Token> = tokens.into();
    let mut tree = build_tree(&mut tokens, None)?;
    simplify(&mut tree)?;
    fold_constants(&mut tree)?;

    let mut eq = Equation::new();
    emit_tree(&tree, &mut eq)?;
    eq.end()?;
    eq.validate()?;
    Ok(eq)
}
