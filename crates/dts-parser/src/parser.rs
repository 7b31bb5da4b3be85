//! Recovering recursive-descent parser.
//!
//! The parser never aborts. On a mismatch it records a [`SyntaxIssue`] tied
//! to a concrete AST element and skips forward to a synchronization token:
//! `;` at statement level, `}` at block level, `/`, `&` or a directive at
//! the top level. At end-of-file, open constructs close with synthetic
//! zero-length tokens positioned at the real end of the file.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use dts_diagnostic::{Diagnostic, Position, SourceId, SrcSpan, SyntaxIssue};

use crate::ast::*;
use crate::lexer::{tokenize_all, Token, TokenKind};

/// Parses `text` into a [`SourceDoc`] plus the syntax issues found on the
/// way. Total: any byte sequence yields a document.
pub fn parse_source(
    uri: SourceId,
    text: &str,
    macros: &FxHashMap<String, String>,
) -> (SourceDoc, Vec<Diagnostic>) {
    let (tokens, eof) = tokenize_all(text);
    parse_tokens(uri, &tokens, eof, macros)
}

pub(crate) fn parse_tokens(
    uri: SourceId,
    tokens: &[Token],
    eof: Position,
    macros: &FxHashMap<String, String>,
) -> (SourceDoc, Vec<Diagnostic>) {
    let mut session = ParseSession {
        uri: uri.clone(),
        tokens,
        cursor: 0,
        eof,
        macros,
        issues: Vec::new(),
        last_consumed: None,
    };

    let declarations = session.parse_document();

    let first = tokens
        .first()
        .cloned()
        .unwrap_or_else(|| Token::synthetic(TokenKind::Unknown, 0, 0));
    // Synthetic constructs may sit past the last real token, so the document
    // always ends at the end-of-file position.
    let last = Token::synthetic(TokenKind::Unknown, eof.line, eof.col);

    let doc = SourceDoc {
        uri,
        declarations,
        first,
        last,
    };
    (doc, session.issues)
}

struct ParseSession<'t> {
    uri: SourceId,
    tokens: &'t [Token],
    cursor: usize,
    eof: Position,
    macros: &'t FxHashMap<String, String>,
    issues: Vec<Diagnostic>,
    last_consumed: Option<Token>,
}

enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Shl,
    Shr,
    And,
    Or,
    Xor,
}

impl<'t> ParseSession<'t> {
    // -- token access -----------------------------------------------------

    /// Index of the next non-trivia token.
    fn peek_index(&self) -> Option<usize> {
        self.tokens[self.cursor..]
            .iter()
            .position(|tok| !tok.is_trivia())
            .map(|offset| self.cursor + offset)
    }

    fn peek(&self) -> Option<&Token> {
        self.peek_index().map(|idx| &self.tokens[idx])
    }

    fn peek_kind(&self) -> Option<TokenKind> {
        self.peek().map(|tok| tok.kind)
    }

    /// Kind of the raw token at the cursor, trivia included.
    fn raw_kind(&self) -> Option<TokenKind> {
        self.tokens.get(self.cursor).map(|tok| tok.kind)
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.peek_kind() == Some(kind)
    }

    /// Consumes the next non-trivia token. Callers must have peeked first.
    fn bump(&mut self) -> Token {
        let idx = self.peek_index().expect("bump past end of input");
        self.cursor = idx + 1;
        let token = self.tokens[idx].clone();
        self.last_consumed = Some(token.clone());
        token
    }

    fn eat(&mut self, kind: TokenKind) -> Option<Token> {
        self.at(kind).then(|| self.bump())
    }

    /// A zero-length token at the start of the next token, or at end-of-file.
    fn synthetic_here(&self, kind: TokenKind) -> Token {
        let pos = self.peek().map(|tok| tok.pos).unwrap_or(self.eof);
        Token::synthetic(kind, pos.line, pos.col)
    }

    /// Position where a missing item would go: just after the last consumed
    /// token.
    fn anchor(&self) -> Position {
        self.last_consumed
            .as_ref()
            .map(|tok| Position::zero_width(tok.pos.line, tok.end_col()))
            .unwrap_or(Position::zero_width(0, 0))
    }

    fn issue(&mut self, kind: SyntaxIssue, span: SrcSpan) {
        self.issues
            .push(Diagnostic::new(kind, self.uri.clone(), span));
    }

    fn issue_arg(&mut self, kind: SyntaxIssue, span: SrcSpan, arg: impl Into<String>) {
        self.issues
            .push(Diagnostic::new(kind, self.uri.clone(), span).with_arg(arg));
    }

    fn unexpected(&mut self, token: &Token) {
        let arg = if token.text.is_empty() {
            token.kind.to_string()
        } else {
            token.text.clone()
        };
        self.issue_arg(SyntaxIssue::UnexpectedToken, SrcSpan::point(token.pos), arg);
    }

    // -- names and labels -------------------------------------------------

    /// Recombines a run of adjacent `Ident`/`Number` tokens into one name.
    ///
    /// `node1` arrives as `Ident "node"` + `Number "1"`; the run stops at the
    /// first trivia or punctuation token.
    fn parse_name(&mut self) -> Option<Name> {
        let idx = self.peek_index()?;
        if !self.tokens[idx].kind.is_name_part() {
            return None;
        }
        self.cursor = idx;
        let first = self.tokens[idx].clone();
        let mut last = first.clone();
        let mut text = String::new();
        while let Some(tok) = self.tokens.get(self.cursor) {
            if !tok.kind.is_name_part() {
                break;
            }
            text.push_str(&tok.text);
            last = tok.clone();
            self.cursor += 1;
        }
        self.last_consumed = Some(last.clone());
        Some(Name { text, first, last })
    }

    /// True when the upcoming tokens form `name:`.
    fn at_label(&self) -> bool {
        let Some(mut idx) = self.peek_index() else {
            return false;
        };
        if !self.tokens[idx].kind.is_name_part() {
            return false;
        }
        while self
            .tokens
            .get(idx)
            .is_some_and(|tok| tok.kind.is_name_part())
        {
            idx += 1;
        }
        self.tokens
            .get(idx)
            .is_some_and(|tok| tok.kind == TokenKind::Colon)
    }

    fn parse_labels(&mut self) -> Vec<LabelAssign> {
        let mut out = Vec::new();
        while self.at_label() {
            let name = self.parse_name().expect("at_label checked the run");
            let colon = self.bump();
            out.push(LabelAssign {
                name: name.text,
                first: name.first,
                last: colon,
            });
        }
        out
    }

    fn labels_not_allowed(&mut self, labels: &[LabelAssign]) {
        for label in labels {
            self.issue(SyntaxIssue::LabelNotAllowed, label.span());
        }
    }

    // -- statements -------------------------------------------------------

    fn parse_document(&mut self) -> Vec<Declaration> {
        let mut decls = Vec::new();
        while self.peek_index().is_some() {
            self.parse_toplevel(&mut decls);
        }
        decls
    }

    fn parse_toplevel(&mut self, decls: &mut Vec<Declaration>) {
        let labels = self.parse_labels();
        match self.peek_kind() {
            Some(TokenKind::Slash) => decls.push(self.parse_root_node(labels)),
            Some(TokenKind::Ampersand) => decls.push(self.parse_ref_node(labels)),
            Some(TokenKind::Directive) => decls.push(self.parse_directive(labels)),
            Some(kind) if kind.is_name_part() => decls.push(self.parse_named(labels, true)),
            Some(_) => decls.push(self.recover_invalid(labels)),
            None => self.labels_not_allowed(&labels),
        }
    }

    fn parse_member(&mut self, decls: &mut Vec<Declaration>) {
        let labels = self.parse_labels();
        match self.peek_kind() {
            Some(TokenKind::Directive) => decls.push(self.parse_directive(labels)),
            Some(kind) if kind.is_name_part() => decls.push(self.parse_named(labels, false)),
            Some(_) => decls.push(self.recover_invalid(labels)),
            None => self.labels_not_allowed(&labels),
        }
    }

    /// Panic-mode recovery: consume the offending token, then skip to a
    /// synchronization point.
    fn recover_invalid(&mut self, labels: Vec<LabelAssign>) -> Declaration {
        self.labels_not_allowed(&labels);

        let offending = self.bump();
        self.unexpected(&offending);

        let mut tokens = vec![offending];
        loop {
            match self.peek_kind() {
                None
                | Some(
                    TokenKind::RBrace
                    | TokenKind::Slash
                    | TokenKind::Ampersand
                    | TokenKind::Directive,
                ) => break,
                Some(TokenKind::Semicolon) => {
                    tokens.push(self.bump());
                    break;
                }
                Some(_) => tokens.push(self.bump()),
            }
        }

        let first = tokens[0].clone();
        let last = tokens.last().cloned().unwrap_or_else(|| first.clone());
        Declaration::Invalid(Arc::new(InvalidElement {
            tokens,
            first,
            last,
        }))
    }

    /// Missing `;` makes the element end at its last real token and gains an
    /// `EndStatement` issue pointing there.
    fn expect_statement_end(&mut self, first: &Token, last_real: Token) -> Token {
        if self.at(TokenKind::Semicolon) {
            self.bump()
        } else {
            self.issue(
                SyntaxIssue::EndStatement,
                SrcSpan::new(first.pos, last_real.pos),
            );
            last_real
        }
    }

    fn parse_root_node(&mut self, labels: Vec<LabelAssign>) -> Declaration {
        let slash = self.bump();
        if !self.at(TokenKind::LBrace) {
            // A lone `/` is not a node.
            self.labels_not_allowed(&labels);
            self.unexpected(&slash);
            let mut tokens = vec![slash.clone()];
            loop {
                match self.peek_kind() {
                    None
                    | Some(
                        TokenKind::RBrace
                        | TokenKind::Slash
                        | TokenKind::Ampersand
                        | TokenKind::Directive,
                    ) => break,
                    Some(TokenKind::Semicolon) => {
                        tokens.push(self.bump());
                        break;
                    }
                    Some(_) => tokens.push(self.bump()),
                }
            }
            let last = tokens.last().cloned().unwrap_or_else(|| slash.clone());
            return Declaration::Invalid(Arc::new(InvalidElement {
                tokens,
                first: slash,
                last,
            }));
        }
        let body = self.parse_node_body();
        let last = if body.close_synthetic {
            body.close.clone()
        } else {
            self.expect_statement_end(&slash, body.close.clone())
        };
        Declaration::Root(Arc::new(RootNode {
            labels,
            body,
            first: slash,
            last,
        }))
    }

    fn parse_ref_node(&mut self, labels: Vec<LabelAssign>) -> Declaration {
        let reference = self.parse_reference();
        let first = reference.first_token().clone();
        if !self.at(TokenKind::LBrace) {
            let last_real = reference.last_token().clone();
            let last = self.expect_statement_end(&first, last_real);
            // `&label;` without a body still merges as an (empty) extension.
            let open = self.synthetic_here(TokenKind::LBrace);
            let close = self.synthetic_here(TokenKind::RBrace);
            return Declaration::Ref(Arc::new(RefNode {
                labels,
                reference,
                body: NodeBody {
                    declarations: Vec::new(),
                    open,
                    close,
                    close_synthetic: true,
                },
                first,
                last,
            }));
        }
        let body = self.parse_node_body();
        let last = if body.close_synthetic {
            body.close.clone()
        } else {
            self.expect_statement_end(&first, body.close.clone())
        };
        Declaration::Ref(Arc::new(RefNode {
            labels,
            reference,
            body,
            first,
            last,
        }))
    }

    fn parse_node_body(&mut self) -> NodeBody {
        let open = self.bump();
        let mut declarations = Vec::new();
        let (close, close_synthetic) = loop {
            match self.peek_kind() {
                None => {
                    self.issue_arg(
                        SyntaxIssue::MissingBrace,
                        SrcSpan::new(open.pos, self.eof),
                        "}",
                    );
                    break (
                        Token::synthetic(TokenKind::RBrace, self.eof.line, self.eof.col),
                        true,
                    );
                }
                Some(TokenKind::RBrace) => break (self.bump(), false),
                Some(_) => self.parse_member(&mut declarations),
            }
        };
        NodeBody {
            declarations,
            open,
            close,
            close_synthetic,
        }
    }

    /// A statement opening with a name: a property or a child node.
    fn parse_named(&mut self, labels: Vec<LabelAssign>, top_level: bool) -> Declaration {
        let name = self.parse_name().expect("caller checked the name start");

        // Optional unit address. `@` and the address must hug the name; any
        // gap is reported but the address is still parsed and attached.
        let mut at = None;
        let mut ws_before_at = false;
        if self.raw_kind() == Some(TokenKind::At) {
            at = Some(self.bump());
        } else if self.at(TokenKind::At) {
            ws_before_at = true;
            at = Some(self.bump());
        }

        let mut address = None;
        let mut address_first = None;
        let mut address_last = None;
        if let Some(at_tok) = &at {
            let immediate = self.raw_kind().is_some_and(TokenKind::is_name_part);
            let gapped = !immediate && self.peek_kind().is_some_and(TokenKind::is_name_part);
            if immediate || gapped {
                let run = self.parse_name().expect("address run checked");
                if ws_before_at || gapped {
                    let span_first = if ws_before_at { name.first.pos } else { at_tok.pos };
                    self.issue(
                        SyntaxIssue::NodeNameAddressWhitespace,
                        SrcSpan::new(span_first, run.last.pos),
                    );
                }
                match parse_unit_address(&run.text) {
                    Some(value) => address = Some(value),
                    None => self.issue(SyntaxIssue::NodeAddress, run.span()),
                }
                address_first = Some(run.first);
                address_last = Some(run.last);
            } else {
                // `name@` with nothing usable after it.
                self.issue(SyntaxIssue::NodeAddress, name.span());
            }
        }

        match self.peek_kind() {
            Some(TokenKind::LBrace) => {
                if top_level {
                    // Only `/`, `&label` and directives may open a top-level
                    // statement.
                    self.issue_arg(SyntaxIssue::UnexpectedToken, name.span(), name.text.clone());
                }
                let node_name = NodeName {
                    name: name.text,
                    address,
                    name_first: name.first.clone(),
                    name_last: name.last,
                    at,
                    address_first,
                    address_last,
                };
                let body = self.parse_node_body();
                let last = if body.close_synthetic {
                    body.close.clone()
                } else {
                    self.expect_statement_end(&name.first, body.close.clone())
                };
                Declaration::Child(Arc::new(ChildNode {
                    labels,
                    name: Some(node_name),
                    body,
                    first: name.first,
                    last,
                }))
            }
            Some(TokenKind::Equals) | Some(TokenKind::Semicolon) | Some(TokenKind::RBrace)
            | None => {
                if let Some(at_tok) = at {
                    self.unexpected(&at_tok);
                }
                self.parse_property(labels, name)
            }
            Some(_) => {
                let offending = self.bump();
                self.unexpected(&offending);
                let mut tokens = vec![name.first.clone(), offending];
                loop {
                    match self.peek_kind() {
                        None
                        | Some(
                            TokenKind::RBrace
                            | TokenKind::Slash
                            | TokenKind::Ampersand
                            | TokenKind::Directive,
                        ) => break,
                        Some(TokenKind::Semicolon) => {
                            tokens.push(self.bump());
                            break;
                        }
                        Some(_) => tokens.push(self.bump()),
                    }
                }
                let last = tokens.last().cloned().unwrap_or_else(|| name.last.clone());
                Declaration::Invalid(Arc::new(InvalidElement {
                    tokens,
                    first: name.first,
                    last,
                }))
            }
        }
    }

    fn parse_property(&mut self, labels: Vec<LabelAssign>, name: Name) -> Declaration {
        let first = name.first.clone();
        let mut values = Vec::new();

        let last = if let Some(semi) = self.eat(TokenKind::Semicolon) {
            semi
        } else if let Some(equals) = self.eat(TokenKind::Equals) {
            self.parse_values(&mut values);
            let last_real = values
                .last()
                .map(|value| value.last_token().clone())
                .unwrap_or(equals);
            self.expect_statement_end(&first, last_real)
        } else {
            // Boolean property missing its `;` (next token is `}` or EOF).
            self.expect_statement_end(&first, name.last.clone())
        };

        Declaration::Property(Arc::new(Property {
            labels,
            name,
            values,
            first,
            last,
        }))
    }

    fn parse_values(&mut self, values: &mut Vec<PropValue>) {
        loop {
            match self.peek_kind() {
                Some(TokenKind::String) => {
                    let token = self.bump();
                    if token.unterminated {
                        self.issue(SyntaxIssue::UnterminatedString, SrcSpan::point(token.pos));
                    }
                    values.push(PropValue::Str(StringValue { token }));
                }
                Some(TokenKind::LAngle) => {
                    let array = self.parse_cell_array();
                    values.push(PropValue::Cells(array));
                }
                Some(TokenKind::Ampersand) => match self.parse_reference() {
                    Reference::Label(label) => values.push(PropValue::Ref(label)),
                    Reference::Path(path) => values.push(PropValue::Path(path)),
                },
                Some(TokenKind::LBracket) => {
                    let bytes = self.parse_byte_string();
                    values.push(PropValue::Bytes(bytes));
                }
                Some(TokenKind::Semicolon) | Some(TokenKind::RBrace) | None => {
                    self.issue(
                        SyntaxIssue::MissingValue,
                        SrcSpan::point(self.anchor()),
                    );
                    return;
                }
                Some(_) => {
                    let offending = self.bump();
                    self.unexpected(&offending);
                    // Resync inside the value list.
                    loop {
                        match self.peek_kind() {
                            None
                            | Some(
                                TokenKind::Comma | TokenKind::Semicolon | TokenKind::RBrace,
                            ) => break,
                            Some(_) => {
                                self.bump();
                            }
                        }
                    }
                    if !self.at(TokenKind::Comma) {
                        return;
                    }
                }
            }

            if self.eat(TokenKind::Comma).is_none() {
                return;
            }
        }
    }

    fn parse_cell_array(&mut self) -> CellArray {
        let open = self.bump();
        let mut cells = Vec::new();
        let close = loop {
            match self.peek_kind() {
                Some(TokenKind::RAngle) => break self.bump(),
                Some(TokenKind::Number) => {
                    let token = self.bump();
                    let value = match parse_int(&token.text) {
                        Some(value) => value,
                        None => {
                            self.unexpected(&token);
                            0
                        }
                    };
                    cells.push(Cell::Number(CellNumber { value, token }));
                }
                Some(TokenKind::Ident) => {
                    let run = self.parse_name().expect("peeked an identifier");
                    let value = self.macros.get(&run.text).and_then(|repl| parse_int(repl));
                    cells.push(Cell::Macro(MacroUse {
                        name: run.text,
                        value,
                        token: run.first,
                    }));
                }
                Some(TokenKind::Ampersand) => match self.parse_reference() {
                    Reference::Label(label) => cells.push(Cell::Ref(label)),
                    Reference::Path(path) => cells.push(Cell::Path(path)),
                },
                Some(TokenKind::LParen) => cells.push(self.parse_cell_expr()),
                Some(TokenKind::Semicolon) | Some(TokenKind::RBrace) | None => {
                    self.issue_arg(
                        SyntaxIssue::MissingBrace,
                        SrcSpan::new(open.pos, self.anchor()),
                        ">",
                    );
                    break self.synthetic_here(TokenKind::RAngle);
                }
                Some(_) => {
                    let offending = self.bump();
                    self.unexpected(&offending);
                }
            }
        };
        CellArray {
            cells,
            first: open,
            last: close,
        }
    }

    fn parse_cell_expr(&mut self) -> Cell {
        let open = self.bump();
        let value = self.parse_expr_bp(0);
        let close = if self.at(TokenKind::RParen) {
            self.bump()
        } else {
            self.issue_arg(
                SyntaxIssue::MissingBrace,
                SrcSpan::new(open.pos, self.anchor()),
                ")",
            );
            self.synthetic_here(TokenKind::RParen)
        };
        Cell::Expr(CellExpr {
            value,
            first: open,
            last: close,
        })
    }

    /// Precedence-climbing integer expression evaluator. Unresolved macros
    /// poison the value to `None` without a diagnostic; the preprocessor is
    /// out of scope.
    fn parse_expr_bp(&mut self, min_bp: u8) -> Option<u64> {
        let mut lhs = match self.peek_kind() {
            Some(TokenKind::Number) => {
                let token = self.bump();
                match parse_int(&token.text) {
                    Some(value) => Some(value),
                    None => {
                        self.unexpected(&token);
                        None
                    }
                }
            }
            Some(TokenKind::Ident) => {
                let run = self.parse_name().expect("peeked an identifier");
                self.macros.get(&run.text).and_then(|repl| parse_int(repl))
            }
            Some(TokenKind::LParen) => {
                self.bump();
                let value = self.parse_expr_bp(0);
                if self.eat(TokenKind::RParen).is_none() {
                    self.issue_arg(
                        SyntaxIssue::MissingBrace,
                        SrcSpan::point(self.anchor()),
                        ")",
                    );
                }
                value
            }
            Some(TokenKind::Minus) => {
                self.bump();
                self.parse_expr_bp(11).map(u64::wrapping_neg)
            }
            Some(TokenKind::Tilde) => {
                self.bump();
                self.parse_expr_bp(11).map(|value| !value)
            }
            Some(TokenKind::Bang) => {
                self.bump();
                self.parse_expr_bp(11).map(|value| u64::from(value == 0))
            }
            _ => {
                self.issue(SyntaxIssue::MissingValue, SrcSpan::point(self.anchor()));
                return None;
            }
        };

        loop {
            let (l_bp, op) = match self.peek_kind() {
                Some(TokenKind::Star) => (10, BinOp::Mul),
                Some(TokenKind::Slash) => (10, BinOp::Div),
                Some(TokenKind::Percent) => (10, BinOp::Mod),
                Some(TokenKind::Plus) => (9, BinOp::Add),
                Some(TokenKind::Minus) => (9, BinOp::Sub),
                Some(TokenKind::Shl) => (8, BinOp::Shl),
                Some(TokenKind::Shr) => (8, BinOp::Shr),
                Some(TokenKind::Ampersand) => (7, BinOp::And),
                Some(TokenKind::Caret) => (6, BinOp::Xor),
                Some(TokenKind::Pipe) => (5, BinOp::Or),
                _ => break,
            };
            if l_bp < min_bp {
                break;
            }
            self.bump();
            let rhs = self.parse_expr_bp(l_bp + 1);
            lhs = match (lhs, rhs) {
                (Some(a), Some(b)) => eval_binop(op, a, b),
                _ => None,
            };
        }
        lhs
    }

    fn parse_byte_string(&mut self) -> ByteString {
        let open = self.bump();
        let mut digits = String::new();
        let close = loop {
            match self.peek_kind() {
                Some(TokenKind::RBracket) => break self.bump(),
                Some(TokenKind::Number) | Some(TokenKind::Ident) => {
                    let token = self.bump();
                    digits.push_str(&token.text);
                }
                Some(TokenKind::Semicolon) | Some(TokenKind::RBrace) | None => {
                    self.issue_arg(
                        SyntaxIssue::MissingBrace,
                        SrcSpan::new(open.pos, self.anchor()),
                        "]",
                    );
                    break self.synthetic_here(TokenKind::RBracket);
                }
                Some(_) => {
                    let offending = self.bump();
                    self.unexpected(&offending);
                }
            }
        };

        let mut bytes = Vec::new();
        if digits.chars().all(|c| c.is_ascii_hexdigit()) && digits.len() % 2 == 0 {
            for pair in digits.as_bytes().chunks_exact(2) {
                let pair = std::str::from_utf8(pair).expect("hex digits are ASCII");
                bytes.push(u8::from_str_radix(pair, 16).expect("checked hex digits"));
            }
        } else {
            self.issue_arg(
                SyntaxIssue::UnexpectedToken,
                SrcSpan::new(open.pos, close.pos),
                digits.clone(),
            );
        }

        ByteString {
            bytes,
            first: open,
            last: close,
        }
    }

    /// `&label` or `&{/absolute/path}`.
    fn parse_reference(&mut self) -> Reference {
        let amp = self.bump();
        if self.at(TokenKind::LBrace) {
            self.bump();
            let mut segments = Vec::new();
            let close = loop {
                match self.peek_kind() {
                    Some(TokenKind::RBrace) => break self.bump(),
                    Some(TokenKind::Slash) => {
                        self.bump();
                    }
                    Some(kind) if kind.is_name_part() => {
                        let run = self.parse_name().expect("peeked a name");
                        let mut text = run.text;
                        if self.raw_kind() == Some(TokenKind::At) {
                            self.bump();
                            text.push('@');
                            if self.raw_kind().is_some_and(TokenKind::is_name_part) {
                                let addr = self.parse_name().expect("peeked a name");
                                text.push_str(&addr.text);
                            }
                        }
                        segments.push(text);
                    }
                    _ => {
                        self.issue_arg(
                            SyntaxIssue::MissingBrace,
                            SrcSpan::new(amp.pos, self.anchor()),
                            "}",
                        );
                        break self.synthetic_here(TokenKind::RBrace);
                    }
                }
            };
            return Reference::Path(NodePathRef {
                segments,
                first: amp,
                last: close,
            });
        }

        match self.parse_name() {
            Some(run) => Reference::Label(LabelRef {
                value: run.text,
                first: amp,
                last: run.last,
            }),
            None => {
                self.issue(SyntaxIssue::ExpectedName, SrcSpan::point(amp.pos));
                let last = amp.clone();
                Reference::Label(LabelRef {
                    value: String::new(),
                    first: amp,
                    last,
                })
            }
        }
    }

    // -- directives -------------------------------------------------------

    fn parse_directive(&mut self, labels: Vec<LabelAssign>) -> Declaration {
        let tok = self.bump();
        match tok.text.as_str() {
            "/delete-node/" => self.parse_delete_node(labels, tok),
            "/delete-property/" => self.parse_delete_property(labels, tok),
            "/dts-v1/" => self.directive_stmt(labels, tok, DirectiveKind::DtsVersion, true),
            "/plugin/" => self.directive_stmt(labels, tok, DirectiveKind::Plugin, true),
            "/omit-if-no-ref/" => {
                // Prefixes the following node definition; no `;` of its own.
                self.directive_stmt(labels, tok, DirectiveKind::OmitIfNoRef, false)
            }
            "/memreserve/" => {
                let start = self.parse_directive_number();
                let len = self.parse_directive_number();
                self.directive_stmt(labels, tok, DirectiveKind::MemReserve { start, len }, true)
            }
            "/include/" => {
                let path = match self.eat(TokenKind::String) {
                    Some(string) => {
                        if string.unterminated {
                            self.issue(
                                SyntaxIssue::UnterminatedString,
                                SrcSpan::point(string.pos),
                            );
                        }
                        let raw = StringValue { token: string };
                        raw.raw().to_owned()
                    }
                    None => {
                        self.issue(SyntaxIssue::MissingValue, SrcSpan::point(self.anchor()));
                        String::new()
                    }
                };
                self.directive_stmt(
                    labels,
                    tok,
                    DirectiveKind::Include {
                        path,
                        preprocessor: false,
                    },
                    false,
                )
            }
            text if text.starts_with('#') => {
                let kind = match parse_pp_include(text) {
                    Some(path) => DirectiveKind::Include {
                        path,
                        preprocessor: true,
                    },
                    None => DirectiveKind::Preprocessor {
                        text: text.to_owned(),
                    },
                };
                self.directive_stmt(labels, tok, kind, false)
            }
            text => {
                let kind = DirectiveKind::Preprocessor {
                    text: text.to_owned(),
                };
                self.directive_stmt(labels, tok, kind, false)
            }
        }
    }

    fn directive_stmt(
        &mut self,
        labels: Vec<LabelAssign>,
        first: Token,
        kind: DirectiveKind,
        statement: bool,
    ) -> Declaration {
        self.labels_not_allowed(&labels);
        let last = if statement {
            let last_real = self.last_consumed.clone().unwrap_or_else(|| first.clone());
            self.expect_statement_end(&first, last_real)
        } else {
            self.last_consumed.clone().unwrap_or_else(|| first.clone())
        };
        Declaration::Directive(Arc::new(DirectiveStmt { kind, first, last }))
    }

    fn parse_directive_number(&mut self) -> Option<u64> {
        let token = self.eat(TokenKind::Number)?;
        match parse_int(&token.text) {
            Some(value) => Some(value),
            None => {
                self.unexpected(&token);
                None
            }
        }
    }

    fn parse_delete_node(&mut self, labels: Vec<LabelAssign>, directive: Token) -> Declaration {
        self.labels_not_allowed(&labels);
        let target = match self.peek_kind() {
            Some(TokenKind::Ampersand) => match self.parse_reference() {
                Reference::Label(label) => DeleteTarget::Ref(label),
                Reference::Path(path) => DeleteTarget::Path(path),
            },
            Some(kind) if kind.is_name_part() => DeleteTarget::Name(self.parse_node_ident()),
            _ => {
                self.issue(SyntaxIssue::ExpectedName, SrcSpan::point(directive.pos));
                DeleteTarget::Name(Name {
                    text: String::new(),
                    first: directive.clone(),
                    last: directive.clone(),
                })
            }
        };
        let last_real = match &target {
            DeleteTarget::Name(name) => name.last.clone(),
            DeleteTarget::Ref(label) => label.last.clone(),
            DeleteTarget::Path(path) => path.last.clone(),
        };
        let last = self.expect_statement_end(&directive, last_real);
        Declaration::DeleteNode(Arc::new(DeleteNode {
            labels,
            target,
            first: directive,
            last,
        }))
    }

    /// A node name with its unit address glued back on, normalized the way
    /// node identities are stored (`name@1f`, lowercase, no `0x`).
    fn parse_node_ident(&mut self) -> Name {
        let run = self.parse_name().expect("caller checked the name start");
        let mut text = run.text;
        let run_first = run.first.clone();
        let run_last_pos = run.last.pos;
        let mut last = run.last;
        if self.raw_kind() == Some(TokenKind::At) {
            let at = self.bump();
            last = at;
            if self.raw_kind().is_some_and(TokenKind::is_name_part) {
                let addr = self.parse_name().expect("peeked a name");
                text = match parse_unit_address(&addr.text) {
                    Some(value) => format!("{}@{:x}", text, value),
                    None => format!("{}@{}", text, addr.text),
                };
                last = addr.last;
            } else {
                self.issue(
                    SyntaxIssue::NodeAddress,
                    SrcSpan::new(run_first.pos, run_last_pos),
                );
                text.push('@');
            }
        }
        Name {
            text,
            first: run.first,
            last,
        }
    }

    fn parse_delete_property(
        &mut self,
        labels: Vec<LabelAssign>,
        directive: Token,
    ) -> Declaration {
        self.labels_not_allowed(&labels);
        let name = match self.parse_name() {
            Some(name) => name,
            None => {
                self.issue(SyntaxIssue::ExpectedName, SrcSpan::point(directive.pos));
                Name {
                    text: String::new(),
                    first: directive.clone(),
                    last: directive.clone(),
                }
            }
        };
        let last_real = name.last.clone();
        let last = self.expect_statement_end(&directive, last_real);
        Declaration::DeleteProperty(Arc::new(DeleteProperty {
            labels,
            name,
            first: directive,
            last,
        }))
    }
}

/// Unit addresses are hexadecimal, with or without a `0x` prefix.
fn parse_unit_address(text: &str) -> Option<u64> {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    if digits.is_empty() {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}

/// Integer literals: `0x` hex, leading-zero octal, otherwise decimal.
fn parse_int(text: &str) -> Option<u64> {
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else if text.len() > 1 && text.starts_with('0') {
        u64::from_str_radix(&text[1..], 8).ok()
    } else {
        text.parse().ok()
    }
}

fn eval_binop(op: BinOp, a: u64, b: u64) -> Option<u64> {
    Some(match op {
        BinOp::Add => a.wrapping_add(b),
        BinOp::Sub => a.wrapping_sub(b),
        BinOp::Mul => a.wrapping_mul(b),
        BinOp::Div => a.checked_div(b)?,
        BinOp::Mod => a.checked_rem(b)?,
        BinOp::Shl => a.wrapping_shl(b as u32),
        BinOp::Shr => a.wrapping_shr(b as u32),
        BinOp::And => a & b,
        BinOp::Or => a | b,
        BinOp::Xor => a ^ b,
    })
}

fn parse_pp_include(text: &str) -> Option<String> {
    debug_assert!(text.starts_with('#'));
    let rest = text[1..].trim_start_matches([' ', '\t']);
    let rest = rest.strip_prefix("include")?;
    let rest = rest.trim_start_matches([' ', '\t']);
    match rest.as_bytes().first()? {
        b'<' => Some(rest[1..].split_once('>')?.0.to_owned()),
        b'"' => Some(rest[1..].split_once('"')?.0.to_owned()),
        _ => None,
    }
}
