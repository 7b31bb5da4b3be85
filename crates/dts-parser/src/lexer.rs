//! Tokenizer for Devicetree source.
//!
//! Tokenization is total: every byte of the input ends up in exactly one
//! token, unrecognized bytes included, and concatenating the token texts
//! reproduces the input. Trivia (whitespace and comments) stays in the
//! stream; the parser's lookahead skips over it.

use logos::Logos;

use dts_diagnostic::Position;

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LexError {
    #[error("unterminated string literal")]
    UnterminatedString,

    #[error("unterminated block comment")]
    UnterminatedBlockComment,

    #[default]
    #[error("unrecognized input")]
    Unrecognized,
}

/// Token kinds.
///
/// Identifiers are runs of name characters *without* digits; digit runs lex
/// as [`TokenKind::Number`]. Names like `node1` or `simple-bus,2x` therefore
/// arrive as several adjacent tokens, which the parser recombines. Keeping
/// digits out of `Ident` lets unit addresses, cell values and name suffixes
/// share one token shape.
#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[logos(error = LexError)]
pub enum TokenKind {
    #[regex(r"[ \t\r\n]+")]
    Whitespace,

    // `/* /* */` parses as one comment; nesting is not supported.
    #[token("/*", lex_block_comment)]
    #[regex(r"//[^\n\r]*")]
    Comment,

    /// DTS compiler directives (`/dts-v1/`, `/delete-node/`, …) and whole
    /// preprocessor lines (`#include …`). Preprocessor lines are tokenized,
    /// never evaluated.
    #[regex(r"/(dts-v1|plugin|memreserve|delete-node|delete-property|include|omit-if-no-ref)/",
            priority = 6)]
    #[regex(r"#[ \t]*(include|define|undef|ifdef|ifndef|if|elif|else|endif|pragma|error|line)[^\n\r]*",
            priority = 6)]
    Directive,

    #[token("\"", lex_string)]
    String,

    #[regex(r"0[xX][0-9a-fA-F]*", priority = 5)]
    #[regex(r"[0-9]+", priority = 4)]
    Number,

    #[regex(r"[A-Za-z_,.?#+\-]+")]
    Ident,

    #[token("/")]
    Slash,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("<")]
    LAngle,
    #[token(">")]
    RAngle,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token(";")]
    Semicolon,
    #[token(":")]
    Colon,
    #[token(",", priority = 3)]
    Comma,
    #[token("=")]
    Equals,
    #[token("&")]
    Ampersand,
    #[token("@")]
    At,

    // -- Operators inside parenthesized cell expressions --
    #[token("+", priority = 3)]
    Plus,
    #[token("-", priority = 3)]
    Minus,
    #[token("*")]
    Star,
    #[token("%")]
    Percent,
    #[token("|")]
    Pipe,
    #[token("^")]
    Caret,
    #[token("~")]
    Tilde,
    #[token("!")]
    Bang,
    #[token("<<")]
    Shl,
    #[token(">>")]
    Shr,

    /// Bytes no rule matched. Produced by the wrapper, not by Logos.
    Unknown,
}

impl TokenKind {
    /// Returns true for comment and whitespace token kinds.
    #[inline(always)]
    pub fn is_trivia(self) -> bool {
        matches!(self, TokenKind::Whitespace | TokenKind::Comment)
    }

    /// Returns true for kinds the parser recombines into names.
    #[inline(always)]
    pub fn is_name_part(self) -> bool {
        matches!(self, TokenKind::Ident | TokenKind::Number)
    }
}

impl core::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        use TokenKind::*;
        f.write_str(match self {
            Whitespace => "whitespace",
            Comment => "comment",
            Directive => "directive",
            String => "string literal",
            Number => "number literal",
            Ident => "identifier",
            Slash => "'/'",
            LBrace => "'{'",
            RBrace => "'}'",
            LAngle => "'<'",
            RAngle => "'>'",
            LBracket => "'['",
            RBracket => "']'",
            LParen => "'('",
            RParen => "')'",
            Semicolon => "';'",
            Colon => "':'",
            Comma => "','",
            Equals => "'='",
            Ampersand => "'&'",
            At => "'@'",
            Plus => "'+'",
            Minus => "'-'",
            Star => "'*'",
            Percent => "'%'",
            Pipe => "'|'",
            Caret => "'^'",
            Tilde => "'~'",
            Bang => "'!'",
            Shl => "'<<'",
            Shr => "'>>'",
            Unknown => "an unrecognized token",
        })
    }
}

/// A positioned token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub pos: Position,
    pub text: String,
    /// Set on string tokens missing their closing quote and block comments
    /// running to end-of-file.
    pub unterminated: bool,
}

impl Token {
    /// A zero-length token the parser fabricates to close open constructs at
    /// end-of-file.
    pub fn synthetic(kind: TokenKind, line: u32, col: u32) -> Self {
        Self {
            kind,
            pos: Position::zero_width(line, col),
            text: String::new(),
            unterminated: false,
        }
    }

    #[inline(always)]
    pub fn is_trivia(&self) -> bool {
        self.kind.is_trivia()
    }

    /// The column one past this token, on the token's starting line.
    #[inline(always)]
    pub fn end_col(&self) -> u32 {
        self.pos.end_col()
    }
}

/// [`logos::Lexer`] wrapper tracking line and column and absorbing lex
/// errors into the token stream.
#[derive(Debug, Clone)]
pub struct Tokenizer<'input> {
    inner: logos::Lexer<'input, TokenKind>,
    line: u32,
    col: u32,
}

impl<'input> Tokenizer<'input> {
    pub fn new(input: &'input str) -> Self {
        Self {
            inner: TokenKind::lexer(input),
            line: 0,
            col: 0,
        }
    }

    /// The position just past the last token returned so far.
    pub fn position(&self) -> (u32, u32) {
        (self.line, self.col)
    }
}

impl Iterator for Tokenizer<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Self::Item> {
        let kind = self.inner.next()?;
        let text = self.inner.slice();

        let (kind, unterminated) = match kind {
            Ok(kind) => (kind, false),
            Err(LexError::UnterminatedString) => (TokenKind::String, true),
            Err(LexError::UnterminatedBlockComment) => (TokenKind::Comment, true),
            Err(LexError::Unrecognized) => (TokenKind::Unknown, false),
        };

        let pos = Position::new(self.line, self.col, text.chars().count() as u32);
        for c in text.chars() {
            if c == '\n' {
                self.line += 1;
                self.col = 0;
            } else {
                self.col += 1;
            }
        }

        Some(Token {
            kind,
            pos,
            text: text.to_owned(),
            unterminated,
        })
    }
}

/// Tokenizes `input` into a lazy, restartable stream.
pub fn tokenize(input: &str) -> Tokenizer<'_> {
    Tokenizer::new(input)
}

/// Tokenizes `input` eagerly, returning the tokens and the end-of-file
/// position.
pub fn tokenize_all(input: &str) -> (Vec<Token>, Position) {
    let mut tokenizer = Tokenizer::new(input);
    let tokens: Vec<_> = tokenizer.by_ref().collect();
    let (line, col) = tokenizer.position();
    (tokens, Position::zero_width(line, col))
}

fn lex_block_comment(lex: &mut logos::Lexer<TokenKind>) -> Result<(), LexError> {
    let remainder: &str = lex.remainder();
    let mut asterisk_found = false;
    let mut total_len = 0;

    for c in remainder.chars() {
        total_len += c.len_utf8();

        if c == '*' {
            asterisk_found = true;
            continue;
        }

        if c == '/' && asterisk_found {
            lex.bump(total_len);
            return Ok(());
        }

        asterisk_found = false;
    }
    lex.bump(total_len);
    Err(LexError::UnterminatedBlockComment)
}

/// Consumes until an unescaped closing quote. An unterminated string stops
/// before the end of the line, so the rest of the file still tokenizes.
fn lex_string(lex: &mut logos::Lexer<TokenKind>) -> Result<(), LexError> {
    let remainder: &str = lex.remainder();
    let mut escaped = false;
    let mut total_len = 0;

    for c in remainder.chars() {
        if c == '\n' || c == '\r' {
            lex.bump(total_len);
            return Err(LexError::UnterminatedString);
        }
        total_len += c.len_utf8();

        if c == '\\' {
            escaped = !escaped;
            continue;
        }

        if c == '"' && !escaped {
            lex.bump(total_len);
            return Ok(());
        }

        escaped = false;
    }
    lex.bump(total_len);
    Err(LexError::UnterminatedString)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kinds(input: &str) -> Vec<(TokenKind, &str)> {
        let (tokens, _) = tokenize_all(input);
        // The iterator clones text, so map back onto the input for brevity.
        let mut offset = 0;
        tokens
            .iter()
            .map(|tok| {
                let text = &input[offset..offset + tok.text.len()];
                offset += tok.text.len();
                (tok.kind, text)
            })
            .collect()
    }

    fn check(input: &str, kind: TokenKind) {
        assert_eq!(kinds(input), vec![(kind, input)]);
    }

    #[test]
    fn lex_trivia() {
        check("  \t\n", TokenKind::Whitespace);
        check("// hello", TokenKind::Comment);
        check("/* content */", TokenKind::Comment);
        check("/******/", TokenKind::Comment);
    }

    #[test]
    fn lex_directives() {
        check("/dts-v1/", TokenKind::Directive);
        check("/delete-node/", TokenKind::Directive);
        check("/delete-property/", TokenKind::Directive);
        check("#include <dt-bindings/gpio/gpio.h>", TokenKind::Directive);
        check("# define FOO 1", TokenKind::Directive);
    }

    #[test]
    fn lex_idents_without_digits() {
        check("node", TokenKind::Ident);
        check("#address-cells", TokenKind::Ident);
        check("simple-bus", TokenKind::Ident);
        check("_private", TokenKind::Ident);
        assert_eq!(
            kinds("node1"),
            vec![(TokenKind::Ident, "node"), (TokenKind::Number, "1")]
        );
        assert_eq!(
            kinds("0x1f"),
            vec![(TokenKind::Number, "0x1f")]
        );
    }

    #[test]
    fn lex_numbers() {
        check("123", TokenKind::Number);
        check("0xdeadbeef", TokenKind::Number);
        check("010", TokenKind::Number);
    }

    #[test]
    fn lex_strings() {
        check(r#""abc""#, TokenKind::String);
        check(r#""a\"b""#, TokenKind::String);
        check(r#""åäö""#, TokenKind::String);

        let (tokens, _) = tokenize_all("\"abc\nx;");
        assert_eq!(tokens[0].kind, TokenKind::String);
        assert!(tokens[0].unterminated);
        assert_eq!(tokens[0].text, "\"abc");
        // The rest of the line still tokenizes.
        assert_eq!(tokens[1].kind, TokenKind::Whitespace);
        assert_eq!(tokens[2].kind, TokenKind::Ident);
    }

    #[test]
    fn lex_operators() {
        assert_eq!(
            kinds("(1 << 5)"),
            vec![
                (TokenKind::LParen, "("),
                (TokenKind::Number, "1"),
                (TokenKind::Whitespace, " "),
                (TokenKind::Shl, "<<"),
                (TokenKind::Whitespace, " "),
                (TokenKind::Number, "5"),
                (TokenKind::RParen, ")"),
            ]
        );
        check("-", TokenKind::Minus);
        check("+", TokenKind::Plus);
        check(",", TokenKind::Comma);
        check("a-b", TokenKind::Ident);
    }

    #[test]
    fn positions_and_columns() {
        let (tokens, eof) = tokenize_all("/ {\n\tfoo;\n}");
        let slash = &tokens[0];
        assert_eq!(slash.pos, Position::new(0, 0, 1));
        let foo = tokens
            .iter()
            .find(|tok| tok.kind == TokenKind::Ident)
            .unwrap();
        // Tab advances the column by one.
        assert_eq!(foo.pos, Position::new(1, 1, 3));
        assert_eq!(eof, Position::zero_width(2, 1));
    }

    #[test]
    fn unknown_bytes_do_not_stop_tokenization() {
        let (tokens, _) = tokenize_all("a $ b");
        let kinds: Vec<_> = tokens.iter().map(|tok| tok.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Ident,
                TokenKind::Whitespace,
                TokenKind::Unknown,
                TokenKind::Whitespace,
                TokenKind::Ident,
            ]
        );
    }

    #[test]
    fn tokenization_is_total() {
        for input in [
            "/dts-v1/;\n/ { a = <1>; };",
            "/{node1@ 20{};};",
            "garbage \u{0} $$$ \"unterminated\n more",
            "&label{};",
            "",
        ] {
            let (tokens, _) = tokenize_all(input);
            let rebuilt: String = tokens.iter().map(|tok| tok.text.as_str()).collect();
            assert_eq!(rebuilt, input);
        }
    }
}
