//! Schema definition language reader.
//!
//! Reads the type-system subset of the graph SDL: `type`, `interface`, `input`,
//! `enum`, `scalar`, `union`, `schema { }`, `extend` and `directive` definitions.
//! Descriptions, comments, arguments, default values and directive usages are
//! recognised and skipped; only the shape needed to validate roots, field types
//! and resolver bindings is kept.

use std::fmt;

use serde::Serialize;

use crate::schema::error::ParseError;

/// Kind of a named type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeKind {
    Object,
    Interface,
    InputObject,
    Enum,
    Scalar,
    Union,
}

/// Reference to a type from a field declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TypeRef {
    Named(String),
    List(Box<TypeRef>),
    NonNull(Box<TypeRef>),
}

impl TypeRef {
    /// The named type at the core of any list/non-null wrapping.
    pub fn base_name(&self) -> &str {
        match self {
            TypeRef::Named(name) => name,
            TypeRef::List(inner) | TypeRef::NonNull(inner) => inner.base_name(),
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Named(name) => write!(f, "{}", name),
            TypeRef::List(inner) => write!(f, "[{}]", inner),
            TypeRef::NonNull(inner) => write!(f, "{}!", inner),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldDef {
    pub name: String,
    pub ty: TypeRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeDef {
    pub name: String,
    pub kind: TypeKind,
    /// Fields of objects, interfaces and input objects.
    pub fields: Vec<FieldDef>,
    /// Union members or enum values.
    pub members: Vec<String>,
}

impl TypeDef {
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Parsed but not yet validated schema text.
#[derive(Debug, Default)]
pub struct Document {
    pub types: Vec<TypeDef>,
    pub extensions: Vec<TypeDef>,
    /// `(operation, type)` pairs from `schema { }` blocks.
    pub schema_roots: Vec<(String, String)>,
}

/// Deepest list wrapping accepted in a field type.
const MAX_TYPE_DEPTH: usize = 64;

/// Parse schema text into a [`Document`].
pub fn parse(source: &str) -> Result<Document, ParseError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    let mut doc = Document::default();
    while parser.peek().is_some() {
        parser.definition(&mut doc)?;
    }
    Ok(doc)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Name(String),
    Punct(char),
    Str,
    Number,
}

#[derive(Debug)]
struct Lexed {
    token: Token,
    line: usize,
}

fn tokenize(source: &str) -> Result<Vec<Lexed>, ParseError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    let mut line = 1;

    let triple_quote = |i: usize| {
        chars.get(i) == Some(&'"') && chars.get(i + 1) == Some(&'"') && chars.get(i + 2) == Some(&'"')
    };

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\n' => {
                line += 1;
                i += 1;
            }
            c if c.is_whitespace() || c == ',' || c == '\u{feff}' => i += 1,
            '#' => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '"' => {
                let start_line = line;
                if triple_quote(i) {
                    i += 3;
                    loop {
                        if i >= chars.len() {
                            return Err(ParseError::syntax(start_line, "unterminated block string"));
                        }
                        if triple_quote(i) {
                            i += 3;
                            break;
                        }
                        if chars[i] == '\\' && triple_quote(i + 1) {
                            i += 4;
                            continue;
                        }
                        if chars[i] == '\n' {
                            line += 1;
                        }
                        i += 1;
                    }
                } else {
                    i += 1;
                    loop {
                        match chars.get(i) {
                            None | Some('\n') => {
                                return Err(ParseError::syntax(start_line, "unterminated string"))
                            }
                            Some('\\') => i += 2,
                            Some('"') => {
                                i += 1;
                                break;
                            }
                            Some(_) => i += 1,
                        }
                    }
                }
                tokens.push(Lexed {
                    token: Token::Str,
                    line: start_line,
                });
            }
            '.' => {
                if chars.get(i + 1) == Some(&'.') && chars.get(i + 2) == Some(&'.') {
                    tokens.push(Lexed {
                        token: Token::Punct('.'),
                        line,
                    });
                    i += 3;
                } else {
                    return Err(ParseError::syntax(line, "unexpected '.'"));
                }
            }
            c if c == '_' || c.is_ascii_alphabetic() => {
                let start = i;
                while i < chars.len() && (chars[i] == '_' || chars[i].is_ascii_alphanumeric()) {
                    i += 1;
                }
                tokens.push(Lexed {
                    token: Token::Name(chars[start..i].iter().collect()),
                    line,
                });
            }
            c if c == '-' || c.is_ascii_digit() => {
                i += 1;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric() || matches!(chars[i], '.' | '+' | '-'))
                {
                    i += 1;
                }
                tokens.push(Lexed {
                    token: Token::Number,
                    line,
                });
            }
            '{' | '}' | '(' | ')' | '[' | ']' | ':' | '!' | '=' | '@' | '|' | '&' | '$' => {
                tokens.push(Lexed {
                    token: Token::Punct(c),
                    line,
                });
                i += 1;
            }
            other => {
                return Err(ParseError::syntax(
                    line,
                    format!("unexpected character '{}'", other),
                ))
            }
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Lexed>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|l| &l.token)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map_or(1, |l| l.line)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|l| l.token.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn at_punct(&self, c: char) -> bool {
        self.peek() == Some(&Token::Punct(c))
    }

    fn at_name(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Name(name)) if name == keyword)
    }

    fn eat_punct(&mut self, c: char) -> bool {
        if self.at_punct(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, c: char) -> Result<(), ParseError> {
        if self.eat_punct(c) {
            Ok(())
        } else {
            Err(ParseError::syntax(
                self.line(),
                format!("expected '{}', found {}", c, self.describe_current()),
            ))
        }
    }

    fn expect_name(&mut self) -> Result<String, ParseError> {
        match self.peek() {
            Some(Token::Name(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(ParseError::syntax(
                self.line(),
                format!("expected a name, found {}", self.describe_current()),
            )),
        }
    }

    fn describe_current(&self) -> String {
        match self.peek() {
            None => "end of input".to_string(),
            Some(Token::Name(name)) => format!("'{}'", name),
            Some(Token::Punct(c)) => format!("'{}'", c),
            Some(Token::Str) => "a string".to_string(),
            Some(Token::Number) => "a number".to_string(),
        }
    }

    fn skip_descriptions(&mut self) {
        while self.peek() == Some(&Token::Str) {
            self.pos += 1;
        }
    }

    fn skip_directives(&mut self) -> Result<(), ParseError> {
        while self.eat_punct('@') {
            self.expect_name()?;
            if self.at_punct('(') {
                self.skip_balanced('(', ')')?;
            }
        }
        Ok(())
    }

    fn skip_balanced(&mut self, open: char, close: char) -> Result<(), ParseError> {
        let line = self.line();
        self.expect_punct(open)?;
        let mut depth = 1;
        while depth > 0 {
            match self.next() {
                None => return Err(ParseError::syntax(line, format!("unclosed '{}'", open))),
                Some(Token::Punct(c)) if c == open => depth += 1,
                Some(Token::Punct(c)) if c == close => depth -= 1,
                _ => {}
            }
        }
        Ok(())
    }

    fn skip_value(&mut self) -> Result<(), ParseError> {
        if self.at_punct('[') {
            self.skip_balanced('[', ']')
        } else if self.at_punct('{') {
            self.skip_balanced('{', '}')
        } else if self.next().is_some() {
            Ok(())
        } else {
            Err(ParseError::syntax(self.line(), "expected a default value"))
        }
    }

    fn type_ref(&mut self, depth: usize) -> Result<TypeRef, ParseError> {
        if depth > MAX_TYPE_DEPTH {
            return Err(ParseError::syntax(self.line(), "type nesting too deep"));
        }
        let inner = if self.eat_punct('[') {
            let inner = self.type_ref(depth + 1)?;
            self.expect_punct(']')?;
            TypeRef::List(Box::new(inner))
        } else {
            TypeRef::Named(self.expect_name()?)
        };
        if self.eat_punct('!') {
            Ok(TypeRef::NonNull(Box::new(inner)))
        } else {
            Ok(inner)
        }
    }

    fn fields(&mut self) -> Result<Vec<FieldDef>, ParseError> {
        let mut fields: Vec<FieldDef> = Vec::new();
        if !self.eat_punct('{') {
            return Ok(fields);
        }
        loop {
            self.skip_descriptions();
            if self.eat_punct('}') {
                break;
            }
            let line = self.line();
            let name = self.expect_name()?;
            if self.at_punct('(') {
                self.skip_balanced('(', ')')?;
            }
            self.expect_punct(':')?;
            let ty = self.type_ref(0)?;
            if self.eat_punct('=') {
                self.skip_value()?;
            }
            self.skip_directives()?;
            if fields.iter().any(|f| f.name == name) {
                return Err(ParseError::syntax(
                    line,
                    format!("field '{}' is declared twice", name),
                ));
            }
            fields.push(FieldDef { name, ty });
        }
        Ok(fields)
    }

    fn enum_values(&mut self) -> Result<Vec<String>, ParseError> {
        let mut values = Vec::new();
        if !self.eat_punct('{') {
            return Ok(values);
        }
        loop {
            self.skip_descriptions();
            if self.eat_punct('}') {
                break;
            }
            values.push(self.expect_name()?);
            self.skip_directives()?;
        }
        Ok(values)
    }

    fn schema_block(&mut self, doc: &mut Document) -> Result<(), ParseError> {
        self.skip_directives()?;
        self.expect_punct('{')?;
        while !self.eat_punct('}') {
            let operation = self.expect_name()?;
            self.expect_punct(':')?;
            let ty = self.expect_name()?;
            doc.schema_roots.push((operation, ty));
        }
        Ok(())
    }

    fn directive_definition(&mut self) -> Result<(), ParseError> {
        self.expect_punct('@')?;
        self.expect_name()?;
        if self.at_punct('(') {
            self.skip_balanced('(', ')')?;
        }
        if self.at_name("repeatable") {
            self.pos += 1;
        }
        if !self.at_name("on") {
            return Err(ParseError::syntax(
                self.line(),
                format!("expected 'on', found {}", self.describe_current()),
            ));
        }
        self.pos += 1;
        self.eat_punct('|');
        loop {
            self.expect_name()?;
            if !self.eat_punct('|') {
                break;
            }
        }
        Ok(())
    }

    fn definition(&mut self, doc: &mut Document) -> Result<(), ParseError> {
        self.skip_descriptions();
        if self.peek().is_none() {
            return Ok(());
        }
        let line = self.line();
        let keyword = self.expect_name()?;
        match keyword.as_str() {
            "schema" => self.schema_block(doc),
            "directive" => self.directive_definition(),
            "extend" => {
                let line = self.line();
                let keyword = self.expect_name()?;
                if keyword == "schema" {
                    self.schema_block(doc)
                } else {
                    let def = self.type_definition(&keyword, line)?;
                    doc.extensions.push(def);
                    Ok(())
                }
            }
            other => {
                let def = self.type_definition(other, line)?;
                doc.types.push(def);
                Ok(())
            }
        }
    }

    fn type_definition(&mut self, keyword: &str, line: usize) -> Result<TypeDef, ParseError> {
        let kind = match keyword {
            "type" => TypeKind::Object,
            "interface" => TypeKind::Interface,
            "input" => TypeKind::InputObject,
            "enum" => TypeKind::Enum,
            "scalar" => TypeKind::Scalar,
            "union" => TypeKind::Union,
            other => {
                return Err(ParseError::syntax(
                    line,
                    format!("unexpected '{}', expected a definition", other),
                ))
            }
        };

        let mut def = TypeDef {
            name: self.expect_name()?,
            kind,
            fields: Vec::new(),
            members: Vec::new(),
        };

        match kind {
            TypeKind::Object | TypeKind::Interface | TypeKind::InputObject => {
                if self.at_name("implements") {
                    self.pos += 1;
                    self.eat_punct('&');
                    loop {
                        self.expect_name()?;
                        if !self.eat_punct('&') {
                            break;
                        }
                    }
                }
                self.skip_directives()?;
                def.fields = self.fields()?;
            }
            TypeKind::Enum => {
                self.skip_directives()?;
                def.members = self.enum_values()?;
            }
            TypeKind::Scalar => self.skip_directives()?,
            TypeKind::Union => {
                self.skip_directives()?;
                if self.eat_punct('=') {
                    self.eat_punct('|');
                    loop {
                        def.members.push(self.expect_name()?);
                        if !self.eat_punct('|') {
                            break;
                        }
                    }
                }
            }
        }

        Ok(def)
    }
}
