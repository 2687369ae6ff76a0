//! Query execution against a bound configuration.
//!
//! [`RootFieldExecutor`] dispatches each top-level selection to the data source
//! its resolver binding names and returns the resolved value whole. Nested
//! selection sets, fragments and variables are accepted syntactically but not
//! interpreted.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::reload::ActiveConfiguration;
use crate::schema::OperationKind;

/// Body of `POST /graphql`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphRequest {
    pub query: String,
    #[serde(default)]
    pub operation_name: Option<String>,
    #[serde(default)]
    pub variables: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphError {
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<String>,
}

impl GraphError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: Vec::new(),
        }
    }

    fn at(message: impl Into<String>, field: &str) -> Self {
        Self {
            message: message.into(),
            path: vec![field.to_string()],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GraphResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphError>,
}

impl GraphResponse {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            data: None,
            errors: vec![GraphError::new(message)],
        }
    }
}

/// Runs one request against one configuration snapshot.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, active: &ActiveConfiguration, request: &GraphRequest) -> GraphResponse;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RootFieldExecutor;

#[async_trait]
impl QueryExecutor for RootFieldExecutor {
    async fn execute(&self, active: &ActiveConfiguration, request: &GraphRequest) -> GraphResponse {
        let operation = match parse_operation(&request.query) {
            Ok(op) => op,
            Err(message) => return GraphResponse::error(message),
        };
        if operation.kind == OperationKind::Subscription {
            return GraphResponse::error("subscriptions are not served over HTTP");
        }

        let schema = active.schema();
        let Some(root) = schema.root(operation.kind) else {
            return GraphResponse::error(format!("schema has no {} root", operation.kind_name()));
        };

        // Validate every selection before touching a data source.
        let unknown: Vec<GraphError> = operation
            .fields
            .iter()
            .filter(|f| f.name != "__typename" && root.field(&f.name).is_none())
            .map(|f| {
                GraphError::at(
                    format!("Cannot query field \"{}\" on type \"{}\"", f.name, root.name),
                    &f.response_key,
                )
            })
            .collect();
        if !unknown.is_empty() {
            return GraphResponse {
                data: None,
                errors: unknown,
            };
        }

        let mut data = Map::new();
        let mut errors = Vec::new();
        for field in &operation.fields {
            if field.name == "__typename" {
                data.insert(field.response_key.clone(), Value::String(root.name.clone()));
                continue;
            }
            let value = match schema.resolver(&root.name, &field.name) {
                None => Value::Null,
                Some(binding) => match active.source(&binding.data_source) {
                    None => {
                        errors.push(GraphError::at(
                            format!("data source '{}' is not active", binding.data_source),
                            &field.response_key,
                        ));
                        Value::Null
                    }
                    Some(source) => match source.resolve(&binding.descriptor).await {
                        Ok(value) => value,
                        Err(e) => {
                            tracing::warn!(
                                field = %field.name,
                                data_source = %binding.data_source,
                                error = %e,
                                "Field resolution failed"
                            );
                            errors.push(GraphError::at(e.to_string(), &field.response_key));
                            Value::Null
                        }
                    },
                },
            };
            data.insert(field.response_key.clone(), value);
        }

        GraphResponse {
            data: Some(Value::Object(data)),
            errors,
        }
    }
}

#[derive(Debug, PartialEq)]
struct Operation {
    kind: OperationKind,
    fields: Vec<RootField>,
}

impl Operation {
    fn kind_name(&self) -> &'static str {
        match self.kind {
            OperationKind::Query => "query",
            OperationKind::Mutation => "mutation",
            OperationKind::Subscription => "subscription",
        }
    }
}

#[derive(Debug, PartialEq)]
struct RootField {
    /// Alias when given, otherwise the field name.
    response_key: String,
    name: String,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Name(String),
    Punct(char),
    Spread,
    Str,
}

fn tokenize(source: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() || c == ',' => {
                chars.next();
            }
            '#' => {
                while let Some(c) = chars.next() {
                    if c == '\n' {
                        break;
                    }
                }
            }
            '"' => {
                chars.next();
                let mut escaped = false;
                let mut closed = false;
                for c in chars.by_ref() {
                    match (escaped, c) {
                        (true, _) => escaped = false,
                        (false, '\\') => escaped = true,
                        (false, '"') => {
                            closed = true;
                            break;
                        }
                        _ => {}
                    }
                }
                if !closed {
                    return Err("unterminated string".to_string());
                }
                tokens.push(Token::Str);
            }
            '.' => {
                let dots: String = std::iter::from_fn(|| chars.next_if_eq(&'.')).collect();
                if dots.len() != 3 {
                    return Err("unexpected '.'".to_string());
                }
                tokens.push(Token::Spread);
            }
            c if c.is_alphanumeric() || c == '_' || c == '-' => {
                let mut name = String::new();
                while let Some(&c) = chars.peek() {
                    let numeric = name.chars().all(|d| d.is_ascii_digit() || d == '-');
                    if c.is_alphanumeric() || c == '_' || c == '-' || (c == '.' && numeric) {
                        name.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Name(name));
            }
            c => {
                chars.next();
                tokens.push(Token::Punct(c));
            }
        }
    }
    Ok(tokens)
}

/// Skip a balanced `open ... close` group starting at `tokens[i]`.
fn skip_group(tokens: &[Token], mut i: usize, open: char, close: char) -> Result<usize, String> {
    let mut depth = 0usize;
    while let Some(token) = tokens.get(i) {
        match token {
            Token::Punct(c) if *c == open => depth += 1,
            Token::Punct(c) if *c == close => {
                depth -= 1;
                if depth == 0 {
                    return Ok(i + 1);
                }
            }
            _ => {}
        }
        i += 1;
    }
    Err(format!("unbalanced '{}'", open))
}

fn parse_operation(query: &str) -> Result<Operation, String> {
    let tokens = tokenize(query)?;
    let mut i = 0;

    let kind = match tokens.first() {
        Some(Token::Punct('{')) => OperationKind::Query,
        Some(Token::Name(keyword)) => {
            i = 1;
            match keyword.as_str() {
                "query" => OperationKind::Query,
                "mutation" => OperationKind::Mutation,
                "subscription" => OperationKind::Subscription,
                other => return Err(format!("unexpected '{}' at document start", other)),
            }
        }
        _ => return Err("expected an operation".to_string()),
    };

    // Optional operation name, variable definitions and directives.
    while let Some(token) = tokens.get(i) {
        match token {
            Token::Punct('{') => break,
            Token::Punct('(') => i = skip_group(&tokens, i, '(', ')')?,
            Token::Name(_) | Token::Punct('@') => i += 1,
            _ => return Err("expected a selection set".to_string()),
        }
    }
    if tokens.get(i) != Some(&Token::Punct('{')) {
        return Err("expected a selection set".to_string());
    }
    let end = skip_group(&tokens, i, '{', '}')?;
    if end != tokens.len() {
        return Err("only a single operation is supported".to_string());
    }

    let mut fields = Vec::new();
    i += 1;
    while i < end - 1 {
        match &tokens[i] {
            Token::Spread => return Err("fragments are not supported".to_string()),
            Token::Name(first) => {
                let (response_key, name) = match (tokens.get(i + 1), tokens.get(i + 2)) {
                    (Some(Token::Punct(':')), Some(Token::Name(name))) => {
                        i += 3;
                        (first.clone(), name.clone())
                    }
                    _ => {
                        i += 1;
                        (first.clone(), first.clone())
                    }
                };
                loop {
                    match tokens.get(i) {
                        Some(Token::Punct('(')) => i = skip_group(&tokens, i, '(', ')')?,
                        Some(Token::Punct('{')) if i < end - 1 => {
                            i = skip_group(&tokens, i, '{', '}')?
                        }
                        Some(Token::Punct('@')) => i += 2,
                        _ => break,
                    }
                }
                fields.push(RootField { response_key, name });
            }
            other => return Err(format!("unexpected {:?} in selection set", other)),
        }
    }
    if fields.is_empty() {
        return Err("selection set is empty".to_string());
    }

    Ok(Operation { kind, fields })
}
