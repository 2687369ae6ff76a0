//! Schema compilation.
//!
//! A [`SchemaCompiler`] turns the selected schema text plus its bindings into a
//! [`CompiledSchema`]. The shipped [`SdlCompiler`] checks structure only; query
//! execution is a separate concern (see [`crate::http::executor`]).

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use serde::Serialize;

use crate::pubsub::PubSub;
use crate::schema::error::ParseError;
use crate::schema::sdl::{self, TypeDef, TypeKind};
use crate::store::{DataSourceConfig, ResolverBinding, SubscriptionConfig};

/// Scalars every schema gets without declaring them.
pub const BUILTIN_SCALARS: [&str; 5] = ["Int", "Float", "String", "Boolean", "ID"];

/// Operation types that map onto root types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

/// Names of the root operation types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RootTypes {
    pub query: String,
    pub mutation: Option<String>,
    pub subscription: Option<String>,
}

/// A validated schema with its resolver and subscription tables.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledSchema {
    pub sdl: String,
    pub types: BTreeMap<String, TypeDef>,
    pub roots: RootTypes,
    /// Keyed by `Type.field`.
    pub resolvers: BTreeMap<String, ResolverBinding>,
    /// Subscription field name to topic.
    pub subscriptions: BTreeMap<String, String>,
}

impl CompiledSchema {
    pub fn type_def(&self, name: &str) -> Option<&TypeDef> {
        self.types.get(name)
    }

    pub fn root(&self, operation: OperationKind) -> Option<&TypeDef> {
        let name = match operation {
            OperationKind::Query => Some(&self.roots.query),
            OperationKind::Mutation => self.roots.mutation.as_ref(),
            OperationKind::Subscription => self.roots.subscription.as_ref(),
        }?;
        self.types.get(name)
    }

    pub fn resolver(&self, type_name: &str, field: &str) -> Option<&ResolverBinding> {
        self.resolvers.get(&format!("{}.{}", type_name, field))
    }

    /// Distinct topics the subscriptions publish on.
    pub fn topics(&self) -> BTreeSet<&str> {
        self.subscriptions.values().map(String::as_str).collect()
    }
}

/// Everything a compiler sees for one build.
#[derive(Debug, Clone, Copy)]
pub struct CompileInput<'a> {
    pub sdl: &'a str,
    pub data_sources: &'a [DataSourceConfig],
    pub resolvers: &'a [ResolverBinding],
    pub subscriptions: &'a [SubscriptionConfig],
}

#[async_trait]
pub trait SchemaCompiler: Send + Sync {
    async fn compile(
        &self,
        input: CompileInput<'_>,
        pubsub: &PubSub,
    ) -> Result<CompiledSchema, ParseError>;
}

/// Compiler for the SDL subset read by [`sdl::parse`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SdlCompiler;

#[async_trait]
impl SchemaCompiler for SdlCompiler {
    async fn compile(
        &self,
        input: CompileInput<'_>,
        pubsub: &PubSub,
    ) -> Result<CompiledSchema, ParseError> {
        compile_sdl(input, pubsub)
    }
}

pub(crate) fn compile_sdl(input: CompileInput<'_>, pubsub: &PubSub) -> Result<CompiledSchema, ParseError> {
    let doc = sdl::parse(input.sdl)?;

    let mut types: BTreeMap<String, TypeDef> = BTreeMap::new();
    for def in doc.types {
        if BUILTIN_SCALARS.contains(&def.name.as_str()) {
            return Err(ParseError::invalid(format!(
                "built-in scalar '{}' cannot be redefined",
                def.name
            )));
        }
        if types.contains_key(&def.name) {
            return Err(ParseError::invalid(format!(
                "type '{}' is defined more than once",
                def.name
            )));
        }
        types.insert(def.name.clone(), def);
    }

    for ext in doc.extensions {
        let Some(base) = types.get_mut(&ext.name) else {
            return Err(ParseError::invalid(format!(
                "cannot extend undefined type '{}'",
                ext.name
            )));
        };
        for field in ext.fields {
            if base.field(&field.name).is_some() {
                return Err(ParseError::invalid(format!(
                    "extension redeclares field '{}.{}'",
                    ext.name, field.name
                )));
            }
            base.fields.push(field);
        }
        base.members.extend(ext.members);
    }

    let roots = resolve_roots(&types, doc.schema_roots)?;
    check_root(&types, &roots.query, "query")?;
    if let Some(name) = &roots.mutation {
        check_root(&types, name, "mutation")?;
    }
    if let Some(name) = &roots.subscription {
        check_root(&types, name, "subscription")?;
    }

    check_references(&types)?;

    let mut resolvers = BTreeMap::new();
    for binding in input.resolvers {
        let (type_name, field) = binding.split_path().ok_or_else(|| {
            ParseError::invalid(format!(
                "resolver path '{}' is not of the form Type.field",
                binding.field_path
            ))
        })?;
        let known = types
            .get(type_name)
            .is_some_and(|def| def.field(field).is_some());
        if !known {
            return Err(ParseError::invalid(format!(
                "resolver bound to unknown field '{}'",
                binding.field_path
            )));
        }
        if resolvers
            .insert(binding.field_path.clone(), binding.clone())
            .is_some()
        {
            return Err(ParseError::invalid(format!(
                "field '{}' has more than one resolver",
                binding.field_path
            )));
        }
    }

    let mut subscriptions = BTreeMap::new();
    if !input.subscriptions.is_empty() {
        let root = roots
            .subscription
            .as_ref()
            .and_then(|name| types.get(name))
            .ok_or_else(|| {
                ParseError::invalid("subscriptions are configured but the schema has no subscription root")
            })?;
        for sub in input.subscriptions {
            if root.field(&sub.name).is_none() {
                return Err(ParseError::invalid(format!(
                    "subscription '{}' is not a field of '{}'",
                    sub.name, root.name
                )));
            }
            if subscriptions
                .insert(sub.name.clone(), sub.topic.clone())
                .is_some()
            {
                return Err(ParseError::invalid(format!(
                    "subscription '{}' is configured more than once",
                    sub.name
                )));
            }
        }
    }

    // Registration happens at swap time; the hub only vets names here.
    for (name, topic) in &subscriptions {
        pubsub
            .check_topic(topic)
            .map_err(|reason| ParseError::invalid(format!("subscription '{}': {}", name, reason)))?;
    }

    Ok(CompiledSchema {
        sdl: input.sdl.to_string(),
        types,
        roots,
        resolvers,
        subscriptions,
    })
}

fn resolve_roots(
    types: &BTreeMap<String, TypeDef>,
    declared: Vec<(String, String)>,
) -> Result<RootTypes, ParseError> {
    if declared.is_empty() {
        let by_name = |name: &str| types.contains_key(name).then(|| name.to_string());
        return Ok(RootTypes {
            query: by_name("Query")
                .ok_or_else(|| ParseError::invalid("schema does not define a 'Query' type"))?,
            mutation: by_name("Mutation"),
            subscription: by_name("Subscription"),
        });
    }

    let mut query = None;
    let mut mutation = None;
    let mut subscription = None;
    for (operation, ty) in declared {
        let slot = match operation.as_str() {
            "query" => &mut query,
            "mutation" => &mut mutation,
            "subscription" => &mut subscription,
            other => {
                return Err(ParseError::invalid(format!(
                    "unknown root operation '{}'",
                    other
                )))
            }
        };
        if slot.replace(ty).is_some() {
            return Err(ParseError::invalid(format!(
                "root operation '{}' is declared twice",
                operation
            )));
        }
    }

    Ok(RootTypes {
        query: query.ok_or_else(|| ParseError::invalid("schema block declares no query root"))?,
        mutation,
        subscription,
    })
}

fn check_root(
    types: &BTreeMap<String, TypeDef>,
    name: &str,
    operation: &str,
) -> Result<(), ParseError> {
    let def = types.get(name).ok_or_else(|| {
        ParseError::invalid(format!("{} root type '{}' is not defined", operation, name))
    })?;
    if def.kind != TypeKind::Object {
        return Err(ParseError::invalid(format!(
            "{} root type '{}' must be an object type",
            operation, name
        )));
    }
    if def.fields.is_empty() {
        return Err(ParseError::invalid(format!(
            "{} root type '{}' declares no fields",
            operation, name
        )));
    }
    Ok(())
}

fn check_references(types: &BTreeMap<String, TypeDef>) -> Result<(), ParseError> {
    let known: BTreeSet<&str> = types
        .keys()
        .map(String::as_str)
        .chain(BUILTIN_SCALARS)
        .collect();

    for def in types.values() {
        for field in &def.fields {
            let base = field.ty.base_name();
            if !known.contains(base) {
                return Err(ParseError::invalid(format!(
                    "field '{}.{}' has unknown type '{}'",
                    def.name, field.name, base
                )));
            }
        }
        if def.kind == TypeKind::Union {
            for member in &def.members {
                let is_object = types
                    .get(member)
                    .is_some_and(|m| m.kind == TypeKind::Object);
                if !is_object {
                    return Err(ParseError::invalid(format!(
                        "union '{}' member '{}' is not an object type",
                        def.name, member
                    )));
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn binding(path: &str, source: &str) -> ResolverBinding {
        ResolverBinding {
            field_path: path.into(),
            data_source: source.into(),
            descriptor: json!({}),
        }
    }

    fn compile(
        sdl: &str,
        resolvers: &[ResolverBinding],
        subscriptions: &[SubscriptionConfig],
    ) -> Result<CompiledSchema, ParseError> {
        compile_sdl(
            CompileInput {
                sdl,
                data_sources: &[],
                resolvers,
                subscriptions,
            },
            &PubSub::new(),
        )
    }

    const SDL: &str = r#"
        type Query { user(id: ID!): User, users: [User!]! }
        type Mutation { rename(id: ID!, name: String!): User }
        type Subscription { userChanged: User }
        type User { id: ID!, name: String }
    "#;

    #[test]
    fn test_compiles_roots_and_resolvers() {
        let schema = compile(
            SDL,
            &[binding("Query.users", "db"), binding("Mutation.rename", "db")],
            &[],
        )
        .unwrap();

        assert_eq!(schema.roots.query, "Query");
        assert_eq!(schema.roots.mutation.as_deref(), Some("Mutation"));
        assert_eq!(schema.root(OperationKind::Query).unwrap().fields.len(), 2);
        assert!(schema.resolver("Query", "users").is_some());
        assert!(schema.resolver("Query", "user").is_none());
    }

    #[test]
    fn test_schema_block_renames_roots() {
        let schema = compile(
            "schema { query: Root } type Root { ping: Boolean }",
            &[],
            &[],
        )
        .unwrap();
        assert_eq!(schema.roots.query, "Root");
        assert!(schema.roots.mutation.is_none());
    }

    #[test]
    fn test_missing_query_root() {
        let err = compile("type User { id: ID }", &[], &[]).unwrap_err();
        assert_eq!(err, ParseError::invalid("schema does not define a 'Query' type"));
    }

    #[test]
    fn test_empty_root_rejected() {
        let err = compile("type Query { a: Int } type Mutation", &[], &[]).unwrap_err();
        assert!(err.to_string().contains("declares no fields"));
    }

    #[test]
    fn test_unknown_field_type_rejected() {
        let err = compile("type Query { a: Missing }", &[], &[]).unwrap_err();
        assert!(err.to_string().contains("unknown type 'Missing'"));
    }

    #[test]
    fn test_resolver_on_unknown_field_rejected() {
        let err = compile(SDL, &[binding("Query.nope", "db")], &[]).unwrap_err();
        assert!(err.to_string().contains("Query.nope"));
    }

    #[test]
    fn test_subscription_topics_are_reported_not_registered() {
        let hub = PubSub::new();
        let subs = [SubscriptionConfig {
            name: "userChanged".into(),
            topic: "users".into(),
        }];
        let schema = compile_sdl(
            CompileInput {
                sdl: SDL,
                data_sources: &[],
                resolvers: &[],
                subscriptions: &subs,
            },
            &hub,
        )
        .unwrap();
        assert_eq!(schema.subscriptions["userChanged"], "users");
        assert_eq!(schema.topics().into_iter().collect::<Vec<_>>(), vec!["users"]);
        assert!(hub.topics().is_empty());
    }

    #[test]
    fn test_unusable_topic_name_rejected() {
        let subs = [SubscriptionConfig {
            name: "userChanged".into(),
            topic: "user changes".into(),
        }];
        let err = compile_sdl(
            CompileInput {
                sdl: SDL,
                data_sources: &[],
                resolvers: &[],
                subscriptions: &subs,
            },
            &PubSub::new(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("userChanged"));
    }

    #[test]
    fn test_failed_compile_registers_nothing() {
        let hub = PubSub::new();
        let subs = [
            SubscriptionConfig {
                name: "userChanged".into(),
                topic: "users".into(),
            },
            SubscriptionConfig {
                name: "ghost".into(),
                topic: "ghosts".into(),
            },
        ];
        let result = compile_sdl(
            CompileInput {
                sdl: SDL,
                data_sources: &[],
                resolvers: &[],
                subscriptions: &subs,
            },
            &hub,
        );
        assert!(result.is_err());
        assert!(hub.topics().is_empty());
    }

    #[test]
    fn test_extension_merges_fields() {
        let schema = compile(
            "type Query { a: Int } extend type Query { b: String }",
            &[binding("Query.b", "x")],
            &[],
        )
        .unwrap();
        assert_eq!(schema.root(OperationKind::Query).unwrap().fields.len(), 2);
    }

    #[test]
    fn test_identical_input_compiles_equal() {
        let resolvers = [binding("Query.users", "db")];
        let a = compile(SDL, &resolvers, &[]).unwrap();
        let b = compile(SDL, &resolvers, &[]).unwrap();
        assert_eq!(a, b);
    }
}
