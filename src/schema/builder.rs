//! Schema building from configuration rows.
//!
//! # Responsibilities
//! - Fetch rows from the [`ConfigStore`]
//! - Select the `default` schema definition
//! - Substitute the fallback schema when nothing is configured
//! - Hand the result to the [`SchemaCompiler`]
//!
//! # Design Decisions
//! - Structural errors are raised before any data-source work
//! - A failed build has no side effects

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::pubsub::PubSub;
use crate::schema::compiler::{CompileInput, CompiledSchema, SchemaCompiler};
use crate::schema::error::{BuildError, ConfigError};
use crate::store::{ConfigStore, DataSourceConfig, SchemaDefinition};

/// Name of the schema definition that is served.
pub const DEFAULT_SCHEMA_NAME: &str = "default";

/// Served when no configuration exists. Every root type needs at least one
/// field, so each carries a single placeholder.
pub const FALLBACK_SDL: &str = "\
type Query { _empty: Boolean }
type Mutation { _empty: Boolean }
type Subscription { _empty: Boolean }
";

/// Output of a successful build.
#[derive(Debug, Clone)]
pub struct BuiltSchema {
    pub schema: CompiledSchema,
    /// Data sources to connect, in row order.
    pub data_sources: Vec<DataSourceConfig>,
    pub used_fallback: bool,
}

/// Reads rows and compiles them into a [`BuiltSchema`].
#[derive(Clone)]
pub struct SchemaBuilder {
    store: Arc<dyn ConfigStore>,
    compiler: Arc<dyn SchemaCompiler>,
    pubsub: PubSub,
}

impl SchemaBuilder {
    pub fn new(
        store: Arc<dyn ConfigStore>,
        compiler: Arc<dyn SchemaCompiler>,
        pubsub: PubSub,
    ) -> Self {
        Self {
            store,
            compiler,
            pubsub,
        }
    }

    pub fn store(&self) -> &Arc<dyn ConfigStore> {
        &self.store
    }

    pub fn pubsub(&self) -> &PubSub {
        &self.pubsub
    }

    pub async fn build(&self) -> Result<BuiltSchema, BuildError> {
        let definitions = self.store.schema_definitions().await?;
        let selected = select_default(&definitions)?;

        let data_sources = self.store.data_sources().await?;
        let resolvers = self.store.resolver_bindings().await?;
        let subscriptions = self.store.subscriptions().await?;

        let sdl = match selected {
            None => {
                if !data_sources.is_empty() || !resolvers.is_empty() {
                    tracing::warn!(
                        data_sources = data_sources.len(),
                        resolvers = resolvers.len(),
                        "No schema definitions configured; ignoring data sources and resolvers"
                    );
                }
                None
            }
            Some(def) => {
                let nothing_configured = def.sdl.trim().is_empty()
                    && data_sources.is_empty()
                    && resolvers.is_empty();
                (!nothing_configured).then_some(def.sdl.as_str())
            }
        };

        let Some(sdl) = sdl else {
            tracing::info!("Using fallback schema");
            let schema = self
                .compiler
                .compile(
                    CompileInput {
                        sdl: FALLBACK_SDL,
                        data_sources: &[],
                        resolvers: &[],
                        subscriptions: &[],
                    },
                    &self.pubsub,
                )
                .await?;
            return Ok(BuiltSchema {
                schema,
                data_sources: Vec::new(),
                used_fallback: true,
            });
        };

        check_unique_keys(&data_sources)?;

        let schema = self
            .compiler
            .compile(
                CompileInput {
                    sdl,
                    data_sources: &data_sources,
                    resolvers: &resolvers,
                    subscriptions: &subscriptions,
                },
                &self.pubsub,
            )
            .await?;

        tracing::debug!(
            types = schema.types.len(),
            resolvers = schema.resolvers.len(),
            data_sources = data_sources.len(),
            "Schema compiled"
        );

        Ok(BuiltSchema {
            schema,
            data_sources,
            used_fallback: false,
        })
    }
}

/// Pick the `default` definition. `None` when there are no definitions at all.
fn select_default(
    definitions: &[SchemaDefinition],
) -> Result<Option<&SchemaDefinition>, ConfigError> {
    if definitions.is_empty() {
        return Ok(None);
    }

    let mut defaults = definitions
        .iter()
        .filter(|d| d.name == DEFAULT_SCHEMA_NAME);
    let Some(selected) = defaults.next() else {
        return Err(ConfigError::MissingDefaultSchema {
            names: definitions.iter().map(|d| d.name.clone()).collect(),
        });
    };
    let extra = defaults.count();
    if extra > 0 {
        return Err(ConfigError::DuplicateDefaultSchema(extra + 1));
    }
    Ok(Some(selected))
}

fn check_unique_keys(data_sources: &[DataSourceConfig]) -> Result<(), ConfigError> {
    let mut seen = BTreeSet::new();
    for ds in data_sources {
        if !seen.insert(ds.key.as_str()) {
            return Err(ConfigError::DuplicateDataSource(ds.key.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::compiler::{OperationKind, SdlCompiler};
    use crate::schema::error::ParseError;
    use crate::store::{ConfigRows, MemoryConfigStore, ResolverBinding};
    use serde_json::json;

    fn builder(rows: ConfigRows) -> (SchemaBuilder, Arc<MemoryConfigStore>) {
        let store = Arc::new(MemoryConfigStore::new(rows));
        let builder = SchemaBuilder::new(store.clone(), Arc::new(SdlCompiler), PubSub::new());
        (builder, store)
    }

    fn definition(name: &str, sdl: &str) -> SchemaDefinition {
        SchemaDefinition {
            name: name.into(),
            sdl: sdl.into(),
        }
    }

    fn source(key: &str) -> DataSourceConfig {
        DataSourceConfig {
            key: key.into(),
            kind: "static".into(),
            params: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_fallback_when_nothing_configured() {
        let (builder, _) = builder(ConfigRows::default());
        let built = builder.build().await.unwrap();

        assert!(built.used_fallback);
        assert!(built.data_sources.is_empty());
        assert!(built.schema.resolvers.is_empty());
        for op in [
            OperationKind::Query,
            OperationKind::Mutation,
            OperationKind::Subscription,
        ] {
            assert_eq!(built.schema.root(op).unwrap().fields.len(), 1);
        }
    }

    #[tokio::test]
    async fn test_fallback_when_default_is_blank() {
        let (builder, _) = builder(ConfigRows {
            schemas: vec![definition("default", "   \n")],
            ..Default::default()
        });
        assert!(builder.build().await.unwrap().used_fallback);
    }

    #[tokio::test]
    async fn test_blank_schema_with_sources_is_parse_error() {
        let (builder, _) = builder(ConfigRows {
            schemas: vec![definition("default", "")],
            data_sources: vec![source("a")],
            ..Default::default()
        });
        assert!(matches!(
            builder.build().await.unwrap_err(),
            BuildError::Parse(_)
        ));
    }

    #[tokio::test]
    async fn test_missing_default_fails_before_other_fetches() {
        let (builder, store) = builder(ConfigRows {
            schemas: vec![
                definition("public", "type Query { a: Int }"),
                definition("internal", "type Query { b: Int }"),
            ],
            data_sources: vec![source("a")],
            ..Default::default()
        });

        let err = builder.build().await.unwrap_err();
        assert!(matches!(
            err,
            BuildError::Config(ConfigError::MissingDefaultSchema { .. })
        ));
        assert_eq!(store.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_selects_default_among_many() {
        let (builder, _) = builder(ConfigRows {
            schemas: vec![
                definition("draft", "this is not sdl"),
                definition("default", "type Query { ok: Boolean }"),
            ],
            ..Default::default()
        });
        let built = builder.build().await.unwrap();
        assert!(!built.used_fallback);
        assert!(built.schema.type_def("Query").unwrap().field("ok").is_some());
    }

    #[tokio::test]
    async fn test_duplicate_default_rejected() {
        let (builder, _) = builder(ConfigRows {
            schemas: vec![
                definition("default", "type Query { a: Int }"),
                definition("default", "type Query { b: Int }"),
            ],
            ..Default::default()
        });
        assert!(matches!(
            builder.build().await.unwrap_err(),
            BuildError::Config(ConfigError::DuplicateDefaultSchema(2))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_data_source_key_rejected() {
        let (builder, _) = builder(ConfigRows {
            schemas: vec![definition("default", "type Query { a: Int }")],
            data_sources: vec![source("a"), source("a")],
            ..Default::default()
        });
        assert!(matches!(
            builder.build().await.unwrap_err(),
            BuildError::Config(ConfigError::DuplicateDataSource(key)) if key == "a"
        ));
    }

    #[tokio::test]
    async fn test_compile_failure_is_parse_error() {
        let (builder, _) = builder(ConfigRows {
            schemas: vec![definition("default", "type Query { a: Int }")],
            data_sources: vec![source("a")],
            resolvers: vec![ResolverBinding {
                field_path: "Query.missing".into(),
                data_source: "a".into(),
                descriptor: json!(null),
            }],
            ..Default::default()
        });
        let err = builder.build().await.unwrap_err();
        assert!(matches!(err, BuildError::Parse(ParseError::Invalid(_))));
    }

    #[tokio::test]
    async fn test_store_failure_propagates() {
        let (builder, store) = builder(ConfigRows::default());
        store.close().await.unwrap();
        assert!(matches!(
            builder.build().await.unwrap_err(),
            BuildError::Store(_)
        ));
    }
}
