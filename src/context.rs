use std::sync::Arc;

use sqlx::PgPool;

use crate::{
    ingest::IngestSettings, materialize::Materializer, query::QueryCompiler,
    repository::executor::DbExecutor, schema::DefinitionRegistry,
};

// Everything a repository needs, shared by all of them: the frozen registry,
// the pool (inside the executor) and the per-type materializer caches.
#[derive(Debug)]
pub struct DbContext {
    pub registry: Arc<DefinitionRegistry>,
    pub compiler: QueryCompiler,
    pub materializer: Materializer,
    pub executor: DbExecutor,
    pub ingest: IngestSettings,
}

impl DbContext {
    pub fn new(pool: PgPool, registry: Arc<DefinitionRegistry>, ingest: IngestSettings) -> Self {
        Self {
            compiler: QueryCompiler::new(registry.clone()),
            registry,
            materializer: Materializer::new(),
            executor: DbExecutor::new(pool),
            ingest,
        }
    }

    pub fn pool(&self) -> &PgPool {
        self.executor.pool()
    }

    /// Creates the schemas and tables of every registered definition
    pub async fn create_tables(&self) -> Result<(), crate::repository::interface::Error> {
        for statement in crate::schema::ddl::create_all(&self.registry)? {
            sqlx::query(&statement)
                .execute(self.pool())
                .await
                .map_err(DbExecutor::interpret_error)?;
        }
        Ok(())
    }
}
