use std::{fmt::Debug, marker::PhantomData, sync::Arc};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::{
    context::DbContext,
    ingest::BulkImporter,
    materialize::RowValues,
    query::{CompiledQuery, Filters, PartialUpdate, RequestOptions, TOTAL_ITEMS_COLUMN},
    schema::{Definition, Entity, Record},
};

use super::interface::{
    BasicRepository, CrossRepository, ExtendedRepository, Page, Result,
};

/// Repository of entity `T` backed by Postgres.
///
/// `E` is the extended shape returned by the `get_extended*` reads and `X`
/// carries the `(A, B)` pair of a cross reference; both default to nothing
/// special for plain entities.
pub struct PostgresRepository<T, E = T, X = ()> {
    context: Arc<DbContext>,
    definition: Arc<Definition>,
    _marker: PhantomData<fn() -> (T, E, X)>,
}

/// Repository of an association entity `T` linking `A` and `B`
pub type CrossReferenceRepository<T, E, A, B> = PostgresRepository<T, E, (A, B)>;

impl<T, E, X> Debug for PostgresRepository<T, E, X> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresRepository")
            .field("entity", &self.definition.entity)
            .finish()
    }
}

fn total_items(rows: &[RowValues]) -> u64 {
    rows.first()
        .and_then(|row| {
            row.iter()
                .find(|(column, _)| column.eq_ignore_ascii_case(TOTAL_ITEMS_COLUMN))
        })
        .and_then(|(_, value)| value.as_u64())
        .unwrap_or(0)
}

impl<T: Entity, E: Record, X> PostgresRepository<T, E, X> {
    /// Fails if `T` has no registered definition.
    pub fn try_new(context: Arc<DbContext>) -> Result<Self> {
        let definition = context.registry.get::<T>()?;
        context.materializer.preload::<T>();
        context.materializer.preload::<E>();

        Ok(Self {
            context,
            definition,
            _marker: PhantomData,
        })
    }

    pub fn definition(&self) -> &Definition {
        &self.definition
    }

    async fn read<R: Record>(&self, compiled: CompiledQuery) -> Result<Vec<R>> {
        let rows = self.context.executor.fetch(&compiled).await?;
        self.context.materializer.materialize_all(rows)
    }

    /// Paged read. A page past the end comes back empty, so the total is
    /// then taken from the first page.
    async fn read_page<R: Record>(
        &self,
        filters: &Filters,
        options: &RequestOptions,
        extended: bool,
    ) -> Result<Page<R>> {
        let compiler = &self.context.compiler;
        let compile = |options: &RequestOptions| {
            if extended {
                compiler.select_extended(&self.definition, filters, options)
            } else {
                compiler.select(&self.definition, filters, options)
            }
        };

        let options = Self::paged(options);
        let rows = self.context.executor.fetch(&compile(&options)?).await?;
        let mut total = total_items(&rows);
        if rows.is_empty() && options.offset() > 0 {
            let first = compile(&options.clone().page(1, 1))?;
            total = total_items(&self.context.executor.fetch(&first).await?);
        }

        Ok(Page {
            items: self.context.materializer.materialize_all(rows)?,
            total_items: total,
            page_number: options.page_number.max(1),
            page_size: options.limit(),
        })
    }

    async fn write(&self, compiled: CompiledQuery) -> Result<u64> {
        self.context.executor.execute(&compiled).await
    }

    fn values(entity: &T) -> Result<Value> {
        Ok(serde_json::to_value(entity)?)
    }

    fn paged(options: &RequestOptions) -> RequestOptions {
        RequestOptions {
            use_paging: true,
            ..options.clone()
        }
    }

    fn translation_disabled(&self, operation: &str) -> bool {
        if self.definition.has_translation {
            return false;
        }
        debug!(
            "Skipping {operation} for {}: translations are disabled",
            self.definition.entity
        );
        true
    }
}

#[async_trait]
impl<T: Entity, E: Record, X: 'static> BasicRepository<T> for PostgresRepository<T, E, X> {
    async fn get(&self, filters: &Filters, options: &RequestOptions) -> Result<Vec<T>> {
        let compiled = self
            .context
            .compiler
            .select(&self.definition, filters, options)?;
        self.read(compiled).await
    }

    async fn get_page(&self, filters: &Filters, options: &RequestOptions) -> Result<Page<T>> {
        self.read_page(filters, options, false).await
    }

    async fn get_by_id(&self, id: Uuid, options: &RequestOptions) -> Result<Option<T>> {
        let compiled = self
            .context
            .compiler
            .select_by_id(&self.definition, id, false, options)?;
        Ok(self.read(compiled).await?.into_iter().next())
    }

    async fn create(&self, entity: &T) -> Result<u64> {
        let compiled = self
            .context
            .compiler
            .insert(&self.definition, &Self::values(entity)?)?;
        self.write(compiled).await
    }

    async fn update(&self, id: Uuid, entity: &T) -> Result<u64> {
        let compiled = self
            .context
            .compiler
            .update(&self.definition, id, &Self::values(entity)?)?;
        self.write(compiled).await
    }

    async fn update_partial(&self, id: Uuid, updates: &[PartialUpdate]) -> Result<u64> {
        if updates.is_empty() {
            return Ok(0);
        }
        let compiled = self
            .context
            .compiler
            .update_partial(&self.definition, id, updates)?;
        self.write(compiled).await
    }

    async fn upsert(&self, id: Uuid, entity: &T) -> Result<u64> {
        let compiled = self
            .context
            .compiler
            .upsert(&self.definition, id, &Self::values(entity)?)?;
        self.write(compiled).await
    }

    async fn delete(&self, id: Uuid) -> Result<u64> {
        let compiled = self.context.compiler.delete(&self.definition, id)?;
        self.write(compiled).await
    }

    async fn create_translation(&self, entity: &T, language: &str) -> Result<u64> {
        if self.translation_disabled("create_translation") {
            return Ok(0);
        }
        let compiled = self.context.compiler.insert_translation(
            &self.definition,
            entity.id(),
            &Self::values(entity)?,
            language,
        )?;
        self.write(compiled).await
    }

    async fn update_translation(&self, id: Uuid, entity: &T, language: &str) -> Result<u64> {
        if self.translation_disabled("update_translation") {
            return Ok(0);
        }
        let compiled = self.context.compiler.update_translation(
            &self.definition,
            id,
            &Self::values(entity)?,
            language,
        )?;
        self.write(compiled).await
    }

    async fn upsert_translation(&self, id: Uuid, entity: &T, language: &str) -> Result<u64> {
        if self.translation_disabled("upsert_translation") {
            return Ok(0);
        }
        let compiled = self.context.compiler.upsert_translation(
            &self.definition,
            id,
            &Self::values(entity)?,
            language,
        )?;
        self.write(compiled).await
    }

    async fn ingest(&self, entities: &[T]) -> Result<u64> {
        BulkImporter::new(&self.context)
            .ingest(&self.definition, entities)
            .await
    }
}

#[async_trait]
impl<T: Entity, E: Record, X: 'static> ExtendedRepository<T, E> for PostgresRepository<T, E, X> {
    async fn get_extended(&self, filters: &Filters, options: &RequestOptions) -> Result<Vec<E>> {
        let compiled = self
            .context
            .compiler
            .select_extended(&self.definition, filters, options)?;
        self.read(compiled).await
    }

    async fn get_extended_page(
        &self,
        filters: &Filters,
        options: &RequestOptions,
    ) -> Result<Page<E>> {
        self.read_page(filters, options, true).await
    }

    async fn get_extended_by_id(&self, id: Uuid, options: &RequestOptions) -> Result<Option<E>> {
        let compiled = self
            .context
            .compiler
            .select_by_id(&self.definition, id, true, options)?;
        Ok(self.read(compiled).await?.into_iter().next())
    }
}

#[async_trait]
impl<T: Entity, E: Record, A: Entity, B: Entity> CrossRepository<T, E, A, B>
    for PostgresRepository<T, E, (A, B)>
{
    async fn get_a(&self, id: Uuid, options: &RequestOptions) -> Result<Vec<A>> {
        let target = self.context.registry.get::<A>()?;
        let compiled =
            self.context
                .compiler
                .select_cross(&self.definition, &target, id, options)?;
        self.read(compiled).await
    }

    async fn get_b(&self, id: Uuid, options: &RequestOptions) -> Result<Vec<B>> {
        let target = self.context.registry.get::<B>()?;
        let compiled =
            self.context
                .compiler
                .select_cross(&self.definition, &target, id, options)?;
        self.read(compiled).await
    }
}

pub mod testutils {
    use std::sync::Arc;

    use rand::Rng;
    use sqlx::PgPool;

    use crate::{
        config::{context::build_pool, schema::Database},
        context::DbContext,
        ingest::IngestSettings,
        schema::{DefinitionRegistry, SchemaNames},
    };

    pub fn get_random_schema() -> String {
        // Generate a random schema (taken from IOx)
        let mut rng = rand::thread_rng();
        (&mut rng)
            .sample_iter(rand::distributions::Alphanumeric)
            .filter(|c| c.is_ascii_alphabetic())
            .take(20)
            .map(char::from)
            .collect::<String>()
    }

    /// Four fresh schemas sharing a random prefix, so test runs don't collide
    pub fn random_schema_names() -> SchemaNames {
        let prefix = get_random_schema().to_lowercase();
        SchemaNames::new(
            &format!("{prefix}_dbo"),
            &format!("{prefix}_translation"),
            &format!("{prefix}_dbo_history"),
            &format!("{prefix}_translation_history"),
        )
        .expect("Random schema names are valid identifiers")
    }

    pub async fn make_pool(dsn: &str) -> PgPool {
        build_pool(&Database {
            dsn: dsn.to_string(),
            ..Default::default()
        })
        .await
        .expect("Error setting up the database")
    }

    /// Context over a registry, with its tables created
    pub async fn make_context(dsn: &str, registry: Arc<DefinitionRegistry>) -> Arc<DbContext> {
        let context = DbContext::new(make_pool(dsn).await, registry, IngestSettings::default());
        context
            .create_tables()
            .await
            .expect("Error creating the tables");
        Arc::new(context)
    }
}
