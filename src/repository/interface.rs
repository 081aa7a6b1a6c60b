use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    query::{Filters, PartialUpdate, RequestOptions},
    schema::{DefinitionError, Entity, Record},
};

/// Wrapper for conversion of database-specific error codes into actual errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Definition(#[from] DefinitionError),

    #[error("Unique constraint violation: {0}")]
    UniqueConstraintViolation(sqlx::Error),

    #[error("Foreign key constraint violation: {0}")]
    FKConstraintViolation(sqlx::Error),

    // All other errors
    #[error("Database error: {0}")]
    SqlxError(sqlx::Error),

    #[error("Cannot materialize {entity}: {reason}")]
    Materialization { entity: String, reason: String },

    #[error("Ingest into {entity} aborted at column {column}: {reason}")]
    Ingest {
        entity: String,
        column: String,
        reason: String,
    },

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Cannot serialize record: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Configuration errors come from a definition that doesn't match the
    /// records or requests using it. Retrying never helps.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::Definition(_) | Error::Materialization { .. } | Error::Serialization(_)
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// One page of a paged read
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Rows matching the query across all pages
    pub total_items: u64,
    pub page_number: u32,
    pub page_size: u32,
}

/// Reads and writes of one entity type. Writes return the number of affected
/// rows; 0 means nothing matched or nothing was written.
#[async_trait]
pub trait BasicRepository<T: Entity>: Send + Sync {
    async fn get(&self, filters: &Filters, options: &RequestOptions) -> Result<Vec<T>>;

    /// Paged read; the total comes from the same round trip
    async fn get_page(&self, filters: &Filters, options: &RequestOptions) -> Result<Page<T>>;

    async fn get_by_id(&self, id: Uuid, options: &RequestOptions) -> Result<Option<T>>;

    async fn create(&self, entity: &T) -> Result<u64>;

    async fn update(&self, id: Uuid, entity: &T) -> Result<u64>;

    async fn update_partial(&self, id: Uuid, updates: &[PartialUpdate]) -> Result<u64>;

    async fn upsert(&self, id: Uuid, entity: &T) -> Result<u64>;

    async fn delete(&self, id: Uuid) -> Result<u64>;

    /// No-op returning 0 when the definition has no translations
    async fn create_translation(&self, entity: &T, language: &str) -> Result<u64>;

    async fn update_translation(&self, id: Uuid, entity: &T, language: &str) -> Result<u64>;

    async fn upsert_translation(&self, id: Uuid, entity: &T, language: &str) -> Result<u64>;

    /// Bulk load through binary COPY; returns the number of rows written
    async fn ingest(&self, entities: &[T]) -> Result<u64>;
}

/// Reads of the extended shape `E`, with foreign keys joined in
#[async_trait]
pub trait ExtendedRepository<T: Entity, E: Record>: BasicRepository<T> {
    async fn get_extended(&self, filters: &Filters, options: &RequestOptions) -> Result<Vec<E>>;

    async fn get_extended_page(
        &self,
        filters: &Filters,
        options: &RequestOptions,
    ) -> Result<Page<E>>;

    async fn get_extended_by_id(&self, id: Uuid, options: &RequestOptions) -> Result<Option<E>>;
}

/// Navigation of a many-to-many association `T` between `A` and `B`
#[async_trait]
pub trait CrossRepository<T: Entity, E: Record, A: Entity, B: Entity>:
    ExtendedRepository<T, E>
{
    /// `A` rows associated with the `B` row `id`
    async fn get_a(&self, id: Uuid, options: &RequestOptions) -> Result<Vec<A>>;

    /// `B` rows associated with the `A` row `id`
    async fn get_b(&self, id: Uuid, options: &RequestOptions) -> Result<Vec<B>>;
}

#[cfg(test)]
pub mod tests {
    use uuid::Uuid;

    use crate::query::{Filters, PartialUpdate, RequestOptions};
    use crate::testutils::{
        Area, ExtArea, ExtPackage, ExtPackageResource, Package, PackageResource, Resource,
    };

    use super::*;

    fn area(name: &str) -> Area {
        Area {
            id: Uuid::new_v4(),
            name: name.to_string(),
        }
    }

    fn package(name: &str, area_id: Option<Uuid>) -> Package {
        Package {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: Some(format!("{name} description")),
            area_id,
        }
    }

    pub async fn run_generic_repository_tests(
        areas: &impl ExtendedRepository<Area, ExtArea>,
        packages: &impl ExtendedRepository<Package, ExtPackage>,
        resources: &impl BasicRepository<Resource>,
        links: &impl CrossRepository<PackageResource, ExtPackageResource, Package, Resource>,
    ) {
        test_round_trip(areas).await;
        test_translation_overlay(areas).await;
        test_unique_violation_and_upsert(areas).await;
        test_partial_update_and_delete(packages).await;
        test_extended_reads(areas, packages).await;
        test_paging(resources).await;
        test_cross_reference(packages, resources, links).await;
    }

    async fn test_round_trip(repository: &impl BasicRepository<Area>) {
        let nord = area("Nord");
        assert_eq!(repository.create(&nord).await.unwrap(), 1);

        let fetched = repository
            .get_by_id(nord.id, &RequestOptions::default())
            .await
            .unwrap();
        assert_eq!(fetched, Some(nord.clone()));

        let missing = repository
            .get_by_id(Uuid::new_v4(), &RequestOptions::default())
            .await
            .unwrap();
        assert_eq!(missing, None);
    }

    async fn test_translation_overlay(repository: &impl BasicRepository<Area>) {
        let nord = area("Nord-base");
        repository.create(&nord).await.unwrap();

        let translated = Area {
            id: nord.id,
            name: "Nord-NN".to_string(),
        };
        assert_eq!(
            repository.create_translation(&translated, "nno").await.unwrap(),
            1
        );

        let nno = repository
            .get_by_id(nord.id, &RequestOptions::new().language("nno"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(nno.name, "Nord-NN");

        let base = repository
            .get_by_id(nord.id, &RequestOptions::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(base.name, "Nord-base");

        // A language without a translation row falls back to the base text
        let eng = repository
            .get_by_id(nord.id, &RequestOptions::new().language("eng"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(eng.name, "Nord-base");

        let updated = Area {
            id: nord.id,
            name: "Nordre".to_string(),
        };
        assert_eq!(
            repository
                .update_translation(nord.id, &updated, "nno")
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            repository
                .upsert_translation(nord.id, &updated, "sme")
                .await
                .unwrap(),
            1
        );
        let sme = repository
            .get_by_id(nord.id, &RequestOptions::new().language("sme"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sme.name, "Nordre");
    }

    async fn test_unique_violation_and_upsert(repository: &impl BasicRepository<Area>) {
        let sor = area("Sør");
        repository.create(&sor).await.unwrap();

        // Area names are unique
        let clash = area("Sør");
        let err = repository.create(&clash).await.unwrap_err();
        assert!(matches!(err, Error::UniqueConstraintViolation(_)), "{err}");
        assert!(!err.is_configuration());

        let renamed = Area {
            id: sor.id,
            name: "Sørvest".to_string(),
        };
        assert_eq!(repository.upsert(sor.id, &renamed).await.unwrap(), 1);
        let matching = repository
            .get(
                &Filters::new().add("name", "startswith", "Sør").unwrap(),
                &RequestOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(matching, vec![renamed]);
    }

    async fn test_partial_update_and_delete(
        repository: &impl BasicRepository<Package>,
    ) {
        let core = package("core-partial", None);
        repository.create(&core).await.unwrap();

        assert_eq!(
            repository
                .update_partial(core.id, &[PartialUpdate::new("description", "patched")])
                .await
                .unwrap(),
            1
        );
        let fetched = repository
            .get_by_id(core.id, &RequestOptions::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.description.as_deref(), Some("patched"));
        assert_eq!(fetched.name, "core-partial");

        assert_eq!(
            repository
                .update_partial(Uuid::new_v4(), &[PartialUpdate::new("name", "x")])
                .await
                .unwrap(),
            0
        );

        let err = repository
            .update_partial(core.id, &[PartialUpdate::new("colour", "red")])
            .await
            .unwrap_err();
        assert!(err.is_configuration());

        assert_eq!(repository.delete(core.id).await.unwrap(), 1);
        assert_eq!(repository.delete(core.id).await.unwrap(), 0);
    }

    async fn test_extended_reads(
        areas: &impl ExtendedRepository<Area, ExtArea>,
        packages: &impl ExtendedRepository<Package, ExtPackage>,
    ) {
        let vest = area("Vest");
        areas.create(&vest).await.unwrap();
        let linked = package("linked", Some(vest.id));
        let orphan = package("orphan", None);
        packages.create(&linked).await.unwrap();
        packages.create(&orphan).await.unwrap();

        let extended = packages
            .get_extended_by_id(linked.id, &RequestOptions::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(extended.area, Some(vest.clone()));

        let extended = packages
            .get_extended_by_id(orphan.id, &RequestOptions::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(extended.area, None);

        let area = areas
            .get_extended_by_id(vest.id, &RequestOptions::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(area.packages, vec![linked]);
    }

    async fn test_paging(repository: &impl BasicRepository<Resource>) {
        let mut names = vec![];
        for i in 0..25 {
            let resource = Resource {
                id: Uuid::new_v4(),
                name: format!("paged-{i:02}"),
                description: None,
            };
            names.push(resource.name.clone());
            repository.create(&resource).await.unwrap();
        }
        names.sort();

        let filters = Filters::new().add("name", "startswith", "paged-").unwrap();
        let page = repository
            .get_page(&filters, &RequestOptions::new().page(2, 10).order_by("name"))
            .await
            .unwrap();

        assert_eq!(page.total_items, 25);
        assert_eq!(page.page_number, 2);
        assert_eq!(page.page_size, 10);
        assert_eq!(
            page.items.iter().map(|r| r.name.clone()).collect::<Vec<_>>(),
            names[10..20].to_vec()
        );

        let page = repository
            .get_page(&filters, &RequestOptions::new().page(4, 10))
            .await
            .unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.total_items, 25);
    }

    async fn test_cross_reference(
        packages: &impl BasicRepository<Package>,
        resources: &impl BasicRepository<Resource>,
        links: &impl CrossRepository<PackageResource, ExtPackageResource, Package, Resource>,
    ) {
        let p1 = package("p1", None);
        packages.create(&p1).await.unwrap();

        let mut linked = vec![];
        for name in ["r1", "r2"] {
            let resource = Resource {
                id: Uuid::new_v4(),
                name: name.to_string(),
                description: None,
            };
            resources.create(&resource).await.unwrap();
            links
                .create(&PackageResource {
                    id: Uuid::new_v4(),
                    package_id: p1.id,
                    resource_id: resource.id,
                })
                .await
                .unwrap();
            linked.push(resource);
        }

        let mut found = links.get_b(p1.id, &RequestOptions::default()).await.unwrap();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(found, linked);

        let owners = links
            .get_a(linked[0].id, &RequestOptions::default())
            .await
            .unwrap();
        assert_eq!(owners, vec![p1.clone()]);

        let extended = links
            .get_extended(&Filters::new().equal("packageId", p1.id), &RequestOptions::default())
            .await
            .unwrap();
        assert_eq!(extended.len(), 2);
        assert!(extended.iter().all(|link| link.package == p1));
    }
}
