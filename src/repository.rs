pub mod executor;
pub mod interface;
pub mod postgres;

pub use interface::{
    BasicRepository, CrossRepository, Error, ExtendedRepository, Page, Result,
};
pub use postgres::{CrossReferenceRepository, PostgresRepository};
