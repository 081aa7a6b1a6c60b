pub mod context;
pub mod schema;

pub use schema::{load_config, load_config_from_string, DbAccessConfig};
