//! Database module for PostgreSQL connection and schema introspection

pub mod connection;
pub mod introspect;

pub use connection::init_pool;
pub use introspect::load_schema_context;
