pub mod kv;
pub mod pool;
pub mod relations;
pub mod schema;
