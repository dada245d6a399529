pub mod dispatcher;
pub mod registry;
pub mod schema;
pub mod schemas;
pub mod transform;

pub use dispatcher::Dispatcher;
pub use registry::{RegistryError, SchemaRegistry};
pub use schema::Schema;
