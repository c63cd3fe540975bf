//! SQLite adapter and the import, export and delete operations of citydb.

pub mod adapter;
pub mod cancel;
mod deleter;
pub mod error;
mod exporter;
mod importer;
pub mod options;
pub mod report;
mod retry;
mod rows;
mod util;

pub use adapter::{DatabaseAdapter, SqliteAdapter};
pub use cancel::Cancellation;
pub use deleter::Deleter;
pub use error::{OperationError, OperationResult};
pub use exporter::Exporter;
pub use importer::Importer;
pub use options::{DeleteOptions, ExportOptions, ImportOptions};
pub use report::{Fault, OperationReport};
pub use util::{create_sqlite_pool, run_migrations};

/// Embedded SQL migrations for the citydb database.
pub const MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
