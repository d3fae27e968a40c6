//! Persistence of the home company list across launches.

mod companies;
mod schema;
mod types;

use std::future::Future;

use crate::model::Company;

pub use schema::Database;
pub use types::StorageError;

/// Where the hub keeps its list between launches.
pub trait CompanyStore: Send + Sync + 'static {
    fn load_companies(&self) -> impl Future<Output = Result<Vec<Company>, StorageError>> + Send;

    /// Replace the stored list atomically.
    fn save_companies(
        &self,
        companies: &[Company],
    ) -> impl Future<Output = Result<(), StorageError>> + Send;

    fn purge_all(&self) -> impl Future<Output = Result<(), StorageError>> + Send;
}

impl CompanyStore for Database {
    fn load_companies(&self) -> impl Future<Output = Result<Vec<Company>, StorageError>> + Send {
        Database::load_companies(self)
    }

    fn save_companies(
        &self,
        companies: &[Company],
    ) -> impl Future<Output = Result<(), StorageError>> + Send {
        Database::save_companies(self, companies)
    }

    fn purge_all(&self) -> impl Future<Output = Result<(), StorageError>> + Send {
        Database::purge_all(self)
    }
}
