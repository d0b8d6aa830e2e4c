use std::fmt;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use crate::{
    error::SyncError,
    filter::{FilterDef, FilterDomain, FilterState},
    transport::Transport,
};

/// A remote collection type the synchronizer can manage.
pub trait Resource: DeserializeOwned + Clone + Send + Sync + 'static {
    type Key: Copy + Eq + fmt::Display + fmt::Debug + From<i64> + Send + Sync + 'static;
    /// Collections fetched alongside this one that its filters depend on.
    type Auxiliary: Auxiliary;
    /// Body accepted by create and update requests.
    type Payload: Serialize + DeserializeOwned + Send + Sync + 'static;

    const NAME: &'static str;

    fn key(&self) -> Self::Key;

    /// Filters in declaration order.
    fn filters() -> Vec<FilterDef<Self>>;

    /// One-line human readable summary for listings.
    fn label(&self) -> String;

    /// Dropdown domains offered for the filters, given the loaded state.
    fn domains(
        _collection: &[Self],
        _filters: &FilterState,
        _auxiliary: &Self::Auxiliary,
    ) -> Vec<FilterDomain> {
        Vec::new()
    }
}

#[async_trait]
pub trait Auxiliary: Default + Clone + Send + Sync + 'static {
    async fn fetch(transport: &dyn Transport) -> Result<Self, SyncError>;
}

#[async_trait]
impl Auxiliary for () {
    async fn fetch(_transport: &dyn Transport) -> Result<Self, SyncError> {
        Ok(())
    }
}

/// Paths of one remote collection. Write paths are optional because several
/// collections can only be listed (and sometimes deleted) from the admin side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    list: String,
    create: Option<String>,
    update: Option<String>,
    delete: Option<String>,
}

impl Endpoint {
    /// Read-only collection.
    pub fn list(path: impl Into<String>) -> Self {
        Self {
            list: path.into(),
            create: None,
            update: None,
            delete: None,
        }
    }

    /// Collection with create, update and delete on the same base path.
    pub fn crud(path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            create: Some(path.clone()),
            update: Some(path.clone()),
            delete: Some(path.clone()),
            list: path,
        }
    }

    pub fn with_delete(mut self, base: impl Into<String>) -> Self {
        self.delete = Some(base.into());
        self
    }

    pub fn list_path(&self) -> &str {
        &self.list
    }

    pub fn create_path(&self) -> Option<&str> {
        self.create.as_deref()
    }

    pub fn update_path(&self, key: impl fmt::Display) -> Option<String> {
        self.update.as_ref().map(|base| format!("{base}/{key}"))
    }

    pub fn delete_path(&self, key: impl fmt::Display) -> Option<String> {
        self.delete.as_ref().map(|base| format!("{base}/{key}"))
    }

    pub fn supports_delete(&self) -> bool {
        self.delete.is_some()
    }
}

/// Fetches a JSON array and decodes it into typed records.
pub async fn fetch_list<T: DeserializeOwned>(
    transport: &dyn Transport,
    path: &str,
    query: &[(String, String)],
) -> Result<Vec<T>, SyncError> {
    let raw = transport.get(path, query).await?;
    serde_json::from_value(raw).map_err(|e| SyncError::Decode {
        path: path.to_string(),
        reason: e.to_string(),
    })
}
