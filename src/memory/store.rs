use std::collections::HashMap;

use bson::Document;
use parking_lot::RwLock;

use super::eval::{compare_by_key, compile, project, within_bounds};
use crate::config::Credential;
use crate::driver::{DriverError, FindRequest};

type Namespace = (String, String);

/// In-process document store: collections keyed by `(database, collection)`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<Namespace, Vec<Document>>>,
    users: RwLock<Vec<Credential>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_many(&self, database: &str, collection: &str, docs: impl IntoIterator<Item = Document>) {
        self.collections
            .write()
            .entry((database.to_string(), collection.to_string()))
            .or_default()
            .extend(docs);
    }

    pub fn insert_one(&self, database: &str, collection: &str, doc: Document) {
        self.insert_many(database, collection, std::iter::once(doc));
    }

    #[must_use]
    pub fn count(&self, database: &str, collection: &str) -> usize {
        self.collections
            .read()
            .get(&(database.to_string(), collection.to_string()))
            .map_or(0, Vec::len)
    }

    /// Require authentication. Without registered users every login is accepted.
    pub fn add_user(&self, credential: Credential) {
        self.users.write().push(credential);
    }

    /// # Errors
    /// Returns `Auth` if users are registered and any credential does not match one.
    pub fn authenticate(&self, credentials: &[Credential]) -> Result<(), DriverError> {
        let users = self.users.read();
        if users.is_empty() {
            return Ok(());
        }
        if credentials.is_empty() {
            return Err(DriverError::Auth("authentication required".into()));
        }
        for c in credentials {
            if !users.iter().any(|u| u == c) {
                return Err(DriverError::Auth(format!(
                    "authentication failed for {}@{}",
                    c.user, c.source
                )));
            }
        }
        Ok(())
    }

    /// Run a find to completion. Bounded finds come back in key order.
    ///
    /// # Errors
    /// Returns `Query` for a malformed query or projection.
    pub fn find(&self, request: &FindRequest) -> Result<Vec<Document>, DriverError> {
        let matcher = compile(&request.filter)?;
        let ns = (request.database.clone(), request.collection.clone());
        let mut hits: Vec<&Document> = Vec::new();
        let collections = self.collections.read();
        if let Some(docs) = collections.get(&ns) {
            hits.extend(docs.iter().filter(|d| {
                within_bounds(d, request.min.as_ref(), request.max.as_ref()) && matcher.matches(d)
            }));
        }
        if let Some(pattern) = request.min.as_ref().or(request.max.as_ref()) {
            hits.sort_by(|a, b| compare_by_key(a, b, pattern));
        }
        hits.into_iter().map(|d| project(d, &request.projection)).collect()
    }
}
