use bson::Document;

/// One contiguous key range of a collection, scanned independently.
///
/// Produced by partition discovery. `min_key` is inclusive and `max_key`
/// exclusive; either may be absent for the first and last chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionDescriptor {
    pub id: String,
    /// Candidate hosts, preferred first.
    pub endpoints: Vec<String>,
    pub min_key: Option<Document>,
    pub max_key: Option<Document>,
}

impl PartitionDescriptor {
    #[must_use]
    pub fn new<S: AsRef<str>>(id: &str, endpoints: &[S]) -> Self {
        Self {
            id: id.to_string(),
            endpoints: endpoints.iter().map(|e| e.as_ref().to_string()).collect(),
            min_key: None,
            max_key: None,
        }
    }

    #[must_use]
    pub fn with_min(mut self, min_key: Document) -> Self {
        self.min_key = Some(min_key);
        self
    }

    #[must_use]
    pub fn with_max(mut self, max_key: Document) -> Self {
        self.max_key = Some(max_key);
        self
    }

    #[must_use]
    pub const fn is_bounded(&self) -> bool {
        self.min_key.is_some() || self.max_key.is_some()
    }
}
