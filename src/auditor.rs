use dashmap::DashMap;

/// Lookup of the last offset read for a given source identifier.
pub trait Auditor: Send + Sync + 'static {
    fn offset(&self, identifier: &str) -> Option<String>;
}

/// Keeps committed offsets in memory for the lifetime of the process.
#[derive(Debug, Default)]
pub struct MemoryAuditor {
    offsets: DashMap<String, String>,
}

impl MemoryAuditor {
    pub fn commit(&self, identifier: impl Into<String>, offset: impl Into<String>) {
        self.offsets.insert(identifier.into(), offset.into());
    }

    pub fn size(&self) -> usize {
        self.offsets.len()
    }
}

impl Auditor for MemoryAuditor {
    fn offset(&self, identifier: &str) -> Option<String> {
        self.offsets.get(identifier).map(|entry| entry.value().clone())
    }
}
