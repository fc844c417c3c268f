use smallvec::SmallVec;

/// A case-preserving header collection.
///
/// Keys are stored and compared exactly as received; lookup is
/// case-sensitive. Setting a key that is already present replaces its
/// value in place, so iteration order is insertion order, which is also
/// the order headers are written on the wire.
#[derive(Debug, Clone, Default)]
pub struct HeaderMap {
    // Nearly every message fits in the inline capacity.
    entries: SmallVec<[(String, String); 8]>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts the header, replacing the value of an existing key.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
