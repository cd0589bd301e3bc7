use std::borrow::Cow;
use std::collections::HashSet;

use serde_json::Value;

/// The ordered tuple of scalar values that identifies an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Fingerprint(Vec<Value>);

impl Fingerprint {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    /// Stable string form used for set membership.
    ///
    /// Each element is written as `<byte length>:<text>;`, so no element can
    /// bleed into its neighbour whatever characters it contains. Values are
    /// compared by their JSON text only: `1` and `1.0` are different keys.
    pub fn key(&self) -> String {
        let mut key = String::new();
        for value in &self.0 {
            let text = canonical(value);
            key.push_str(&format!("{}:{};", text.len(), text));
        }
        key
    }
}

fn canonical(value: &Value) -> Cow<'_, str> {
    match value {
        Value::String(s) => Cow::Borrowed(s),
        Value::Null => Cow::Borrowed("null"),
        Value::Bool(b) => Cow::Owned(b.to_string()),
        Value::Number(n) => Cow::Owned(n.to_string()),
        other => Cow::Owned(other.to_string()),
    }
}

/// Set of fingerprints already known to exist remotely.
#[derive(Debug, Default, Clone)]
pub struct UniquenessTracker {
    keys: HashSet<String>,
}

impl UniquenessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the fingerprint was already present.
    pub fn add(&mut self, fingerprint: &Fingerprint) -> bool {
        self.keys.insert(fingerprint.key())
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.keys.contains(&fingerprint.key())
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl FromIterator<Fingerprint> for UniquenessTracker {
    fn from_iter<I: IntoIterator<Item = Fingerprint>>(iter: I) -> Self {
        let mut tracker = Self::new();
        for fingerprint in iter {
            tracker.add(&fingerprint);
        }
        tracker
    }
}
