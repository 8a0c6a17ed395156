use std::collections::HashMap;
use std::fmt;

/// Ordered, case-sensitive multimap of frame headers.
///
/// Names keep the position at which they were first set or appended. A name
/// may carry several values (repeated headers); the first one recorded is
/// the *principal* value returned by [`Headers::get`]. Deleting a name
/// forgets its position, so setting it again places it at the end.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    names: Vec<String>,
    values: HashMap<String, Vec<String>>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every value of `name` with `value`.
    ///
    /// An existing name keeps its position; a new one is placed last. Setting
    /// an empty string clears the principal value but keeps the name.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.values.get_mut(&name) {
            Some(values) => {
                values.clear();
                values.push(value);
            }
            None => {
                self.names.push(name.clone());
                self.values.insert(name, vec![value]);
            }
        }
    }

    /// Record an additional value for `name`. The first value appended to a
    /// new name becomes its principal value.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.values.get_mut(&name) {
            Some(values) => values.push(value),
            None => {
                self.names.push(name.clone());
                self.values.insert(name, vec![value]);
            }
        }
    }

    /// Set `name` only when it is not present yet.
    pub fn set_if_absent(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        if !self.has(&name) {
            self.set(name, value);
        }
    }

    /// Principal (first) value of `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Every value of `name` in the order it was recorded; empty when unset.
    pub fn all(&self, name: &str) -> &[String] {
        self.values.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Remove `name` and all of its values, returning them.
    pub fn delete(&mut self, name: &str) -> Option<Vec<String>> {
        let removed = self.values.remove(name)?;
        self.names.retain(|n| n != name);
        Some(removed)
    }

    /// Distinct names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// `(name, value)` pairs in name order, repeated values following their
    /// principal value.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.names.iter().flat_map(move |name| {
            self.values
                .get(name)
                .into_iter()
                .flatten()
                .map(move |value| (name.as_str(), value.as_str()))
        })
    }

    /// Number of `(name, value)` pairs, duplicates included.
    pub fn len(&self) -> usize {
        self.values.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Copy every name of `other` that this collection lacks, all values
    /// included.
    pub fn merge_missing(&mut self, other: &Headers) {
        for name in other.names() {
            if self.has(name) {
                continue;
            }
            for value in other.all(name) {
                self.append(name, value.as_str());
            }
        }
    }
}

impl<K, V> FromIterator<(K, V)> for Headers
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        headers.extend(iter);
        headers
    }
}

impl<K, V> Extend<(K, V)> for Headers
where
    K: Into<String>,
    V: Into<String>,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (name, value) in iter {
            self.append(name, value);
        }
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in self.iter() {
            writeln!(f, "{}: {}", name, value)?;
        }
        Ok(())
    }
}
