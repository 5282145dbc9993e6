use serde::{Deserialize, Serialize};

pub const NIST_COM_KEY: &str = "NIST_COM";

/// Ordered `KEY value` attribute list carried in a COM segment.
///
/// Rendered as `NIST_COM <n>` on the first line, where `n` counts every
/// line including that one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NistComment {
    fields: Vec<(String, String)>,
}

impl NistComment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl ToString) {
        let key = key.into();
        let value = value.to_string();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.fields.push((key, value)),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|v| v.trim().parse().ok())
    }

    /// Resolution field, treating NBIS's `-1` placeholder as unknown.
    pub fn ppi(&self) -> Option<u32> {
        self.get_int("PPI")
            .filter(|&v| v > 0)
            .and_then(|v| u32::try_from(v).ok())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn to_text(&self) -> String {
        let mut text = format!("{} {}", NIST_COM_KEY, self.fields.len() + 1);
        for (key, value) in &self.fields {
            text.push('\n');
            text.push_str(key);
            text.push(' ');
            text.push_str(value);
        }
        text
    }

    /// Returns `None` for comments that are not NISTCOM blocks.
    pub fn parse(text: &str) -> Option<Self> {
        let mut lines = text.trim_end_matches('\0').lines();
        let first = lines.next()?;
        let (key, _) = first.split_once(' ')?;
        if key != NIST_COM_KEY {
            return None;
        }

        let mut comment = Self::new();
        for line in lines {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match line.split_once(' ') {
                Some((k, v)) => comment.set(k, v.trim()),
                None => comment.set(line, ""),
            }
        }
        Some(comment)
    }
}
