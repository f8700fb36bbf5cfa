use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::locale::Locale;

/// One tracked change of a translated attribute at a locale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub attribute: String,
    pub locale: Locale,

    /// Value before the first unsaved write
    pub from: Option<Value>,

    /// Value after the latest write
    pub to: Option<Value>,
}

/// Unsaved changes plus the changes of the last save
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    current: BTreeMap<String, Change>,
    previous: BTreeMap<String, Change>,
}

impl ChangeSet {
    /// Change key for (attribute, locale): `title_pt_br`
    pub fn key(attribute: &str, locale: &Locale) -> String {
        format!("{}_{}", attribute, locale.accessor_suffix())
    }

    /// Records a write from `from` to `to`
    ///
    /// An existing change keeps its original `from`; a change whose `to`
    /// equals its `from` is dropped.
    pub fn track(&mut self, attribute: &str, locale: &Locale, from: Option<Value>, to: Option<Value>) {
        let key = Self::key(attribute, locale);
        let original = match self.current.get(&key) {
            Some(change) => change.from.clone(),
            None => from,
        };

        if original == to {
            self.current.remove(&key);
        } else {
            self.current.insert(
                key,
                Change {
                    attribute: attribute.to_string(),
                    locale: locale.clone(),
                    from: original,
                    to,
                },
            );
        }
    }

    pub fn get(&self, attribute: &str, locale: &Locale) -> Option<&Change> {
        self.current.get(&Self::key(attribute, locale))
    }

    pub fn remove(&mut self, attribute: &str, locale: &Locale) -> Option<Change> {
        self.current.remove(&Self::key(attribute, locale))
    }

    pub fn current(&self) -> &BTreeMap<String, Change> {
        &self.current
    }

    pub fn previous(&self) -> &BTreeMap<String, Change> {
        &self.previous
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }

    /// Moves unsaved changes to `previous`
    pub fn commit(&mut self) {
        self.previous = std::mem::take(&mut self.current);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn commit_rolls_changes() {
        let en: Locale = "en".parse().unwrap();
        let mut changes = ChangeSet::default();

        changes.track("title", &en, None, Some(json!("foo")));
        assert_eq!(changes.current().len(), 1);

        changes.commit();
        assert!(changes.is_empty());
        assert_eq!(changes.previous()["title_en"].to, Some(json!("foo")));
    }
}
