//! 选中/可见台账：按标注句柄索引，由表单值投影而来。

use indexmap::IndexMap;
use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::form::{FieldName, FieldSuffix, FormStore, FormValue};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhiteListEntry {
    /// 标注句柄
    pub handle: String,
    pub layer: String,
    pub visible: bool,
    pub selected: bool,
}

/// 通过搜索过滤且未被删除的标注集合。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ledger {
    entries: IndexMap<String, WhiteListEntry>,
}

/// 搜索词匹配器：合法正则按正则匹配（忽略大小写），否则退化为子串匹配。
enum SearchMatcher {
    All,
    Pattern(regex::Regex),
    Substring(String),
}

impl SearchMatcher {
    fn new(search: &str) -> Self {
        if search.is_empty() {
            return SearchMatcher::All;
        }
        match RegexBuilder::new(search).case_insensitive(true).build() {
            Ok(pattern) => SearchMatcher::Pattern(pattern),
            Err(err) => {
                debug!(search, error = %err, "搜索词不是合法正则，按子串匹配");
                SearchMatcher::Substring(search.to_lowercase())
            }
        }
    }

    fn matches(&self, text: &str) -> bool {
        match self {
            SearchMatcher::All => true,
            SearchMatcher::Pattern(pattern) => pattern.is_match(text),
            SearchMatcher::Substring(needle) => text.to_lowercase().contains(needle),
        }
    }
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// 依据表单中全部 `…/main` 字段重建台账。
    pub fn recompute_filter(&mut self, form: &dyn FormStore, search: &str) {
        let matcher = SearchMatcher::new(search);
        let mut entries = IndexMap::new();
        for (name, value) in form.values() {
            let Ok(field) = name.parse::<FieldName>() else {
                continue;
            };
            if field.suffix != FieldSuffix::Main {
                continue;
            }
            let text = match &value {
                FormValue::Text(text) => text.as_str(),
                FormValue::Flag(_) => continue,
            };
            let flag = |suffix: FieldSuffix, default: bool| {
                form.flag(&field.with_suffix(suffix).to_string())
                    .unwrap_or(default)
            };
            if flag(FieldSuffix::Delete, false) || !matcher.matches(text) {
                continue;
            }
            let entry = WhiteListEntry {
                handle: field.handle.clone(),
                layer: field.layer.clone(),
                visible: flag(FieldSuffix::Visibility, true),
                selected: flag(FieldSuffix::Selected, true),
            };
            entries.insert(field.handle.clone(), entry);
        }
        self.entries = entries;
    }

    #[inline]
    pub fn get(&self, handle: &str) -> Option<&WhiteListEntry> {
        self.entries.get(handle)
    }

    #[inline]
    pub fn contains(&self, handle: &str) -> bool {
        self.entries.contains_key(handle)
    }

    pub fn entries(&self) -> impl Iterator<Item = &WhiteListEntry> {
        self.entries.values()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::FormValues;

    fn seed(form: &mut FormValues, handle: &str, text: &str) {
        let main = FieldName::new("stand id", handle, FieldSuffix::Main);
        form.set_value(&main.to_string(), FormValue::from(text));
        form.set_value(
            &main.with_suffix(FieldSuffix::Selected).to_string(),
            FormValue::from(true),
        );
        form.set_value(
            &main.with_suffix(FieldSuffix::Visibility).to_string(),
            FormValue::from(true),
        );
        form.set_value(
            &main.with_suffix(FieldSuffix::Delete).to_string(),
            FormValue::from(false),
        );
    }

    fn handles(ledger: &Ledger) -> Vec<String> {
        ledger.entries().map(|entry| entry.handle.clone()).collect()
    }

    #[test]
    fn empty_search_matches_every_label() {
        let mut form = FormValues::new();
        seed(&mut form, "L1", "A-12");
        seed(&mut form, "L2", "B-7");
        form.set_value("search", FormValue::from("ignored"));
        let mut ledger = Ledger::new();
        ledger.recompute_filter(&form, "");
        assert_eq!(handles(&ledger), vec!["L1", "L2"]);
        let entry = ledger.get("L1").expect("L1");
        assert!(entry.visible && entry.selected);
        assert_eq!(entry.layer, "stand id");
    }

    #[test]
    fn search_is_case_insensitive_regex() {
        let mut form = FormValues::new();
        seed(&mut form, "L1", "Hall-A1");
        seed(&mut form, "L2", "hall-b2");
        seed(&mut form, "L3", "Kiosk");
        let mut ledger = Ledger::new();
        ledger.recompute_filter(&form, "^HALL-[ab]");
        assert_eq!(handles(&ledger), vec!["L1", "L2"]);
    }

    #[test]
    fn invalid_regex_falls_back_to_substring() {
        let mut form = FormValues::new();
        seed(&mut form, "L1", "Stand (A");
        seed(&mut form, "L2", "Stand B");
        let mut ledger = Ledger::new();
        ledger.recompute_filter(&form, "(a");
        assert_eq!(handles(&ledger), vec!["L1"]);
    }

    #[test]
    fn deleted_labels_are_excluded() {
        let mut form = FormValues::new();
        seed(&mut form, "L1", "A1");
        seed(&mut form, "L2", "A2");
        form.set_value("stand id/L1/delete", FormValue::from(true));
        form.set_value("stand id/L2/visibility", FormValue::from(false));
        let mut ledger = Ledger::new();
        ledger.recompute_filter(&form, "");
        assert_eq!(handles(&ledger), vec!["L2"]);
        assert!(!ledger.get("L2").expect("L2").visible);
    }
}
