//! 表单值存储接口与字段命名。

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::errors::EngineError;
use crate::pipeline::{CanonicalModel, Label};

/// 保留的搜索字段名。
pub const SEARCH_FIELD: &str = "search";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FormValue {
    Flag(bool),
    Text(String),
}

impl FormValue {
    /// 布尔字段；文本字段视为 `None`。
    pub fn as_flag(&self) -> Option<bool> {
        match self {
            FormValue::Flag(flag) => Some(*flag),
            FormValue::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FormValue::Text(text) => Some(text),
            FormValue::Flag(_) => None,
        }
    }
}

impl From<bool> for FormValue {
    fn from(value: bool) -> Self {
        FormValue::Flag(value)
    }
}

impl From<&str> for FormValue {
    fn from(value: &str) -> Self {
        FormValue::Text(value.to_string())
    }
}

impl From<String> for FormValue {
    fn from(value: String) -> Self {
        FormValue::Text(value)
    }
}

/// 宿主的响应式表单层。
pub trait FormStore {
    /// 全部字段，按插入顺序。
    fn values(&self) -> Vec<(String, FormValue)>;
    fn value(&self, name: &str) -> Option<FormValue>;
    fn set_value(&mut self, name: &str, value: FormValue);

    fn flag(&self, name: &str) -> Option<bool> {
        self.value(name).and_then(|value| value.as_flag())
    }

    fn text(&self, name: &str) -> Option<String> {
        self.value(name)
            .and_then(|value| value.as_text().map(str::to_string))
    }
}

/// 内存中的表单实现。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormValues {
    fields: IndexMap<String, FormValue>,
}

impl FormValues {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn clear(&mut self) {
        self.fields.clear();
    }
}

impl FormStore for FormValues {
    fn values(&self) -> Vec<(String, FormValue)> {
        self.fields
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }

    fn value(&self, name: &str) -> Option<FormValue> {
        self.fields.get(name).cloned()
    }

    fn set_value(&mut self, name: &str, value: FormValue) {
        self.fields.insert(name.to_string(), value);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldSuffix {
    /// 展位编号文本
    Main,
    Selected,
    Visibility,
    Delete,
}

impl FieldSuffix {
    pub fn as_str(self) -> &'static str {
        match self {
            FieldSuffix::Main => "main",
            FieldSuffix::Selected => "selected",
            FieldSuffix::Visibility => "visibility",
            FieldSuffix::Delete => "delete",
        }
    }
}

impl FromStr for FieldSuffix {
    type Err = EngineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "main" => Ok(FieldSuffix::Main),
            "selected" => Ok(FieldSuffix::Selected),
            "visibility" => Ok(FieldSuffix::Visibility),
            "delete" => Ok(FieldSuffix::Delete),
            other => Err(EngineError::InvalidValue {
                field: "suffix",
                value: other.to_string(),
            }),
        }
    }
}

/// `{layer}/{handle}/{suffix}` 形式的字段名。图层名本身可以包含 `/`。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldName {
    pub layer: String,
    pub handle: String,
    pub suffix: FieldSuffix,
}

impl FieldName {
    pub fn new(layer: impl Into<String>, handle: impl Into<String>, suffix: FieldSuffix) -> Self {
        Self {
            layer: layer.into(),
            handle: handle.into(),
            suffix,
        }
    }

    /// 同一标注的另一个字段。
    pub fn with_suffix(&self, suffix: FieldSuffix) -> Self {
        Self {
            suffix,
            ..self.clone()
        }
    }
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.layer, self.handle, self.suffix.as_str())
    }
}

impl FromStr for FieldName {
    type Err = EngineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || EngineError::InvalidValue {
            field: "field name",
            value: value.to_string(),
        };
        let mut parts = value.rsplitn(3, '/');
        let suffix = parts.next().ok_or_else(invalid)?.parse()?;
        let handle = parts.next().filter(|h| !h.is_empty()).ok_or_else(invalid)?;
        let layer = parts.next().ok_or_else(invalid)?;
        Ok(Self::new(layer, handle, suffix))
    }
}

/// 为每个已挂接的标注写入初始字段：编号、选中、可见、未删除。
pub fn seed_label_fields(model: &CanonicalModel, form: &mut dyn FormStore) {
    for label in model.labels.values().filter(|label| label.stand.is_some()) {
        seed_label(label, form);
    }
}

fn seed_label(label: &Label, form: &mut dyn FormStore) {
    let main = FieldName::new(&label.layer, &label.handle, FieldSuffix::Main);
    form.set_value(&main.to_string(), FormValue::Text(label.text.clone()));
    for (suffix, value) in [
        (FieldSuffix::Selected, true),
        (FieldSuffix::Visibility, true),
        (FieldSuffix::Delete, false),
    ] {
        form.set_value(&main.with_suffix(suffix).to_string(), FormValue::Flag(value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_names_round_trip_with_slashes_in_layer() {
        let name: FieldName = "hall/a/stand id/1B/visibility".parse().expect("字段名");
        assert_eq!(name.layer, "hall/a/stand id");
        assert_eq!(name.handle, "1B");
        assert_eq!(name.suffix, FieldSuffix::Visibility);
        assert_eq!(name.to_string(), "hall/a/stand id/1B/visibility");
    }

    #[test]
    fn malformed_field_names_are_rejected() {
        assert!("search".parse::<FieldName>().is_err());
        assert!("layer/1B/colour".parse::<FieldName>().is_err());
        assert!("layer//main".parse::<FieldName>().is_err());
    }

    #[test]
    fn form_values_keep_insertion_order() {
        let mut form = FormValues::new();
        form.set_value("b", FormValue::from(true));
        form.set_value("a", FormValue::from("x"));
        form.set_value("b", FormValue::from(false));
        let names: Vec<_> = form.values().into_iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(form.flag("b"), Some(false));
        assert_eq!(form.text("a").as_deref(), Some("x"));
        assert_eq!(form.flag("a"), None);
    }

    #[test]
    fn form_values_serialize_untagged() {
        let mut form = FormValues::new();
        form.set_value("layer/1B/main", FormValue::from("A1"));
        form.set_value("layer/1B/selected", FormValue::from(true));
        let json = serde_json::to_string(&form).expect("序列化");
        assert_eq!(json, r#"{"fields":{"layer/1B/main":"A1","layer/1B/selected":true}}"#);
    }
}
