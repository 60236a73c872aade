/// A named child entry returned by a listing call (brand or model)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub id: i64,
    pub name: String,
}

/// A year-variant entry returned by the year listing call
///
/// `code` is kept verbatim; it is only parsed when the variant is priced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YearEntry {
    pub code: String,
    pub label: String,
}

impl CatalogEntry {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

impl YearEntry {
    pub fn new(code: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            label: label.into(),
        }
    }
}
