use serde::{Deserialize, Serialize};

const DEFAULT_LIMIT: u32 = 10;
const DEFAULT_PAGE: u32 = 1;
const DEFAULT_SORT: &str = "id desc";

/// Page request and page of results for list endpoints. Deserializes from a
/// query string; missing or zero values fall back to the defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pagination<T> {
    #[serde(default)]
    pub limit: u32,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub sort: String,
    #[serde(default)]
    pub total_rows: u64,
    #[serde(default)]
    pub total_pages: u64,
    #[serde(default = "Vec::new")]
    pub rows: Vec<T>,
}

impl<T> Default for Pagination<T> {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            page: DEFAULT_PAGE,
            sort: DEFAULT_SORT.to_owned(),
            total_rows: 0,
            total_pages: 0,
            rows: Vec::new(),
        }
    }
}

impl<T> Pagination<T> {
    pub fn limit(&self) -> u32 {
        match self.limit {
            0 => DEFAULT_LIMIT,
            limit => limit,
        }
    }

    pub fn page(&self) -> u32 {
        match self.page {
            0 => DEFAULT_PAGE,
            page => page,
        }
    }

    pub fn sort(&self) -> &str {
        match self.sort.trim() {
            "" => DEFAULT_SORT,
            sort => sort,
        }
    }

    /// Rows to skip before this page.
    pub fn offset(&self) -> u64 {
        u64::from(self.page() - 1) * u64::from(self.limit())
    }

    /// Fills in the page contents and derives the page count from `total_rows`.
    pub fn with_rows<U>(self, total_rows: u64, rows: Vec<U>) -> Pagination<U> {
        let limit = self.limit();
        Pagination {
            limit,
            page: self.page(),
            sort: self.sort().to_owned(),
            total_rows,
            total_pages: total_rows.div_ceil(u64::from(limit)),
            rows,
        }
    }
}
