use serde::{Deserialize, Serialize};

/// A request for one page of a listing operation (`ListDomains`,
/// `RetrieveObjects`, `RetrieveSubjects`, …, §4.3/§4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    #[serde(default)]
    pub cursor: Option<String>,
    pub limit: u32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub subject_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub status: Option<String>,
}

impl Page {
    #[must_use]
    pub fn first(limit: u32) -> Self {
        Self {
            cursor: None,
            limit,
            subject_id: None,
            status: None,
        }
    }
}

/// A page of results plus the cursor to fetch the next one. `next_cursor` is
/// `None` once the final page has been returned; callers drain a listing by
/// stopping when `next_cursor` is empty or a short page comes back (§9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageResult<T> {
    pub items: Vec<T>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub next_cursor: Option<String>,
}

impl<T> PageResult<T> {
    #[must_use]
    pub fn is_last_page(&self, requested_limit: u32) -> bool {
        self.next_cursor.is_none() || self.items.len() < requested_limit as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_page_detected_by_empty_cursor() {
        let page: PageResult<u32> = PageResult {
            items: vec![1, 2, 3],
            next_cursor: None,
        };
        assert!(page.is_last_page(3));
    }

    #[test]
    fn last_page_detected_by_short_page() {
        let page: PageResult<u32> = PageResult {
            items: vec![1, 2],
            next_cursor: Some("c".into()),
        };
        assert!(page.is_last_page(3));
    }

    #[test]
    fn full_page_with_cursor_is_not_last() {
        let page: PageResult<u32> = PageResult {
            items: vec![1, 2, 3],
            next_cursor: Some("c".into()),
        };
        assert!(!page.is_last_page(3));
    }
}
