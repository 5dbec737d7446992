use serde::{Deserialize, Serialize};

use crate::models::Reflect;

/// Page of results returned by paginated fields (`<T>Connection`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Reflect)]
pub struct Connection<T> {
    pub items: Vec<T>,
    pub total_count: i64,
    pub page_info: PageInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Reflect)]
pub struct PageInfo {
    pub has_next_page: bool,
    pub has_previous_page: bool,
    pub start_cursor: Option<String>,
    pub end_cursor: Option<String>,
}

impl<T: Reflect> Connection<T> {
    pub fn new(items: Vec<T>, total_count: i64, page_info: PageInfo) -> Self {
        Self {
            items,
            total_count,
            page_info,
        }
    }

    /// Offset pagination over an in-memory result set; cursors are offsets.
    pub fn paginate(all: Vec<T>, offset: usize, limit: usize) -> Self {
        let total = all.len();
        let start = offset.min(total);
        let end = start.saturating_add(limit).min(total);
        let items: Vec<T> = all.into_iter().skip(start).take(end - start).collect();

        let page_info = PageInfo {
            has_next_page: end < total,
            has_previous_page: start > 0,
            start_cursor: (!items.is_empty()).then(|| start.to_string()),
            end_cursor: (!items.is_empty()).then(|| (end - 1).to_string()),
        };

        Self::new(items, i64::try_from(total).unwrap_or(i64::MAX), page_info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Reflected;

    #[test]
    fn paginates_by_offset() {
        let page = Connection::paginate((0..25).collect::<Vec<i32>>(), 10, 10);
        assert_eq!(page.items, (10..20).collect::<Vec<_>>());
        assert_eq!(page.total_count, 25);
        assert!(page.page_info.has_next_page);
        assert!(page.page_info.has_previous_page);
        assert_eq!(page.page_info.start_cursor.as_deref(), Some("10"));
        assert_eq!(page.page_info.end_cursor.as_deref(), Some("19"));
    }

    #[test]
    fn offset_past_the_end_is_empty() {
        let page = Connection::paginate(vec![1, 2, 3], 5, 10);
        assert!(page.items.is_empty());
        assert!(!page.page_info.has_next_page);
        assert!(page.page_info.end_cursor.is_none());
    }

    #[test]
    fn reflects_with_declared_identifiers() {
        let reflected = Connection::paginate(vec![1_i32], 0, 1).reflect();
        let record = reflected.as_record().unwrap();
        assert_eq!(record.get("total_count"), Some(&Reflected::Int(1)));
        assert!(record.get("page_info").and_then(Reflected::as_record).is_some());
    }
}
