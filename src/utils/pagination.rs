use serde::Serialize;

/// Page metadata for gallery views. Pages are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub total_items: usize,
    pub total_pages: usize,
    pub page: usize,
    pub items_per_page: usize,
    pub prev_page: Option<usize>,
    pub next_page: Option<usize>,
}

impl PageInfo {
    pub fn new(total_items: usize, page: usize, items_per_page: usize) -> Self {
        let items_per_page = items_per_page.max(1);
        let page = page.max(1);
        let total_pages = total_items.div_ceil(items_per_page);

        Self {
            total_items,
            total_pages,
            page,
            items_per_page,
            prev_page: (page > 1).then(|| page - 1),
            next_page: (page < total_pages).then(|| page + 1),
        }
    }
}

/// Slice out one page of `items`; pages past the end are empty.
pub fn paginate<T: Clone>(items: &[T], page: usize, items_per_page: usize) -> (Vec<T>, PageInfo) {
    let info = PageInfo::new(items.len(), page, items_per_page);
    let start = (info.page - 1).saturating_mul(info.items_per_page);
    let page_items = items
        .iter()
        .skip(start)
        .take(info.items_per_page)
        .cloned()
        .collect();
    (page_items, info)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slices_pages() {
        let items: Vec<u32> = (1..=7).collect();
        let (page, info) = paginate(&items, 2, 3);
        assert_eq!(page, vec![4, 5, 6]);
        assert_eq!(info.total_pages, 3);
        assert_eq!(info.prev_page, Some(1));
        assert_eq!(info.next_page, Some(3));

        let (last, info) = paginate(&items, 3, 3);
        assert_eq!(last, vec![7]);
        assert_eq!(info.next_page, None);
    }

    #[test]
    fn clamps_degenerate_input() {
        let items = vec!['a', 'b'];
        let (page, info) = paginate(&items, 0, 0);
        assert_eq!(page, vec!['a']);
        assert_eq!(info.page, 1);
        assert_eq!(info.items_per_page, 1);

        let (beyond, _) = paginate(&items, 9, 2);
        assert!(beyond.is_empty());

        let empty: Vec<u8> = Vec::new();
        assert_eq!(paginate(&empty, 1, 10).1.total_pages, 0);
    }
}
