use rand::Rng;
use uuid::Uuid;

/// Splits a `page_size + 1` fetch into the returned page and the cursor of
/// the next one. The extra row, when present, is the first row of the next
/// page; its id becomes the cursor and the row itself is dropped from the
/// returned window.
pub fn split_page<T>(
    mut rows: Vec<T>,
    page_size: usize,
    id_of: impl Fn(&T) -> Uuid,
) -> (Vec<T>, Option<Uuid>) {
    let next_cursor = (rows.len() > page_size).then(|| id_of(&rows[page_size]));
    rows.truncate(page_size);
    (rows, next_cursor)
}

/// Random 6-digit invitation code. Uniqueness is the caller's problem; the
/// registry retries until the value is absent from the code table.
pub fn generate_invitation_code() -> String {
    rand::thread_rng().gen_range(100_000..1_000_000).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<Uuid> {
        (0..n).map(|_| Uuid::new_v4()).collect()
    }

    // In-memory stand-in for a keyset query: rows from the cursor position
    // (inclusive) onward, page_size + 1 of them.
    fn fetch(items: &[Uuid], cursor: Option<Uuid>, page_size: usize) -> Vec<Uuid> {
        let start = match cursor {
            Some(c) => items.iter().position(|id| *id == c).expect("cursor must exist"),
            None => 0,
        };
        items[start..].iter().take(page_size + 1).copied().collect()
    }

    #[test]
    fn test_six_items_page_size_four() {
        let items = ids(6);

        let (page, cursor) = split_page(fetch(&items, None, 4), 4, |id| *id);
        assert_eq!(page, items[..4]);
        assert_eq!(cursor, Some(items[4]));

        let (page, cursor) = split_page(fetch(&items, cursor, 4), 4, |id| *id);
        assert_eq!(page, items[4..]);
        assert_eq!(cursor, None);
    }

    #[test]
    fn test_walk_yields_every_item_exactly_once() {
        for total in [0, 1, 2, 3, 4, 5, 7, 10, 12] {
            for page_size in [3usize, 4, 5] {
                let items = ids(total);
                let mut seen = Vec::new();
                let mut cursor = None;
                loop {
                    let (page, next) = split_page(fetch(&items, cursor, page_size), page_size, |id| *id);
                    assert!(page.len() <= page_size);
                    seen.extend(page);
                    match next {
                        Some(c) => cursor = Some(c),
                        None => break,
                    }
                }
                assert_eq!(seen, items, "total={} page_size={}", total, page_size);
            }
        }
    }

    #[test]
    fn test_exact_page_boundary_has_no_cursor() {
        let items = ids(4);
        let (page, cursor) = split_page(fetch(&items, None, 4), 4, |id| *id);
        assert_eq!(page.len(), 4);
        assert_eq!(cursor, None);
    }

    #[test]
    fn test_invitation_code_shape() {
        for _ in 0..200 {
            let code = generate_invitation_code();
            assert_eq!(code.len(), 6);
            assert!(code.bytes().all(|b| b.is_ascii_digit()));
            let value: u32 = code.parse().unwrap();
            assert!((100_000..=999_999).contains(&value));
        }
    }
}
