/*
 * lilmail - pagination.rs
 *
 * Copyright 2017 Manos Pitsidianakis
 *
 * This file is part of lilmail.
 *
 * lilmail is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * lilmail is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with lilmail. If not, see <http://www.gnu.org/licenses/>.
 */

//! Newest-first pagination. Pages and sizes are 1-based; page 1 holds the
//! messages with the highest sequence numbers.

use std::ops::RangeInclusive;

use crate::{
    email::Message,
    error::{Error, ErrorKind, Result},
};

/// One page of a folder or of a search result.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct FolderPage {
    pub page: usize,
    pub page_size: usize,
    pub total_pages: usize,
    pub total_messages: usize,
    pub has_next: bool,
    pub has_prev: bool,
    pub messages: Vec<Message>,
}

/// `ceil(total / size)`, with an empty collection counting as one page.
pub const fn total_pages(total: usize, page_size: usize) -> usize {
    if page_size == 0 || total == 0 {
        return 1;
    }
    total.div_ceil(page_size)
}

/// Validated page coordinates for a collection of `total` items.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PageSpec {
    pub page: usize,
    pub page_size: usize,
    pub total: usize,
    pub total_pages: usize,
}

impl PageSpec {
    /// A `page_size` of zero is rejected. Page `0` is read as page `1` and
    /// pages past the end clamp to the last page.
    pub fn new(page: usize, page_size: usize, total: usize) -> Result<Self> {
        if page_size == 0 {
            return Err(Error::new("Page size must be at least 1").set_kind(ErrorKind::Validation));
        }
        let total_pages = total_pages(total, page_size);
        Ok(Self {
            page: page.clamp(1, total_pages),
            page_size,
            total,
            total_pages,
        })
    }

    /// Sequence numbers on this page, lowest first. `None` for an empty
    /// collection.
    pub fn sequence_range(&self) -> Option<RangeInclusive<usize>> {
        if self.total == 0 {
            return None;
        }
        let end = self.total - (self.page - 1) * self.page_size;
        let start = end.saturating_sub(self.page_size - 1).max(1);
        Some(start..=end)
    }

    /// Zero-based slice bounds for an in-memory list ordered newest first.
    pub fn slice_range(&self) -> std::ops::Range<usize> {
        let start = ((self.page - 1) * self.page_size).min(self.total);
        let end = (start + self.page_size).min(self.total);
        start..end
    }

    pub fn into_page(self, messages: Vec<Message>) -> FolderPage {
        FolderPage {
            page: self.page,
            page_size: self.page_size,
            total_pages: self.total_pages,
            total_messages: self.total,
            has_next: self.page < self.total_pages,
            has_prev: self.page > 1,
            messages,
        }
    }
}

impl FolderPage {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_empty_folder() {
        let spec = PageSpec::new(1, 20, 0).unwrap();
        assert_eq!(spec.sequence_range(), None);
        let page = spec.into_page(vec![]);
        assert_eq!(page.total_pages, 1);
        assert!(!page.has_next);
        assert!(!page.has_prev);
        assert!(page.is_empty());
    }

    #[test]
    fn test_pagination_last_partial_page() {
        let spec = PageSpec::new(3, 50, 101).unwrap();
        assert_eq!(spec.total_pages, 3);
        assert_eq!(spec.sequence_range(), Some(1..=1));
        assert_eq!(spec.sequence_range().unwrap().count(), 1);
        let page = spec.into_page(vec![Message::default()]);
        assert!(!page.has_next);
        assert!(page.has_prev);

        let first = PageSpec::new(1, 50, 101).unwrap();
        assert_eq!(first.sequence_range(), Some(52..=101));
        assert!(first.into_page(vec![]).has_next);
        assert_eq!(
            PageSpec::new(2, 50, 101).unwrap().sequence_range(),
            Some(2..=51)
        );
    }

    #[test]
    fn test_pagination_clamping() {
        let spec = PageSpec::new(9, 10, 25).unwrap();
        assert_eq!(spec.page, 3);
        assert_eq!(spec.sequence_range(), Some(1..=5));
        assert_eq!(PageSpec::new(0, 10, 25).unwrap().page, 1);
        assert_eq!(
            PageSpec::new(1, 0, 25).unwrap_err().kind,
            ErrorKind::Validation
        );
        assert_eq!(total_pages(100, 50), 2);
        assert_eq!(total_pages(0, 20), 1);
    }

    #[test]
    fn test_pagination_slice_range() {
        let spec = PageSpec::new(3, 4, 10).unwrap();
        assert_eq!(spec.slice_range(), 8..10);
        let spec = PageSpec::new(1, 4, 0).unwrap();
        assert_eq!(spec.slice_range(), 0..0);
    }
}
