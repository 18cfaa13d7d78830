use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Raw `?page=&page_size=` query string values.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    pub page: Option<String>,
    #[serde(default)]
    pub page_size: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Invalid page.")]
pub struct InvalidPage;

/// Validated page coordinates, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl PageRequest {
    pub fn new(page: u32, page_size: u32) -> Self {
        let page_size = match page_size {
            0 => DEFAULT_PAGE_SIZE,
            size => size.min(MAX_PAGE_SIZE),
        };
        Self {
            page: page.max(1),
            page_size,
        }
    }

    /// An unparseable page number is an error; an unparseable size falls back to the default.
    pub fn from_query(query: &PageQuery) -> Result<Self, InvalidPage> {
        let page = match query.page.as_deref().map(str::trim) {
            None | Some("") => 1,
            Some(raw) => match raw.parse::<u32>() {
                Ok(page) if page >= 1 => page,
                _ => return Err(InvalidPage),
            },
        };

        let page_size = query
            .page_size
            .as_deref()
            .and_then(|raw| raw.trim().parse::<u32>().ok())
            .unwrap_or(DEFAULT_PAGE_SIZE);

        Ok(Self::new(page, page_size))
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.page_size)
    }

    pub fn limit(&self) -> u64 {
        u64::from(self.page_size)
    }

    pub fn total_pages(&self, count: u64) -> u64 {
        if count == 0 {
            1
        } else {
            count.div_ceil(u64::from(self.page_size))
        }
    }

    /// Rejects pages past the end; page 1 of an empty collection is allowed.
    pub fn check_bounds(&self, count: u64) -> Result<(), InvalidPage> {
        if u64::from(self.page) > self.total_pages(count) {
            Err(InvalidPage)
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub count: u64,
    pub total_pages: u64,
    pub current_page: u32,
    pub next: Option<String>,
    pub previous: Option<String>,
    pub results: Vec<T>,
}

impl<T> Page<T> {
    pub fn new(results: Vec<T>, count: u64, request: PageRequest, base_path: &str) -> Self {
        let total_pages = request.total_pages(count);
        let link = |page: u32| format!("{base_path}?page={page}&page_size={}", request.page_size);

        let next = (u64::from(request.page) < total_pages).then(|| link(request.page + 1));
        let previous = (request.page > 1).then(|| link(request.page - 1));

        Self {
            count,
            total_pages,
            current_page: request.page,
            next,
            previous,
            results,
        }
    }
}
