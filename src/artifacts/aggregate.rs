//! Aggregated input catalogs.
//!
//! An aggregating step consumes every prior-step output as a single logical
//! input. When the entry count exceeds the configured page size the catalog
//! is split into pages joined by prev/next links; the step's one work item
//! points at the head page.

use super::{write_catalog, CatalogError, ObjectStore};
use crate::models::{ArtifactCatalog, CatalogItem, CatalogLink};

/// Split `hrefs` into catalog pages of at most `page_size` entries.
/// `key_for_page` maps a 1-based page number to its storage location.
pub fn paginate<F>(hrefs: &[String], page_size: usize, key_for_page: F) -> Vec<(String, ArtifactCatalog)>
where
    F: Fn(usize) -> String,
{
    let page_size = page_size.max(1);
    if hrefs.is_empty() {
        return vec![(key_for_page(1), ArtifactCatalog::default())];
    }
    let page_count = hrefs.len().div_ceil(page_size);

    hrefs
        .chunks(page_size)
        .enumerate()
        .map(|(i, chunk)| {
            let page = i + 1;
            let mut links = Vec::new();
            if page > 1 {
                links.push(CatalogLink {
                    rel: "prev".to_string(),
                    href: key_for_page(page - 1),
                });
            }
            if page < page_count {
                links.push(CatalogLink {
                    rel: "next".to_string(),
                    href: key_for_page(page + 1),
                });
            }
            let catalog = ArtifactCatalog {
                items: chunk.iter().cloned().map(CatalogItem::href_only).collect(),
                links,
            };
            (key_for_page(page), catalog)
        })
        .collect()
}

/// Write the paged aggregated catalog for a step and return the head page
/// location.
pub async fn write_aggregated_catalog(
    store: &dyn ObjectStore,
    job_id: &str,
    step_index: i32,
    hrefs: &[String],
    page_size: usize,
) -> Result<String, CatalogError> {
    let key_for_page =
        |page: usize| format!("jobs/{}/aggregate/step-{}/page-{}.json", job_id, step_index, page);

    let pages = paginate(hrefs, page_size, key_for_page);
    for (location, catalog) in &pages {
        match write_catalog(store, location, catalog).await {
            Ok(()) => {}
            // Page content is a deterministic function of the step's outputs,
            // so a page left behind by an interrupted attempt is identical.
            Err(CatalogError::Store { source, .. })
                if source.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e),
        }
    }
    Ok(pages[0].0.clone())
}
