//! Artifact catalogs: the object-store documents through which steps
//! exchange outputs.
//!
//! A catalog lists produced data items with optional spatial/temporal
//! metadata. Aggregated inputs that would exceed the configured page size
//! are split into a chain of pages joined by prev/next links.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A catalog document as stored in the object store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArtifactCatalog {
    #[serde(default)]
    pub items: Vec<CatalogItem>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<CatalogLink>,
}

impl ArtifactCatalog {
    pub fn new(items: Vec<CatalogItem>) -> Self {
        Self {
            items,
            links: Vec::new(),
        }
    }

    pub fn link(&self, rel: &str) -> Option<&CatalogLink> {
        self.links.iter().find(|l| l.rel == rel)
    }
}

/// One produced data item within a catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogItem {
    pub href: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// [W, S, E, N]; validated to exactly four finite floats.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<Vec<f64>>,
    /// "start,end" where both are RFC 3339 instants and start <= end.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temporal: Option<String>,
}

impl CatalogItem {
    pub fn href_only(href: impl Into<String>) -> Self {
        Self {
            href: href.into(),
            title: None,
            mime_type: None,
            bbox: None,
            temporal: None,
        }
    }

    /// Validate the item's metadata, yielding the normalized form used for
    /// job links.
    pub fn validate(&self) -> Result<ValidatedItem, CatalogValidationError> {
        url::Url::parse(&self.href)
            .map_err(|_| CatalogValidationError::InvalidHref(self.href.clone()))?;

        let bbox = match &self.bbox {
            None => None,
            Some(values) => {
                if values.len() != 4 || values.iter().any(|v| !v.is_finite()) {
                    return Err(CatalogValidationError::InvalidBbox(format!("{:?}", values)));
                }
                Some([values[0], values[1], values[2], values[3]])
            }
        };

        let temporal = match &self.temporal {
            None => None,
            Some(raw) => Some(parse_temporal(raw)?),
        };

        Ok(ValidatedItem {
            href: self.href.clone(),
            title: self.title.clone(),
            mime_type: self.mime_type.clone(),
            bbox,
            temporal,
        })
    }
}

/// Paging (or other) link within a catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogLink {
    pub rel: String,
    pub href: String,
}

/// A catalog item whose metadata passed validation.
#[derive(Debug, Clone)]
pub struct ValidatedItem {
    pub href: String,
    pub title: Option<String>,
    pub mime_type: Option<String>,
    pub bbox: Option<[f64; 4]>,
    pub temporal: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

#[derive(Debug, Error)]
pub enum CatalogValidationError {
    #[error("invalid link href: {0}")]
    InvalidHref(String),
    #[error("bbox must be exactly four finite numbers [W, S, E, N], got {0}")]
    InvalidBbox(String),
    #[error("temporal must be two RFC 3339 instants \"start,end\" with start <= end, got {0}")]
    InvalidTemporal(String),
}

fn parse_temporal(raw: &str) -> Result<(DateTime<Utc>, DateTime<Utc>), CatalogValidationError> {
    let invalid = || CatalogValidationError::InvalidTemporal(raw.to_string());

    let (start, end) = raw.split_once(',').ok_or_else(invalid)?;
    let start = DateTime::parse_from_rfc3339(start.trim())
        .map_err(|_| invalid())?
        .with_timezone(&Utc);
    let end = DateTime::parse_from_rfc3339(end.trim())
        .map_err(|_| invalid())?
        .with_timezone(&Utc);
    if start > end {
        return Err(invalid());
    }
    Ok((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item_with(bbox: Option<Vec<f64>>, temporal: Option<&str>) -> CatalogItem {
        CatalogItem {
            href: "https://example.com/out.nc".to_string(),
            title: Some("out".to_string()),
            mime_type: Some("application/x-netcdf".to_string()),
            bbox,
            temporal: temporal.map(str::to_string),
        }
    }

    #[test]
    fn valid_item_normalizes() {
        let item = item_with(
            Some(vec![-180.0, -90.0, 180.0, 90.0]),
            Some("2020-01-01T00:00:00Z,2020-12-31T23:59:59Z"),
        );
        let valid = item.validate().unwrap();
        assert_eq!(valid.bbox, Some([-180.0, -90.0, 180.0, 90.0]));
        let (start, end) = valid.temporal.unwrap();
        assert!(start < end);
    }

    #[test]
    fn bbox_must_have_four_finite_floats() {
        assert!(item_with(Some(vec![1.0, 2.0, 3.0]), None).validate().is_err());
        assert!(item_with(Some(vec![1.0, 2.0, 3.0, f64::NAN]), None)
            .validate()
            .is_err());
        assert!(item_with(Some(vec![1.0, 2.0, 3.0, 4.0, 5.0]), None)
            .validate()
            .is_err());
    }

    #[test]
    fn temporal_must_be_ordered_pair() {
        assert!(item_with(None, Some("2020-01-01T00:00:00Z"))
            .validate()
            .is_err());
        assert!(
            item_with(None, Some("2021-01-01T00:00:00Z,2020-01-01T00:00:00Z"))
                .validate()
                .is_err()
        );
        assert!(item_with(None, Some("not-a-date,2020-01-01T00:00:00Z"))
            .validate()
            .is_err());
    }

    #[test]
    fn href_must_parse_as_url() {
        let item = CatalogItem::href_only("not a url");
        assert!(item.validate().is_err());
    }

    #[test]
    fn catalog_round_trips_through_json() {
        let catalog = ArtifactCatalog {
            items: vec![CatalogItem::href_only("https://example.com/a.nc")],
            links: vec![CatalogLink {
                rel: "next".to_string(),
                href: "page-2.json".to_string(),
            }],
        };
        let json = serde_json::to_string(&catalog).unwrap();
        let back: ArtifactCatalog = serde_json::from_str(&json).unwrap();
        assert_eq!(back.items.len(), 1);
        assert_eq!(back.link("next").unwrap().href, "page-2.json");
    }
}
