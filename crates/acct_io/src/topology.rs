//! Resource → institution map built from the topology resource-group summary.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::{is_stale, read_json, write_json_atomic};
use crate::{IoError, IoResult};

pub const RESOURCE_SUMMARY_URL: &str = "https://topology.opensciencegrid.org/rgsummary/xml";
pub const DEFAULT_CACHE_FILE: &str = "topology_site_map.json";
pub const CACHE_MAX_AGE: Duration = Duration::from_secs(3600);

/// Resources the summary does not list, or lists under another facility.
const MANUAL_MAPPINGS: [(&str, &str); 8] = [
    ("GPGrid", "Fermi National Accelerator Laboratory"),
    ("SURFsara", "SURFsara"),
    ("IN2P3-CC", "IN2P3"),
    ("NIKHEF-ELPROD", "Nikhef"),
    ("ISI_ImageTest", "University of Southern California"),
    ("WISC-PATH-EP", "University of Wisconsin"),
    ("GP-ARGO-doane-backfill", "Great Plains Network"),
    ("GP-ARGO-cameron-backfill", "Great Plains Network"),
];

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SiteMap(BTreeMap<String, String>);

impl SiteMap {
    pub fn with_manual_mappings() -> Self {
        Self(MANUAL_MAPPINGS.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect())
    }

    pub fn insert(&mut self, name: &str, facility: &str) {
        self.0.insert(name.to_string(), facility.to_string());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Institution for a job's resource name.
    pub fn institution(&self, resource: Option<&str>) -> String {
        match resource.map(str::trim).filter(|r| !r.is_empty()) {
            None => "Unknown (resource name missing)".to_string(),
            Some(r) => match self.get(r) {
                Some(inst) => inst.to_string(),
                None => format!("Unmapped resource: {r}"),
            },
        }
    }
}

fn child<'a, 'i>(node: roxmltree::Node<'a, 'i>, tag: &str) -> Option<roxmltree::Node<'a, 'i>> {
    node.children().find(|c| c.has_tag_name(tag))
}

fn child_text<'a>(node: roxmltree::Node<'a, '_>, path: &[&str]) -> Option<&'a str> {
    let mut cur = node;
    for tag in path {
        cur = child(cur, tag)?;
    }
    cur.text().map(str::trim).filter(|t| !t.is_empty())
}

/// Build the map from summary XML.
///
/// Each facility maps to itself; its site, group and resources map to it.
/// Resource groups without a facility name are skipped.
pub fn parse_site_map(xml: &str) -> IoResult<SiteMap> {
    let doc = roxmltree::Document::parse(xml)?;
    let mut map = SiteMap::with_manual_mappings();

    for group in doc.root_element().children().filter(|n| n.is_element()) {
        let Some(facility) = child_text(group, &["Facility", "Name"]) else {
            tracing::warn!(tag = group.tag_name().name(), "resource group without a facility name");
            continue;
        };
        map.insert(facility, facility);
        if let Some(site) = child_text(group, &["Site", "Name"]) {
            map.insert(site, facility);
        }
        if let Some(name) = child_text(group, &["GroupName"]) {
            map.insert(name, facility);
        }
        if let Some(resources) = child(group, "Resources") {
            for res in resources.children().filter(|n| n.is_element()) {
                if let Some(name) = child_text(res, &["Name"]) {
                    map.insert(name, facility);
                }
            }
        }
    }
    Ok(map)
}

#[cfg(feature = "http")]
pub fn fetch_site_map(url: &str) -> IoResult<SiteMap> {
    tracing::info!(url, "downloading topology summary");
    let resp = reqwest::blocking::get(url)?.error_for_status()?;
    parse_site_map(&resp.text()?)
}

#[cfg(not(feature = "http"))]
pub fn fetch_site_map(url: &str) -> IoResult<SiteMap> {
    Err(IoError::Config(format!("cannot download {url}: built without the `http` feature")))
}

/// Cached map when fresh, else a refreshed one written back to the cache.
///
/// A failed refresh falls back to a stale cache when one exists.
pub fn load_site_map(cache_path: &Path, max_age: Duration, url: &str) -> IoResult<SiteMap> {
    load_with(cache_path, max_age, false, || fetch_site_map(url))
}

/// Same as [`load_site_map`] with an injectable fetcher; `force` skips the cache.
pub fn load_with<F>(cache_path: &Path, max_age: Duration, force: bool, fetch: F) -> IoResult<SiteMap>
where
    F: FnOnce() -> IoResult<SiteMap>,
{
    if !force && !is_stale(cache_path, max_age) {
        match read_json::<SiteMap>(cache_path) {
            Ok(map) => {
                tracing::debug!(path = %cache_path.display(), entries = map.len(), "site map cache hit");
                return Ok(map);
            }
            Err(e) => tracing::warn!(error = %e, "unreadable site map cache, refreshing"),
        }
    }

    match fetch() {
        Ok(map) => {
            write_json_atomic(cache_path, &map)?;
            tracing::info!(path = %cache_path.display(), entries = map.len(), "site map refreshed");
            Ok(map)
        }
        Err(e) if cache_path.exists() => {
            tracing::warn!(error = %e, path = %cache_path.display(), "site map refresh failed, using stale cache");
            read_json(cache_path)
        }
        Err(e) => Err(IoError::Network(format!("site map refresh failed and no cache exists: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ResourceSummary>
  <ResourceGroup>
    <GroupName>CHTC-Group</GroupName>
    <Facility><ID>1</ID><Name>University of Wisconsin</Name></Facility>
    <Site><ID>2</ID><Name>CHTC</Name></Site>
    <Resources>
      <Resource><Name>CHTC-ITB-SLURM-CE</Name></Resource>
      <Resource><Name>CHTC-Spark-CE1</Name></Resource>
    </Resources>
  </ResourceGroup>
  <ResourceGroup>
    <GroupName>Orphan</GroupName>
  </ResourceGroup>
</ResourceSummary>"#;

    #[test]
    fn facility_site_group_and_resources_map_to_facility() {
        let m = parse_site_map(XML).unwrap();
        for k in ["University of Wisconsin", "CHTC", "CHTC-Group", "CHTC-ITB-SLURM-CE", "CHTC-Spark-CE1"] {
            assert_eq!(m.get(k), Some("University of Wisconsin"), "{k}");
        }
        assert_eq!(m.get("Orphan"), None);
        assert_eq!(m.get("GPGrid"), Some("Fermi National Accelerator Laboratory"));
    }

    #[test]
    fn institution_fallbacks() {
        let m = parse_site_map(XML).unwrap();
        assert_eq!(m.institution(Some("CHTC")), "University of Wisconsin");
        assert_eq!(m.institution(None), "Unknown (resource name missing)");
        assert_eq!(m.institution(Some("  ")), "Unknown (resource name missing)");
        assert_eq!(m.institution(Some("Nowhere")), "Unmapped resource: Nowhere");
    }

    #[test]
    fn malformed_xml_is_an_error() {
        assert!(matches!(parse_site_map("<a><b></a>"), Err(IoError::Xml(_))));
    }

    #[test]
    fn fresh_cache_skips_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CACHE_FILE);
        write_json_atomic(&path, &SiteMap::with_manual_mappings()).unwrap();
        let m = load_with(&path, CACHE_MAX_AGE, false, || panic!("fetch called")).unwrap();
        assert_eq!(m.len(), MANUAL_MAPPINGS.len());
    }

    #[test]
    fn failed_refresh_uses_stale_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CACHE_FILE);
        write_json_atomic(&path, &SiteMap::with_manual_mappings()).unwrap();
        let m = load_with(&path, CACHE_MAX_AGE, true, || Err(IoError::Network("down".into()))).unwrap();
        assert_eq!(m.get("SURFsara"), Some("SURFsara"));
    }

    #[test]
    fn failed_refresh_without_cache_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CACHE_FILE);
        assert!(load_with(&path, CACHE_MAX_AGE, false, || Err(IoError::Network("down".into()))).is_err());
    }

    #[test]
    fn refresh_writes_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CACHE_FILE);
        load_with(&path, CACHE_MAX_AGE, false, || parse_site_map(XML)).unwrap();
        let back: SiteMap = read_json(&path).unwrap();
        assert_eq!(back.get("CHTC"), Some("University of Wisconsin"));
    }
}
