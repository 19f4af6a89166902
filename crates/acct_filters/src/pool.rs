//! OSPool membership of a job.

use std::collections::BTreeSet;

use acct_core::{JobAd, UNKNOWN};
use acct_io::collectors::{is_ospool_collector, CollectorHostMap, CollectorLookup};
use acct_io::IoResult;

/// Decides whether a job ran in the OSPool.
///
/// `LastRemotePool` wins when set; otherwise the collectors the job's schedd
/// reports to are consulted.
pub struct PoolMembership {
    collectors: CollectorHostMap,
    lookup: Option<Box<dyn CollectorLookup>>,
}

impl Default for PoolMembership {
    /// Built-in mappings only, never queries a collector.
    fn default() -> Self {
        Self::new(CollectorHostMap::with_custom_mappings(), None)
    }
}

impl PoolMembership {
    pub fn new(collectors: CollectorHostMap, lookup: Option<Box<dyn CollectorLookup>>) -> Self {
        Self { collectors, lookup }
    }

    fn pools_for(&mut self, ad: &JobAd) -> BTreeSet<String> {
        if let Some(pool) = ad.last_remote_pool.as_deref().filter(|p| !p.trim().is_empty()) {
            return BTreeSet::from([pool.to_string()]);
        }
        match ad.schedd_name.as_deref() {
            Some(schedd) if !schedd.is_empty() && schedd != UNKNOWN => {
                self.collectors.hosts_for(schedd, self.lookup.as_deref())
            }
            _ => BTreeSet::new(),
        }
    }

    pub fn is_ospool_job(&mut self, ad: &JobAd) -> bool {
        self.pools_for(ad).iter().any(|h| is_ospool_collector(h))
    }

    /// Persist lookups made during the scan.
    pub fn save(&self) -> IoResult<()> {
        self.collectors.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_remote_pool_wins() {
        let mut p = PoolMembership::default();
        let ad = JobAd {
            last_remote_pool: Some("cm-2.ospool.osg-htc.org".into()),
            schedd_name: Some("submit6.chtc.wisc.edu".into()),
            ..JobAd::default()
        };
        assert!(p.is_ospool_job(&ad));

        let other = JobAd { last_remote_pool: Some("cm.chtc.wisc.edu".into()), ..ad };
        assert!(!p.is_ospool_job(&other));
    }

    #[test]
    fn schedd_collectors_are_consulted() {
        let mut p = PoolMembership::default();
        let ospool = JobAd { schedd_name: Some("login.collab.ci-connect.net".into()), ..JobAd::default() };
        assert!(p.is_ospool_job(&ospool));

        let path = JobAd { schedd_name: Some("submit6.chtc.wisc.edu".into()), ..JobAd::default() };
        assert!(!p.is_ospool_job(&path));

        assert!(!p.is_ospool_job(&JobAd::default()));
    }
}
