//! OSPool CPU usage report: per project, user, access point and institution.

use std::collections::BTreeMap;

use acct_core::job::GroupField;
use acct_core::{AggTable, ColumnSet, JobAd, Table, TimeWindow};
use acct_io::query::{range, search_body};
use acct_io::search::ScanQuery;
use acct_io::topology::SiteMap;

use crate::usage::{add_group_extras, distinct, final_attempt_row, usage_row, UsageOptions};
use crate::{merge_grouped, FilterError, FilterKind, GroupedAds, PoolMembership, ReportFilter, Row};

const SORT_COLUMN: &str = "Num Uniq Job Ids";

/// Institution rows only count a job's final execution attempt.
const FINAL_ATTEMPT_COLUMN: &str = "Final Exec Att CPU Hours";

const INSTITUTION_DROPPED: [u32; 30] = [
    30, 45, 50, 51, 52, 53, 54, 55, 56, 57, 70, 80, 180, 181, 182, 190, 191, 192, 300, 305, 310, 320, 325,
    330, 340, 350, 355, 370, 380, 390,
];

pub(crate) fn default_columns() -> ColumnSet {
    ColumnSet::from([
        (10, "Num Uniq Job Ids"),
        (20, "All CPU Hours"),
        (30, "% Good CPU Hours"),
        (45, "% Ckpt Able"),
        (50, "% Rm'd Jobs"),
        (51, "Total Files Xferd"),
        (52, "OSDF Files Xferd"),
        (53, "% OSDF Files"),
        (54, "% OSDF Bytes"),
        (55, "Shadw Starts / Job Id"),
        (56, "Exec Atts / Shadw Start"),
        (57, "Holds / Job Id"),
        (60, "% Short Jobs"),
        (70, "% Jobs w/>1 Exec Att"),
        (80, "% Jobs w/1+ Holds"),
        (81, "% Jobs Over Rqst Disk"),
        (82, "% Jobs using S'ty"),
        (100, "Mean Actv Hrs"),
        (105, "Mean Setup Secs"),
        (110, "Min Hrs"),
        (120, "25% Hrs"),
        (130, "Med Hrs"),
        (140, "75% Hrs"),
        (145, "95% Hrs"),
        (150, "Max Hrs"),
        (160, "Mean Hrs"),
        (170, "Std Hrs"),
        (180, "Input Files / Exec Att"),
        (190, "Output Files / Job"),
        (300, "Good CPU Hours"),
        (305, "CPU Hours / Bad Exec Att"),
        (310, "Num Exec Atts"),
        (320, "Num Shadw Starts"),
        (325, "Num Job Holds"),
        (330, "Num Rm'd Jobs"),
        (340, "Num DAG Node Jobs"),
        (350, "Num Jobs w/>1 Exec Att"),
        (355, "Num Jobs w/1+ Holds"),
        (357, "Num Jobs Over Rqst Disk"),
        (360, "Num Short Jobs"),
        (370, "Num Local Univ Jobs"),
        (380, "Num Sched Univ Jobs"),
        (390, "Num Ckpt Able Jobs"),
        (400, "Num S'ty Jobs"),
        (500, "Max Rqst Mem MB"),
        (510, "Med Used Mem MB"),
        (520, "Max Used Mem MB"),
        (525, "Max Rqst Disk GB"),
        (527, "Max Used Disk GB"),
        (530, "Max Rqst Cpus"),
    ])
}

/// Columns of one table, extras included.
pub(crate) fn table_columns(mut cols: ColumnSet, table: AggTable) -> ColumnSet {
    match table {
        AggTable::Users => {
            cols.insert(5, "Most Used Project").insert(175, "Most Used Schedd");
        }
        AggTable::Projects => {
            cols.insert(5, "Num Users");
        }
        _ => {}
    }
    cols
}

fn institution_row(ads: &[&JobAd]) -> Row {
    let mut row = final_attempt_row(ads, UsageOptions::CPU);
    row.set("Num Sites", distinct(ads.iter().map(|a| a.resource_name())));
    row.set("Num Users", distinct(ads.iter().map(|a| a.user.as_deref())));
    row
}

pub struct OsgCpuFilter {
    pool: PoolMembership,
    site_map: SiteMap,
    data: GroupedAds,
}

impl OsgCpuFilter {
    pub fn new(pool: PoolMembership, site_map: SiteMap) -> Self {
        Self { pool, site_map, data: GroupedAds::new() }
    }

    fn columns(&self, table: AggTable) -> ColumnSet {
        let mut cols = table_columns(default_columns(), table);
        if table == AggTable::Institution {
            cols.insert(4, "Num Sites").insert(5, "Num Users").remove_keys(&INSTITUTION_DROPPED);
        }
        cols
    }
}

impl ReportFilter for OsgCpuFilter {
    fn name(&self) -> &'static str {
        "OSG schedd job history"
    }

    fn kind(&self) -> FilterKind {
        FilterKind::OsgCpu
    }

    fn query(&self, window: &TimeWindow) -> ScanQuery {
        ScanQuery::new(search_body(range("RecordTime", window.start_ts, window.end_ts), None))
    }

    fn accept(&mut self, ad: &JobAd) {
        if !self.pool.is_ospool_job(ad) {
            return;
        }
        let mut memberships = vec![
            (AggTable::Schedds, ad.group_key(GroupField::Schedd)),
            (AggTable::Users, ad.group_key(GroupField::User)),
            (AggTable::Projects, ad.group_key(GroupField::Project)),
        ];
        if !ad.is_removed() && !ad.has_no_shadow() {
            memberships.push((AggTable::Institution, self.site_map.institution(ad.resource_name())));
        }
        self.data.add(ad, memberships);
    }

    fn tables(&self) -> Vec<AggTable> {
        vec![AggTable::Projects, AggTable::Users, AggTable::Schedds, AggTable::Institution]
    }

    fn merge(&self, table: AggTable) -> Result<Table, FilterError> {
        if !self.tables().contains(&table) {
            return Err(FilterError::NoSuchTable { filter: self.name(), table });
        }
        let groups = self.data.groups(table);
        let cols = self.columns(table);

        if table == AggTable::Institution {
            let mut t = merge_grouped(table, groups, &cols, Some(SORT_COLUMN), true, |_, ads| institution_row(ads));
            t.rename_column("All CPU Hours", FINAL_ATTEMPT_COLUMN);
            return Ok(t);
        }
        Ok(merge_grouped(table, groups, &cols, Some(SORT_COLUMN), true, |_, ads| {
            let mut row = usage_row(ads, UsageOptions::CPU);
            add_group_extras(table, ads, &mut row);
            row
        }))
    }

    fn sort_column(&self) -> Option<&'static str> {
        Some(SORT_COLUMN)
    }

    fn group_counts(&self) -> BTreeMap<AggTable, BTreeMap<String, usize>> {
        self.data.counts()
    }

    fn finish(&mut self) -> Result<(), FilterError> {
        self.pool.save()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use acct_core::{Cell, TOTAL};
    use serde_json::json;

    const OSPOOL: &str = "cm-1.ospool.osg-htc.org";

    fn ad(v: serde_json::Value) -> JobAd {
        JobAd::from_value(&v).unwrap()
    }

    fn filter() -> OsgCpuFilter {
        let mut sites = SiteMap::default();
        sites.insert("UW_SITE", "University of Wisconsin");
        OsgCpuFilter::new(PoolMembership::default(), sites)
    }

    #[test]
    fn non_ospool_jobs_are_dropped() {
        let mut f = filter();
        f.accept(&ad(json!({"User": "a", "LastRemotePool": "cm.chtc.wisc.edu"})));
        assert!(f.group_counts().is_empty());
    }

    #[test]
    fn tables_and_headers() {
        let mut f = filter();
        f.accept(&ad(json!({
            "User": "alice", "ProjectName": "P", "ScheddName": "ap1", "LastRemotePool": OSPOOL,
            "MachineAttrGLIDEIN_ResourceName0": "UW_SITE", "RequestCpus": 1,
            "RemoteWallClockTime": 7200, "CommittedTime": 3600,
        })));
        f.accept(&ad(json!({
            "User": "bob", "ProjectName": "P", "ScheddName": "ap1", "LastRemotePool": OSPOOL,
            "JobStatus": 3, "RequestCpus": 1, "RemoteWallClockTime": 60,
        })));

        let users = f.merge(AggTable::Users).unwrap();
        assert_eq!(&users.header[..3], &["User", "Most Used Project", "Num Uniq Job Ids"]);
        assert!(users.header.contains(&"Most Used Schedd".to_string()));
        assert_eq!(users.rows.len(), 3);
        assert_eq!(users.rows[0][0], Cell::text(TOTAL));

        let projects = f.merge(AggTable::Projects).unwrap();
        assert_eq!(projects.header[1], "Num Users");
        assert_eq!(projects.cell(1, "Num Users"), Some(&Cell::Int(2)));
        assert_eq!(projects.cell(1, "Num Rm'd Jobs"), Some(&Cell::Int(1)));

        let inst = f.merge(AggTable::Institution).unwrap();
        assert_eq!(&inst.header[..4], &["Institution", "Num Sites", "Num Users", "Num Uniq Job Ids"]);
        assert!(inst.header.contains(&FINAL_ATTEMPT_COLUMN.to_string()));
        assert!(!inst.header.contains(&"% Good CPU Hours".to_string()));
        // removed job left out; hours are committed time only
        assert_eq!(inst.cell(1, "Institution"), Some(&Cell::text("University of Wisconsin")));
        assert_eq!(inst.cell(1, FINAL_ATTEMPT_COLUMN), Some(&Cell::Float(1.0)));
    }

    #[test]
    fn unmapped_resources_are_labelled() {
        let mut f = filter();
        f.accept(&ad(json!({"LastRemotePool": OSPOOL, "MATCH_EXP_JOBGLIDEIN_ResourceName": "Elsewhere"})));
        f.accept(&ad(json!({"LastRemotePool": OSPOOL})));
        let counts = f.group_counts();
        let inst = &counts[&AggTable::Institution];
        assert_eq!(inst["Unmapped resource: Elsewhere"], 1);
        assert_eq!(inst["Unknown (resource name missing)"], 1);
    }

    #[test]
    fn site_table_is_not_produced() {
        assert!(matches!(filter().merge(AggTable::Site), Err(FilterError::NoSuchTable { .. })));
    }
}
