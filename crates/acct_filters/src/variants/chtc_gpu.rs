//! CHTC GPU usage report: jobs that requested at least one GPU.

use std::collections::BTreeMap;

use acct_core::job::GroupField;
use acct_core::{AggTable, ColumnSet, JobAd, Table, TimeWindow};
use acct_io::query::{bool_filter, range, range_gt, search_body};
use acct_io::search::ScanQuery;

use super::osg_cpu::table_columns;
use crate::usage::{add_group_extras, campus_site, distinct, final_attempt_row, usage_row, UsageOptions};
use crate::{merge_grouped, FilterError, FilterKind, GroupedAds, ReportFilter};

const SORT_COLUMN: &str = "All CPU Hours";
const FINAL_ATTEMPT_COLUMN: &str = "Final Exec Att CPU Hours";

const SITE_DROPPED: [u32; 27] = [
    30, 35, 45, 50, 51, 52, 53, 54, 55, 56, 57, 70, 80, 180, 181, 190, 191, 300, 303, 305, 307, 310, 320, 330,
    340, 350, 390,
];

fn default_columns() -> ColumnSet {
    ColumnSet::from([
        (10, "Num Uniq Job Ids"),
        (20, "All CPU Hours"),
        (25, "All GPU Hours"),
        (30, "% Good CPU Hours"),
        (35, "% Good GPU Hours"),
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
        (303, "Good GPU Hours"),
        (305, "CPU Hours / Bad Exec Att"),
        (307, "GPU Hours / Bad Exec Att"),
        (310, "Num Exec Atts"),
        (320, "Num Shadw Starts"),
        (330, "Num Rm'd Jobs"),
        (340, "Num DAG Node Jobs"),
        (350, "Num Jobs w/>1 Exec Att"),
        (360, "Num Short Jobs"),
        (390, "Num Ckpt Able Jobs"),
        (500, "Max Rqst Mem MB"),
        (510, "Med Used Mem MB"),
        (520, "Max Used Mem MB"),
        (525, "Max Rqst Disk GB"),
        (527, "Max Used Disk GB"),
        (530, "Max Rqst Cpus"),
        (540, "Max Rqst Gpus"),
    ])
}

#[derive(Default)]
pub struct ChtcGpuFilter {
    data: GroupedAds,
}

impl ChtcGpuFilter {
    pub fn new() -> Self {
        Self::default()
    }

    fn columns(table: AggTable) -> ColumnSet {
        let mut cols = table_columns(default_columns(), table);
        if table == AggTable::Site {
            cols.insert(5, "Num Users").remove_keys(&SITE_DROPPED);
        }
        cols
    }
}

impl ReportFilter for ChtcGpuFilter {
    fn name(&self) -> &'static str {
        "CHTC GPU schedd job history"
    }

    fn kind(&self) -> FilterKind {
        FilterKind::ChtcGpu
    }

    fn query(&self, window: &TimeWindow) -> ScanQuery {
        let q = bool_filter(
            vec![range("RecordTime", window.start_ts, window.end_ts), range_gt("RequestGpus", 0)],
            vec![],
        );
        ScanQuery::new(search_body(q, None))
    }

    fn accept(&mut self, ad: &JobAd) {
        let mut memberships = vec![
            (AggTable::Schedds, ad.group_key(GroupField::Schedd)),
            (AggTable::Users, ad.group_key(GroupField::User)),
            (AggTable::Projects, ad.group_key(GroupField::Project)),
        ];
        if !ad.is_removed() && !ad.has_no_shadow() {
            memberships.push((AggTable::Site, campus_site(ad)));
        }
        self.data.add(ad, memberships);
    }

    fn tables(&self) -> Vec<AggTable> {
        vec![AggTable::Projects, AggTable::Users, AggTable::Schedds, AggTable::Site]
    }

    fn merge(&self, table: AggTable) -> Result<Table, FilterError> {
        if !self.tables().contains(&table) {
            return Err(FilterError::NoSuchTable { filter: self.name(), table });
        }
        let groups = self.data.groups(table);
        let cols = Self::columns(table);

        if table == AggTable::Site {
            let mut t = merge_grouped(table, groups, &cols, Some(SORT_COLUMN), true, |_, ads| {
                let mut row = final_attempt_row(ads, UsageOptions::GPU);
                row.set("Num Users", distinct(ads.iter().map(|a| a.user.as_deref())));
                row
            });
            t.rename_column("All CPU Hours", FINAL_ATTEMPT_COLUMN);
            return Ok(t);
        }
        Ok(merge_grouped(table, groups, &cols, Some(SORT_COLUMN), true, |_, ads| {
            let mut row = usage_row(ads, UsageOptions::GPU);
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use acct_core::{Cell, ReportPeriod};
    use assert_json_diff::assert_json_eq;
    use serde_json::json;

    fn ad(v: serde_json::Value) -> JobAd {
        JobAd::from_value(&v).unwrap()
    }

    #[test]
    fn query_requires_gpus() {
        let q = ChtcGpuFilter::new().query(&TimeWindow::new(10, 20, ReportPeriod::Daily));
        assert_json_eq!(
            q.body,
            json!({"query": {"bool": {"filter": [
                {"range": {"RecordTime": {"gte": 10, "lt": 20}}},
                {"range": {"RequestGpus": {"gt": 0}}}
            ]}}})
        );
    }

    #[test]
    fn site_table_groups_off_campus_by_schedd() {
        let mut f = ChtcGpuFilter::new();
        let base = json!({
            "User": "u", "ScheddName": "ap2001.chtc.wisc.edu", "RequestCpus": 1, "RequestGpus": 2,
            "RemoteWallClockTime": 7200, "CommittedTime": 3600,
        });
        let mut on = base.clone();
        on["LastRemoteHost"] = json!("slot1@gpu1.chtc.wisc.edu");
        let mut off = base.clone();
        off["LastRemoteHost"] = json!("slot1@node.example.org");
        let mut removed = base;
        removed["JobStatus"] = json!(3);

        f.accept(&ad(on));
        f.accept(&ad(off));
        f.accept(&ad(removed));

        let counts = f.group_counts();
        assert_eq!(counts[&AggTable::Site].len(), 2);
        assert_eq!(counts[&AggTable::Site]["OSG via ap2001.chtc.wisc.edu"], 1);
        assert_eq!(counts[&AggTable::Users]["u"], 3);

        let site = f.merge(AggTable::Site).unwrap();
        assert_eq!(site.header[1], "Num Users");
        assert!(site.header.contains(&FINAL_ATTEMPT_COLUMN.to_string()));
        assert!(site.header.contains(&"All GPU Hours".to_string()));
        assert!(!site.header.contains(&"Good GPU Hours".to_string()));
        assert_eq!(site.cell(0, FINAL_ATTEMPT_COLUMN), Some(&Cell::Float(2.0)));
        assert_eq!(site.cell(0, "All GPU Hours"), Some(&Cell::Float(4.0)));

        let users = f.merge(AggTable::Users).unwrap();
        assert_eq!(users.cell(0, "All GPU Hours"), Some(&Cell::Float(12.0)));
        assert_eq!(users.cell(0, "Max Rqst Gpus"), Some(&Cell::Int(2)));
    }
}
