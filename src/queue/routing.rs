//! Forced placement of attributes on cluster or process records.

use jobsub_ad::{attrs, Ad};

/// Where an attribute must live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Only on the cluster record.
    ClusterOnly,
    /// Only on process records.
    ProcOnly,
    /// On process records, sent before anything else.
    ProcSentFirst,
    /// On the cluster record, sent before anything else.
    ClusterSentFirst,
}

impl Route {
    pub fn is_proc(&self) -> bool {
        matches!(self, Self::ProcOnly | Self::ProcSentFirst)
    }
}

const ROUTES: &[(&str, Route)] = &[
    (attrs::OWNER, Route::ClusterSentFirst),
    (attrs::CLUSTER_ID, Route::ClusterSentFirst),
    (attrs::JOB_UNIVERSE, Route::ClusterOnly),
    (attrs::Q_DATE, Route::ClusterOnly),
    (attrs::USER, Route::ClusterOnly),
    (attrs::PROC_ID, Route::ProcSentFirst),
    (attrs::JOB_STATUS, Route::ProcOnly),
    (attrs::HOLD_REASON, Route::ProcOnly),
    (attrs::HOLD_REASON_CODE, Route::ProcOnly),
    (attrs::ENTERED_CURRENT_STATUS, Route::ProcOnly),
];

/// Forced route for `name`, if it has one.
pub fn route_of(name: &str) -> Option<Route> {
    ROUTES
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, r)| *r)
}

/// A job record split for transmission.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedAd {
    /// Cluster record to send before the first process, if this is one.
    pub cluster: Option<Ad>,
    pub proc: Ad,
}

/// Split a complete job record into what goes to the cluster record and
/// what goes to the process record.
///
/// With no `cluster` record yet, everything that is not process-routed goes
/// to a new cluster record. Otherwise the process record carries the
/// process-routed attributes plus whatever differs from `cluster`.
pub fn route_job_ad(ad: &Ad, cluster: Option<&Ad>) -> RoutedAd {
    let mut first_proc = Ad::new();
    let mut rest_proc = Ad::new();
    let mut first_cluster = Ad::new();
    let mut rest_cluster = Ad::new();

    for (name, expr) in ad.iter() {
        match route_of(name) {
            Some(Route::ProcSentFirst) => first_proc.insert(name, expr.clone()),
            Some(Route::ProcOnly) => rest_proc.insert(name, expr.clone()),
            Some(Route::ClusterSentFirst) => first_cluster.insert(name, expr.clone()),
            Some(Route::ClusterOnly) => rest_cluster.insert(name, expr.clone()),
            None => match cluster {
                None => rest_cluster.insert(name, expr.clone()),
                Some(parent) => {
                    if parent.get(name) != Some(expr) {
                        rest_proc.insert(name, expr.clone());
                    }
                }
            },
        }
    }

    first_proc.update(&rest_proc);
    let cluster = match cluster {
        None => {
            first_cluster.update(&rest_cluster);
            Some(first_cluster)
        }
        Some(_) => None,
    };
    RoutedAd {
        cluster,
        proc: first_proc,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobsub_ad::Chained;

    fn job(proc_id: i64, args: &str) -> Ad {
        let mut ad = Ad::new();
        ad.insert_value("JobStatus", 1);
        ad.insert_value("Cmd", "/bin/echo");
        ad.insert_value("ProcId", proc_id);
        ad.insert_value("Args", args);
        ad.insert_value("Owner", "alice");
        ad.insert_value("ClusterId", 3);
        ad.insert_value("JobUniverse", 5);
        ad.insert_value("QDate", 100);
        ad
    }

    #[test]
    fn test_route_lookup_is_case_insensitive() {
        assert_eq!(route_of("owner"), Some(Route::ClusterSentFirst));
        assert_eq!(route_of("PROCID"), Some(Route::ProcSentFirst));
        assert_eq!(route_of("Cmd"), None);
    }

    #[test]
    fn test_first_proc_builds_cluster_record() {
        let routed = route_job_ad(&job(0, "a"), None);
        let cluster = routed.cluster.unwrap();
        let names: Vec<_> = cluster.names().collect();
        assert_eq!(names, vec!["Owner", "ClusterId", "Cmd", "Args", "JobUniverse", "QDate"]);

        let proc_names: Vec<_> = routed.proc.names().collect();
        assert_eq!(proc_names, vec!["ProcId", "JobStatus"]);
    }

    #[test]
    fn test_later_proc_sends_only_differences() {
        let cluster = route_job_ad(&job(0, "a"), None).cluster.unwrap();
        let routed = route_job_ad(&job(1, "b"), Some(&cluster));
        assert!(routed.cluster.is_none());
        let names: Vec<_> = routed.proc.names().collect();
        assert_eq!(names, vec!["ProcId", "JobStatus", "Args"]);

        let same = route_job_ad(&job(2, "a"), Some(&cluster));
        let names: Vec<_> = same.proc.names().collect();
        assert_eq!(names, vec!["ProcId", "JobStatus"]);
    }

    #[test]
    fn test_chained_view_matches_original() {
        let original = job(1, "b");
        let cluster = route_job_ad(&job(0, "a"), None).cluster.unwrap();
        let routed = route_job_ad(&original, Some(&cluster));
        let merged = Chained::new(&routed.proc, Some(&cluster));
        for (name, _) in original.iter() {
            assert_eq!(merged.eval_attr(name), original.eval_attr(name), "{}", name);
        }
    }
}
