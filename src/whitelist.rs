//! Family whitelists for the workload scrapers.

use ahash::AHashSet as HashSet;

pub const K8S: &[&str] = &[
    "kube_deployment_spec_replicas",
    "kube_deployment_status_replicas_available",
    "kube_deployment_status_replicas_unavailable",
    "kube_daemonset_status_desired_number_scheduled",
    "kube_daemonset_status_number_available",
    "kube_daemonset_status_number_unavailable",
    "kube_statefulset_replicas",
    "kube_statefulset_status_replicas_ready",
    "kube_node_status_allocatable",
    "kube_node_status_capacity",
];

pub const DBAAS: &[&str] = &[
    "postgresql_pg_stat_activity_conn_count",
    "postgresql_pg_stat_database_blks_hit",
    "postgresql_pg_stat_database_blks_read",
    "postgresql_pg_stat_database_deadlocks",
    "postgresql_pg_stat_replication_bytes_diff",
    "postgresql_pg_stat_user_tables_idx_scan",
    "postgresql_pg_stat_user_tables_n_tup_ins",
    "postgresql_pg_stat_user_tables_n_tup_upd",
    "postgresql_pg_stat_user_tables_seq_scan",
    "postgresql_pg_stat_user_tables_n_tup_del",
    "postgresql_pg_stat_user_tables_idx_tup_fetch",
    "postgresql_pg_stat_user_tables_seq_tup_read",
    "mysql_threads_created",
    "mysql_threads_connected",
    "mysql_threads_running",
    "mysql_handler_read_key",
    "mysql_handler_read_first",
    "mysql_handler_read_next",
    "mysql_handler_read_prev",
    "mysql_handler_read_last",
    "mysql_handler_read_rnd",
    "mysql_handler_read_rnd_next",
    "mysql_com_select",
    "mysql_com_insert",
    "mysql_com_update",
    "mysql_com_delete",
    "mysql_perf_schema_table_io_waits_total_fetch",
    "mysql_perf_schema_table_io_waits_total_insert",
    "mysql_perf_schema_table_io_waits_total_update",
    "mysql_perf_schema_table_io_waits_total_delete",
    "mysql_perf_schema_table_io_waits_seconds_total_fetch",
    "mysql_perf_schema_table_io_waits_seconds_total_insert",
    "mysql_perf_schema_table_io_waits_seconds_total_update",
    "mysql_perf_schema_table_io_waits_seconds_total_delete",
];

/// A set of permitted family names. Empty means everything passes.
#[derive(Debug, Clone, Default)]
pub struct Whitelist {
    names: HashSet<String>,
}

impl Whitelist {
    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn k8s() -> Self {
        Self::from_names(K8S)
    }

    pub fn dbaas() -> Self {
        Self::from_names(DBAAS)
    }

    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Self {
        Self {
            names: names.iter().map(|n| n.as_ref().to_string()).collect(),
        }
    }

    pub fn allows(&self, family: &str) -> bool {
        self.names.is_empty() || self.names.contains(family)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_whitelist_allows_everything() {
        assert!(Whitelist::allow_all().allows("anything"));
    }

    #[test]
    fn test_k8s_whitelist_filters() {
        let wl = Whitelist::k8s();
        assert_eq!(wl.len(), 10);
        assert!(wl.allows("kube_node_status_capacity"));
        assert!(!wl.allows("kube_pod_info"));
    }

    #[test]
    fn test_dbaas_whitelist_covers_aggregated_families() {
        let wl = Whitelist::dbaas();
        let spec = crate::aggregate::dbaas_spec();
        for family in DBAAS {
            assert!(wl.allows(family));
        }
        assert!(wl.allows("mysql_perf_schema_table_io_waits_total_fetch"));
        assert!(spec
            .drops_for("mysql_perf_schema_table_io_waits_total_fetch")
            .is_some());
    }
}
