//! Built-in aggregation specs for the host and the attached workloads.
//!
//! The effective spec is the union of the host spec and the spec of every
//! workload scraper registered at startup.

use super::AggregationSpec;

const MYSQL_BUILD_NOISE_THREADS: &str = "validate_password_dictionary_file_last_parsed";
const MYSQL_BUILD_NOISE_HANDLER: &str = "innodb_buffer_pool_load_status";

const POSTGRES_USER_TABLES: &[&str] = &[
    "postgresql_pg_stat_user_tables_idx_scan",
    "postgresql_pg_stat_user_tables_n_tup_ins",
    "postgresql_pg_stat_user_tables_n_tup_upd",
    "postgresql_pg_stat_user_tables_seq_scan",
    "postgresql_pg_stat_user_tables_n_tup_del",
    "postgresql_pg_stat_user_tables_idx_tup_fetch",
    "postgresql_pg_stat_user_tables_seq_tup_read",
];

const MYSQL_IO_WAITS: &[&str] = &[
    "mysql_perf_schema_table_io_waits_total_fetch",
    "mysql_perf_schema_table_io_waits_total_update",
    "mysql_perf_schema_table_io_waits_total_delete",
    "mysql_perf_schema_table_io_waits_total_insert",
    "mysql_perf_schema_table_io_waits_seconds_total_fetch",
    "mysql_perf_schema_table_io_waits_seconds_total_update",
    "mysql_perf_schema_table_io_waits_seconds_total_delete",
    "mysql_perf_schema_table_io_waits_seconds_total_insert",
];

const MYSQL_THREADS: &[&str] = &[
    "mysql_threads_connected",
    "mysql_threads_created",
    "mysql_threads_running",
];

const MYSQL_HANDLER_READ: &[&str] = &[
    "mysql_handler_read_first",
    "mysql_handler_read_key",
    "mysql_handler_read_last",
    "mysql_handler_read_next",
    "mysql_handler_read_prev",
    "mysql_handler_read_rnd",
    "mysql_handler_read_rnd_next",
];

/// Host families are already emitted at the desired cardinality.
pub fn host_spec() -> AggregationSpec {
    AggregationSpec::new()
}

pub fn k8s_spec() -> AggregationSpec {
    AggregationSpec::new()
}

/// Managed databases: collapse per-table series into per-database ones and
/// strip labels that only carry server build noise.
pub fn dbaas_spec() -> AggregationSpec {
    let mut spec = AggregationSpec::new();
    for family in POSTGRES_USER_TABLES {
        spec = spec.with_drop(*family, ["table_name"]);
    }
    for family in MYSQL_IO_WAITS {
        spec = spec.with_drop(*family, ["name"]);
    }
    for family in MYSQL_THREADS {
        spec = spec.with_drop(*family, [MYSQL_BUILD_NOISE_THREADS]);
    }
    for family in MYSQL_HANDLER_READ {
        spec = spec.with_drop(*family, [MYSQL_BUILD_NOISE_HANDLER]);
    }
    spec
}
