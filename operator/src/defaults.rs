use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

pub fn default_node_count() -> i32 {
    1
}

pub fn default_instances_per_node() -> i32 {
    1
}

pub fn default_pvc_size() -> Quantity {
    Quantity("10Gi".to_owned())
}

pub fn default_backup_retention_days() -> i64 {
    30
}

pub fn default_stop_delay_seconds() -> i64 {
    30
}

pub fn default_log_level() -> String {
    "info".to_owned()
}

pub fn default_high_availability() -> bool {
    false
}

pub fn default_issuer_kind() -> String {
    "Issuer".to_owned()
}

pub fn default_issuer_group() -> String {
    "cert-manager.io".to_owned()
}
