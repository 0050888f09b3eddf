use kube::CustomResourceExt;
use operator::apis::{
    backup_types::Backup, documentdb_types::DocumentDB, scheduledbackup_types::ScheduledBackup,
};

fn print_crd(mut crd: k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition) {
    if crd.metadata.annotations.is_none() {
        crd.metadata.annotations = Some(Default::default());
    }
    if let Some(annotations) = crd.metadata.annotations.as_mut() {
        annotations.insert("helm.sh/resource-policy".to_string(), "keep".to_string());
    }
    println!("{}", serde_yaml::to_string(&crd).unwrap());
    println!("---");
}

fn main() {
    print_crd(DocumentDB::crd());
    print_crd(Backup::crd());
    print_crd(ScheduledBackup::crd());
}
