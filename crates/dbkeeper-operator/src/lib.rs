//! dbkeeper operator
//!
//! CLI definition, CRD rendering and controller wiring for the `dbkeeper`
//! binary.

#![deny(missing_docs)]

pub mod cli;
pub mod controller_runner;

use kube::CustomResourceExt;

use dbkeeper_common::crd::DatabaseBackup;
use dbkeeper_common::Error;

/// Render the DatabaseBackup CRD as YAML
pub fn render_crd() -> Result<String, Error> {
    serde_yaml::to_string(&DatabaseBackup::crd())
        .map_err(|e| Error::serialization_for_kind("CustomResourceDefinition", e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crd_yaml_describes_database_backups() {
        let yaml = render_crd().unwrap();
        let crd: serde_json::Value = serde_yaml::from_str(&yaml).unwrap();

        assert_eq!(crd["metadata"]["name"], "databasebackups.dbkeeper.dev");
        assert_eq!(crd["spec"]["group"], "dbkeeper.dev");
        assert_eq!(crd["spec"]["scope"], "Namespaced");
        assert_eq!(crd["spec"]["names"]["kind"], "DatabaseBackup");
        assert_eq!(crd["spec"]["names"]["shortNames"][0], "dbb");

        let version = &crd["spec"]["versions"][0];
        assert_eq!(version["name"], "v1alpha1");
        assert!(version["subresources"]["status"].is_object());
        let columns: Vec<_> = version["additionalPrinterColumns"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["name"].as_str().unwrap())
            .collect();
        assert_eq!(
            columns,
            ["Database", "Schedule", "Last Backup", "Status", "Age"]
        );
    }
}
