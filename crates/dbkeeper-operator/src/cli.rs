//! Command-line interface

use clap::{Args, Parser, Subcommand};

use dbkeeper_backup::job::{DEFAULT_IMAGE_REGISTRY, DEFAULT_IMAGE_TAG};
use dbkeeper_backup::ImageCatalog;

/// dbkeeper - scheduled database backups as Kubernetes Jobs
#[derive(Parser, Debug)]
#[command(name = "dbkeeper", version, about, long_about = None)]
pub struct Cli {
    /// Print the DatabaseBackup CRD as YAML and exit
    #[arg(long)]
    pub crd: bool,

    /// Subcommand to run (defaults to controller)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the backup controller (default)
    Controller(ControllerArgs),
}

/// Controller settings
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct ControllerArgs {
    /// Registry prefix for backup images
    #[arg(long, env = "DBKEEPER_IMAGE_REGISTRY", default_value = DEFAULT_IMAGE_REGISTRY)]
    pub image_registry: String,

    /// Tag for backup images
    #[arg(long, env = "DBKEEPER_IMAGE_TAG", default_value = DEFAULT_IMAGE_TAG)]
    pub image_tag: String,

    /// Only watch this namespace (default: all namespaces)
    #[arg(long, env = "DBKEEPER_NAMESPACE")]
    pub namespace: Option<String>,

    /// Do not install or update the CRD on startup
    #[arg(long, env = "DBKEEPER_SKIP_CRD_INSTALL")]
    pub skip_crd_install: bool,
}

impl Default for ControllerArgs {
    fn default() -> Self {
        Self {
            image_registry: DEFAULT_IMAGE_REGISTRY.to_string(),
            image_tag: DEFAULT_IMAGE_TAG.to_string(),
            namespace: None,
            skip_crd_install: false,
        }
    }
}

impl ControllerArgs {
    /// Image catalog for these settings
    pub fn images(&self) -> ImageCatalog {
        ImageCatalog::new(&self.image_registry, &self.image_tag)
    }
}

impl Cli {
    /// The controller settings, defaulting when no subcommand was given
    pub fn controller_args(&self) -> ControllerArgs {
        match &self.command {
            Some(Command::Controller(args)) => args.clone(),
            None => ControllerArgs::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_runs_controller_with_defaults() {
        let cli = Cli::try_parse_from(["dbkeeper"]).unwrap();
        assert!(!cli.crd);
        assert_eq!(cli.controller_args(), ControllerArgs::default());
    }

    #[test]
    fn crd_flag() {
        let cli = Cli::try_parse_from(["dbkeeper", "--crd"]).unwrap();
        assert!(cli.crd);
    }

    #[test]
    fn controller_flags() {
        let cli = Cli::try_parse_from([
            "dbkeeper",
            "controller",
            "--image-registry",
            "registry.internal/backup",
            "--image-tag",
            "v2.0.1",
            "--namespace",
            "databases",
            "--skip-crd-install",
        ])
        .unwrap();

        let args = cli.controller_args();
        assert_eq!(args.namespace.as_deref(), Some("databases"));
        assert!(args.skip_crd_install);
        assert_eq!(
            args.images(),
            ImageCatalog::new("registry.internal/backup", "v2.0.1")
        );
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
