//! Command line options of the operator. Every option can also be set from
//! the environment.
use clap::{Args, Parser, ValueEnum};

use crate::{controller::OperatorConfig, namespace::WatchNamespace};

#[derive(Debug, PartialEq, Eq, Parser)]
pub enum Command<Run: Args = RunArguments> {
    /// Print the Backstage CustomResourceDefinition.
    Crd,

    /// Run the operator.
    Run(Run),
}

#[derive(Debug, PartialEq, Eq, Parser)]
#[command(long_about = "")]
pub struct RunArguments {
    /// Namespace to watch, all namespaces if empty.
    #[arg(long, env, default_value = "")]
    pub watch_namespace: WatchNamespace,

    /// Set the Backstage as controller owner of its runtime objects and
    /// reconcile when they change.
    #[arg(long, env, default_value_t = true, action = clap::ArgAction::Set)]
    pub owns_runtime: bool,

    /// Value of the ext-config-sync label put on referenced ConfigMaps and Secrets.
    #[arg(long, env = "EXT_CONF_SYNC_BACKSTAGE", default_value_t = true, action = clap::ArgAction::Set)]
    pub auto_sync: bool,

    /// Overrides the image of the Backstage container.
    #[arg(long, env = "RELATED_IMAGE_BACKSTAGE")]
    pub backstage_image: Option<String>,

    /// Overrides the image of the local PostgreSQL container.
    #[arg(long, env = "RELATED_IMAGE_POSTGRESQL")]
    pub postgresql_image: Option<String>,

    #[arg(long, env, value_enum, default_value_t = Platform::Auto)]
    pub platform: Platform,
}

/// The cluster flavour, which decides whether a Route is managed.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum Platform {
    /// Detect OpenShift from the API groups the cluster serves.
    #[default]
    Auto,
    Kubernetes,
    Openshift,
}

impl RunArguments {
    /// The operator config, once it is known whether the cluster is OpenShift.
    pub fn operator_config(&self, is_openshift: bool) -> OperatorConfig {
        OperatorConfig {
            owns_runtime: self.owns_runtime,
            auto_sync: self.auto_sync,
            backstage_image: self.backstage_image.clone(),
            postgresql_image: self.postgresql_image.clone(),
            is_openshift,
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;
    use rstest::rstest;

    use super::*;

    #[derive(Debug, Parser)]
    struct Opts {
        #[clap(subcommand)]
        command: Command,
    }

    fn run_arguments(args: &[&str]) -> RunArguments {
        let opts = Opts::try_parse_from(["backstage-operator", "run"].iter().chain(args))
            .expect("arguments are valid");
        match opts.command {
            Command::Run(run) => Some(run),
            Command::Crd => None,
        }
        .expect("run command is parsed")
    }

    #[test]
    fn verify_cli() {
        RunArguments::command().debug_assert();
    }

    #[test]
    fn defaults() {
        let run = run_arguments(&[]);

        assert_eq!(run.watch_namespace, WatchNamespace::All);
        assert!(run.owns_runtime);
        assert!(run.auto_sync);
        assert_eq!(run.platform, Platform::Auto);
    }

    #[rstest]
    #[case(&["--owns-runtime", "false"], false, true)]
    #[case(&["--auto-sync", "false"], true, false)]
    #[case(&["--owns-runtime", "true", "--auto-sync", "true"], true, true)]
    fn boolean_options(#[case] args: &[&str], #[case] owns_runtime: bool, #[case] auto_sync: bool) {
        let run = run_arguments(args);

        assert_eq!(run.owns_runtime, owns_runtime);
        assert_eq!(run.auto_sync, auto_sync);
    }

    #[test]
    fn operator_config_carries_images() {
        let run = run_arguments(&[
            "--watch-namespace",
            "rhdh",
            "--backstage-image",
            "quay.io/rhdh/backstage:1.2",
            "--platform",
            "openshift",
        ]);

        assert_eq!(run.watch_namespace, WatchNamespace::One("rhdh".to_owned()));
        assert_eq!(run.platform, Platform::Openshift);
        assert_eq!(run.operator_config(true), OperatorConfig {
            owns_runtime: true,
            auto_sync: true,
            backstage_image: Some("quay.io/rhdh/backstage:1.2".to_owned()),
            postgresql_image: None,
            is_openshift: true,
        });
    }
}
