use backstage_operator::{
    cli::{Command, Platform},
    client::{self, Client},
    controller,
    crd::{self, crd_yaml},
    logging::initialize_logging,
};
use clap::Parser;
use snafu::{ResultExt, Snafu};
use tracing::info;

const APP_NAME: &str = "backstage-operator";
const LOG_ENV_VAR: &str = "BACKSTAGE_OPERATOR_LOG";

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("failed to print the CRD"))]
    PrintCrd { source: crd::Error },

    #[snafu(display("failed to create the Kubernetes client"))]
    CreateClient { source: kube::Error },

    #[snafu(display("failed to detect the cluster platform"))]
    DetectPlatform { source: client::Error },
}

#[derive(Parser)]
#[command(name = "Backstage Operator", author, version, about = "Operator for Backstage developer portals")]
struct Opts {
    #[clap(subcommand)]
    command: Command,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let opts = Opts::parse();
    match opts.command {
        Command::Crd => print!("{}", crd_yaml().context(PrintCrdSnafu)?),
        Command::Run(run) => {
            initialize_logging(LOG_ENV_VAR, APP_NAME);

            let client = Client::new(kube::Client::try_default().await.context(CreateClientSnafu)?);
            let is_openshift = match run.platform {
                Platform::Auto => client.is_openshift().await.context(DetectPlatformSnafu)?,
                Platform::Kubernetes => false,
                Platform::Openshift => true,
            };
            info!(
                watch_namespace = ?run.watch_namespace,
                is_openshift,
                "starting {APP_NAME}"
            );

            let config = run.operator_config(is_openshift);
            controller::run(client, config, run.watch_namespace).await;
        }
    }

    Ok(())
}
