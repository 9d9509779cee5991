use anyhow::{Context, Result};
use clap::Parser;
use kube::Client;
use taokan::client::{classify_namespace, group_by_kind, run_backup_set, run_pvc_pipeline};
use taokan::config::{ClientSingle, Cli, TopCommand};
use taokan::k8s::KubeFacade;
use taokan::model::PvcKind;
use taokan::selection::select_group;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(if cli.debug { "debug" } else { "info" })
            }),
        )
        .init();

    let client = build_client(cli.kubeconfig.as_deref())
        .await
        .context("failed to create Kubernetes client")?;

    match cli.command.clone() {
        TopCommand::Server(args) => {
            let facade = KubeFacade::new(client, args.storage_class, args.storage_class_rwx);
            info!(port = args.port, namespace = %cli.namespace, "Starting TaoKan server");
            taokan::server::TaoKanServer::new(facade, cli.namespace, args.retry)
                .listen(args.port)
                .await
        }
        TopCommand::Client(args) => {
            let facade = KubeFacade::new(client, None, None);
            run_client(&facade, &cli, args).await
        }
        TopCommand::Cleanup(args) => {
            let facade = KubeFacade::new(client, None, None);
            taokan::cleanup::run(&facade, &cli.namespace, &args.target).await
        }
    }
}

async fn build_client(kubeconfig: Option<&std::path::Path>) -> Result<Client> {
    match kubeconfig {
        Some(path) => {
            let raw = kube::config::Kubeconfig::read_from(path)
                .with_context(|| format!("reading kubeconfig at {}", path.display()))?;
            let config =
                kube::Config::from_custom_kubeconfig(raw, &kube::config::KubeConfigOptions::default())
                    .await
                    .context("building client config from kubeconfig")?;
            Client::try_from(config).context("constructing kube client")
        }
        None => Client::try_default()
            .await
            .context("constructing kube client from default/in-cluster config"),
    }
}

async fn run_client(
    facade: &KubeFacade,
    cli: &Cli,
    args: taokan::config::ClientArgs,
) -> Result<()> {
    if let Some(ClientSingle::Rsync { pvc }) = &args.single {
        info!(pvc, "Migrating single pvc");
        let refs = classify_namespace(facade, &cli.namespace).await?;
        let target = refs
            .into_iter()
            .find(|r| &r.dest_name() == pvc || r.source_name == *pvc)
            .with_context(|| format!("pvc {pvc} not found or not classifiable"))?;

        let outcome = run_pvc_pipeline(
            facade,
            &cli.namespace,
            &args.remote,
            args.port,
            &cli.namespace,
            &cli.registry,
            &cli.image_tag,
            &cli.image_pull_policy,
            args.retry,
            &target,
        )
        .await;
        return match outcome {
            taokan::client::PvcOutcome::Completed => Ok(()),
            taokan::client::PvcOutcome::Skipped { reason } => {
                anyhow::bail!("pvc {pvc} skipped: {reason}")
            }
            taokan::client::PvcOutcome::Failed { reason } => {
                anyhow::bail!("pvc {pvc} failed: {reason}")
            }
        };
    }

    let run_once = |facade: KubeFacade, cli: Cli, args: taokan::config::ClientArgs| async move {
        let refs = classify_namespace(&facade, &cli.namespace).await?;

        let users = select_group(
            group_by_kind(refs.clone(), PvcKind::User),
            args.disable_user,
            args.user_list.as_deref(),
            args.user_exclusive_list.as_deref(),
            "claim-",
            "",
        );
        let projects = select_group(
            group_by_kind(refs.clone(), PvcKind::Project),
            args.disable_project,
            args.project_list.as_deref(),
            args.project_exclusive_list.as_deref(),
            "data-nfs-project-",
            "-0",
        );
        let datasets = select_group(
            group_by_kind(refs, PvcKind::Dataset),
            args.disable_dataset,
            args.dataset_list.as_deref(),
            args.dataset_exclusive_list.as_deref(),
            "data-nfs-dataset-",
            "-0",
        );

        let backup_set = taokan::model::BackupSet {
            users,
            projects,
            datasets,
        };
        info!(total = backup_set.total(), "Built backup set");

        let report = run_backup_set(
            &facade,
            &cli.namespace,
            &args.remote,
            args.port,
            &cli.namespace,
            &cli.registry,
            &cli.image_tag,
            &cli.image_pull_policy,
            args.retry,
            &backup_set,
        )
        .await;
        info!(
            completed = report.completed,
            skipped = report.skipped,
            failed = report.failed,
            "Sweep finished"
        );
        Ok::<(), anyhow::Error>(())
    };

    if args.daemon {
        // The daemon flag runs exactly one sweep in the background, then
        // blocks forever instead of looping; no periodic resweep exists.
        let facade = facade.clone();
        let cli = cli.clone();
        let args_bg = args.clone();
        tokio::spawn(async move {
            if let Err(e) = run_once(facade, cli, args_bg).await {
                tracing::error!(error = %e, "[Failed] backup sweep");
            }
        });
        futures::future::pending::<()>().await;
        Ok(())
    } else {
        run_once(facade.clone(), cli.clone(), args).await
    }
}
