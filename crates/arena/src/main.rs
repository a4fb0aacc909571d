use anyhow::Context;
use anyhow::Result;
use arena::app::ArenaContext;
use arena::app::ContextBuilder;
use arena::config::Cli;
use arena::config::Commands;
use arena::config::Settings;
use arena::training::JobType;
use clap::Parser;
use error_stack::Report;
use serde::Serialize;
use utils::version;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        tracing::error!("Thread panicked: {}", panic_info);
        default_hook(panic_info);
    }));
}

fn report<C: error_stack::Context>(report: Report<C>) -> anyhow::Error {
    anyhow::anyhow!("{report:?}")
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let output = serde_json::to_string_pretty(value).context("serialize output failed")?;
    println!("{output}");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_global_hooks();

    let cli = Cli::parse();
    let settings = Settings::load(&cli.global).map_err(report)?;
    let _guard = utils::logging::init_with_path(settings.log_file.clone())
        .context("initialize logging failed")?;

    tracing::debug!(branch = version::branch(), "Starting arena {}", &**version::VERSION);

    let context = ContextBuilder::new(settings).build().await.map_err(report)?;
    let result = run(&context, cli.command).await;
    context.shutdown();
    result
}

async fn run(context: &ArenaContext, command: Commands) -> Result<()> {
    let service = &context.service;
    let namespace = context.namespace.as_str();

    match command {
        Commands::Get(args) => {
            let job = service
                .get_training_job(&args.name, namespace, args.job_type)
                .await
                .map_err(report)?;
            print_json(&job.to_info())
        }
        Commands::List(args) => {
            let jobs = service
                .list_training_jobs(namespace, args.all_namespaces, args.job_type)
                .await
                .map_err(report)?;
            print_json(&jobs.iter().map(|job| job.to_info()).collect::<Vec<_>>())
        }
        Commands::Delete(args) => {
            service
                .delete_training_job(&args.name, namespace, args.job_type)
                .await
                .map_err(report)?;
            println!("The training job {} has been deleted successfully", args.name);
            Ok(())
        }
        Commands::Prune(args) => {
            let pruned = service
                .prune_training_jobs(namespace, args.all_namespaces, args.since)
                .await
                .map_err(report)?;
            print_json(&pruned)
        }
        Commands::Top(args) => {
            let jobs = service
                .top_jobs(namespace, args.all_namespaces)
                .await
                .map_err(report)?;
            print_json(&jobs.iter().map(|job| job.to_info()).collect::<Vec<_>>())
        }
        Commands::Types => {
            let types: serde_json::Map<String, serde_json::Value> = JobType::ALL
                .iter()
                .map(|job_type| {
                    (
                        job_type.to_string(),
                        serde_json::Value::Bool(service.is_job_type_enabled(*job_type)),
                    )
                })
                .collect();
            print_json(&types)
        }
    }
}
