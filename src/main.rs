use std::collections::BTreeSet;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use kube::api::Api;
use kube::ResourceExt;
use tracing::info;

use kmm_operator::config::OperatorConfig;
use kmm_operator::controller::{
    BuildManager, DefaultBuildMaker, DefaultSignJobMaker, KubeResourceClient, Manager,
    SignManager, SyncStatus,
};
use kmm_operator::crd::Module;
use kmm_operator::registry::{
    AuthGetterFactory, ImageRegistry, KubeAuthGetterFactory, OciRegistry,
};
use kmm_operator::{kernel, telemetry, Error};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show version and build information
    Version,
    /// Run one build/sign pass for a module and kernel
    Sync(SyncArgs),
}

#[derive(Parser, Debug)]
struct SyncArgs {
    #[command(flatten)]
    config: OperatorConfig,

    /// Namespace of the Module
    #[arg(long, env = "MODULE_NAMESPACE", default_value = "default")]
    namespace: String,

    /// Name of the Module
    #[arg(long)]
    module: String,

    /// Target kernel version, as reported by the node
    #[arg(long)]
    kernel: String,

    /// Push the built and signed images
    #[arg(long)]
    push: bool,

    /// Afterwards delete generated resources for kernels other than these and --kernel
    #[arg(long)]
    gc: bool,

    /// Additional kernels to keep when garbage collecting
    #[arg(long = "keep-kernel")]
    keep_kernels: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    match args.command {
        Commands::Version => {
            println!("KMM Operator v{}", env!("CARGO_PKG_VERSION"));
            println!("Build Date: {}", env!("BUILD_DATE"));
            println!("Git SHA: {}", env!("GIT_SHA"));
            println!("Rust Version: {}", env!("RUST_VERSION"));
            Ok(())
        }
        Commands::Sync(sync_args) => run_sync(sync_args).await,
    }
}

async fn run_sync(args: SyncArgs) -> Result<(), Error> {
    args.config.validate()?;
    telemetry::init_tracing(args.config.log_format);

    let client = kube::Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    let modules: Api<Module> = Api::namespaced(client.clone(), &args.namespace);
    let module = modules.get(&args.module).await?;

    let mappings = &module.spec.module_loader.container.kernel_mappings;
    let mapping = kernel::find_mapping(mappings, &args.kernel)?.ok_or_else(|| {
        Error::ConfigError(format!(
            "module {} has no kernel mapping for {}",
            module.name_any(),
            args.kernel
        ))
    })?;
    let mapping = kernel::resolve_mapping(&module, mapping, &args.kernel)?;

    let registry: Arc<dyn ImageRegistry> =
        Arc::new(OciRegistry::new(args.config.registry_timeout())?);
    let auth: Arc<dyn AuthGetterFactory> = Arc::new(KubeAuthGetterFactory::new(client.clone()));
    let resources = Arc::new(KubeResourceClient::new(client));

    let build = BuildManager::new(
        resources.clone(),
        Arc::new(DefaultBuildMaker::new(&args.config.build_service_account)),
        registry.clone(),
        auth.clone(),
    );
    let sign = SignManager::new(
        resources,
        Arc::new(DefaultSignJobMaker::new(&args.config.sign_image)),
        registry,
        auth,
    );

    // Signing consumes the build output, so it only starts once the build is done
    let steps: [(&str, &dyn Manager); 2] = [("build", &build), ("sign", &sign)];
    for (step, manager) in steps {
        if !manager.should_sync(&module, &mapping).await? {
            println!("{step}: nothing to do");
            continue;
        }

        match manager
            .sync(&module, &mapping, &args.kernel, args.push, &module)
            .await
        {
            Ok(result) => {
                println!("{step}: {} (requeue: {})", result.status, result.requeue);
                if result.status != SyncStatus::Completed {
                    break;
                }
            }
            Err(e) => {
                if let Some(status) = e.sync_status() {
                    println!("{step}: {status}");
                }
                return Err(e);
            }
        }
    }

    if args.gc {
        let mut declared: BTreeSet<String> = args.keep_kernels.iter().cloned().collect();
        declared.insert(args.kernel.clone());

        let (builds, jobs) = futures::try_join!(
            build.garbage_collect(&module, &declared),
            sign.garbage_collect(&module, &declared)
        )?;
        if builds.is_empty() && jobs.is_empty() {
            info!("No stale generated resources");
        }
        for name in builds.iter().chain(jobs.iter()) {
            info!("Garbage collected {}", name);
        }
    }

    Ok(())
}
