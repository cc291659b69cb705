/*
 * Camel K Build Operator - kamel CLI
 * Copyright (C) 2025 Camel K build team
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

use anyhow::{bail, Context as _, Result};
use clap::{Args, Parser, Subcommand};
use controller::crds::duration::parse_duration;
use controller::crds::{Build, BuildSpec, IntegrationPlatform, OPERATOR_ID_ANNOTATION};
use controller::tasks::build::{BuildQueue, PlatformGate};
use controller::tasks::config::{BuildConfig, DEFAULT_OPERATOR_ID};
use controller::tasks::platform::find_platform;
use controller::tasks::scope::OperatorScope;
use kube::api::{ListParams, PostParams};
use kube::{Api, Client, ResourceExt};
use std::collections::BTreeMap;

/// kamel - inspect and submit builds for the Camel K build operator
#[derive(Parser)]
#[command(name = "kamel", version, about = "Submit and inspect Camel K builds")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage builds
    #[command(subcommand)]
    Build(BuildCommand),

    /// Inspect integration platforms
    #[command(subcommand)]
    Platform(PlatformCommand),
}

#[derive(Subcommand)]
enum BuildCommand {
    /// Submit a new build request
    Create {
        name: String,
        #[arg(short, long, default_value = "default")]
        namespace: String,
        /// Dependency coordinate, repeatable (e.g. -d camel:timer)
        #[arg(short = 'd', long = "dependency", required = true)]
        dependencies: Vec<String>,
        /// Operator that should schedule the build
        #[arg(long)]
        operator_id: Option<String>,
        /// Maximum build duration, e.g. 10m
        #[arg(long)]
        timeout: Option<String>,
        /// Target image reference
        #[arg(long)]
        image: Option<String>,
    },

    /// List builds and their phases
    List {
        #[arg(short, long, default_value = "default", conflicts_with = "all_namespaces")]
        namespace: String,
        #[arg(short = 'A', long)]
        all_namespaces: bool,
    },

    /// Show pending builds in priority order and which would start next
    Queue(QueueArgs),
}

#[derive(Args)]
struct QueueArgs {
    /// Namespace whose platform governs the selection
    #[arg(short, long, default_value = "default")]
    namespace: String,
    #[arg(long, env = "OPERATOR_ID", default_value = DEFAULT_OPERATOR_ID)]
    operator_id: String,
    #[arg(long, env = "NAMESPACE", default_value = "camel-k")]
    operator_namespace: String,
}

#[derive(Subcommand)]
enum PlatformCommand {
    /// Show the platform governing a namespace
    Get {
        #[arg(short, long, default_value = "default")]
        namespace: String,
        #[arg(short, long, default_value = "yaml", value_parser = ["yaml", "json"])]
        output: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = Client::try_default()
        .await
        .context("failed to connect to the Kubernetes cluster")?;

    match cli.command {
        Commands::Build(BuildCommand::Create {
            name,
            namespace,
            dependencies,
            operator_id,
            timeout,
            image,
        }) => create_build(client, &name, &namespace, dependencies, operator_id, timeout, image).await,
        Commands::Build(BuildCommand::List {
            namespace,
            all_namespaces,
        }) => list_builds(client, (!all_namespaces).then_some(namespace.as_str())).await,
        Commands::Build(BuildCommand::Queue(args)) => show_queue(client, &args).await,
        Commands::Platform(PlatformCommand::Get { namespace, output }) => {
            get_platform(client, &namespace, &output).await
        }
    }
}

async fn create_build(
    client: Client,
    name: &str,
    namespace: &str,
    dependencies: Vec<String>,
    operator_id: Option<String>,
    timeout: Option<String>,
    image: Option<String>,
) -> Result<()> {
    if let Some(timeout) = &timeout {
        parse_duration(timeout).with_context(|| format!("invalid --timeout {timeout}"))?;
    }
    if dependencies.iter().any(|d| d.trim().is_empty()) {
        bail!("dependencies must not be blank");
    }

    let mut build = Build::new(
        name,
        BuildSpec {
            dependencies,
            timeout,
            image,
            ..Default::default()
        },
    );
    build.metadata.namespace = Some(namespace.to_string());
    if let Some(id) = operator_id {
        build.metadata.annotations = Some(BTreeMap::from([(OPERATOR_ID_ANNOTATION.to_string(), id)]));
    }

    let api: Api<Build> = Api::namespaced(client, namespace);
    api.create(&PostParams::default(), &build)
        .await
        .with_context(|| format!("failed to create build {namespace}/{name}"))?;
    println!("build \"{name}\" created in namespace {namespace}");
    Ok(())
}

async fn list_builds(client: Client, namespace: Option<&str>) -> Result<()> {
    let api: Api<Build> = match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    };
    let mut builds = api.list(&ListParams::default()).await?.items;
    builds.sort_by_key(|b| (b.created_at(), b.namespace(), b.name_any()));

    println!(
        "{:<20} {:<32} {:<12} {:<10} IMAGE",
        "NAMESPACE", "NAME", "PHASE", "DURATION"
    );
    for build in builds {
        let status = build.status.clone().unwrap_or_default();
        println!(
            "{:<20} {:<32} {:<12} {:<10} {}",
            build.namespace().unwrap_or_default(),
            build.name_any(),
            build.phase().to_string(),
            status.duration.unwrap_or_default(),
            status.image.unwrap_or_default()
        );
    }
    Ok(())
}

async fn show_queue(client: Client, args: &QueueArgs) -> Result<()> {
    let scope = OperatorScope::new(&args.operator_id, &args.operator_namespace, None);
    let platform = find_platform(client.clone(), &scope, &args.namespace, None).await?;
    let gate = PlatformGate::from_platform(platform.as_ref());
    let default_timeout = gate
        .timeout()
        .unwrap_or_else(|| BuildConfig::default().default_timeout());

    let queue = BuildQueue::load(client, &scope, default_timeout).await?;
    let pending = queue.list_pending();
    let running = queue.list_running();

    println!("running: {}", running.len());
    for build in &running {
        println!("  {}/{}", build.namespace, build.name);
    }
    println!("pending (oldest first):");
    for (position, build) in pending.iter().enumerate() {
        println!(
            "  {:>3}. {}/{} [{}]",
            position + 1,
            build.namespace,
            build.name,
            build.dependencies.iter().cloned().collect::<Vec<_>>().join(", ")
        );
    }

    match &gate {
        PlatformGate::Ready {
            name,
            strategy: Ok(strategy),
            max_running,
            ..
        } => {
            let next = strategy.select_next(&pending, &running, *max_running);
            println!(
                "platform {name}: strategy {strategy}, max running {}",
                strategy.effective_max(*max_running)
            );
            if next.is_empty() {
                println!("next: (none, no free slot or nothing pending)");
            }
            for build in next {
                println!("next: {}/{}", build.namespace, build.name);
            }
        }
        PlatformGate::Ready {
            name,
            strategy: Err(err),
            ..
        } => println!("platform {name} has an invalid build configuration: {err}"),
        PlatformGate::NotReady { name, phase } => {
            println!("platform {name} is not ready (phase {phase}), nothing will be scheduled");
        }
        PlatformGate::Missing => {
            println!("no integration platform found for namespace {}", args.namespace);
        }
    }
    Ok(())
}

async fn get_platform(client: Client, namespace: &str, output: &str) -> Result<()> {
    let api: Api<IntegrationPlatform> = Api::namespaced(client, namespace);
    let platforms = api.list(&ListParams::default()).await?.items;
    if platforms.is_empty() {
        bail!("no integration platform in namespace {namespace}");
    }

    for platform in platforms {
        let rendered = match output {
            "json" => serde_json::to_string_pretty(&platform)?,
            _ => serde_yaml::to_string(&platform)?,
        };
        println!("{rendered}");
    }
    Ok(())
}
