use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use quarry_core::{
	config::{default_data_dir, ResourceConfig},
	logging, DeployReport, ImportOptions, IndexKey, Resource, ResourceDomain, ResourceEvent,
	ResourceManager, ResourcePatch,
};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
	Human,
	Json,
}

#[derive(Parser, Debug)]
#[command(name = "quarry", about = "Content-addressed store for launcher resources")]
struct Cli {
	/// Path to the quarry data directory
	#[arg(long, env = "QUARRY_DATA_DIR")]
	data_dir: Option<PathBuf>,

	/// Launcher root holding the domain directories, overrides the config
	#[arg(long)]
	root: Option<PathBuf>,

	/// Do not watch the domain directories while running
	#[arg(long)]
	no_watch: bool,

	/// Output format
	#[arg(long, value_enum, default_value = "human")]
	format: OutputFormat,

	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
	/// Hash, classify and store files
	Import {
		paths: Vec<PathBuf>,
		/// Refuse files that do not belong to this domain
		#[arg(long)]
		domain: Option<ResourceDomain>,
		#[arg(long = "tag")]
		tags: Vec<String>,
	},
	/// List the resources of a domain
	List { domain: ResourceDomain },
	/// Show one resource by hash, uri, or path
	Show { key: String },
	/// Search names, file names, and tags
	Search {
		keyword: String,
		#[arg(long)]
		domain: Option<ResourceDomain>,
	},
	/// Delete resources from the store
	Remove { keys: Vec<String> },
	/// Replace the tags of a resource
	Tag { key: String, tags: Vec<String> },
	/// Copy stored files out of the store
	Export {
		target: PathBuf,
		keys: Vec<String>,
	},
	/// Link resources into an instance
	Install { instance: PathBuf, keys: Vec<String> },
	/// Remove resources from an instance
	Uninstall { instance: PathBuf, keys: Vec<String> },
	/// Re-enable disabled resources of an instance
	Enable { instance: PathBuf, keys: Vec<String> },
	/// Disable resources of an instance without removing them
	Disable { instance: PathBuf, keys: Vec<String> },
	/// Keep running and print store events until interrupted
	Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();
	let data_dir = match cli.data_dir {
		Some(dir) => dir,
		None => default_data_dir()?,
	};

	let mut config = ResourceConfig::load_from(&data_dir)
		.await
		.with_context(|| format!("loading config from {}", data_dir.display()))?;
	if let Some(root) = cli.root {
		config.root = root;
	}
	// One-shot commands never wait on filesystem events.
	config.watch = !cli.no_watch && matches!(cli.command, Commands::Watch);

	let _guard = logging::init(config.logs_dir(), &config.log_level)?;
	debug!(root = %config.root.display(), "Opening resource store");

	let manager = ResourceManager::open(config).await?;
	let result = run(&manager, cli.command, &cli.format).await;
	manager.shutdown().await;
	result
}

async fn run(manager: &ResourceManager, command: Commands, format: &OutputFormat) -> Result<()> {
	match command {
		Commands::Import { paths, domain, tags } => {
			let options = ImportOptions {
				domain,
				tags: tags.into_iter().collect(),
				..Default::default()
			};
			let resources = manager.import(&paths, options).await?;
			print_resources(format, &resources)?;
		}
		Commands::List { domain } => {
			let resources = manager.list(domain).await;
			print_resources(format, &resources)?;
		}
		Commands::Show { key } => {
			let Some(resource) = manager.get(&IndexKey::parse(&key)) else {
				bail!("no resource matches {key}");
			};
			match format {
				OutputFormat::Human => {
					print_resource(&resource);
					if !resource.tags.is_empty() {
						println!("  tags: {}", join(&resource.tags));
					}
					for uri in &resource.uris {
						println!("  uri: {uri}");
					}
				}
				OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&resource)?),
			}
		}
		Commands::Search { keyword, domain } => {
			let resources = manager.search(&keyword, domain);
			print_resources(format, &resources)?;
		}
		Commands::Remove { keys } => {
			let keys = keys.iter().map(|key| IndexKey::parse(key)).collect::<Vec<_>>();
			let removed = manager.remove(&keys).await?;
			if removed.len() < keys.len() {
				warn!(
					requested = keys.len(),
					removed = removed.len(),
					"Some keys matched nothing"
				);
			}
			print_resources(format, &removed)?;
		}
		Commands::Tag { key, tags } => {
			let resource = lookup(manager, &key)?;
			let mut patch = ResourcePatch::new(resource.hash);
			patch.tags = Some(tags.into_iter().collect());
			let updated = manager.update(vec![patch]).await?;
			print_resources(format, &updated)?;
		}
		Commands::Export { target, keys } => {
			let hashes = keys
				.iter()
				.map(|key| lookup(manager, key).map(|resource| resource.hash))
				.collect::<Result<Vec<_>>>()?;
			let written = manager.export(&hashes, &target).await?;
			match format {
				OutputFormat::Human => {
					for path in written {
						println!("{}", path.display());
					}
				}
				OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&written)?),
			}
		}
		Commands::Install { instance, keys } => {
			let resources = lookup_all(manager, &keys)?;
			print_reports(format, &manager.install(&resources, &instance).await?)?;
		}
		Commands::Uninstall { instance, keys } => {
			let resources = lookup_all(manager, &keys)?;
			print_reports(format, &manager.uninstall(&resources, &instance).await?)?;
		}
		Commands::Enable { instance, keys } => {
			let resources = lookup_all(manager, &keys)?;
			print_reports(format, &manager.enable(&resources, &instance).await?)?;
		}
		Commands::Disable { instance, keys } => {
			let resources = lookup_all(manager, &keys)?;
			print_reports(format, &manager.disable(&resources, &instance).await?)?;
		}
		Commands::Watch => watch(manager, format).await?,
	}

	Ok(())
}

async fn watch(manager: &ResourceManager, format: &OutputFormat) -> Result<()> {
	let mut events = manager.subscribe();
	for domain in ResourceDomain::all() {
		manager.when_ready(domain).await;
	}
	println!("Watching {}", manager.config().root.display());

	loop {
		tokio::select! {
			_ = tokio::signal::ctrl_c() => break,
			event = events.recv() => match event {
				Ok(event) => print_event(format, &event)?,
				Err(RecvError::Lagged(skipped)) => warn!(skipped, "Dropped store events"),
				Err(RecvError::Closed) => break,
			},
		}
	}

	if let OutputFormat::Human = format {
		for (domain, metrics) in manager.watcher_metrics().await {
			println!(
				"{domain}: {} events, {} batches, {} imported, {} removed",
				metrics.events_received, metrics.batches_processed, metrics.imports, metrics.removals
			);
		}
	}

	Ok(())
}

fn lookup(manager: &ResourceManager, key: &str) -> Result<Resource> {
	manager
		.get(&IndexKey::parse(key))
		.with_context(|| format!("no resource matches {key}"))
}

fn lookup_all(manager: &ResourceManager, keys: &[String]) -> Result<Vec<Resource>> {
	keys.iter().map(|key| lookup(manager, key)).collect()
}

fn join<'a>(values: impl IntoIterator<Item = &'a String>) -> String {
	values.into_iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}

fn print_resource(resource: &Resource) {
	println!(
		"- {} [{}] {} ({})",
		resource.hash,
		resource.domain,
		resource.name,
		resource.location().display()
	);
}

fn print_resources(format: &OutputFormat, resources: &[Resource]) -> Result<()> {
	match format {
		OutputFormat::Human => {
			if resources.is_empty() {
				println!("No resources found");
			}
			resources.iter().for_each(print_resource);
		}
		OutputFormat::Json => println!("{}", serde_json::to_string_pretty(resources)?),
	}
	Ok(())
}

fn print_reports(format: &OutputFormat, reports: &[DeployReport]) -> Result<()> {
	match format {
		OutputFormat::Human => {
			for report in reports {
				println!("{:?} {} -> {}", report.action, report.hash, report.path.display());
			}
		}
		OutputFormat::Json => println!("{}", serde_json::to_string_pretty(reports)?),
	}
	Ok(())
}

#[derive(Serialize)]
#[serde(tag = "kind", content = "items", rename_all = "lowercase")]
enum EventOutput<'a> {
	Added(&'a [Resource]),
	Updated(&'a [Resource]),
	Removed(Vec<(&'a str, ResourceDomain)>),
}

fn print_event(format: &OutputFormat, event: &ResourceEvent) -> Result<()> {
	let output = match event {
		ResourceEvent::Added(resources) => EventOutput::Added(resources),
		ResourceEvent::Updated(resources) => EventOutput::Updated(resources),
		ResourceEvent::Removed(removed) => EventOutput::Removed(
			removed
				.iter()
				.map(|(hash, domain)| (hash.as_str(), *domain))
				.collect(),
		),
	};

	match (format, output) {
		(OutputFormat::Json, output) => println!("{}", serde_json::to_string(&output)?),
		(OutputFormat::Human, EventOutput::Added(resources)) => {
			resources.iter().for_each(|resource| {
				print!("added ");
				print_resource(resource);
			});
		}
		(OutputFormat::Human, EventOutput::Updated(resources)) => {
			resources.iter().for_each(|resource| {
				print!("updated ");
				print_resource(resource);
			});
		}
		(OutputFormat::Human, EventOutput::Removed(removed)) => {
			for (hash, domain) in removed {
				println!("removed - {hash} [{domain}]");
			}
		}
	}
	Ok(())
}
