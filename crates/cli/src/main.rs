use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use vantage_actions::{DiskSpec, KubeActions, NicSpec, VmSpec, WizardLauncher};
use vantage_core::{model, DescriptorOpts};
use vantage_fetch::{KubeFetcher, ResourceFetcher};
use vantage_telemetry::overview::overview_resource_map;
use vantage_telemetry::{DashboardSession, HealthClient, HttpPromClient, KubeHealth, OverviewModel, PromClient, SessionOpts};

#[derive(Parser, Debug)]
#[command(name = "vantagectl", version, about = "Vantage cluster console CLI")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Kubernetes namespace (default: all namespaces)
    #[arg(long = "ns", global = true)]
    namespace: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Poll the cluster and metrics backends, print the merged overview
    Overview,
    /// List objects of a registered kind, e.g. "pod" or "virtualmachine"
    Ls {
        kind: String,
    },
    /// Create a virtual machine through the wizard path
    CreateVm {
        /// VM name (normalized to lowercase on create)
        #[arg(long = "name")]
        name: String,
        /// Disk, "name" or "name:sizeGi"; repeatable
        #[arg(long = "disk")]
        disks: Vec<String>,
        /// Interface, "name" or "name:networkAttachmentDefinition"; repeatable
        #[arg(long = "nic")]
        nics: Vec<String>,
        #[arg(long = "cores", default_value_t = 1)]
        cores: u32,
        #[arg(long = "memory-mi", default_value_t = 512)]
        memory_mi: u64,
        /// Start the VM immediately
        #[arg(long = "run", action = ArgAction::SetTrue)]
        run: bool,
    },
}

fn init_tracing() {
    let env = std::env::var("VANTAGE_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("VANTAGE_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid VANTAGE_METRICS_ADDR; expected host:port");
        }
    }
}

fn env_secs(var: &str, default: u64) -> u64 {
    std::env::var(var).ok().and_then(|s| s.parse::<u64>().ok()).unwrap_or(default)
}

/// Parse "name" or "name:arg" flag values.
fn split_flag(raw: &str) -> (&str, Option<&str>) {
    match raw.split_once(':') {
        Some((name, arg)) if !arg.is_empty() => (name, Some(arg)),
        Some((name, _)) => (name, None),
        None => (raw, None),
    }
}

fn parse_disk(raw: &str) -> Result<DiskSpec> {
    let (name, arg) = split_flag(raw);
    if name.is_empty() {
        return Err(anyhow!("disk flag needs a name: {:?}", raw));
    }
    let mut disk = DiskSpec::new(name);
    if let Some(size) = arg {
        disk.size_gi = size.parse::<u64>().map_err(|_| anyhow!("bad disk size in {:?}", raw))?;
    }
    Ok(disk)
}

fn parse_nic(raw: &str) -> Result<NicSpec> {
    let (name, arg) = split_flag(raw);
    if name.is_empty() {
        return Err(anyhow!("nic flag needs a name: {:?}", raw));
    }
    let mut nic = NicSpec::new(name);
    nic.network = arg.map(|s| s.to_string());
    Ok(nic)
}

fn render_age(creation: Option<&str>) -> String {
    let Some(ts) = creation.and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok()) else {
        return "-".to_string();
    };
    let mut secs = (chrono::Utc::now().timestamp() - ts.timestamp()).max(0) as u64;
    let days = secs / 86_400; secs %= 86_400;
    let hours = secs / 3600; secs %= 3600;
    let mins = secs / 60; secs %= 60;
    if days > 0 { format!("{}d{}h", days, hours) }
    else if hours > 0 { format!("{}h{}m", hours, mins) }
    else if mins > 0 { format!("{}m", mins) }
    else { format!("{}s", secs) }
}

fn render_bytes(v: Option<f64>) -> String {
    let Some(mut v) = v else { return "-".to_string() };
    for unit in ["B", "KiB", "MiB", "GiB", "TiB"] {
        if v < 1024.0 {
            return format!("{:.1} {}", v, unit);
        }
        v /= 1024.0;
    }
    format!("{:.1} PiB", v)
}

fn health_word(v: Option<bool>) -> &'static str {
    match v {
        Some(true) => "ok",
        Some(false) => "degraded",
        None => "unknown",
    }
}

fn print_overview_human(model: &OverviewModel) {
    println!("INVENTORY");
    let count = |v: Option<usize>| v.map(|n| n.to_string()).unwrap_or_else(|| "-".to_string());
    println!("  nodes {:<6} pods {:<6} pvcs {:<6}", count(model.inventory.nodes), count(model.inventory.pods), count(model.inventory.pvcs));
    println!("  vms {:<8} migrations {:<4} hosts {}", count(model.inventory.vms), count(model.inventory.migrations), count(model.inventory.hosts));
    println!("HEALTH");
    println!("  api {} • virt {}", health_word(model.health.api), health_word(model.health.virt));
    if let Some(ceph) = model.health.ceph {
        println!("  ceph status {} (osd up {} / down {})",
            ceph,
            model.health.ceph_osd_up.unwrap_or(0.0),
            model.health.ceph_osd_down.unwrap_or(0.0));
    }
    println!("CAPACITY");
    println!("  memory {} • storage {} used of {}",
        render_bytes(model.capacity.memory_total_bytes),
        render_bytes(model.capacity.storage_used_bytes),
        render_bytes(model.capacity.storage_total_bytes));
    if let Some(cpu) = model.utilization.cpu_percent {
        println!("  cpu {:.1}%", cpu);
    }
    if let Some(platform) = model.platform.as_deref() {
        println!("PLATFORM {}", platform);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    let poll = Duration::from_secs(env_secs("VANTAGE_POLL_SECS", 30));
    let wait = Duration::from_secs(env_secs("VANTAGE_WAIT_SECS", 8));

    match cli.command {
        Commands::Overview => {
            let opts = SessionOpts::from_env();
            // A missing kubeconfig degrades to metrics-only; a missing
            // Prometheus URL degrades to resources-only. Neither is fatal.
            let client = match kube::Client::try_default().await {
                Ok(c) => Some(c),
                Err(e) => {
                    warn!(error = %e, "kube client unavailable; resource slots stay unloaded");
                    None
                }
            };
            let mux = client.clone().map(|c| {
                let fetcher: Arc<dyn ResourceFetcher> = Arc::new(KubeFetcher::new(c));
                vantage_fetch::spawn(overview_resource_map(), fetcher, poll)
            });
            let prom: Option<Arc<dyn PromClient>> = match opts.prometheus_url.as_deref() {
                Some(base) => Some(Arc::new(HttpPromClient::new(base)?)),
                None => None,
            };
            let health: Option<Arc<dyn HealthClient>> =
                client.map(|c| Arc::new(KubeHealth::new(c)) as Arc<dyn HealthClient>);
            let session = DashboardSession::start(prom, health, opts);

            info!(wait_secs = wait.as_secs(), "waiting for first snapshots");
            let resources = match mux.as_ref() {
                Some(m) => {
                    let r = m.reader();
                    r.wait_for(wait, |s| s.epoch > 0).await;
                    r.current()
                }
                None => Arc::new(vantage_fetch::ResourceState::default()),
            };
            let metrics = session.reader();
            metrics.wait_for(wait, |s| s.epoch > 0).await;
            let snapshot = metrics.current();

            let model = OverviewModel::project(&resources, &snapshot);
            match cli.output {
                Output::Human => print_overview_human(&model),
                Output::Json => println!("{}", serde_json::to_string_pretty(&model)?),
            }

            session.shutdown();
            if let Some(m) = mux {
                m.cancel();
            }
        }
        Commands::Ls { kind } => {
            let ns = cli.namespace.as_deref();
            let m = model::by_kind(&kind)
                .ok_or_else(|| anyhow!("unknown kind {:?}; registered: {}", kind,
                    model::ALL.iter().map(|m| m.kind).collect::<Vec<_>>().join(", ")))?;
            let descriptor = m.descriptor(DescriptorOpts {
                namespace: ns.map(|s| s.to_string()),
                ..Default::default()
            });
            info!(gvk = %descriptor.gvk_key(), ns = ?ns, "ls invoked");
            let fetcher = KubeFetcher::try_default().await?;
            let list = fetcher.fetch(&descriptor).await?;
            let items = list.get("items").and_then(|v| v.as_array()).cloned().unwrap_or_default();
            match cli.output {
                Output::Human => {
                    println!("{:<16} {:<32} AGE", "NAMESPACE", "NAME");
                    for item in &items {
                        let meta = item.get("metadata");
                        let name = meta.and_then(|m| m.get("name")).and_then(|v| v.as_str()).unwrap_or("");
                        let ns_col = meta.and_then(|m| m.get("namespace")).and_then(|v| v.as_str()).unwrap_or("-");
                        let age = render_age(meta.and_then(|m| m.get("creationTimestamp")).and_then(|v| v.as_str()));
                        println!("{:<16} {:<32} {}", ns_col, name, age);
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&items)?),
            }
        }
        Commands::CreateVm { name, disks, nics, cores, memory_mi, run } => {
            let namespace = cli.namespace.clone().unwrap_or_else(|| "default".to_string());
            let mut spec = VmSpec::new(name, namespace.clone());
            spec.cpu_cores = cores;
            spec.memory_mi = memory_mi;
            spec.running = run;
            for raw in &disks {
                spec.disks.push(parse_disk(raw)?);
            }
            for raw in &nics {
                spec.interfaces.push(parse_nic(raw)?);
            }

            let client = kube::Client::try_default().await?;
            let actions = Arc::new(KubeActions::new(client.clone()));
            let launcher = WizardLauncher::new(actions, Some(namespace.clone()));
            let fetcher: Arc<dyn ResourceFetcher> = Arc::new(KubeFetcher::new(client));
            let mut session = launcher.launch(fetcher, poll);
            if session.reader().wait_for(wait, |s| s.ready()).await.is_none() {
                return Err(anyhow!("virtual machine list did not load within {}s", wait.as_secs()));
            }

            match session.submit(&spec).await {
                Ok(created) => match cli.output {
                    Output::Human => {
                        let created_name = created.pointer("/metadata/name").and_then(|v| v.as_str()).unwrap_or("");
                        println!("created {}/{}", namespace, created_name);
                    }
                    Output::Json => println!("{}", serde_json::to_string_pretty(&created)?),
                },
                Err(e) => {
                    // The failure belongs to this invocation; report and exit
                    // nonzero without touching anything else.
                    eprintln!("create-vm error: {}", e);
                    session.close();
                    std::process::exit(1);
                }
            }
            session.close();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disk_flag_parses_name_and_size() {
        let d = parse_disk("rootdisk:20").unwrap();
        assert_eq!(d.name, "rootdisk");
        assert_eq!(d.size_gi, 20);
        let d = parse_disk("scratch").unwrap();
        assert_eq!(d.size_gi, 10);
        assert!(parse_disk(":5").is_err());
        assert!(parse_disk("d:five").is_err());
    }

    #[test]
    fn nic_flag_parses_optional_network() {
        let n = parse_nic("nic1:test-nad").unwrap();
        assert_eq!(n.network.as_deref(), Some("test-nad"));
        let n = parse_nic("eth0").unwrap();
        assert!(n.network.is_none());
    }
}
