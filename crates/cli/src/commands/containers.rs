//! Container CLI commands

use anyhow::Result;
use serde_json::Value;
use tabled::Tabled;

use crate::client::{
    ApiClient, ContainerStats, DeployRequest, EnvResponse, ExecRequest, ExecResponse,
    LogsResponse, MessageResponse, SetEnvRequest,
};
use crate::commands::images::report;
use crate::output::{
    color_cpu, flag, print_info, print_json, print_success, print_table, print_warning,
    OutputFormat,
};

/// Row for the stats table
#[derive(Tabled)]
struct StatsRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "CPU")]
    cpu: String,
    #[tabled(rename = "Memory")]
    memory: String,
    #[tabled(rename = "Mem %")]
    mem_perc: String,
    #[tabled(rename = "Net I/O")]
    net_io: String,
    #[tabled(rename = "PIDs")]
    pids: String,
    #[tabled(rename = "Anomaly")]
    anomaly: String,
}

fn stats_rows(stats: &[ContainerStats]) -> Vec<StatsRow> {
    stats
        .iter()
        .map(|s| {
            let cpu = if s.warning {
                flag(&s.cpu_perc, true)
            } else {
                color_cpu(&s.cpu_perc)
            };
            StatsRow {
                id: flag(&s.id, s.warning),
                name: flag(&s.name, s.warning),
                cpu,
                memory: s.mem_usage.clone(),
                mem_perc: s.mem_perc.clone(),
                net_io: s.net_io.clone(),
                pids: s.pids.clone(),
                anomaly: flag(if s.warning { "yes" } else { "no" }, s.warning),
            }
        })
        .collect()
}

/// Show live stats with the anomaly verdict per container
pub async fn show_stats(client: &ApiClient, vm: &str, format: OutputFormat) -> Result<()> {
    let stats: Vec<ContainerStats> = client.get(&["api", "vms", vm, "stats"]).await?;

    print_table(&stats_rows(&stats), &stats, format)?;

    if matches!(format, OutputFormat::Table) {
        let flagged = stats.iter().filter(|s| s.warning).count();
        if flagged > 0 {
            print_warning(&format!(
                "{} of {} containers on {} flagged as anomalous",
                flagged,
                stats.len(),
                vm
            ));
        }
    }
    Ok(())
}

pub async fn show_logs(client: &ApiClient, vm: &str, container: &str, format: OutputFormat) -> Result<()> {
    let response: LogsResponse = client
        .get(&["api", "vms", vm, "containers", container, "logs"])
        .await?;

    match format {
        OutputFormat::Json => print_json(&response)?,
        OutputFormat::Table => print!("{}", response.logs),
    }
    Ok(())
}

pub async fn stop(client: &ApiClient, vm: &str, container: &str, format: OutputFormat) -> Result<()> {
    let response: MessageResponse = client
        .post(&["api", "vms", vm, "containers", container, "stop"], &Value::Null)
        .await?;
    report(&response, format)
}

pub async fn restart(client: &ApiClient, vm: &str, container: &str, format: OutputFormat) -> Result<()> {
    let response: MessageResponse = client
        .post(&["api", "vms", vm, "containers", container, "restart"], &Value::Null)
        .await?;
    report(&response, format)
}

/// Run `command` inside the container
pub async fn exec(
    client: &ApiClient,
    vm: &str,
    container: &str,
    command: &[String],
    format: OutputFormat,
) -> Result<()> {
    let request = ExecRequest {
        command: command.join(" "),
    };
    let response: ExecResponse = client
        .post(&["api", "vms", vm, "containers", container, "exec"], &request)
        .await?;

    match format {
        OutputFormat::Json => print_json(&response)?,
        OutputFormat::Table => print!("{}", response.output),
    }
    Ok(())
}

/// List environment variables, or export one when `set` is given
pub async fn env(
    client: &ApiClient,
    vm: &str,
    container: &str,
    set: Option<(String, String)>,
    format: OutputFormat,
) -> Result<()> {
    let path = ["api", "vms", vm, "containers", container, "env"];

    if let Some((key, value)) = set {
        let response: MessageResponse = client.post(&path, &SetEnvRequest { key, value }).await?;
        return match format {
            OutputFormat::Json => print_json(&response),
            OutputFormat::Table => {
                print_info(&response.message);
                Ok(())
            }
        };
    }

    let response: EnvResponse = client.get(&path).await?;
    match format {
        OutputFormat::Json => print_json(&response)?,
        OutputFormat::Table => {
            for var in &response.env_vars {
                println!("{}", var);
            }
        }
    }
    Ok(())
}

pub async fn inspect(client: &ApiClient, vm: &str, container: &str) -> Result<()> {
    let details: Value = client
        .get(&["api", "vms", vm, "containers", container, "inspect"])
        .await?;
    print_json(&details)
}

/// Start `image` as a detached container called `name`
pub async fn deploy(
    client: &ApiClient,
    vm: &str,
    image: &str,
    name: &str,
    format: OutputFormat,
) -> Result<()> {
    let request = DeployRequest {
        image: image.to_string(),
        name: name.to_string(),
    };
    let response: MessageResponse = client
        .post(&["api", "vms", vm, "containers"], &request)
        .await?;

    match format {
        OutputFormat::Json => print_json(&response)?,
        OutputFormat::Table => {
            print_success(&format!("{} deployed on {}", name, vm));
            println!("Container ID: {}", response.output);
        }
    }
    Ok(())
}

/// Parse a `KEY=VALUE` argument
pub fn parse_assignment(arg: &str) -> Result<(String, String), String> {
    match arg.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", arg)),
    }
}
