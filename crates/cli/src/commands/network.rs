//! VM and network CLI commands

use anyhow::Result;
use colored::Colorize;
use serde_json::Value;
use tabled::Tabled;

use crate::client::{ApiClient, VmEntry};
use crate::output::{print_json, print_table, OutputFormat};

/// Row for the VM table
#[derive(Tabled)]
struct VmRow {
    #[tabled(rename = "VM")]
    name: String,
    #[tabled(rename = "Host")]
    host: String,
}

/// Row for the bridge network container table
#[derive(Tabled)]
struct EndpointRow {
    #[tabled(rename = "Container")]
    name: String,
    #[tabled(rename = "IPv4")]
    ipv4: String,
    #[tabled(rename = "MAC")]
    mac: String,
}

/// List the VMs the gateway can reach
pub async fn list_vms(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let vms: Vec<VmEntry> = client.get(&["api", "vms"]).await?;

    let rows: Vec<VmRow> = vms
        .iter()
        .map(|vm| VmRow {
            name: vm.name.clone(),
            host: vm.host.clone(),
        })
        .collect();

    print_table(&rows, &vms, format)
}

/// Show the `bridge` network of a VM
pub async fn show_network(client: &ApiClient, vm: &str, format: OutputFormat) -> Result<()> {
    let network: Value = client.get(&["api", "vms", vm, "network"]).await?;

    match format {
        OutputFormat::Json => print_json(&network)?,
        OutputFormat::Table => {
            let name = network["Name"].as_str().unwrap_or("bridge");
            println!("{} {}", "Network:".bold(), name.cyan());
            println!("Driver:   {}", network["Driver"].as_str().unwrap_or("-"));
            for config in network["IPAM"]["Config"].as_array().into_iter().flatten() {
                println!(
                    "Subnet:   {}  Gateway: {}",
                    config["Subnet"].as_str().unwrap_or("-"),
                    config["Gateway"].as_str().unwrap_or("-")
                );
            }
            println!();
            print_table(&endpoint_rows(&network), &network, format)?;
        }
    }

    Ok(())
}

/// Containers attached to a network, from `docker network inspect` output
fn endpoint_rows(network: &Value) -> Vec<EndpointRow> {
    let Some(containers) = network["Containers"].as_object() else {
        return Vec::new();
    };

    let mut rows: Vec<EndpointRow> = containers
        .values()
        .map(|endpoint| EndpointRow {
            name: endpoint["Name"].as_str().unwrap_or("-").to_string(),
            ipv4: endpoint["IPv4Address"].as_str().unwrap_or("-").to_string(),
            mac: endpoint["MacAddress"].as_str().unwrap_or("-").to_string(),
        })
        .collect();
    rows.sort_by(|a, b| a.name.cmp(&b.name));
    rows
}
