//! Image and volume CLI commands

use anyhow::Result;
use tabled::Tabled;

use crate::client::{ApiClient, Image, MessageResponse, Volume};
use crate::output::{print_json, print_success, print_table, OutputFormat};

/// Row for the image table
#[derive(Tabled)]
struct ImageRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Repository")]
    repository: String,
    #[tabled(rename = "Tag")]
    tag: String,
    #[tabled(rename = "Size")]
    size: String,
    #[tabled(rename = "Created")]
    created: String,
}

/// Row for the volume table
#[derive(Tabled)]
struct VolumeRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Driver")]
    driver: String,
    #[tabled(rename = "Mountpoint")]
    mountpoint: String,
}

pub async fn list_images(client: &ApiClient, vm: &str, format: OutputFormat) -> Result<()> {
    let images: Vec<Image> = client.get(&["api", "vms", vm, "images"]).await?;

    let rows: Vec<ImageRow> = images
        .iter()
        .map(|i| ImageRow {
            id: i.id.clone(),
            repository: i.repository.clone(),
            tag: i.tag.clone(),
            size: i.size.clone(),
            created: i.created_since.clone(),
        })
        .collect();

    print_table(&rows, &images, format)
}

pub async fn remove_image(
    client: &ApiClient,
    vm: &str,
    image: &str,
    format: OutputFormat,
) -> Result<()> {
    let response: MessageResponse = client.delete(&["api", "vms", vm, "images", image]).await?;
    report(&response, format)
}

pub async fn list_volumes(client: &ApiClient, vm: &str, format: OutputFormat) -> Result<()> {
    let volumes: Vec<Volume> = client.get(&["api", "vms", vm, "volumes"]).await?;

    let rows: Vec<VolumeRow> = volumes
        .iter()
        .map(|v| VolumeRow {
            name: v.name.clone(),
            driver: v.driver.clone(),
            mountpoint: v.mountpoint.clone(),
        })
        .collect();

    print_table(&rows, &volumes, format)
}

pub async fn remove_volume(
    client: &ApiClient,
    vm: &str,
    volume: &str,
    format: OutputFormat,
) -> Result<()> {
    let response: MessageResponse = client
        .delete(&["api", "vms", vm, "volumes", volume])
        .await?;
    report(&response, format)
}

/// Print a mutation result with Docker's own output underneath
pub(crate) fn report(response: &MessageResponse, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(response)?,
        OutputFormat::Table => {
            print_success(&response.message);
            if !response.output.is_empty() {
                println!("{}", response.output);
            }
        }
    }
    Ok(())
}
