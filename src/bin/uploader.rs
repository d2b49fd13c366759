use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use clap::Parser;
use log::{error, info};

use edgesense::{AppConfig, AppError, UploadConfig};

/// Uploads finished CSV files to blob storage, marking each with a `.ok`
/// file so it is pushed exactly once.
#[derive(Parser)]
#[command(name = "uploader", about = "Upload collector CSV files to blob storage")]
struct Args {
    /// Run one upload pass and exit
    #[arg(long)]
    once: bool,
    /// Path to the collector configuration file
    #[arg(long, default_value = "config.json")]
    config: String,
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let args = Args::parse();

    let config = AppConfig::load_from_file(&args.config)
        .unwrap_or_else(|e| panic!("Failed to load config: {e}"));
    let Some(upload) = config.upload.clone() else {
        panic!("Config has no upload section");
    };

    let client = reqwest::Client::new();
    if args.once {
        match upload_once(&client, &config, &upload).await {
            Ok(uploaded) => {
                println!("Uploaded {uploaded} files.");
                info!("uploader ran once, uploaded {uploaded} files");
            }
            Err(e) => {
                error!("upload error: {e}");
                std::process::exit(1);
            }
        }
        return;
    }

    loop {
        if let Err(e) = upload_once(&client, &config, &upload).await {
            error!("upload error: {e}");
        }
        tokio::time::sleep(Duration::from_secs(upload.interval_seconds)).await;
    }
}

async fn upload_once(
    client: &reqwest::Client,
    config: &AppConfig,
    upload: &UploadConfig,
) -> Result<usize, AppError> {
    let mut uploaded = 0;
    for path in candidates(&config.data_dir)? {
        let marker = ok_marker(&path);
        if marker.exists() {
            continue;
        }

        let blob = blob_path(upload, &config.device.id, &path);
        let url = format!(
            "{}/{}/{}?{}",
            upload.account_url.trim_end_matches('/'),
            upload.container,
            blob,
            upload.sas_token.trim_start_matches('?'),
        );
        let body = tokio::fs::read(&path)
            .await
            .map_err(|e| AppError::Upload(format!("read {}: {e}", path.display())))?;
        let response = client
            .put(&url)
            .header("x-ms-blob-type", "BlockBlob")
            .body(body)
            .send()
            .await
            .map_err(|e| AppError::Upload(format!("put {blob}: {e}")))?;
        if !response.status().is_success() {
            return Err(AppError::Upload(format!(
                "{} -> HTTP {}",
                path.display(),
                response.status()
            )));
        }

        tokio::fs::write(&marker, Utc::now().to_rfc3339())
            .await
            .map_err(|e| AppError::Upload(format!("marker {}: {e}", marker.display())))?;
        uploaded += 1;
        info!("uploaded {} as {blob}", path.display());
    }
    if uploaded > 0 {
        info!("total files uploaded: {uploaded}");
    }
    Ok(uploaded)
}

fn candidates(dir: &Path) -> Result<Vec<PathBuf>, AppError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| AppError::Upload(format!("read {}: {e}", dir.display())))?;
    let mut files: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "csv"))
        .collect();
    files.sort();
    Ok(files)
}

fn ok_marker(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".ok");
    PathBuf::from(name)
}

/// Blob name under the container: `[prefix/]device_id/filename`.
fn blob_path(upload: &UploadConfig, device_id: &str, local: &Path) -> String {
    let file_name = local
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let prefix = upload.prefix.trim_matches('/');
    let mut parts: Vec<&str> = Vec::new();
    if !prefix.is_empty() {
        parts.push(prefix);
    }
    if !device_id.is_empty() {
        parts.push(device_id);
    }
    parts.push(&file_name);
    parts.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload_config(prefix: &str) -> UploadConfig {
        UploadConfig {
            account_url: "https://acct.blob.core.windows.net".to_string(),
            sas_token: "sv=token".to_string(),
            container: "stable-sensing".to_string(),
            prefix: prefix.to_string(),
            interval_seconds: 300,
        }
    }

    #[test]
    fn blob_path_joins_prefix_device_and_name() {
        let path = blob_path(
            &upload_config("field/site-a"),
            "pi-node-01",
            Path::new("/mnt/usb-data/2026-08-07_pi-node-01.csv"),
        );
        assert_eq!(path, "field/site-a/pi-node-01/2026-08-07_pi-node-01.csv");
    }

    #[test]
    fn blob_path_skips_an_empty_prefix() {
        let path = blob_path(&upload_config(""), "pi-node-01", Path::new("data.csv"));
        assert_eq!(path, "pi-node-01/data.csv");
    }

    #[test]
    fn marker_appends_ok_to_the_full_name() {
        assert_eq!(
            ok_marker(Path::new("/data/file.csv")),
            PathBuf::from("/data/file.csv.ok")
        );
    }
}
