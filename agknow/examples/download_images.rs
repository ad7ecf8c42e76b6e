use std::path::PathBuf;
use std::time::Duration;

use agknow::commons::console::ConsoleDisplay;
use agknow::commons::logging::init_logging;
use agknow::geometric::georeference::export;
use agknow::{ParcelDownloadMode, Product, Session, Settings};
use anyhow::{bail, Context, Result};

/// Example: download the NDVI images of every parcel and write them as GeoTIFF
///
/// Usage: download_images [settings.toml] [output dir]
fn main() -> Result<()> {
    init_logging(Some("warn"));

    let mut args = std::env::args().skip(1);
    let settings = match args.next() {
        Some(path) => Settings::load(path.as_ref())
            .with_context(|| format!("Failed to load settings from {}", path))?,
        None => Settings::default(),
    }
    .with_env_overrides();
    let output = PathBuf::from(args.next().unwrap_or_else(|| "./output".to_string()));

    let settings = Settings {
        parcel_download_mode: ParcelDownloadMode::AllAtOnce,
        download_images: true,
        working_epsg: 3857,
        ..settings
    };

    let mut session = Session::with_gdal(settings, ConsoleDisplay::new());
    session.set_product(Product::Ndvi)?;
    session.connect()?;
    if !session.wait_idle(Duration::from_secs(600)) {
        bail!("Download did not finish within 10 minutes");
    }
    if !session.is_connected() {
        bail!("Not connected, see the messages above");
    }

    println!("{} parcels loaded", session.parcels().len());
    std::fs::create_dir_all(&output)?;
    session
        .parcels()
        .save_geojson(&output.join("parcels.geojson"))?;

    let rasters: Vec<_> = session
        .display()
        .rasters()
        .map(|(name, resource)| (name.replace('|', "_"), resource.clone()))
        .collect();
    for (name, resource) in rasters {
        let path = output.join(format!("{}.tif", name));
        export(&resource, &path)?;
        println!("  {}", path.display());
    }

    Ok(())
}
