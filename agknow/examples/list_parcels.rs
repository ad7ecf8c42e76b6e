use agknow::commons::logging::init_logging;
use agknow::{AgknowCollect, ParcelListing, Settings};
use anyhow::{Context, Result};

/// Example: list the parcels of an API key
///
/// Settings come from the TOML file given as first argument, or from the
/// defaults overridden by AGKNOW_HOST_URL, AGKNOW_API_KEY and AGKNOW_API_VERSION.
fn main() -> Result<()> {
    init_logging(None);

    let settings = match std::env::args().nth(1) {
        Some(path) => Settings::load(path.as_ref())
            .with_context(|| format!("Failed to load settings from {}", path))?,
        None => Settings::default(),
    }
    .with_env_overrides();
    settings.validate()?;

    let api = AgknowCollect::from_settings(&settings)?;
    println!("=== Parcels of {} ===\n", api.base_url);

    match api.list_parcels(settings.parcel_limit, 0)? {
        ParcelListing::Parcels(parcels) => {
            for parcel in &parcels {
                println!("  {}", parcel.label());
            }
            println!("\n{} parcels", parcels.len());
        }
        ParcelListing::Empty => println!("No parcels found for this API Key!"),
        ParcelListing::Unauthorized => println!("API key is not authorized!"),
    }

    Ok(())
}
