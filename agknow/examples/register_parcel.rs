use agknow::commons::logging::init_logging;
use agknow::worker::{RegisterParcelTask, TaskOutcome, TaskOutput, TaskRunner};
use agknow::{AgknowCollect, ParcelRegistration, RegistrationOutcome, Settings};
use anyhow::{bail, Result};

/// Example: register a parcel through a background task
///
/// The geometry is given in Web Mercator and sent to the API in WGS84.
fn main() -> Result<()> {
    init_logging(None);

    let settings = Settings::default().with_env_overrides();
    settings.validate()?;
    let api = AgknowCollect::from_settings(&settings)?;

    let registration = ParcelRegistration {
        crop: "maize".to_string(),
        name: "example field".to_string(),
        entity: "agknow-rs".to_string(),
        planting: "2019-04-01".to_string(),
        harvest: "2019-09-30".to_string(),
        geometry_wkt: "POLYGON((1181167 5677253,1182280 5677253,1182280 5678833,1181167 5678833,1181167 5677253))"
            .to_string(),
        geometry_epsg: 3857,
    };

    let runner = TaskRunner::new().start(Box::new(RegisterParcelTask { api, registration }));
    let (_idle, outcome) = runner.finish();

    match outcome {
        TaskOutcome::Finished(TaskOutput::Registration(RegistrationOutcome::Registered { parcel_id })) => {
            println!("Registered parcel {}", parcel_id);
        }
        TaskOutcome::Finished(TaskOutput::Registration(RegistrationOutcome::Rejected { message })) => {
            println!("Registration rejected: {}", message);
        }
        TaskOutcome::Finished(other) => bail!("unexpected {} output", other.kind()),
        TaskOutcome::Failed(message) => bail!(message),
    }

    Ok(())
}
