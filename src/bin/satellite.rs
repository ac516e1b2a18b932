use std::time::Duration;

use fleet_arbiter::{
    DaemonEvent, ManagedConfigurations, PingResponse, PushRequest, PushResponse, StopRequest,
    links::{DaemonType, SECRET_HEADER},
    satellite::SatelliteState,
    util::{get_addr, get_daemon_type, get_port, get_secret},
};
use rocket::{
    Shutdown, State,
    figment::Figment,
    get,
    http::Status,
    launch, post,
    request::{FromRequest, Outcome},
    routes,
    serde::json::Json,
};
use tracing::{info, instrument, level_filters::LevelFilter, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[get("/ping")]
fn ping(_secret: SecretKey, satellite: &State<SatelliteState>) -> Json<PingResponse> {
    Json(satellite.ping())
}

#[get("/managed_configurations")]
fn managed_configurations(
    _secret: SecretKey,
    satellite: &State<SatelliteState>,
) -> Json<ManagedConfigurations> {
    Json(satellite.managed_configurations())
}

#[post("/push_configuration", data = "<request>")]
#[instrument(skip_all)]
fn push_configuration(
    _secret: SecretKey,
    satellite: &State<SatelliteState>,
    request: Json<PushRequest>,
) -> Json<PushResponse> {
    Json(satellite.push(request.into_inner()))
}

#[post("/wait_new_conf")]
fn wait_new_conf(_secret: SecretKey, satellite: &State<SatelliteState>) {
    satellite.wait_new_conf();
}

#[post("/do_not_run")]
fn do_not_run(_secret: SecretKey, satellite: &State<SatelliteState>) -> Status {
    if satellite.do_not_run() {
        Status::Ok
    } else {
        Status::BadRequest
    }
}

#[get("/events")]
fn events(_secret: SecretKey, satellite: &State<SatelliteState>) -> Json<Vec<DaemonEvent>> {
    Json(satellite.drain_events())
}

#[post("/stop_request", data = "<request>")]
fn stop_request(_secret: SecretKey, shutdown: Shutdown, request: Json<StopRequest>) {
    if request.stop_now {
        warn!("immediate stop requested");
        tokio::spawn(async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            std::process::exit(0);
        });
    } else {
        info!("stop requested");
        shutdown.notify();
    }
}

fn init() {
    dotenv::dotenv().ok();

    let filter = filter::Targets::new().with_targets(vec![
        ("satellite", LevelFilter::DEBUG),
        ("fleet_satellite", LevelFilter::DEBUG),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

fn get_config(daemon_type: DaemonType) -> Figment {
    rocket::Config::figment()
        .merge(("port", get_port(daemon_type)))
        .merge(("address", get_addr()))
        .merge(("workers", 1))
}

#[launch]
fn rocket() -> _ {
    init();
    let daemon_type = get_daemon_type();
    info!("starting {daemon_type} satellite");

    rocket::custom(get_config(daemon_type))
        .manage(SatelliteState::new(daemon_type))
        .mount(
            "/",
            routes![
                ping,
                managed_configurations,
                push_configuration,
                wait_new_conf,
                do_not_run,
                events,
                stop_request
            ],
        )
}

#[derive(Debug)]
struct SecretKey;

#[rocket::async_trait]
impl<'r> FromRequest<'r> for SecretKey {
    type Error = ();

    async fn from_request(request: &'r rocket::Request<'_>) -> Outcome<Self, Self::Error> {
        let Some(secret) = get_secret() else {
            return Outcome::Success(SecretKey);
        };

        match request.headers().get_one(SECRET_HEADER) {
            Some(passed_secret) if passed_secret == secret => Outcome::Success(SecretKey),
            _ => Outcome::Error((Status::Unauthorized, ())),
        }
    }
}
