//! A virtual light plugin served by a Device Connect Manager.
//!
//! The light exposes the `light` profile along with an `onChange` event
//! stream, and the manager is reachable over `HTTP`.

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use dconnect::api::{ApiPath, ApiSpec};
use dconnect::parameters::{ParameterKind, ParameterSpecs};
use dconnect::response::ResultParameters;

use dconnect_manager::config::{ManagerConfig, OAuthConfig};
use dconnect_manager::oauth::ApproveAll;
use dconnect_manager::service::{ApiContext, HandlerError, NetworkType, Profile, Service};
use dconnect_manager::{Manager, ManagerBuilder};

use dconnect_server::Server;
use dconnect_server::server::{DEFAULT_ADDRESS, DEFAULT_PORT};

use clap::Parser;

use tokio::sync::Mutex;

use tracing::{Level, info, warn};

const SERVICE_ID: &str = "virtual-light";
const ON_CHANGE: &str = "onChange";
const MAX_BRIGHTNESS: i64 = 100;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Server address.
    #[arg(long, default_value_t = DEFAULT_ADDRESS)]
    address: IpAddr,

    /// Server port.
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// A `JSON` manager configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory where clients, tokens and subscriptions are stored.
    #[arg(long)]
    storage_dir: Option<PathBuf>,

    /// Directory of profile schemas to register.
    #[arg(long)]
    schemas: Option<PathBuf>,

    /// Disables the access token checks.
    #[arg(long)]
    disable_oauth: bool,

    /// Approves every token request without asking.
    #[arg(long)]
    approve_all: bool,

    /// Logs debug messages.
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy)]
struct LightState {
    on: bool,
    brightness: i64,
}

type SharedState = Arc<Mutex<LightState>>;

fn state_payload(state: &LightState) -> ResultParameters {
    ResultParameters::new()
        .with("on", state.on)
        .with("brightness", state.brightness)
}

async fn notify(
    context: &ApiContext,
    payload: ResultParameters,
) -> Result<ResultParameters, HandlerError> {
    context
        .events
        .publish(context.event_key(ApiPath::attribute(ON_CHANGE)), payload.clone())
        .await
        .map_err(|e| HandlerError::new(e.to_string()))?;
    Ok(payload)
}

fn light_profile(state: &SharedState) -> dconnect_manager::error::Result<Profile> {
    let get_state = Arc::clone(state);
    let on_state = Arc::clone(state);
    let off_state = Arc::clone(state);

    Profile::new("light")
        .api(
            ApiSpec::get(ApiPath::root()).description("Returns the light status"),
            move |_| {
                let state = Arc::clone(&get_state);
                async move { Ok(state_payload(&*state.lock().await)) }
            },
        )?
        .api(
            ApiSpec::post(ApiPath::root())
                .description("Turns the light on")
                .with_parameters(
                    ParameterSpecs::new().optional("brightness", ParameterKind::Integer),
                ),
            move |context| {
                let state = Arc::clone(&on_state);
                async move {
                    let payload = {
                        let mut state = state.lock().await;
                        state.on = true;
                        if let Some(brightness) = context.params.get_i64("brightness") {
                            state.brightness = brightness.clamp(0, MAX_BRIGHTNESS);
                        }
                        state_payload(&state)
                    };
                    info!("Light turned on");
                    notify(&context, payload).await
                }
            },
        )?
        .api(
            ApiSpec::delete(ApiPath::root()).description("Turns the light off"),
            move |context| {
                let state = Arc::clone(&off_state);
                async move {
                    let payload = {
                        let mut state = state.lock().await;
                        state.on = false;
                        state_payload(&state)
                    };
                    info!("Light turned off");
                    notify(&context, payload).await
                }
            },
        )?
        .event(ApiPath::attribute(ON_CHANGE))
}

async fn manager(cli: &Cli) -> dconnect_manager::error::Result<Manager> {
    let mut config = match &cli.config {
        Some(path) => ManagerConfig::from_file(path).await?,
        None => ManagerConfig::default(),
    };
    if let Some(storage_dir) = &cli.storage_dir {
        config = config.storage_dir(storage_dir);
    }
    if cli.disable_oauth {
        config = config.oauth(OAuthConfig::default().disabled());
    }

    let mut builder = ManagerBuilder::new(config);
    if cli.approve_all {
        warn!("Every token request will be approved");
        builder = builder.confirmation_ui(ApproveAll);
    }
    let manager = builder.build().await?;

    if let Some(schemas) = &cli.schemas {
        let profiles = manager.load_schemas(schemas).await?;
        info!("Registered {} profile schemas", profiles.len());
    }

    let state = Arc::new(Mutex::new(LightState {
        on: false,
        brightness: MAX_BRIGHTNESS,
    }));
    manager
        .add_service(
            Service::new(SERVICE_ID, "Virtual Light")
                .network_type(NetworkType::Virtual)
                .profile(light_profile(&state)?)?,
        )
        .await?;

    Ok(manager)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose {
            Level::DEBUG
        } else {
            Level::INFO
        })
        .init();

    let manager = Arc::new(manager(&cli).await?);

    let result = Server::new(Arc::clone(&manager))
        .address(cli.address)
        .port(cli.port)
        .run()
        .await;

    manager.shutdown().await;
    result?;
    Ok(())
}
