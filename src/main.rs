use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use sensesafe::api::{HttpApi, SenseSafeApi};
use sensesafe::auth::{self, RegistrationOutcome};
use sensesafe::emergency::{trigger_emergency, EmergencyOutcome};
use sensesafe::guard::{self, Route};
use sensesafe::location_view::{list_parents, list_patients, load_location_view, select_patient};
use sensesafe::map_view::{serve_map, MapViewState};
use sensesafe::model::{Credentials, RecordType, UserSummary};
use sensesafe::platform::{
    CommandDialer, ConsoleNotifier, FixedLocation, LocationProvider, Notifier, Platform,
    SystemIdentity, TerminalPermission, TermuxLocation,
};
use sensesafe::registration::{PrefillOutcome, RegistrationForm};
use sensesafe::reporter::{LocationReporter, ReporterConfig, ReporterState};
use sensesafe::session::{SessionManager, SessionState};
use sensesafe::storage::JsonFileStore;

mod config;

use config::Config;

#[derive(Parser, Debug)]
#[command(name = "sensesafe")]
#[command(about = "SenseSafe client - patient location reporting and parent monitoring", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (default: <config_dir>/sensesafe/config.json)
    #[arg(long, global = true, env = "SENSESAFE_CONFIG")]
    config: Option<PathBuf>,

    /// Backend base URL, overrides the config file
    #[arg(long, global = true, env = "SENSESAFE_BASE_URL")]
    base_url: Option<String>,

    /// Session store file, overrides the config file
    #[arg(long, global = true)]
    storage: Option<PathBuf>,

    /// Grant the location permission prompt without asking
    #[arg(short = 'y', long, global = true)]
    assume_yes: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in and store the session
    Login {
        email: String,

        #[arg(long, env = "SENSESAFE_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Create a patient or parent account
    Register(RegisterArgs),
    /// Sign out and delete the stored session
    Logout,
    /// Show the current session and where it lands
    Status,
    /// List patients linked to this parent
    Patients,
    /// List parents linked to this patient
    Parents,
    /// Print a patient's latest location
    Locate {
        /// Patient id, email or name (optional with a single linked patient)
        patient: Option<String>,
    },
    /// Serve a map of a patient's latest location
    View {
        patient: Option<String>,

        #[arg(long)]
        port: Option<u16>,
    },
    /// Report this device's location until interrupted
    Report {
        /// Seconds between reports
        #[arg(long)]
        interval: Option<u64>,
    },
    /// Call the first linked parent with a phone number
    Emergency,
    /// Show the device information a patient registration would use
    Device,
}

#[derive(Args, Debug)]
struct RegisterArgs {
    /// PATIENT or PARENT
    #[arg(long, default_value = "patient")]
    role: RecordType,

    #[arg(long)]
    first_name: String,

    #[arg(long)]
    last_name: String,

    #[arg(long)]
    email: String,

    #[arg(long, env = "SENSESAFE_PASSWORD", hide_env_values = true)]
    password: String,

    /// Linked parent's account email (patients)
    #[arg(long)]
    parent_email: Option<String>,

    /// Contact number (parents)
    #[arg(long)]
    phone_number: Option<String>,

    /// Device fields; detected from the device when omitted
    #[arg(long)]
    serial_number: Option<String>,

    #[arg(long)]
    device_name: Option<String>,

    #[arg(long, allow_hyphen_values = true)]
    latitude: Option<String>,

    #[arg(long, allow_hyphen_values = true)]
    longitude: Option<String>,
}

impl RegisterArgs {
    fn has_device_info(&self) -> bool {
        self.serial_number.is_some()
            && self.device_name.is_some()
            && self.latitude.is_some()
            && self.longitude.is_some()
    }
}

/// Everything a command needs, built once per invocation.
struct Client {
    config: Config,
    api: Arc<HttpApi>,
    platform: Platform,
    session: SessionManager,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let notifier = ConsoleNotifier;

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            notifier.alert("Error", &format!("{e:#}"));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_file = match &cli.config {
        Some(path) => path.clone(),
        None => Config::default_config_file()?,
    };
    let mut config = Config::load_from(&config_file)?;
    if let Some(base_url) = &cli.base_url {
        config.base_url = base_url.clone();
    }
    if let Some(storage) = &cli.storage {
        config.storage_path = Some(storage.clone());
    }

    let client = connect(config, cli.assume_yes).await?;

    match cli.command {
        Command::Login { email, password } => login(&client, email, password).await,
        Command::Register(args) => register(&client, args).await,
        Command::Logout => logout(&client).await,
        Command::Status => status(&client),
        Command::Patients => patients(&client).await,
        Command::Parents => parents(&client).await,
        Command::Locate { patient } => locate(&client, patient.as_deref()).await,
        Command::View { patient, port } => view(&client, patient.as_deref(), port).await,
        Command::Report { interval } => report(&client, interval).await,
        Command::Emergency => emergency(&client).await,
        Command::Device => device(&client).await,
    }
}

async fn connect(config: Config, assume_yes: bool) -> Result<Client> {
    let storage_file = config.storage_file()?;
    log::debug!("[cli] session store {}", storage_file.display());

    let session = SessionManager::new(Arc::new(JsonFileStore::new(storage_file)));
    let state = session.initialize().await;

    let api = Arc::new(HttpApi::new(
        &config.base_url,
        &config.cookie_name,
        Duration::from_secs(config.request_timeout_secs),
    ));
    api.set_token(state.token.clone());

    let location: Arc<dyn LocationProvider> = match config.fixed_position {
        Some(position) => Arc::new(FixedLocation {
            latitude: position.latitude,
            longitude: position.longitude,
        }),
        None => Arc::new(TermuxLocation),
    };
    let platform = Platform {
        permission: Arc::new(TerminalPermission::new(assume_yes)),
        location,
        identity: Arc::new(SystemIdentity),
        dialer: Arc::new(CommandDialer),
        notifier: Arc::new(ConsoleNotifier),
    };

    Ok(Client {
        config,
        api,
        platform,
        session,
    })
}

fn print_landing(state: &SessionState) {
    match guard::route_for(state) {
        Some(route) => println!("-> {}", route.title()),
        None => println!("-> verifying authentication..."),
    }
}

fn print_user(user: &UserSummary) {
    let phone = user.phone_number.as_deref().unwrap_or("-");
    println!(
        "  {:>6}  {:<28} {:<32} {}",
        user.id,
        user.display_name(),
        user.email,
        phone
    );
}

fn signed_in(client: &Client, state: &SessionState) {
    client.api.set_token(state.token.clone());
    if let Some(payload) = &state.payload {
        println!(
            "Signed in as {} ({})",
            payload.email.email,
            payload.record_type()
        );
    }
    print_landing(state);
}

/// Check `route` against the guard before running a command for it.
fn enter(state: &SessionState, route: Route) -> Result<()> {
    guard::enter(state, route).with_context(|| format!("{} is not available", route.title()))
}

async fn login(client: &Client, email: String, password: String) -> Result<()> {
    enter(&client.session.current(), Route::Login)?;
    let credentials = Credentials {
        email: email.trim().to_string(),
        password,
    };

    let state = auth::login(client.api.as_ref(), &client.session, &credentials)
        .await
        .context("Login failed")?;
    signed_in(client, &state);
    Ok(())
}

async fn register(client: &Client, args: RegisterArgs) -> Result<()> {
    enter(&client.session.current(), Route::Registration)?;
    let mut form = RegistrationForm {
        first_name: args.first_name.clone(),
        last_name: args.last_name.clone(),
        email: args.email.clone(),
        password: args.password.clone(),
        record_type: args.role,
        parent_email: args.parent_email.clone().unwrap_or_default(),
        phone_number: args.phone_number.clone().unwrap_or_default(),
        ..Default::default()
    };

    if args.role == RecordType::Patient && !args.has_device_info() {
        let outcome = form.prefill_device_info(&client.platform).await;
        log::info!("[cli] device prefill: {outcome:?}");
    }
    if let Some(serial_number) = args.serial_number {
        form.serial_number = serial_number;
    }
    if let Some(device_name) = args.device_name {
        form.device_name = device_name;
    }
    if let Some(latitude) = args.latitude {
        form.latitude = latitude;
    }
    if let Some(longitude) = args.longitude {
        form.longitude = longitude;
    }

    let outcome = auth::register(client.api.as_ref(), &client.session, &form)
        .await
        .context("Registration failed")?;
    println!("Registered {} account {}", form.record_type, form.email.trim());

    match outcome {
        RegistrationOutcome::SignedIn(state) => signed_in(client, &state),
        RegistrationOutcome::Registered => {
            println!("Sign in with `sensesafe login {}`", form.email.trim())
        }
    }
    Ok(())
}

async fn logout(client: &Client) -> Result<()> {
    client
        .session
        .teardown()
        .await
        .context("Failed to delete the stored session")?;
    client.api.set_token(None);
    println!("Signed out");
    print_landing(&client.session.current());
    Ok(())
}

fn status(client: &Client) -> Result<()> {
    let state = client.session.current();
    println!("Server: {}", client.api.base_url());
    match &state.payload {
        Some(payload) => {
            println!("User:    {} (id {})", payload.email.email, payload.user_id());
            println!("Role:    {}", payload.record_type());
            println!("Session: {}", payload.email.session_id);
            println!("Expires: {}", payload.email.expires_at.to_rfc3339());
        }
        None => println!("Not signed in"),
    }
    print_landing(&state);
    Ok(())
}

async fn patients(client: &Client) -> Result<()> {
    let state = client.session.current();
    enter(&state, Route::UserSelection)?;
    let patients = list_patients(client.api.as_ref(), &state).await?;
    println!("{} ({} linked)", Route::UserSelection.title(), patients.len());
    patients.iter().for_each(print_user);
    Ok(())
}

async fn parents(client: &Client) -> Result<()> {
    let state = client.session.current();
    enter(&state, Route::PatientHome)?;
    let parents = list_parents(client.api.as_ref(), &state).await?;
    println!("Linked parents ({})", parents.len());
    parents.iter().for_each(print_user);
    Ok(())
}

async fn chosen_patient(client: &Client, query: Option<&str>) -> Result<(SessionState, UserSummary)> {
    let state = client.session.current();
    enter(&state, Route::ViewLocation)?;
    let patients = list_patients(client.api.as_ref(), &state).await?;
    let patient = select_patient(&patients, query)?.clone();
    Ok((state, patient))
}

async fn locate(client: &Client, query: Option<&str>) -> Result<()> {
    let (state, patient) = chosen_patient(client, query).await?;
    let view = load_location_view(client.api.as_ref(), &state, &patient)
        .await
        .with_context(|| format!("Could not load the location of {}", patient.display_name()))?;

    println!("{}", view.marker.title);
    println!("  latitude:  {:.6}", view.sample.latitude);
    println!("  longitude: {:.6}", view.sample.longitude);
    if let Some(timestamp) = &view.sample.timestamp {
        println!("  reported:  {timestamp}");
    }
    println!(
        "  https://www.openstreetmap.org/?mlat={0}&mlon={1}#map=15/{0}/{1}",
        view.sample.latitude, view.sample.longitude
    );
    Ok(())
}

async fn view(client: &Client, query: Option<&str>, port: Option<u16>) -> Result<()> {
    let (session, patient) = chosen_patient(client, query).await?;
    let api: Arc<dyn SenseSafeApi> = client.api.clone();
    let state = MapViewState {
        api,
        session,
        patient,
        refresh: Duration::from_secs(client.config.map_refresh_secs.max(1)),
    };
    let port = port.unwrap_or(client.config.map_port);
    println!("Map at http://localhost:{port} (Ctrl-C to stop)");
    serve_map(state, port)
        .await
        .with_context(|| format!("Map server on port {port} failed"))
}

async fn report(client: &Client, interval: Option<u64>) -> Result<()> {
    let state = client.session.current();
    enter(&state, Route::PatientHome)?;
    let interval = interval.unwrap_or(client.config.report_interval_secs).max(1);
    let api: Arc<dyn SenseSafeApi> = client.api.clone();
    let reporter = LocationReporter::new(
        api,
        client.platform.clone(),
        ReporterConfig {
            interval: Duration::from_secs(interval),
            status_path: client.config.status_path.clone(),
        },
    );

    let handle = reporter.activate(&state)?;
    println!("Reporting location every {interval}s (Ctrl-C to stop)");

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
        }
        stopped = handle.stopped() => {
            if stopped == ReporterState::Idle {
                bail!("Location permission was not granted");
            }
        }
    }

    let status = handle.deactivate().await;
    println!(
        "Stopped after {} ticks: {} submitted, {} skipped, {} failed",
        status.ticks, status.submitted, status.skipped, status.failed
    );
    Ok(())
}

async fn emergency(client: &Client) -> Result<()> {
    let state = client.session.current();
    enter(&state, Route::PatientHome)?;
    match trigger_emergency(client.api.as_ref(), &client.platform, &state).await? {
        EmergencyOutcome::Dialed { parent, url } => {
            println!("Calling {} ({url})", parent.display_name());
        }
        EmergencyOutcome::NoContact => bail!("No emergency contact available"),
    }
    Ok(())
}

async fn device(client: &Client) -> Result<()> {
    enter(&client.session.current(), Route::Registration)?;
    let mut form = RegistrationForm::default();
    let outcome = form.prefill_device_info(&client.platform).await;

    println!("Device name: {}", form.device_name);
    println!("Identifier:  {}", form.serial_number);
    match outcome {
        PrefillOutcome::Filled => {
            println!("Latitude:    {}", form.latitude);
            println!("Longitude:   {}", form.longitude);
        }
        other => println!("Location:    unavailable ({other:?})"),
    }
    Ok(())
}
