use std::sync::LazyLock;

use thiserror::Error;
use tokio::sync::OnceCell;

static ENV_VARS: LazyLock<OnceCell<Env>> = LazyLock::new(OnceCell::new);
pub async fn get_var(var: Var) -> EnvResult<&'static str> {
    let vars = ENV_VARS.get_or_try_init(|| async { Env::load() }).await?;
    Ok(match var {
        Var::BotToken => &vars.discord_bot_token,
        Var::GuildId => &vars.guild_id,
        Var::AdminToken => &vars.admin_token,
        Var::RosterPath => &vars.roster_csv_path,
        Var::SnapshotDir => &vars.snapshot_dir,
        Var::ServerApiPort => &vars.server_api_port,
        Var::CorsAllowOrigins => &vars.cors_allow_origins,
        Var::OtelExporterEndpoint => &vars.otel_exporter_otlp_endpoint,
        Var::OtelExporterProto => &vars.otel_exporter_otlp_protocol,
        Var::ApiServiceName => &vars.api_service_name,
        Var::ApiTracerName => &vars.api_tracer_name,
    })
}

#[derive(Debug, Clone)]
pub struct Env {
    pub discord_bot_token: String,
    pub guild_id: String,
    pub admin_token: String,
    pub roster_csv_path: String,
    pub snapshot_dir: String,
    pub server_api_port: String,
    pub cors_allow_origins: String,
    pub otel_exporter_otlp_endpoint: String,
    pub otel_exporter_otlp_protocol: String,
    pub api_service_name: String,
    pub api_tracer_name: String,
}

impl Env {
    pub fn load() -> EnvResult<Self> {
        Ok(Self {
            discord_bot_token: dotenvy::var("DISCORD_BOT_TOKEN")?,
            guild_id: dotenvy::var("GUILD_ID")?,
            admin_token: dotenvy::var("ADMIN_TOKEN")?,
            roster_csv_path: dotenvy::var("ROSTER_CSV_PATH")
                .unwrap_or_else(|_| String::from("users.csv")),
            snapshot_dir: dotenvy::var("SNAPSHOT_DIR").unwrap_or_else(|_| String::from("data")),
            server_api_port: dotenvy::var("SERVER_API_PORT")?,
            cors_allow_origins: dotenvy::var("CORS_ALLOW_ORIGINS")
                .unwrap_or_else(|_| String::from("*")),
            otel_exporter_otlp_endpoint: dotenvy::var("OTEL_EXPORTER_OTLP_ENDPOINT")?,
            otel_exporter_otlp_protocol: dotenvy::var("OTEL_EXPORTER_OTLP_PROTOCOL")?,
            api_service_name: dotenvy::var("API_SERVICE_NAME")?,
            api_tracer_name: dotenvy::var("API_TRACER_NAME")?,
        })
    }
}

#[derive(Debug)]
pub enum Var {
    BotToken,
    GuildId,
    AdminToken,
    RosterPath,
    SnapshotDir,
    ServerApiPort,
    CorsAllowOrigins,
    OtelExporterEndpoint,
    OtelExporterProto,
    ApiServiceName,
    ApiTracerName,
}

#[macro_export]
macro_rules! var {
    ($ev:expr) => {
        $crate::util::env::get_var($ev)
    };
}

pub type EnvResult<T> = core::result::Result<T, EnvErr>;

#[derive(Debug, Error)]
pub enum EnvErr {
    #[error("while fetching .env variables: {0}")]
    Dotenvy(#[from] dotenvy::Error),
}
