//! Console-only subscriber setup for tests and local development, without
//! requiring an external OTEL collector.

use opentelemetry::global;
use opentelemetry_sdk::trace::{self, RandomIdGenerator, Sampler, SdkTracerProvider};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub type Result<T> = core::result::Result<T, Box<dyn std::error::Error>>;

pub const TRACER_NAME: &str = "roster-test-tracer";

pub async fn build_subscriber() -> Result<trace::SdkTracerProvider> {
    let provider = init_stdout_provider()?;
    let tracer = global::tracer(TRACER_NAME);

    // several tests can share one binary; only the first init wins and the
    // rest keep the already-installed subscriber
    _ = tracing_subscriber::registry()
        .with(EnvFilter::new(
            "verified_roster_server=trace,tower_http=debug,axum=debug,info",
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true),
        )
        .with(tracing_opentelemetry::layer().with_tracer(tracer))
        .try_init();

    Ok(provider)
}

fn init_stdout_provider() -> Result<trace::SdkTracerProvider> {
    let exporter = opentelemetry_stdout::SpanExporter::default();
    let provider = SdkTracerProvider::builder()
        .with_simple_exporter(exporter)
        .with_id_generator(RandomIdGenerator::default())
        .with_sampler(Sampler::AlwaysOn)
        .build();

    global::set_tracer_provider(provider.clone());
    Ok(provider)
}

pub fn destroy_tracer(provider: SdkTracerProvider) {
    if let Err(err) = provider.shutdown() {
        eprintln!("error during tracer provider shutdown: {:#?}", err);
    }
}
