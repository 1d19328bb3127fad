use std::sync::{Arc, Mutex};

use actix_web::{
    get, middleware, post,
    web::{self, Data},
    App, HttpRequest, HttpResponse, HttpServer, Responder,
};
use fleetnetd_trace::init::{prepare_tracing, TraceConfig};
use k8s_openapi::api::core::v1::Pod;
use kube::{core::admission::AdmissionReview, Client};
use prometheus::{Encoder, TextEncoder};

use super::{
    cloud::{self, aws_nlb},
    config::Config,
    context::State,
    error::Error,
    metrics::Metrics,
    network::{handshake::PollPolicy, plugin::PluginManager},
    reconciler, tls, webhook,
};

pub fn start(config: Config, trace: TraceConfig) -> Result<(), Error> {
    config.validate()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(Error::StdIo)?
        .block_on(run(config, trace))
}

#[tracing::instrument(skip_all)]
async fn run(config: Config, trace_config: TraceConfig) -> Result<(), Error> {
    prepare_tracing(trace_config).map_err(Error::Trace)?;

    // Configure TLS settings
    let server_config = tls::server_config(&config.tls.cert, &config.tls.key)?;

    // Controller state shared with the web server
    let state = State::new("fleetnetd");
    let metrics = Metrics::default()
        .register(&state.registry)
        .map_err(Error::Prometheus)?;
    let metrics = Arc::new(Mutex::new(metrics));

    let client = Client::try_default().await.map_err(Error::Kube)?;

    let plugins = cloud::build_plugins(&config, client.clone(), metrics.clone())?;

    // Start web server
    let server_state = state.clone();
    let server_plugins = plugins.clone();
    let server = HttpServer::new(move || {
        App::new()
            .app_data(Data::new(server_state.clone()))
            .app_data(Data::new(server_plugins.clone()))
            .service(index)
            .service(health)
            .service(ready)
            .service(metrics_)
            .service(pod_mutating_webhook)
            .wrap(
                middleware::Logger::default()
                    .exclude("/healthz")
                    .exclude("/readyz"),
            )
    })
    .bind_rustls_021(
        format!("{}:{}", config.endpoint, config.https_port),
        server_config,
    )
    .map_err(Error::StdIo)?
    .bind(format!("{}:{}", config.endpoint, config.http_port))
    .map_err(Error::StdIo)?
    .shutdown_timeout(5);

    // Pods are handled only after allocations are rebuilt from existing Services.
    let startup_state = state.clone();
    let interval = config.requeue_interval;
    tokio::spawn(async move {
        if let Err(e) = plugins.init_all().await {
            tracing::error!(error=?e, "failed to recover port allocations");
            std::process::exit(1);
        }
        let names = plugins
            .names()
            .into_iter()
            .map(|n| n.to_string())
            .collect::<Vec<String>>();
        startup_state.mark_recovered(names).await;
        tracing::info!(plugins=?plugins.names(), "network plugins are ready");

        if plugins.get(aws_nlb::PLUGIN_NAME).is_some() {
            let tg_state = startup_state.clone();
            let tg_client = client.clone();
            let tg_metrics = metrics.clone();
            tokio::spawn(async move {
                reconciler::target_group::run(
                    tg_state,
                    tg_client,
                    interval,
                    PollPolicy::default(),
                    tg_metrics,
                )
                .await;
            });
        }

        reconciler::pod_watcher::run(startup_state, client, interval, plugins, metrics).await;
    });

    server.run().await.map_err(Error::StdIo)
}

#[get("/healthz")]
async fn health(_: HttpRequest) -> impl Responder {
    HttpResponse::Ok().json("healthy")
}

#[get("/readyz")]
async fn ready(c: Data<State>, _req: HttpRequest) -> impl Responder {
    if c.is_ready().await {
        HttpResponse::Ok().json("ready")
    } else {
        HttpResponse::ServiceUnavailable().json("recovering")
    }
}

#[get("/metrics")]
async fn metrics_(c: Data<State>, _req: HttpRequest) -> impl Responder {
    let metrics = c.metrics();
    let encoder = TextEncoder::new();
    let mut buffer = vec![];
    match encoder.encode(&metrics, &mut buffer) {
        Ok(_) => HttpResponse::Ok().body(buffer),
        Err(e) => {
            tracing::error!(error=?e, "failed to encode metrics");
            HttpResponse::InternalServerError().finish()
        }
    }
}

#[get("/")]
async fn index(c: Data<State>, _req: HttpRequest) -> impl Responder {
    let d = c.diagnostics().await;
    HttpResponse::Ok().json(&d)
}

#[post("/mutate-v1-pod")]
async fn pod_mutating_webhook(
    req: HttpRequest,
    body: web::Json<AdmissionReview<Pod>>,
    plugins: Data<PluginManager>,
) -> impl Responder {
    webhook::pod::handle_mutation(req, body, plugins.get_ref()).await
}
