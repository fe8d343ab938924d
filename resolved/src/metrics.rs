use actix_web::{get, http::header::ContentType, App, HttpResponse, HttpServer, Responder};
use lazy_static::lazy_static;
use prometheus::{
    histogram_opts, opts, register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge, HistogramVec, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};
use std::net::Ipv4Addr;

use resolver_core::metrics::Outcome;

const RESPONSE_TIME_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.0010, 0.0025, 0.0050, 0.0075, 0.0100, 0.0250, 0.0500, 0.0750, 0.1000,
    0.2500, 0.5000, 0.7500, 1.0000,
];

lazy_static! {
    pub static ref DNS_REQUESTS_TOTAL: IntCounter =
        register_int_counter!(opts!("dns_requests_total", "Total client datagrams received."))
            .unwrap();
    pub static ref DNS_RESPONSES_TOTAL: IntCounterVec = register_int_counter_vec!(
        opts!("dns_responses_total", "Total responses sent, labelled by outcome."),
        &["outcome"]
    )
    .unwrap();
    pub static ref DNS_RESPONSE_TIME_SECONDS: HistogramVec = register_histogram_vec!(
        histogram_opts!(
            "dns_response_time_seconds",
            "Time to answer a query, labelled by outcome.",
            RESPONSE_TIME_BUCKETS.to_vec()
        ),
        &["outcome"]
    )
    .unwrap();
    pub static ref CACHE_SIZE: IntGauge =
        register_int_gauge!(opts!("cache_size", "Number of entries currently in the cache.")).unwrap();
    pub static ref CACHE_SWEEP_EXPIRED_TOTAL: IntCounter = register_int_counter!(opts!(
        "cache_sweep_expired_total",
        "Number of entries removed by the periodic cache sweep."
    ))
    .unwrap();
}

/// Record one answered query: bumps the outcome counter and observes
/// its processing time.
pub fn record_response(outcome: Outcome, elapsed_seconds: f64) {
    DNS_RESPONSES_TOTAL.with_label_values(&[outcome.as_str()]).inc();
    DNS_RESPONSE_TIME_SECONDS
        .with_label_values(&[outcome.as_str()])
        .observe(elapsed_seconds);
}

#[get("/metrics")]
async fn get_metrics() -> impl Responder {
    match TextEncoder::new().encode_to_string(&prometheus::gather()) {
        Ok(body) => HttpResponse::Ok().content_type(ContentType::plaintext()).body(body),
        Err(error) => {
            tracing::error!(?error, "could not encode metrics");
            HttpResponse::InternalServerError()
                .content_type(ContentType::plaintext())
                .body(error.to_string())
        }
    }
}

pub async fn serve_prometheus_endpoint_task(address: Ipv4Addr, port: u16) -> std::io::Result<()> {
    HttpServer::new(|| App::new().service(get_metrics))
        .bind((address, port))?
        .run()
        .await
}
