mod args;
mod logging;
mod metrics;
mod rules;
mod settings;

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use tokio::net::UdpSocket;
use tokio::sync::{watch, RwLock, Semaphore};

use dns_message::types::{Message, QueryType, Rcode};
use resolver_core::cache::{SharedCache, SWEEP_INTERVAL};
use resolver_core::overrides::{self, OverrideTable};
use resolver_core::relay;
use resolver_core::{clamp_ttl, metrics::Outcome, MIN_TTL};

use args::Args;
use settings::Settings;

const MAX_DATAGRAM: usize = 512;
/// How long a graceful shutdown waits for in-flight workers before the
/// process exits regardless.
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    let args = Args::parse();
    logging::begin_logging(&args, args.log_file.as_deref());

    let settings = Settings::load(&args).unwrap_or_else(|error| {
        tracing::error!(%error, "could not load configuration");
        process::exit(1);
    });
    tracing::info!(?settings, "starting up");

    let database_file = PathBuf::from(&settings.database_file);
    let table = rules::load_override_table(&database_file).await.unwrap_or_else(|| {
        tracing::error!(path = ?database_file, "could not load override rule file, refusing to start");
        process::exit(1);
    });
    let table_lock = Arc::new(RwLock::new(table));

    let cache = SharedCache::new(settings.cache_capacity);
    let upstream = SocketAddr::new(IpAddr::V4(settings.upstream_ip), settings.upstream_port);

    let socket = UdpSocket::bind((settings.local_ip, settings.local_port))
        .await
        .unwrap_or_else(|error| {
            tracing::error!(%error, ip = %settings.local_ip, port = settings.local_port, "could not bind client socket");
            process::exit(1);
        });
    let socket = Arc::new(socket);
    tracing::info!(ip = %settings.local_ip, port = settings.local_port, "listening for client queries");

    let semaphore = Arc::new(Semaphore::new(settings.workers));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let sweeper = tokio::spawn(sweep_task(cache.clone(), shutdown_rx.clone()));
    tokio::spawn(rules::reload_task(table_lock.clone(), database_file));

    let receive_loop = tokio::spawn(receive_loop(
        socket,
        cache,
        table_lock,
        upstream,
        settings.cache_ttl,
        semaphore,
        shutdown_rx,
    ));

    tokio::spawn(async move {
        if let Err(error) = wait_for_shutdown_signal().await {
            tracing::error!(%error, "could not subscribe to shutdown signals");
            return;
        }
        tracing::info!("shutdown signal received, draining in-flight queries");
        let _ = shutdown_tx.send(true);
    });

    let metrics_result =
        metrics::serve_prometheus_endpoint_task(settings.metrics_ip, settings.metrics_port).await;
    if let Err(error) = metrics_result {
        tracing::error!(%error, "could not bind metrics endpoint");
        process::exit(1);
    }

    let _ = receive_loop.await;
    sweeper.abort();
}

async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigint.recv() => {}
        _ = sigterm.recv() => {}
    }
    Ok(())
}

async fn sweep_task(cache: SharedCache, mut shutdown_rx: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            () = tokio::time::sleep(SWEEP_INTERVAL) => {
                let removed = cache.sweep();
                tracing::debug!(removed, size = cache.len(), "cache sweep complete");
                metrics::CACHE_SWEEP_EXPIRED_TOTAL.inc_by(removed as u64);
                metrics::CACHE_SIZE.set(cache.len() as i64);
            }
            _ = shutdown_rx.changed() => return,
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn receive_loop(
    socket: Arc<UdpSocket>,
    cache: SharedCache,
    table_lock: Arc<RwLock<OverrideTable>>,
    upstream: SocketAddr,
    cache_ttl_ceiling: u32,
    semaphore: Arc<Semaphore>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let (n, peer) = tokio::select! {
            result = socket.recv_from(&mut buf) => match result {
                Ok(pair) => pair,
                Err(error) => {
                    tracing::error!(%error, "client socket recv failed");
                    continue;
                }
            },
            _ = shutdown_rx.changed() => break,
        };
        let datagram = buf[..n].to_vec();

        let permit = match semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        let socket = socket.clone();
        let cache = cache.clone();
        let table_lock = table_lock.clone();

        tokio::spawn(async move {
            let _permit = permit;
            handle_datagram(&socket, &cache, &table_lock, upstream, cache_ttl_ceiling, peer, &datagram).await;
        });
    }

    tokio::time::sleep(SHUTDOWN_GRACE_PERIOD).await;
}

#[allow(clippy::too_many_arguments)]
async fn handle_datagram(
    socket: &UdpSocket,
    cache: &SharedCache,
    table_lock: &RwLock<OverrideTable>,
    upstream: SocketAddr,
    cache_ttl_ceiling: u32,
    peer: SocketAddr,
    datagram: &[u8],
) {
    let start = Instant::now();
    metrics::DNS_REQUESTS_TOTAL.inc();

    let request = match Message::from_octets(datagram) {
        Ok(message) => message,
        Err(error) => {
            tracing::warn!(%peer, %error, "dropping malformed query");
            // `error.id()` is `None` when the message was too short to
            // even read a transaction ID: nothing is sent, so this
            // isn't a response and must not be counted as one.
            if let Some(id) = error.id() {
                send(socket, peer, Message::make_format_error_response(id)).await;
                finish(start, Outcome::FormErr);
            }
            return;
        }
    };

    let Some(question) = request.questions.first().cloned() else {
        tracing::warn!(%peer, "query has no question section");
        let mut response = request.make_response();
        response.header.rcode = Rcode::FormatError;
        send(socket, peer, response).await;
        finish(start, Outcome::FormErr);
        return;
    };

    if question.is_unknown() {
        tracing::debug!(%peer, %question, "query type not implemented");
        let mut response = request.make_response();
        response.header.rcode = Rcode::NotImplemented;
        send(socket, peer, response).await;
        finish(start, Outcome::FormErr);
        return;
    }

    if let Some(answers) = cache.get(&question.name, question.qtype, question.qclass) {
        tracing::debug!(%peer, %question, source = "cache", elapsed_ms = start.elapsed().as_millis() as u64, "answered");
        let mut response = request.make_response();
        response.answers = answers;
        send(socket, peer, response).await;
        finish(start, Outcome::Cache);
        return;
    }

    let rtype = match question.qtype {
        QueryType::Record(rtype) => rtype,
        _ => unreachable!("unknown qtypes are handled above"),
    };
    let outcome = table_lock.read().await.query(&question.name, rtype);

    match outcome {
        overrides::Outcome::Hit(answers) => {
            tracing::debug!(%peer, %question, source = "local", elapsed_ms = start.elapsed().as_millis() as u64, "answered");
            cache.put(question.name.clone(), question.qtype, question.qclass, answers.clone(), overrides::OVERRIDE_TTL);
            let mut response = request.make_response();
            response.answers = answers;
            send(socket, peer, response).await;
            finish(start, Outcome::Local);
        }
        overrides::Outcome::Blackhole(answers) => {
            tracing::debug!(%peer, %question, source = "blackhole", elapsed_ms = start.elapsed().as_millis() as u64, "answered");
            cache.put(question.name.clone(), question.qtype, question.qclass, answers.clone(), overrides::OVERRIDE_TTL);
            let mut response = request.make_response();
            response.answers = answers;
            send(socket, peer, response).await;
            finish(start, Outcome::Blackhole);
        }
        overrides::Outcome::Miss => {
            relay_and_respond(socket, cache, upstream, cache_ttl_ceiling, peer, datagram, &request, &question, start).await;
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn relay_and_respond(
    socket: &UdpSocket,
    cache: &SharedCache,
    upstream: SocketAddr,
    cache_ttl_ceiling: u32,
    peer: SocketAddr,
    raw_query: &[u8],
    request: &Message,
    question: &dns_message::types::Question,
    start: Instant,
) {
    match relay::forward(raw_query, upstream).await {
        Ok(raw_response) => {
            if let Ok(parsed) = Message::from_octets(&raw_response) {
                if parsed.header.rcode == Rcode::NoError && !parsed.answers.is_empty() {
                    if let Some(ttl) = parsed.min_answer_ttl() {
                        let ttl = clamp_ttl(ttl.min(cache_ttl_ceiling.max(MIN_TTL)));
                        cache.put(question.name.clone(), question.qtype, question.qclass, parsed.answers, ttl);
                    }
                }
            }
            tracing::debug!(%peer, %question, source = "upstream", elapsed_ms = start.elapsed().as_millis() as u64, "answered");
            if let Err(error) = socket.send_to(&raw_response, peer).await {
                tracing::error!(%peer, %error, "could not send upstream response to client");
            }
            finish(start, Outcome::Upstream);
        }
        Err(error) => {
            tracing::warn!(%peer, %question, %error, "relay failed, replying SERVFAIL");
            let mut response = request.make_response();
            response.header.rcode = Rcode::ServerFailure;
            send(socket, peer, response).await;
            finish(start, Outcome::ServFail);
        }
    }
}

async fn send(socket: &UdpSocket, peer: SocketAddr, response: Message) {
    let octets = match response.to_octets() {
        Ok(octets) => octets,
        Err(error) => {
            tracing::error!(%peer, %error, "could not serialise response");
            return;
        }
    };
    if let Err(error) = socket.send_to(&octets, peer).await {
        tracing::error!(%peer, %error, "could not send response to client");
    }
}

fn finish(start: Instant, outcome: Outcome) {
    metrics::record_response(outcome, start.elapsed().as_secs_f64());
}
