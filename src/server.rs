use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use axum_server::Handle;
use axum_server::tls_rustls::RustlsConfig;
use tokio::net::TcpListener;

use crate::config::TlsPaths;
use crate::gateway::{AppState, build_router};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Bind the configured address and serve until SIGINT/SIGTERM.
///
/// HTTPS when the config carries a TLS pair, plain HTTP otherwise.
pub async fn serve(state: AppState) -> anyhow::Result<()> {
    let addr = state.config.listen;
    let tls = state.config.tls.clone();
    let router = build_router(state);

    match tls {
        Some(paths) => {
            let handle = Handle::new();
            {
                let handle = handle.clone();
                tokio::spawn(async move {
                    shutdown_signal().await;
                    handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
                });
            }
            serve_tls(addr, router, &paths, handle).await?;
        }
        None => {
            let listener = TcpListener::bind(addr)
                .await
                .with_context(|| format!("binding {addr}"))?;
            log::warn!("no TLS material configured, serving plain HTTP");
            log::info!("listening on http://{addr}");
            serve_listener(listener, router, shutdown_signal())
                .await
                .context("HTTP server failed")?;
        }
    }

    log::info!("server stopped");
    Ok(())
}

/// Serve `router` over HTTPS on `addr` until `handle` is told to shut down.
///
/// `handle.listening()` resolves to the bound address once the socket is up.
pub async fn serve_tls(
    addr: SocketAddr,
    router: Router,
    paths: &TlsPaths,
    handle: Handle,
) -> anyhow::Result<()> {
    // Another component may already have installed a provider.
    let _ = rustls::crypto::ring::default_provider().install_default();
    let tls_config = RustlsConfig::from_pem_file(&paths.cert, &paths.key)
        .await
        .with_context(|| {
            format!(
                "loading TLS material from {} / {}",
                paths.cert.display(),
                paths.key.display()
            )
        })?;

    log::info!("listening on https://{addr}");
    axum_server::bind_rustls(addr, tls_config)
        .handle(handle)
        .serve(router.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .context("HTTPS server failed")
}

/// Serve `router` on an already-bound listener, recording peer addresses for
/// the allowlist check.
pub async fn serve_listener(
    listener: TcpListener,
    router: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                log::error!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received");
}
