//! Worker pool and round supervision.
//!
//! One process, `DARC_CPU` tokio tasks per role. Workers drain their queue
//! in rounds; after each round the registered hooks run, Tor gets a fresh
//! circuit, and in single-round mode the loop exits. Shutdown is a
//! broadcast: workers finish the current round, daemons are killed in
//! reverse dependency order, and the PID file is removed.

use std::sync::Arc;

use anyhow::Result;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;
use tracing::{debug, info, warn};

use darc_core::{HookError, WorkerRole};

use crate::context::Darc;
use crate::crawl;

pub async fn process(darc: Arc<Darc>, role: WorkerRole) -> Result<()> {
    darc.archive.write_pid()?;
    info!(role = role.as_str(), pid = std::process::id(), "starting");

    darc.supervisor.bootstrap_all().await;

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let worker_count = darc.config.general.worker_count.max(1);
    info!(worker_count, role = role.as_str(), "spawning workers");

    let mut handles = Vec::with_capacity(worker_count);
    for worker_id in 0..worker_count {
        let darc = Arc::clone(&darc);
        let shutdown = shutdown_tx.subscribe();
        handles.push(tokio::spawn(worker_loop(darc, role, worker_id, shutdown)));
    }

    // wait until either a signal arrives or every worker returned on its
    // own (hook break or single-round mode)
    let mut joined = tokio::spawn(async move {
        for handle in handles {
            let _ = handle.await;
        }
    });
    tokio::select! {
        _ = wait_for_signal() => {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(());
            let _ = (&mut joined).await;
        }
        _ = &mut joined => {
            info!("all workers finished");
        }
    }

    darc.supervisor.shutdown().await;
    darc.archive.remove_pid();
    info!(role = role.as_str(), "gracefully exiting");
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(%err, "failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };
    let sigterm = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(%err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    tokio::select! {
        _ = ctrl_c => {}
        _ = sigterm => {}
    }
}

async fn worker_loop(
    darc: Arc<Darc>,
    role: WorkerRole,
    worker_id: usize,
    mut shutdown: broadcast::Receiver<()>,
) {
    info!(worker_id, role = role.as_str(), "starting mainloop");

    loop {
        // shutdown lands between rounds, never mid-request
        match shutdown.try_recv() {
            Ok(()) | Err(TryRecvError::Closed) => break,
            Err(TryRecvError::Empty) | Err(TryRecvError::Lagged(_)) => {}
        }

        let pool = match role {
            WorkerRole::Crawler => darc.queue.load_requests().await,
            WorkerRole::Loader => darc.queue.load_selenium().await,
        };

        if pool.is_empty() {
            if let Some(wait) = darc.config.general.darc_wait() {
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = shutdown.recv() => break,
                }
            }
            continue;
        }

        for link in &pool {
            match role {
                WorkerRole::Crawler => crawl::crawler(&darc, link).await,
                WorkerRole::Loader => crawl::loader(&darc, link).await,
            }
        }

        let mut time_to_break = false;
        for hook in &darc.hooks {
            match hook.on_round(role, &pool) {
                Ok(()) => {}
                Err(HookError::Break) => time_to_break = true,
                Err(HookError::Failed(err)) => {
                    warn!(worker_id, %err, "hook execution failed");
                }
            }
        }
        if time_to_break {
            info!(worker_id, "hook requested break");
            break;
        }
        if darc.config.general.reboot {
            info!(worker_id, "single-round mode, exiting");
            break;
        }

        darc.supervisor.renew_tor().await;
        debug!(worker_id, "starting next round");
    }

    info!(worker_id, role = role.as_str(), "stopping mainloop");
}
