// src/trigger.rs

//! External trigger surface (e.g. dashboard decisions).
//!
//! Requests travel over a channel to a small service that handles at most
//! R of them at once and answers each on a oneshot.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::engine::Engine;
use crate::errors::{EngineError, Result};
use crate::store::Package;
use crate::workflow::LinkId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerRequest {
    Resume { package: Uuid, link: LinkId },
    StartIngest { path: PathBuf, watched_dir: usize },
    ListActivePackages,
    ListAwaitingDecisions,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerReply {
    Resumed,
    Started(Option<Uuid>),
    ActivePackages(Vec<Package>),
    AwaitingDecisions(Vec<AwaitingDecision>),
}

/// A package parked at a choice link, with the links it may resume at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwaitingDecision {
    pub package: Uuid,
    pub link: LinkId,
    pub choices: Vec<LinkId>,
}

type Envelope = (TriggerRequest, oneshot::Sender<Result<TriggerReply>>);

/// Cloneable async client for the trigger service.
#[derive(Debug, Clone)]
pub struct TriggerHandle {
    tx: mpsc::Sender<Envelope>,
}

impl TriggerHandle {
    pub(crate) fn channel(buffer: usize) -> (Self, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, rx)
    }

    pub async fn request(&self, request: TriggerRequest) -> Result<TriggerReply> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send((request, reply_tx))
            .await
            .map_err(|_| EngineError::Shutdown)?;
        reply_rx.await.map_err(|_| EngineError::Shutdown)?
    }

    /// Resume a package parked at a choice with `link`, or re-queue an idle
    /// package at `link`.
    pub async fn resume(&self, package: Uuid, link: impl Into<LinkId>) -> Result<()> {
        self.request(TriggerRequest::Resume {
            package,
            link: link.into(),
        })
        .await
        .map(|_| ())
    }

    /// Ingest `path` as if it had appeared in watched directory `watched_dir`.
    pub async fn start_ingest(&self, path: impl Into<PathBuf>, watched_dir: usize) -> Result<Option<Uuid>> {
        let reply = self
            .request(TriggerRequest::StartIngest {
                path: path.into(),
                watched_dir,
            })
            .await?;
        match reply {
            TriggerReply::Started(id) => Ok(id),
            other => Err(unexpected(other)),
        }
    }

    /// Packages that have not reached a terminal status.
    pub async fn list_active_packages(&self) -> Result<Vec<Package>> {
        match self.request(TriggerRequest::ListActivePackages).await? {
            TriggerReply::ActivePackages(packages) => Ok(packages),
            other => Err(unexpected(other)),
        }
    }

    /// Packages waiting for a `resume` at a choice link.
    pub async fn list_awaiting_decisions(&self) -> Result<Vec<AwaitingDecision>> {
        match self.request(TriggerRequest::ListAwaitingDecisions).await? {
            TriggerReply::AwaitingDecisions(parked) => Ok(parked),
            other => Err(unexpected(other)),
        }
    }
}

fn unexpected(reply: TriggerReply) -> EngineError {
    EngineError::InvalidState(format!("unexpected trigger reply: {reply:?}"))
}

pub(crate) fn spawn_trigger_service(
    engine: Engine,
    mut rx: mpsc::Receiver<Envelope>,
    capacity: usize,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let permits = Arc::new(Semaphore::new(capacity.max(1)));
    tokio::spawn(async move {
        info!(capacity, "trigger service started");
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                msg = rx.recv() => {
                    let Some((request, reply)) = msg else { break };
                    let Ok(permit) = Arc::clone(&permits).acquire_owned().await else { break };
                    let engine = engine.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        debug!(?request, "handling trigger request");
                        let _ = reply.send(serve(&engine, request));
                    });
                }
            }
        }
        debug!("trigger service stopped");
    })
}

fn serve(engine: &Engine, request: TriggerRequest) -> Result<TriggerReply> {
    match request {
        TriggerRequest::Resume { package, link } => {
            engine.resume(package, &link)?;
            Ok(TriggerReply::Resumed)
        }
        TriggerRequest::StartIngest { path, watched_dir } => {
            Ok(TriggerReply::Started(engine.ingest(&path, watched_dir)?))
        }
        TriggerRequest::ListActivePackages => Ok(TriggerReply::ActivePackages(engine.active_packages()?)),
        TriggerRequest::ListAwaitingDecisions => {
            Ok(TriggerReply::AwaitingDecisions(engine.awaiting_decisions()?))
        }
    }
}
