//! Message-based control channel for forcing activation.
//!
//! A deployment hook (or an operator) sends [`ControlMessage`] values
//! through a [`ControlHandle`]; a dispatch loop answers each message
//! exactly once on its dedicated reply channel.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::fetch::ResourceFetcher;
use crate::store::BlobStore;
use crate::sync::Synchronizer;

/// Commands accepted by the control loop.
#[derive(Debug)]
pub enum ControlMessage {
    /// Promote the staged generation now instead of waiting for the normal
    /// lifecycle trigger. Answered with exactly one [`ControlReply`].
    ForceActivation {
        /// Dedicated reply channel for this request.
        reply: oneshot::Sender<ControlReply>,
    },
}

/// Reply to a control message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlReply {
    /// `None` on success, failure details otherwise.
    pub error: Option<String>,
}

impl ControlReply {
    /// A success reply.
    #[must_use]
    pub const fn ok() -> Self {
        Self { error: None }
    }

    /// A failure reply carrying details.
    pub fn err(details: impl Into<String>) -> Self {
        Self {
            error: Some(details.into()),
        }
    }

    /// Returns true if the request succeeded.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Cloneable sender half of the control channel.
#[derive(Debug, Clone)]
pub struct ControlHandle {
    tx: mpsc::UnboundedSender<ControlMessage>,
}

impl ControlHandle {
    /// Requests immediate activation and waits for the reply.
    ///
    /// The loop answers every request, so the caller receives exactly one
    /// reply unless the loop has shut down.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ControlClosed`] if the control loop is gone.
    pub async fn force_activation(&self) -> Result<ControlReply> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(ControlMessage::ForceActivation { reply: reply_tx })
            .map_err(|_| Error::ControlClosed)?;
        reply_rx.await.map_err(|_| Error::ControlClosed)
    }
}

/// Creates a control channel pair.
///
/// Hand the receiver to [`run_control_loop`] and clone the handle into
/// whatever needs to trigger activation.
#[must_use]
pub fn control_channel() -> (ControlHandle, mpsc::UnboundedReceiver<ControlMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ControlHandle { tx }, rx)
}

/// Dispatches control messages until every handle is dropped or the token
/// is cancelled.
///
/// Each message gets exactly one reply; a failed activation is reported in
/// the reply rather than tearing the loop down.
pub async fn run_control_loop<F, S>(
    sync: Arc<Synchronizer<F, S>>,
    mut rx: mpsc::UnboundedReceiver<ControlMessage>,
    token: CancellationToken,
) where
    F: ResourceFetcher,
    S: BlobStore,
{
    loop {
        tokio::select! {
            () = token.cancelled() => {
                log::debug!("control loop cancelled");
                break;
            }
            message = rx.recv() => {
                let Some(message) = message else { break };
                match message {
                    ControlMessage::ForceActivation { reply } => {
                        let outcome = match sync.force_activate().await {
                            Ok(()) => ControlReply::ok(),
                            Err(e) => {
                                log::error!("forced activation failed: {e}");
                                ControlReply::err(e.to_string())
                            }
                        };
                        // The requester may have gone away; that is its loss.
                        let _ = reply.send(outcome);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::manifest::{Manifest, ManifestEntry};
    use crate::store::MemoryStore;
    use crate::sync::{NoProgress, Phase, SyncProgress};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::collections::HashMap;

    struct MapFetcher {
        resources: HashMap<String, Bytes>,
    }

    #[async_trait]
    impl ResourceFetcher for MapFetcher {
        async fn fetch(&self, name: &str) -> Result<Bytes> {
            self.resources
                .get(name)
                .cloned()
                .ok_or_else(|| Error::Fetch {
                    name: name.to_string(),
                    reason: "not found".to_string(),
                })
        }
    }

    fn engine(pairs: &[(&str, &'static [u8])]) -> Arc<Synchronizer<MapFetcher, MemoryStore>> {
        let resources = pairs
            .iter()
            .map(|(n, b)| ((*n).to_string(), Bytes::from_static(b)))
            .collect();
        Arc::new(Synchronizer::new(
            MapFetcher { resources },
            MemoryStore::new(),
            SyncConfig::default(),
        ))
    }

    fn manifest(pairs: &[(&str, &str)]) -> Manifest {
        Manifest::from_entries(pairs.iter().map(|(n, f)| ManifestEntry::new(*n, *f))).unwrap()
    }

    #[tokio::test]
    async fn force_activation_with_nothing_staged_replies_ok() {
        let sync = engine(&[]);
        let (handle, rx) = control_channel();
        let token = CancellationToken::new();
        let loop_task = tokio::spawn(run_control_loop(
            Arc::clone(&sync),
            rx,
            token.clone(),
        ));

        let reply = handle.force_activation().await.unwrap();
        assert!(reply.is_ok());
        assert_eq!(sync.phase(), Phase::Idle);

        token.cancel();
        loop_task.await.unwrap();
    }

    #[tokio::test]
    async fn force_activation_promotes_a_staged_generation() {
        let sync = engine(&[("a", b"alpha")]);
        let progress: Arc<dyn SyncProgress> = Arc::new(NoProgress);
        sync.install(manifest(&[("a", "h1")]), &progress)
            .await
            .unwrap();
        assert_eq!(sync.phase(), Phase::Activating);

        let (handle, rx) = control_channel();
        let token = CancellationToken::new();
        tokio::spawn(run_control_loop(Arc::clone(&sync), rx, token.clone()));

        let reply = handle.force_activation().await.unwrap();
        assert!(reply.is_ok());
        assert_eq!(sync.phase(), Phase::Active);
        assert_eq!(
            sync.serve("a").await.unwrap(),
            Some(Bytes::from_static(b"alpha"))
        );

        token.cancel();
    }

    #[tokio::test]
    async fn every_request_gets_its_own_reply() {
        let sync = engine(&[]);
        let (handle, rx) = control_channel();
        let token = CancellationToken::new();
        tokio::spawn(run_control_loop(Arc::clone(&sync), rx, token.clone()));

        let first = handle.force_activation().await.unwrap();
        let second = handle.force_activation().await.unwrap();
        assert!(first.is_ok());
        assert!(second.is_ok());

        token.cancel();
    }

    #[tokio::test]
    async fn loop_exits_when_all_handles_drop() {
        let sync = engine(&[]);
        let (handle, rx) = control_channel();
        let loop_task = tokio::spawn(run_control_loop(
            sync,
            rx,
            CancellationToken::new(),
        ));

        drop(handle);
        loop_task.await.unwrap();
    }

    #[tokio::test]
    async fn handle_errors_after_loop_shutdown() {
        let sync = engine(&[]);
        let (handle, rx) = control_channel();
        let token = CancellationToken::new();
        let loop_task = tokio::spawn(run_control_loop(sync, rx, token.clone()));

        token.cancel();
        loop_task.await.unwrap();

        let err = handle.force_activation().await.unwrap_err();
        assert!(matches!(err, Error::ControlClosed));
    }
}
