// Copyright (c) TX Society
// SPDX-License-Identifier: Apache-2.0

//! Trusted masterchain-head watcher: a clock of the last proven head.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::chain::LiteClient;
use crate::store::Store;

const REFRESH_INTERVAL: Duration = Duration::from_secs(5);
const INIT_RETRY_DELAY: Duration = Duration::from_secs(2);
// Proving the first head against the chain can take minutes
const INIT_TIMEOUT: Duration = Duration::from_secs(600);

/// Keep the cached masterchain head fresh. The returned receiver resolves once
/// the first proven head is available; state queries fail with
/// `NotInitialized` until then.
pub fn run_head_watcher(
    client: Arc<LiteClient>,
    store: Store,
    cancel: CancellationToken,
) -> (JoinHandle<()>, oneshot::Receiver<()>) {
    let (ready_tx, ready_rx) = oneshot::channel();
    let handle = tokio::spawn(async move {
        info!("[HeadWatcher] started");
        let mut ready_tx = Some(ready_tx);
        loop {
            if let Some(tx) = ready_tx.take() {
                match tokio::time::timeout(INIT_TIMEOUT, client.refresh_head(&store)).await {
                    Ok(Ok(head)) => {
                        info!("[HeadWatcher] initialized at seqno {}", head.seqno);
                        let _ = tx.send(());
                    }
                    Ok(Err(e)) => {
                        error!("[HeadWatcher] can not get proven block: {e}");
                        ready_tx = Some(tx);
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(INIT_RETRY_DELAY) => {}
                        }
                        continue;
                    }
                    Err(_) => {
                        error!("[HeadWatcher] timed out proving the first head");
                        ready_tx = Some(tx);
                        continue;
                    }
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(REFRESH_INTERVAL) => {
                    if let Err(e) = client.refresh_head(&store).await {
                        error!("[HeadWatcher] can not update block: {e}");
                    }
                }
            }
        }
        info!("[HeadWatcher] stopped");
    });
    (handle, ready_rx)
}
