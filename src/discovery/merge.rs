// src/discovery/merge.rs
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use super::shutdown_requested;

/// Fan several receivers into one.
///
/// One forwarding task per input copies every item to the shared output.
/// The output closes once every input has closed, or as soon as shutdown
/// is requested. No ordering is kept across inputs.
pub fn merge<T: Send + 'static>(
    inputs: Vec<mpsc::Receiver<T>>,
    shutdown_rx: watch::Receiver<bool>,
) -> (mpsc::Receiver<T>, Vec<JoinHandle<()>>) {
    let (tx, rx) = mpsc::channel(1);

    let handles = inputs
        .into_iter()
        .enumerate()
        .map(|(index, input)| {
            tokio::spawn(forward(index, input, tx.clone(), shutdown_rx.clone()))
        })
        .collect();

    // Drop original sender so the output closes when all forwarders finish
    drop(tx);

    (rx, handles)
}

async fn forward<T>(
    index: usize,
    mut input: mpsc::Receiver<T>,
    output: mpsc::Sender<T>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        let item = tokio::select! {
            item = input.recv() => match item {
                Some(item) => item,
                None => break,
            },
            _ = shutdown_requested(&mut shutdown_rx) => break,
        };

        tokio::select! {
            sent = output.send(item) => {
                if sent.is_err() {
                    break;
                }
            }
            _ = shutdown_requested(&mut shutdown_rx) => break,
        }
    }

    debug!("Merge forwarder {} stopped", index);
}
