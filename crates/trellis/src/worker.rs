//! Worker threads: the feed loop draining the ingest queue, and the tick
//! loop running the recurring jobs.

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel::{Receiver, Sender, bounded, tick};

use crate::error::{Error, Result};
use crate::node::Node;

pub struct Worker {
    node: Arc<Node>,
    stop: Option<Sender<()>>,
    fatal: Receiver<Error>,
    handles: Vec<JoinHandle<()>>,
}

impl Worker {
    /// Start the feed and tick threads for `node`.
    pub fn spawn(node: Arc<Node>) -> Worker {
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let (fatal_tx, fatal_rx) = bounded::<Error>(2);

        let feed = {
            let node = Arc::clone(&node);
            let fatal = fatal_tx.clone();
            std::thread::spawn(move || {
                tracing::info!("feed loop started");
                if let Err(err) = node.feed() {
                    tracing::error!(error = %err, "feed loop failed");
                    let _ = fatal.send(err);
                }
            })
        };

        let ticker = {
            let node = Arc::clone(&node);
            std::thread::spawn(move || {
                tracing::info!(delay = ?node.settings().delay(), "recurring jobs started");
                let rounds = tick(node.settings().delay());
                loop {
                    crossbeam::select! {
                        recv(stop_rx) -> _ => return,
                        recv(rounds) -> _ => {
                            let round = node
                                .observe()
                                .and_then(|_| node.refresh())
                                .and_then(|_| node.update());
                            if let Err(err) = round {
                                tracing::error!(error = %err, "recurring round failed");
                                let _ = fatal_tx.send(err);
                                return;
                            }
                        }
                    }
                }
            })
        };

        Worker {
            node,
            stop: Some(stop_tx),
            fatal: fatal_rx,
            handles: vec![feed, ticker],
        }
    }

    /// First unrecoverable error from either loop.
    pub fn fatal(&self) -> &Receiver<Error> {
        &self.fatal
    }

    /// Stop both loops: the tick loop at its next selection point, the feed
    /// loop once the queue drains.
    pub fn close(&mut self) {
        self.stop.take();
        self.node.close();
    }

    /// Wait for both loops to exit.
    pub fn join(mut self) -> Result<()> {
        self.close();
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                tracing::error!("worker thread panicked");
            }
        }
        match self.fatal.try_recv() {
            Ok(err) => Err(err),
            Err(_) => Ok(()),
        }
    }
}
