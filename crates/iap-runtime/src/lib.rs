//! iap-runtime
//!
//! Tokio driver for the reconciliation engine.
//!
//! The engine is `!Send` by design (single-threaded cooperative model), so
//! the driver runs on a current-thread runtime inside a `LocalSet`. It owns
//! the three things the deterministic core delegates outward:
//!
//! 1. **Redispatch** — platform callbacks arrive on an unbounded channel as
//!    [`PlatformEvent`]s and are forwarded to the engine on this context.
//! 2. **Coalesced drain** — after every dispatch (and every engine wake)
//!    the driver runs [`Store::tick`] until quiescent, which executes the
//!    pending verify pass / products batch.
//! 3. **Re-verify timer** — the driver sleeps until the engine's armed
//!    deadline and calls [`Store::reverify_due`] when it elapses. Re-arming
//!    happens implicitly: each loop turn re-reads the deadline, so a
//!    replaced or cancelled deadline replaces the sleep.
//!
//! Dropping the event sender stops the driver; dropping the driver cancels
//! the pending sleep and any undrained work with it.

use std::rc::Rc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use iap_core::{PaymentQueue, PlatformEvent, ProductFetcher, Store, Wakeup};
use iap_receipt::ReceiptVerifier;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Notify;
use tracing::{debug, trace};

/// Engine wake hook backed by a [`Notify`] the driver selects on.
pub struct NotifyWakeup {
    notify: Rc<Notify>,
}

impl NotifyWakeup {
    pub fn new(notify: Rc<Notify>) -> Self {
        Self { notify }
    }
}

impl Wakeup for NotifyWakeup {
    fn wakeup(&self) {
        self.notify.notify_one();
    }
}

/// Construct a wired engine: a [`Store`] whose wake hook nudges the returned
/// [`StoreDriver`], plus the sender platform adapters push events into.
pub fn wire(
    queue: Rc<dyn PaymentQueue>,
    fetcher: Rc<dyn ProductFetcher>,
    verifier: Rc<dyn ReceiptVerifier>,
) -> (Store, StoreDriver, UnboundedSender<PlatformEvent>) {
    let notify = Rc::new(Notify::new());
    let store = Store::new(
        queue,
        fetcher,
        verifier,
        Rc::new(NotifyWakeup::new(Rc::clone(&notify))),
    );
    let (sender, receiver) = mpsc::unbounded_channel();
    let driver = StoreDriver {
        store: store.clone(),
        events: receiver,
        wake: notify,
    };
    (store, driver, sender)
}

/// The engine's event loop. See the crate docs for what it owns.
pub struct StoreDriver {
    store: Store,
    events: UnboundedReceiver<PlatformEvent>,
    wake: Rc<Notify>,
}

impl StoreDriver {
    /// Run until the event sender is dropped.
    pub async fn run(mut self) {
        debug!("store driver started");
        loop {
            while self.store.tick(Utc::now()) {}

            let deadline = self.store.reverify_deadline();
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(event) => {
                        trace!(?event, "platform event");
                        self.store.dispatch(event, Utc::now());
                        // Drain whatever else is already queued before the
                        // next tick, so triggers arriving together coalesce
                        // into one deferred pass.
                        while let Ok(event) = self.events.try_recv() {
                            trace!(?event, "platform event");
                            self.store.dispatch(event, Utc::now());
                        }
                    }
                    None => {
                        debug!("platform event channel closed; store driver stopping");
                        break;
                    }
                },
                _ = self.wake.notified() => {}
                _ = sleep_until(deadline), if deadline.is_some() => {
                    trace!("re-verify deadline elapsed");
                    self.store.reverify_due();
                }
            }
        }
    }

    /// Spawn onto the current `LocalSet`.
    pub fn spawn_local(self) -> tokio::task::JoinHandle<()> {
        tokio::task::spawn_local(self.run())
    }
}

async fn sleep_until(deadline: Option<DateTime<Utc>>) {
    match deadline {
        Some(at) => {
            let delay = (at - Utc::now()).to_std().unwrap_or_default();
            tokio::time::sleep(delay).await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Install the fmt subscriber with `RUST_LOG`-style filtering, defaulting
/// to `info`.
pub fn init_tracing() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .try_init()
        .map_err(|error| anyhow::anyhow!(error))
        .context("install tracing subscriber")
}
