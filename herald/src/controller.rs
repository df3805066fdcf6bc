use std::{
    sync::{Arc, LazyLock},
    time::Duration,
};

use herald_common::{Signal, internal, logging};
use herald_dispatch::{DispatchProcessor, SmtpMailer};
use herald_intake::{IntakeConfig, IntakeServer};
use herald_registry::Registry;
use herald_store::StoreConfig;
use herald_webhook::{WebhookEnqueuer, WebhookProcessor};
use serde::Deserialize;
use tokio::{sync::broadcast, task::JoinSet};

/// Which components this process runs.
///
/// Every role reads the same configuration file, so any mix of processes can
/// cooperate on one store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum Role {
    /// Intake HTTP server only
    Api,
    /// Email dispatch processor only
    EmailWorker,
    /// Webhook delivery processor only
    WebhookWorker,
    /// Everything in one process
    #[default]
    All,
}

impl Role {
    const fn serves_api(self) -> bool {
        matches!(self, Self::Api | Self::All)
    }

    const fn dispatches_email(self) -> bool {
        matches!(self, Self::EmailWorker | Self::All)
    }

    const fn delivers_webhooks(self) -> bool {
        matches!(self, Self::WebhookWorker | Self::All)
    }
}

/// The whole pipeline, deserialized from one configuration file.
#[derive(Debug, Deserialize)]
pub struct Herald {
    registry: Registry,
    #[serde(default)]
    store: StoreConfig,
    #[serde(default)]
    intake: IntakeConfig,
    #[serde(default)]
    dispatch: DispatchProcessor,
    #[serde(default)]
    webhook: WebhookProcessor,
}

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

async fn shutdown() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!("CTRL+C entered -- Enter it again to force shutdown");
        }
        _ = terminate.recv() => {
            internal!("Terminate Signal received, shutting down");
        }
    };

    SHUTDOWN_BROADCAST
        .send(Signal::Shutdown)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Interrupted, e.to_string()))?;

    Ok(())
}

/// Wait on the running components; the first error wins.
async fn wait(components: &mut JoinSet<anyhow::Result<()>>) -> anyhow::Result<()> {
    while let Some(result) = components.join_next().await {
        result??;
    }

    Ok(())
}

impl Herald {
    /// Run this controller, and everything the role enables
    ///
    /// # Errors
    ///
    /// This function will return an error if the store cannot be initialised
    /// or any enabled component fails to start.
    pub async fn run(mut self, role: Role) -> anyhow::Result<()> {
        logging::init();

        internal!("Controller running as {role:?}");

        let store = self.store.build()?;
        let registry = Arc::new(self.registry);

        let mut components: JoinSet<anyhow::Result<()>> = JoinSet::new();

        if role.serves_api() {
            let server =
                IntakeServer::new(&self.intake, store.clone(), registry.clone()).await?;
            let receiver = SHUTDOWN_BROADCAST.subscribe();

            components.spawn(async move { server.serve(receiver).await.map_err(Into::into) });
        }

        if role.dispatches_email() {
            let mailer = Arc::new(SmtpMailer::new(Duration::from_secs(
                self.dispatch.attempt_timeout_secs,
            )));
            let enqueuer = WebhookEnqueuer::new(store.clone(), self.webhook.max_retries);

            self.dispatch
                .init(store.clone(), registry.clone(), mailer, enqueuer);

            let dispatch = self.dispatch;
            let receiver = SHUTDOWN_BROADCAST.subscribe();

            components.spawn(async move { dispatch.serve(receiver).await.map_err(Into::into) });
        }

        if role.delivers_webhooks() {
            self.webhook.init(store, registry)?;

            let webhook = self.webhook;
            let receiver = SHUTDOWN_BROADCAST.subscribe();

            components.spawn(async move { webhook.serve(receiver).await.map_err(Into::into) });
        }

        let ret = tokio::select! {
            result = wait(&mut components) => result,
            result = shutdown() => result,
        };

        internal!("Shutting down...");

        // Components drain their in-flight work; a second CTRL+C skips the
        // wait.
        tokio::select! {
            () = async {
                while components.join_next().await.is_some() {}
            } => {
                internal!("All components finalised");
            }
            _ = tokio::signal::ctrl_c() => {
                internal!("Forced shutdown");
            }
        }

        ret
    }
}
