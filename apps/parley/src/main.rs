mod config;
mod credentials;
mod display;
mod input;
mod logging;
mod menu;

use std::{io, sync::Arc, time::Duration};

use session_core::{Action, SessionHandle, SessionReport, ShutdownCause, spawn_dispatcher};
use session_xmpp::{XmppTransport, XmppTransportConfig};
use tracing::{error, info, warn};

use crate::config::ClientConfig;

const PRINTER_GRACE: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() {
    logging::init();

    let config = match ClientConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "invalid configuration");
            eprintln!("Invalid configuration: {err}");
            return;
        }
    };

    let mut lines = match input::spawn_stdin_reader() {
        Ok(lines) => lines,
        Err(err) => {
            error!(error = %err, "failed to start terminal input");
            return;
        }
    };

    let mut stdout = io::stdout();
    let credentials = match credentials::read_credentials(&mut lines, &mut stdout).await {
        Ok(credentials) => credentials,
        Err(err) => {
            error!(error = %err, "failed reading credentials");
            return;
        }
    };

    let (handle, action_rx) = SessionHandle::new(config.session_config());
    let printer = display::spawn_printer(handle.subscribe());

    let transport_config = XmppTransportConfig::new(
        credentials.identity,
        credentials.password,
        credentials.server_host,
    )
    .with_connect_timeout(config.connect_timeout);
    let transport = match XmppTransport::connect(transport_config, handle.inbound_handler()).await
    {
        Ok(transport) => Arc::new(transport),
        Err(err) => {
            error!(error = %err, "session establishment failed");
            eprintln!("Error establishing a session: {}", err.message);
            return;
        }
    };
    info!("session established");

    let mut dispatcher = spawn_dispatcher(transport, action_rx, &handle);
    let joined = tokio::select! {
        biased;
        joined = &mut dispatcher => joined,
        exit = menu::run_menu(&mut lines, &mut stdout, &handle) => {
            match exit {
                Ok(exit) => info!(exit = ?exit, "input loop finished"),
                Err(err) => {
                    warn!(error = %err, "terminal output failed; requesting shutdown");
                    let _ = handle.send(Action::Shutdown {
                        cause: ShutdownCause::UserRequested,
                    });
                }
            }
            (&mut dispatcher).await
        }
    };
    drop(handle);

    match joined {
        Ok(report) => log_report(&report),
        Err(err) => error!(error = %err, "session dispatcher task failed"),
    }

    if tokio::time::timeout(PRINTER_GRACE, printer).await.is_err() {
        warn!("event printer did not finish in time");
    }
}

fn log_report(report: &SessionReport) {
    info!(
        cause = ?report.cause,
        contacts = report.final_state.contacts().len(),
        discarded_actions = report.discarded_actions,
        "session finished"
    );
}
