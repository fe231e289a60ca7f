//! Bridge runtime entry point.
//!
//! Starts the background context, opens one dApp tab and walks it through
//! the wallet API with an auto-approving popup. Set `BRIDGE_CONFIG` to a
//! TOML file to override the defaults.

use anyhow::{Context, Result};
use bridge_runtime::{load_config, BridgeEnvironment, BridgeRuntime, PopupRequest};
use bridge_telemetry::{init_telemetry, log_event, log_request_event};
use bridge_types::Reply;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::{Arc, Weak};

const DEMO_ORIGIN: &str = "https://dapp.example";

/// Approve every popup opened by the background context.
fn auto_approve(environment: Weak<BridgeEnvironment>, popup: &PopupRequest) {
    let Some(environment) = environment.upgrade() else {
        return;
    };
    let requester = match environment.open_popup(popup.scope) {
        Ok(requester) => requester,
        Err(e) => {
            log_event!(warn, "popup", "Could not connect popup", error = %e);
            return;
        }
    };
    let method = popup.method.clone();
    tokio::spawn(async move {
        let shown = match requester.request_data().await {
            Ok(shown) => shown,
            Err(e) => {
                log_event!(warn, "popup", "No request to show", error = %e);
                return;
            }
        };
        log_event!(info, "popup", "Approving", method = %method, shown = ?shown);
        let answer = match method.as_str() {
            "signTx" => Reply::data(json!("a10081825820deadbeef")),
            _ => Reply::data(json!(true)),
        };
        if let Err(e) = requester.return_data(answer) {
            log_event!(warn, "popup", "Popup answer lost", error = %e);
        }
    });
}

async fn call(runtime_tab: &bridge_runtime::TabSession, method: &str, params: Option<Value>) {
    match runtime_tab.page().request(method, params).await {
        Ok(result) => log_request_event!(
            info,
            "page",
            "Request answered",
            method,
            runtime_tab.origin(),
            result = %result
        ),
        Err(e) => log_request_event!(
            warn,
            "page",
            "Request failed",
            method,
            runtime_tab.origin(),
            error = %e
        ),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let path = std::env::var_os("BRIDGE_CONFIG").map(PathBuf::from);
    let config = load_config(path.as_deref()).context("Failed to load configuration")?;
    let _telemetry = init_telemetry(config.telemetry_for("background"))
        .context("Failed to initialize telemetry")?;

    let runtime = BridgeRuntime::new(&config).await?;
    runtime.start()?;

    let environment = runtime.environment();
    let weak = Arc::downgrade(&environment);
    environment.on_popup(move |popup| auto_approve(weak.clone(), popup));

    let tab = runtime.open_tab(DEMO_ORIGIN);
    log_event!(info, "background", "Tab ready", scope = %tab.scope());

    call(&tab, "isEnabled", None).await;
    call(&tab, "getBalance", None).await;
    call(&tab, "enable", None).await;
    call(&tab, "getBalance", None).await;
    call(&tab, "getAddress", None).await;
    call(&tab, "getUtxos", None).await;
    call(&tab, "signTx", Some(json!({"tx": "84a300818258"}))).await;

    environment
        .switch_account(&config.wallet.address.replace("addr_test1qz", "addr_test1qr"))
        .await
        .context("Failed to switch account")?;

    log_event!(info, "background", "Demo complete. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    environment.close_tab(tab);
    runtime.shutdown();
    Ok(())
}
