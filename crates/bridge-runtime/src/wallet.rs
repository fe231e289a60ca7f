//! # Wallet Capabilities
//!
//! The handlers the background context exposes to pages. Anything needing
//! the user's consent opens an approval popup and holds a persistent
//! conversation with it.

use async_trait::async_trait;
use bridge_bus::{ListenerId, ListenerRegistry, Tabs};
use bridge_relay::host::{handler_fn, CapabilityHandler, HandlerTable, Respond};
use bridge_relay::{ChannelResponder, CodecSlot, ReactiveStore, StoredAllowList, UnspentOutput};
use bridge_types::{ApiError, Reply, Request, ScopeId};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

/// Durable key of the wallet state.
pub const WALLET_KEY: &str = "wallet";

/// What the wallet knows about the current account.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletState {
    pub address: Option<String>,
    /// Lovelace.
    pub balance: u64,
    pub utxos: Vec<UnspentOutput>,
}

/// An approval popup the UI should open.
#[derive(Debug, Clone, PartialEq)]
pub struct PopupRequest {
    pub scope: ScopeId,
    pub method: String,
    pub origin: String,
}

/// Opens approval popups and waits for the user's answer.
pub struct PopupLauncher {
    tabs: Tabs,
    responder: ChannelResponder,
    on_popup: ListenerRegistry<PopupRequest>,
}

impl PopupLauncher {
    pub fn new(tabs: Tabs, responder: ChannelResponder) -> Self {
        Self {
            tabs,
            responder,
            on_popup: ListenerRegistry::new(),
        }
    }

    /// Called with every popup opened; the listener plays the UI.
    pub fn on_popup(&self, listener: impl Fn(&PopupRequest) + Send + Sync + 'static) -> ListenerId {
        self.on_popup.add(listener)
    }

    pub fn off_popup(&self, id: ListenerId) -> bool {
        self.on_popup.remove(id)
    }

    /// Show `payload` to the user for `origin` and wait for the answer.
    ///
    /// The popup's scope is closed once answered. Closing it earlier yields
    /// a refusal.
    pub async fn prompt(&self, method: &str, origin: &str, payload: Option<Value>) -> Reply {
        let scope = self.tabs.create();
        let request = Reply::data(json!({
            "method": method,
            "origin": origin,
            "payload": payload,
        }));
        // Conversation first, so the popup's connection is never missed.
        let pending = self.responder.begin(scope, request);
        info!(scope = %scope, method = method, origin = origin, "Approval popup opened");
        self.on_popup.emit(&PopupRequest {
            scope,
            method: method.to_string(),
            origin: origin.to_string(),
        });

        let reply = pending.wait().await;
        self.tabs.remove(scope);
        debug!(scope = %scope, refused = reply.is_error(), "Approval popup closed");
        reply
    }

    pub fn responder(&self) -> &ChannelResponder {
        &self.responder
    }
}

fn origin_of(request: &Request) -> Result<&str, ApiError> {
    request
        .origin
        .as_deref()
        .ok_or_else(|| ApiError::invalid_request("request carries no origin"))
}

/// Turn a popup's error payload back into an `ApiError`.
fn declined(reply: &Reply) -> ApiError {
    reply
        .error
        .as_ref()
        .and_then(ApiError::from_value)
        .unwrap_or_else(|| ApiError::refused("user declined"))
}

/// `enable`: ask the user to connect the requesting origin.
struct EnableHandler {
    allow_list: Arc<StoredAllowList>,
    popups: Arc<PopupLauncher>,
}

#[async_trait]
impl CapabilityHandler for EnableHandler {
    async fn handle(&self, request: Request, respond: Respond) {
        let origin = match origin_of(&request) {
            Ok(origin) => origin.to_string(),
            Err(e) => return respond.error(e),
        };
        if self.allow_list.store().get().await.contains(&origin) {
            return respond.data(json!(true));
        }

        let reply = self.popups.prompt("enable", &origin, None).await;
        if reply.is_error() || reply.data != Some(json!(true)) {
            info!(origin = %origin, "Connection declined");
            return respond.error(declined(&reply));
        }
        match self.allow_list.allow(&origin).await {
            Ok(()) => respond.data(json!(true)),
            Err(e) => respond.error(e.to_api_error()),
        }
    }
}

/// `signTx`: show the transaction and return the user's witness set.
struct SignTxHandler {
    popups: Arc<PopupLauncher>,
}

#[async_trait]
impl CapabilityHandler for SignTxHandler {
    async fn handle(&self, request: Request, respond: Respond) {
        let origin = match origin_of(&request) {
            Ok(origin) => origin.to_string(),
            Err(e) => return respond.error(e),
        };
        let Some(tx) = request.data else {
            return respond.error(ApiError::invalid_request("missing transaction"));
        };

        let reply = self.popups.prompt("signTx", &origin, Some(tx)).await;
        match reply.data {
            Some(witness) if !reply.is_error() => respond.data(witness),
            _ => respond.error(declined(&reply)),
        }
    }
}

/// Everything the wallet handlers need.
#[derive(Clone)]
pub struct WalletServices {
    pub allow_list: Arc<StoredAllowList>,
    pub wallet: Arc<ReactiveStore<WalletState>>,
    pub codec: Arc<CodecSlot>,
    pub popups: Arc<PopupLauncher>,
}

async fn is_enabled(allow_list: Arc<StoredAllowList>, request: Request) -> Result<Value, ApiError> {
    let origin = origin_of(&request)?;
    Ok(json!(allow_list.store().get().await.contains(origin)))
}

async fn get_balance(wallet: Arc<ReactiveStore<WalletState>>) -> Result<Value, ApiError> {
    Ok(json!(wallet.get().await.balance.to_string()))
}

async fn get_address(wallet: Arc<ReactiveStore<WalletState>>) -> Result<Value, ApiError> {
    wallet
        .get()
        .await
        .address
        .map(Value::String)
        .ok_or_else(|| ApiError::internal("no account selected"))
}

/// Hex-encoded outputs, in the codec's binary form.
async fn get_utxos(
    wallet: Arc<ReactiveStore<WalletState>>,
    codec: Arc<CodecSlot>,
) -> Result<Value, ApiError> {
    let codec = codec.get().map_err(|e| e.to_api_error())?;
    let encoded = wallet
        .get()
        .await
        .utxos
        .iter()
        .map(|utxo| codec.encode_output(utxo).map(hex::encode))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ApiError::internal(e.to_string()))?;
    Ok(json!(encoded))
}

/// Build the capability table served by the background context.
pub fn wallet_handlers(services: &WalletServices) -> HandlerTable {
    let mut table = HandlerTable::new();

    let allow_list = services.allow_list.clone();
    table.register(
        "isEnabled",
        handler_fn(move |request| is_enabled(allow_list.clone(), request)),
    );
    table.register(
        "enable",
        EnableHandler {
            allow_list: services.allow_list.clone(),
            popups: services.popups.clone(),
        },
    );

    let wallet = services.wallet.clone();
    table.register("getBalance", handler_fn(move |_| get_balance(wallet.clone())));

    let wallet = services.wallet.clone();
    table.register("getAddress", handler_fn(move |_| get_address(wallet.clone())));

    let (wallet, codec) = (services.wallet.clone(), services.codec.clone());
    table.register(
        "getUtxos",
        handler_fn(move |_| get_utxos(wallet.clone(), codec.clone())),
    );

    table.register(
        "signTx",
        SignTxHandler {
            popups: services.popups.clone(),
        },
    );
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_bus::{runtime_channel, InMemoryBus, MessageSender, PortHub};
    use bridge_relay::channel::ChannelRequester;
    use bridge_relay::codec::{Asset, BincodeCodec, LedgerCodec, TX_HASH_LEN};
    use bridge_relay::{ExtensionHost, KvBackend, MemoryBackend};
    use bridge_types::{codes, CorrelationId, Envelope};
    use std::collections::BTreeSet;
    use std::time::Duration;

    const DAPP: &str = "https://dapp.example";

    struct Fixture {
        ports: PortHub,
        tabs: Tabs,
        services: WalletServices,
    }

    fn fixture() -> Fixture {
        let ports = PortHub::new();
        let tabs = Tabs::new(ports.clone());
        let bus = Arc::new(InMemoryBus::new());
        let backend: Arc<dyn KvBackend> = Arc::new(MemoryBackend::new());
        let allow_list = Arc::new(StoredAllowList::new(ReactiveStore::open(
            "whitelisted",
            BTreeSet::new(),
            backend.clone(),
            bus.clone(),
        )));
        let wallet = ReactiveStore::open(WALLET_KEY, WalletState::default(), backend, bus);
        let popups = Arc::new(PopupLauncher::new(
            tabs.clone(),
            ChannelResponder::new(ports.clone(), tabs.clone()),
        ));
        Fixture {
            ports,
            tabs,
            services: WalletServices {
                allow_list,
                wallet,
                codec: Arc::new(CodecSlot::new()),
                popups,
            },
        }
    }

    /// Send one request from `DAPP` through a host serving the wallet table.
    async fn call(f: &Fixture, method: &str, data: Option<Value>) -> Result<Value, ApiError> {
        let host = ExtensionHost::new(wallet_handlers(&f.services), Arc::new(InMemoryBus::new()));
        let (endpoint, inbox) = runtime_channel(4);
        tokio::spawn(host.run(inbox));

        let client = endpoint.client(MessageSender {
            origin: Some(DAPP.to_string()),
            scope: None,
        });
        let request = Request::new(method, data).with_correlation_id(CorrelationId::from("c-1"));
        let reply = client
            .send_message(Envelope::Request(request).to_value())
            .await
            .unwrap();
        match Envelope::decode(&reply).unwrap() {
            Envelope::Response(response) => response
                .outcome
                .map_err(|e| ApiError::from_value(&e).unwrap()),
            other => panic!("unexpected {other:?}"),
        }
    }

    /// Answer every popup the way a user clicking `answer` would.
    fn auto_answer(f: &Fixture, answer: Reply) {
        let ports = f.ports.clone();
        f.services.popups.on_popup(move |popup: &PopupRequest| {
            let requester =
                ChannelRequester::connect(&ports, Some(popup.scope), Duration::from_secs(5))
                    .unwrap();
            let answer = answer.clone();
            tokio::spawn(async move {
                let shown = requester.request_data().await.unwrap();
                assert!(!shown.is_error());
                requester.return_data(answer).unwrap();
            });
        });
    }

    #[tokio::test]
    async fn test_is_enabled_follows_allow_list() {
        let f = fixture();
        assert_eq!(call(&f, "isEnabled", None).await, Ok(json!(false)));
        f.services.allow_list.allow(DAPP).await.unwrap();
        assert_eq!(call(&f, "isEnabled", None).await, Ok(json!(true)));
    }

    #[tokio::test]
    async fn test_enable_approved_allows_origin() {
        let f = fixture();
        auto_answer(&f, Reply::data(json!(true)));

        assert_eq!(call(&f, "enable", None).await, Ok(json!(true)));
        assert!(f.services.allow_list.store().get().await.contains(DAPP));
        assert_eq!(f.services.popups.responder().open_conversations(), 0);
    }

    #[tokio::test]
    async fn test_enable_declined_is_refused() {
        let f = fixture();
        auto_answer(&f, Reply::error(ApiError::refused("no thanks")));

        let err = call(&f, "enable", None).await.unwrap_err();
        assert_eq!(err.code, codes::REFUSED);
        assert!(!f.services.allow_list.store().get().await.contains(DAPP));
    }

    #[tokio::test]
    async fn test_enable_popup_closed_is_refused() {
        let f = fixture();
        let tabs = f.tabs.clone();
        f.services.popups.on_popup(move |popup: &PopupRequest| {
            tabs.remove(popup.scope);
        });

        let err = call(&f, "enable", None).await.unwrap_err();
        assert_eq!(err.code, codes::REFUSED);
        assert_eq!(f.services.popups.responder().open_conversations(), 0);
    }

    #[tokio::test]
    async fn test_enable_skips_popup_when_allowed() {
        let f = fixture();
        f.services.allow_list.allow(DAPP).await.unwrap();
        f.services
            .popups
            .on_popup(|_: &PopupRequest| panic!("no popup expected"));
        assert_eq!(call(&f, "enable", None).await, Ok(json!(true)));
    }

    #[tokio::test]
    async fn test_balance_and_address() {
        let f = fixture();
        assert_eq!(
            call(&f, "getAddress", None).await.unwrap_err().code,
            codes::INTERNAL_ERROR
        );

        f.services
            .wallet
            .set(WalletState {
                address: Some("addr_test1".into()),
                balance: 1_500_000,
                utxos: Vec::new(),
            })
            .await
            .unwrap();
        assert_eq!(call(&f, "getBalance", None).await, Ok(json!("1500000")));
        assert_eq!(call(&f, "getAddress", None).await, Ok(json!("addr_test1")));
    }

    #[tokio::test]
    async fn test_utxos_need_loaded_codec() {
        let f = fixture();
        let utxo = UnspentOutput {
            tx_hash: "11".repeat(TX_HASH_LEN),
            index: 0,
            address: "addr_test1".into(),
            amount: vec![Asset::lovelace(5)],
            datum_hash: None,
            script_ref: None,
        };
        f.services
            .wallet
            .set(WalletState {
                utxos: vec![utxo.clone()],
                ..WalletState::default()
            })
            .await
            .unwrap();

        let err = call(&f, "getUtxos", None).await.unwrap_err();
        assert_eq!(err.code, codes::INTERNAL_ERROR);

        f.services
            .codec
            .load(|| async { Ok::<_, bridge_relay::CodecError>(Arc::new(BincodeCodec) as Arc<dyn LedgerCodec>) })
            .await
            .unwrap();
        let expected = hex::encode(BincodeCodec.encode_output(&utxo).unwrap());
        assert_eq!(call(&f, "getUtxos", None).await, Ok(json!([expected])));
    }

    #[tokio::test]
    async fn test_sign_tx_returns_witness() {
        let f = fixture();
        auto_answer(&f, Reply::data(json!("a100")));

        assert_eq!(
            call(&f, "signTx", None).await.unwrap_err().code,
            codes::INVALID_REQUEST
        );
        assert_eq!(
            call(&f, "signTx", Some(json!("84a400"))).await,
            Ok(json!("a100"))
        );
    }
}
