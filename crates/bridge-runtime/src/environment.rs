//! # Extension Environment
//!
//! Everything one browser profile runs: the background context with its host
//! and durable state, and the per-tab pair of content relay and page.
//!
//! ```text
//!   tab N:  PageClient ──window bus──▶ ProxyRelay ──RuntimeClient──┐
//!                                        ▲   (own allow-list view) │
//!                                        │ runtime broadcasts      ▼
//!   background:  extension bus ◀─────── ExtensionHost ◀──── runtime inbox
//!                    ▲ store changes         │
//!                    └── ReactiveStore ◀─────┘ wallet handlers ──▶ popups
//! ```

use crate::config::{RuntimeConfig, WalletConfig};
use crate::wallet::{wallet_handlers, PopupLauncher, PopupRequest, WalletServices, WalletState, WALLET_KEY};
use bridge_bus::{
    runtime_channel, IncomingMessage, InMemoryBus, ListenerId, MessageSender, PortHub,
    RuntimeEndpoint, Tabs,
};
use bridge_relay::channel::ChannelRequester;
use bridge_relay::domain::BridgeConfig;
use bridge_relay::store::StoreSubscription;
use bridge_relay::{
    BincodeCodec, ChannelResponder, CodecError, CodecSlot, ExtensionHost, KvBackend, LedgerCodec,
    PageClient, PrivilegedLink, ProxyRelay, ReactiveStore, RelayHandle, StoredAllowList, Update,
};
use bridge_types::{BridgeError, ScopeId};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Broadcast sent to every page when the selected account changes.
pub const ACCOUNT_CHANGE_EVENT: &str = "accountChange";

/// One open tab: its document bus, content relay and page.
pub struct TabSession {
    scope: ScopeId,
    origin: String,
    window: Arc<InMemoryBus>,
    relay: Arc<ProxyRelay>,
    relay_handle: RelayHandle,
    page: PageClient,
    allow_list: Arc<StoredAllowList>,
}

impl TabSession {
    pub fn scope(&self) -> ScopeId {
        self.scope
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// The document's message bus; anything posting here acts as the page
    /// or a frame inside it.
    pub fn window(&self) -> &Arc<InMemoryBus> {
        &self.window
    }

    pub fn relay(&self) -> &Arc<ProxyRelay> {
        &self.relay
    }

    pub fn page(&self) -> &PageClient {
        &self.page
    }

    /// The content context's own view of the allow-list.
    pub fn allow_list(&self) -> &Arc<StoredAllowList> {
        &self.allow_list
    }
}

/// The background context plus the shared host transports.
pub struct BridgeEnvironment {
    config: BridgeConfig,
    extension_bus: Arc<InMemoryBus>,
    ports: PortHub,
    tabs: Tabs,
    endpoint: RuntimeEndpoint,
    backend: Arc<dyn KvBackend>,
    services: WalletServices,
    host: Arc<ExtensionHost>,
    account_watch: Mutex<Option<StoreSubscription<WalletState>>>,
}

impl BridgeEnvironment {
    /// Build the background context over `backend`.
    ///
    /// Returns the privileged inbox; nothing is answered until it is served
    /// with [`ExtensionHost::run`].
    pub async fn new(
        config: &RuntimeConfig,
        backend: Arc<dyn KvBackend>,
    ) -> Result<(Arc<Self>, mpsc::Receiver<IncomingMessage>), BridgeError> {
        let bridge = config.bridge.clone();
        let extension_bus = Arc::new(InMemoryBus::with_capacity(bridge.bus.capacity));
        let ports = PortHub::new();
        let tabs = Tabs::new(ports.clone());
        let (endpoint, inbox) = runtime_channel(bridge.bus.runtime_inbox);

        let allow_list = Arc::new(open_allow_list(&bridge, &backend, &extension_bus));
        allow_list.seed(bridge.access.allowed_origins.clone()).await?;

        let wallet = ReactiveStore::open(
            WALLET_KEY,
            WalletState::default(),
            backend.clone(),
            extension_bus.clone(),
        );
        seed_wallet(&wallet, &config.wallet).await?;

        let codec = Arc::new(CodecSlot::new());
        codec
            .load(load_bundled_codec)
            .await
            .map_err(|e| BridgeError::NotInitialized(e.to_string()))?;

        let popups = Arc::new(PopupLauncher::new(
            tabs.clone(),
            ChannelResponder::new(ports.clone(), tabs.clone()),
        ));
        let services = WalletServices {
            allow_list,
            wallet,
            codec,
            popups,
        };
        let host = ExtensionHost::new(wallet_handlers(&services), extension_bus.clone());

        let environment = Arc::new(Self {
            config: bridge,
            extension_bus,
            ports,
            tabs,
            endpoint,
            backend,
            services,
            host,
            account_watch: Mutex::new(None),
        });
        environment.watch_account();
        info!("Background context ready");
        Ok((environment, inbox))
    }

    /// Broadcast `accountChange` whenever the selected address changes.
    fn watch_account(self: &Arc<Self>) {
        let last = Mutex::new(self.services.wallet.get_snapshot().and_then(|s| s.address));
        let host = self.host.clone();
        let subscription = self.services.wallet.subscribe(move |state: &WalletState| {
            let mut last = last.lock();
            if *last != state.address {
                last.clone_from(&state.address);
                let sent = host.broadcast(ACCOUNT_CHANGE_EVENT, Some(json!(state.address)));
                debug!(relays = sent, "Account change broadcast");
            }
        });
        *self.account_watch.lock() = Some(subscription);
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn host(&self) -> &Arc<ExtensionHost> {
        &self.host
    }

    pub fn extension_bus(&self) -> &Arc<InMemoryBus> {
        &self.extension_bus
    }

    pub fn tabs(&self) -> &Tabs {
        &self.tabs
    }

    pub fn allow_list(&self) -> &Arc<StoredAllowList> {
        &self.services.allow_list
    }

    pub fn wallet(&self) -> &Arc<ReactiveStore<WalletState>> {
        &self.services.wallet
    }

    pub fn codec(&self) -> &Arc<CodecSlot> {
        &self.services.codec
    }

    pub fn popups(&self) -> &Arc<PopupLauncher> {
        &self.services.popups
    }

    /// Play the UI side of approval popups.
    pub fn on_popup(&self, listener: impl Fn(&PopupRequest) + Send + Sync + 'static) -> ListenerId {
        self.services.popups.on_popup(listener)
    }

    /// Open a tab on `origin` with its content relay and page client.
    pub fn open_tab(&self, origin: &str) -> TabSession {
        let scope = self.tabs.create();
        let window = Arc::new(InMemoryBus::with_capacity(self.config.bus.capacity));

        // The content context keeps its own store instance over the same key.
        let allow_list = Arc::new(open_allow_list(
            &self.config,
            &self.backend,
            &self.extension_bus,
        ));
        let link: Arc<dyn PrivilegedLink> = Arc::new(self.endpoint.client(MessageSender {
            origin: Some(origin.to_string()),
            scope: Some(scope),
        }));
        let relay = ProxyRelay::new(window.clone(), origin, link, allow_list.clone());
        let relay_handle = relay.spawn(&window, &self.extension_bus);
        let page = PageClient::spawn(window.clone(), origin, self.config.timeouts.page_request);

        info!(scope = %scope, origin = origin, "Tab opened");
        TabSession {
            scope,
            origin: origin.to_string(),
            window,
            relay,
            relay_handle,
            page,
            allow_list,
        }
    }

    /// Close a tab: the page and relay stop, and the scope is destroyed.
    pub fn close_tab(&self, tab: TabSession) {
        tab.page.shutdown();
        tab.relay_handle.shutdown();
        self.tabs.remove(tab.scope);
        info!(scope = %tab.scope, origin = %tab.origin, "Tab closed");
    }

    /// Connect a UI component living in `scope` to the background context.
    pub fn open_popup(&self, scope: ScopeId) -> Result<ChannelRequester, BridgeError> {
        ChannelRequester::connect(&self.ports, Some(scope), self.config.timeouts.conversation)
    }

    /// Select a different account.
    pub async fn switch_account(&self, address: &str) -> Result<(), BridgeError> {
        let address = address.to_string();
        self.services
            .wallet
            .set(Update::with(move |current: &WalletState| WalletState {
                address: Some(address),
                ..current.clone()
            }))
            .await
    }
}

async fn load_bundled_codec() -> Result<Arc<dyn LedgerCodec>, CodecError> {
    Ok(Arc::new(BincodeCodec))
}

fn open_allow_list(
    config: &BridgeConfig,
    backend: &Arc<dyn KvBackend>,
    bus: &Arc<InMemoryBus>,
) -> StoredAllowList {
    StoredAllowList::new(ReactiveStore::open(
        config.access.store_key.clone(),
        BTreeSet::new(),
        backend.clone(),
        bus.clone(),
    ))
}

/// Fill an empty wallet from configuration; a stored one is kept.
async fn seed_wallet(
    wallet: &ReactiveStore<WalletState>,
    config: &WalletConfig,
) -> Result<(), BridgeError> {
    let seeded = WalletState {
        address: Some(config.address.clone()),
        balance: config.balance,
        utxos: Vec::new(),
    };
    wallet
        .set(Update::with(move |current: &WalletState| {
            if current.address.is_none() {
                seeded
            } else {
                current.clone()
            }
        }))
        .await
}
