//! # End-to-End Choreography
//!
//! Runs the full extension environment: background host with wallet
//! handlers, approval popups over the persistent channel, and tabs whose
//! relays keep their own view of the shared allow-list.
//!
//! ## Choreography Tested:
//!
//! 1. **enable → popup → allow-list**: an approval lands in every context
//! 2. **Popup closed mid-conversation**: the request is refused exactly once
//! 3. **requestData after the scope died**: refused reply, nothing left behind
//! 4. **Account change**: broadcast reaches pages of allowed origins

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::{Arc, Weak};
    use std::time::Duration;

    use bridge_relay::Update;
    use bridge_runtime::{
        BridgeEnvironment, BridgeRuntime, PopupRequest, RuntimeConfig, ACCOUNT_CHANGE_EVENT,
    };
    use bridge_types::{ErrorKind, Reply, WireEnvelope, PROTOCOL_TARGET};
    use parking_lot::Mutex;
    use serde_json::json;

    const DAPP: &str = "https://dapp.example";

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    async fn started_runtime() -> BridgeRuntime {
        runtime_with(RuntimeConfig::default()).await
    }

    async fn runtime_with(config: RuntimeConfig) -> BridgeRuntime {
        let runtime = BridgeRuntime::new(&config).await.unwrap();
        runtime.start().unwrap();
        runtime
    }

    /// Answer every popup with `answer` and record what was shown.
    fn answer_popups(env: &Arc<BridgeEnvironment>, answer: Reply) -> Arc<Mutex<Vec<Reply>>> {
        let shown = Arc::new(Mutex::new(Vec::new()));
        let seen = shown.clone();
        let weak: Weak<BridgeEnvironment> = Arc::downgrade(env);
        env.on_popup(move |popup: &PopupRequest| {
            let env = weak.upgrade().unwrap();
            let requester = env.open_popup(popup.scope).unwrap();
            let answer = answer.clone();
            let seen = seen.clone();
            tokio::spawn(async move {
                let shown = requester.request_data().await.unwrap();
                seen.lock().push(shown);
                requester.return_data(answer).unwrap();
            });
        });
        shown
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition never held");
    }

    // =============================================================================
    // APPROVAL FLOWS
    // =============================================================================

    #[tokio::test]
    async fn test_enable_approval_reaches_every_context() {
        let runtime = started_runtime().await;
        let env = runtime.environment();
        let shown = answer_popups(&env, Reply::data(json!(true)));
        let tab = runtime.open_tab(DAPP);

        assert_eq!(tab.page().request("isEnabled", None).await, Ok(json!(false)));
        assert_eq!(
            tab.page().request("getBalance", None).await.unwrap_err().kind(),
            ErrorKind::Refused
        );

        assert_eq!(tab.page().request("enable", None).await, Ok(json!(true)));
        assert_eq!(
            shown.lock()[0],
            Reply::data(json!({"method": "enable", "origin": DAPP, "payload": null}))
        );

        // The relay's own allow-list view converges on the background write.
        let view = tab.allow_list().store().clone();
        eventually(|| view.get_snapshot().is_some_and(|set| set.contains(DAPP))).await;
        assert_eq!(
            tab.page().request("getBalance", None).await,
            Ok(json!("42000000"))
        );
        runtime.shutdown();
    }

    #[tokio::test]
    async fn test_declined_enable_leaves_origin_refused() {
        let runtime = started_runtime().await;
        let env = runtime.environment();
        answer_popups(&env, Reply::data(json!(false)));
        let tab = runtime.open_tab(DAPP);

        let err = tab.page().request("enable", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Refused);
        assert!(!env.allow_list().store().get().await.contains(DAPP));
        assert_eq!(env.popups().responder().open_conversations(), 0);
        runtime.shutdown();
    }

    #[tokio::test]
    async fn test_popup_closed_refuses_once() {
        let runtime = started_runtime().await;
        let env = runtime.environment();
        let tabs = env.tabs().clone();
        // Close the popup without answering.
        env.on_popup(move |popup: &PopupRequest| {
            tabs.remove(popup.scope);
        });
        let tab = runtime.open_tab(DAPP);

        let err = tab.page().request("enable", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Refused);

        let responder = env.popups().responder();
        assert_eq!(responder.open_conversations(), 0);
        // connection + lifecycle handlers, no port ever attached
        assert_eq!(responder.handlers_removed(), 2);
        runtime.shutdown();
    }

    #[tokio::test]
    async fn test_request_data_after_scope_destroyed() {
        let mut config = RuntimeConfig::default();
        config.bridge.access.allowed_origins = vec![DAPP.to_string()];
        let runtime = runtime_with(config).await;
        let env = runtime.environment();
        let replies = Arc::new(Mutex::new(Vec::new()));
        let opened = Arc::new(Mutex::new(Vec::new()));
        let seen = replies.clone();
        let popups = opened.clone();
        let weak = Arc::downgrade(&env);
        env.on_popup(move |popup: &PopupRequest| {
            popups.lock().push(popup.clone());
            let env = weak.upgrade().unwrap();
            let requester = env.open_popup(popup.scope).unwrap();
            env.tabs().remove(popup.scope);
            let seen = seen.clone();
            tokio::spawn(async move {
                let reply = requester.request_data().await.unwrap();
                assert_eq!(requester.installed_listeners(), 0);
                seen.lock().push(reply);
            });
        });
        let tab = runtime.open_tab(DAPP);

        // The relay's view must admit the origin, or the gate answers first.
        let view = tab.allow_list().store().clone();
        eventually(|| view.get_snapshot().is_some_and(|set| set.contains(DAPP))).await;

        let err = tab.page().request("signTx", Some(json!("84a3"))).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Refused);
        assert_eq!(tab.relay().stats().refused.load(Ordering::Relaxed), 0);
        {
            let opened = opened.lock();
            assert_eq!(opened.len(), 1);
            assert_eq!(opened[0].method, "signTx");
            assert_eq!(opened[0].origin, DAPP);
        }

        eventually(|| !replies.lock().is_empty()).await;
        let reply = replies.lock()[0].clone();
        assert_eq!(reply, Reply::refused());
        let wire = WireEnvelope::from_value(&reply.to_wire().to_value()).unwrap();
        assert_eq!(wire.target.as_deref(), Some(PROTOCOL_TARGET));
        assert!(wire.error.is_some());
        assert!(wire.data.is_none());
        assert_eq!(env.popups().responder().open_conversations(), 0);
        runtime.shutdown();
    }

    // =============================================================================
    // SHARED STATE
    // =============================================================================

    #[tokio::test]
    async fn test_account_change_after_approval() {
        let runtime = started_runtime().await;
        let env = runtime.environment();
        answer_popups(&env, Reply::data(json!(true)));
        let tab = runtime.open_tab(DAPP);

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        tab.page().on_event(move |b| {
            sink.lock().push((b.event.clone(), b.data.clone()));
        });

        tab.page().request("enable", None).await.unwrap();
        let view = tab.allow_list().store().clone();
        eventually(|| view.get_snapshot().is_some_and(|set| set.contains(DAPP))).await;

        env.switch_account("addr_test1next").await.unwrap();
        eventually(|| !events.lock().is_empty()).await;
        assert_eq!(
            events.lock()[0],
            (ACCOUNT_CHANGE_EVENT.to_string(), Some(json!("addr_test1next")))
        );
        runtime.shutdown();
    }

    #[tokio::test]
    async fn test_repeated_write_notifies_other_context_once() {
        let runtime = started_runtime().await;
        let env = runtime.environment();
        let tab = runtime.open_tab(DAPP);
        let view = tab.allow_list().store().clone();
        eventually(|| view.get_snapshot().is_some()).await;

        let notified = Arc::new(Mutex::new(0usize));
        let count = notified.clone();
        let _subscription = view.subscribe(move |_| *count.lock() += 1);

        let background = env.allow_list().store().clone();
        let mut origins = background.get().await;
        origins.insert(DAPP.to_string());
        background.set(Update::Replace(origins.clone())).await.unwrap();
        background.set(Update::Replace(origins)).await.unwrap();

        eventually(|| *notified.lock() >= 1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*notified.lock(), 1);
        runtime.shutdown();
    }
}
