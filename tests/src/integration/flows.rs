//! # Request Flows
//!
//! A page client posts on its document bus, the content relay gates and
//! forwards over runtime messaging, and the background host dispatches to
//! a capability handler. Every test here runs that whole path.
//!
//! ## Flows Tested:
//!
//! 1. **Exempt methods**: answered for any origin
//! 2. **Gated methods**: refused at the relay, handler never runs
//! 3. **Origin stamping**: the page cannot choose its own origin
//! 4. **Deadlines**: a silent handler times the page out, nothing leaks
//! 5. **Correlation**: concurrent requests settle with their own answers

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use bridge_bus::{runtime_channel, InMemoryBus, MessageSender};
    use bridge_relay::domain::AllowList;
    use bridge_relay::{
        handler_fn, ExtensionHost, HandlerTable, PageClient, PrivilegedLink, ProxyRelay,
        RelayHandle,
    };
    use bridge_types::{codes, ApiError, BridgeError, ErrorKind, Request};
    use serde_json::{json, Value};

    const DAPP: &str = "https://dapp.example";

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    /// One tab wired to a background host.
    struct Harness {
        page: PageClient,
        relay: Arc<ProxyRelay>,
        host: Arc<ExtensionHost>,
        allow_list: Arc<AllowList>,
        _relay_handle: RelayHandle,
    }

    fn harness(handlers: HandlerTable, page_timeout: Option<Duration>) -> Harness {
        let extension_bus = Arc::new(InMemoryBus::new());
        let (endpoint, inbox) = runtime_channel(64);
        let host = ExtensionHost::new(handlers, extension_bus.clone());
        tokio::spawn(host.clone().run(inbox));

        let window = Arc::new(InMemoryBus::new());
        let allow_list = Arc::new(AllowList::new());
        let link: Arc<dyn PrivilegedLink> = Arc::new(endpoint.client(MessageSender {
            origin: Some(DAPP.to_string()),
            scope: None,
        }));
        let relay = ProxyRelay::new(window.clone(), DAPP, link, allow_list.clone());
        let relay_handle = relay.spawn(&window, &extension_bus);
        let page = PageClient::spawn(window, DAPP, page_timeout);

        Harness {
            page,
            relay,
            host,
            allow_list,
            _relay_handle: relay_handle,
        }
    }

    /// Handlers that count invocations and echo what they were given.
    fn counting_handlers(calls: Arc<AtomicUsize>) -> HandlerTable {
        let mut table = HandlerTable::new();
        for method in ["isEnabled", "getBalance", "echo"] {
            let calls = calls.clone();
            table.register(
                method,
                handler_fn(move |request: Request| {
                    let calls = calls.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, ApiError>(json!({
                            "method": request.method,
                            "origin": request.origin,
                            "data": request.data,
                        }))
                    }
                }),
            );
        }
        table
    }

    // =============================================================================
    // GATING
    // =============================================================================

    #[tokio::test]
    async fn test_exempt_method_answered_for_unknown_origin() {
        let calls = Arc::new(AtomicUsize::new(0));
        let h = harness(counting_handlers(calls.clone()), None);

        let answer = h.page.request("isEnabled", None).await.unwrap();
        assert_eq!(answer["method"], json!("isEnabled"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gated_method_refused_before_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let h = harness(counting_handlers(calls.clone()), None);

        let err = h.page.request("getBalance", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Refused);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.relay.stats().refused.load(Ordering::Relaxed), 1);
        assert_eq!(h.page.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_allowing_origin_opens_gate() {
        let calls = Arc::new(AtomicUsize::new(0));
        let h = harness(counting_handlers(calls.clone()), None);

        assert!(h.page.request("getBalance", None).await.is_err());
        h.allow_list.allow(DAPP);
        let answer = h.page.request("getBalance", None).await.unwrap();
        assert_eq!(answer["method"], json!("getBalance"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_handler_sees_relay_origin() {
        let calls = Arc::new(AtomicUsize::new(0));
        let h = harness(counting_handlers(calls), None);
        h.allow_list.allow(DAPP);

        let answer = h
            .page
            .request("echo", Some(json!({"origin": "https://forged.example"})))
            .await
            .unwrap();
        assert_eq!(answer["origin"], json!(DAPP));
        assert_eq!(answer["data"], json!({"origin": "https://forged.example"}));
    }

    // =============================================================================
    // HANDLER OUTCOMES
    // =============================================================================

    #[tokio::test]
    async fn test_handler_error_reaches_page() {
        let mut table = HandlerTable::new();
        table.register(
            "isEnabled",
            handler_fn(|_request: Request| async {
                Err::<Value, _>(ApiError::new(codes::ACCOUNT_CHANGE, "account changed"))
            }),
        );
        let h = harness(table, None);

        let err = h.page.request("isEnabled", None).await.unwrap_err();
        assert_eq!(
            err,
            BridgeError::Rejected(ApiError::new(codes::ACCOUNT_CHANGE, "account changed"))
        );
    }

    #[tokio::test]
    async fn test_unknown_method_is_rejected_not_hung() {
        let h = harness(HandlerTable::new(), Some(Duration::from_secs(5)));

        let err = h.page.request("isEnabled", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Rejected);
        assert_eq!(h.host.stats().unknown_methods.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_silent_handler_times_out_without_leak() {
        let mut table = HandlerTable::new();
        table.register(
            "isEnabled",
            handler_fn(|_request: Request| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok::<_, ApiError>(json!(true))
            }),
        );
        let h = harness(table, Some(Duration::from_millis(100)));

        let err = h.page.request("isEnabled", None).await.unwrap_err();
        assert_eq!(err, BridgeError::Timeout(Duration::from_millis(100)));
        assert_eq!(h.page.pending_requests(), 0);
    }

    // =============================================================================
    // CORRELATION
    // =============================================================================

    #[tokio::test]
    async fn test_concurrent_requests_settle_with_own_answers() {
        let calls = Arc::new(AtomicUsize::new(0));
        let h = harness(counting_handlers(calls.clone()), Some(Duration::from_secs(5)));
        h.allow_list.allow(DAPP);

        let requests = (0..25).map(|i| h.page.request("echo", Some(json!(i))));
        let answers = futures::future::join_all(requests).await;

        for (i, answer) in answers.into_iter().enumerate() {
            assert_eq!(answer.unwrap()["data"], json!(i));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 25);
        assert_eq!(h.page.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_two_pages_do_not_cross_talk() {
        let calls = Arc::new(AtomicUsize::new(0));
        let a = harness(counting_handlers(calls.clone()), Some(Duration::from_secs(5)));
        let b = harness(counting_handlers(calls.clone()), Some(Duration::from_secs(5)));
        a.allow_list.allow(DAPP);

        let (from_a, from_b) = tokio::join!(
            a.page.request("echo", Some(json!("a"))),
            b.page.request("echo", Some(json!("b")))
        );
        assert_eq!(from_a.unwrap()["data"], json!("a"));
        assert_eq!(from_b.unwrap_err().kind(), ErrorKind::Refused);
    }
}
