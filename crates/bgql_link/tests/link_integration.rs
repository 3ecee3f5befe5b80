//! End-to-end tests for link chains.

use bgql_link::links::{set_context, set_context_async, timeout};
use bgql_link::result::PathSegment;
use bgql_link::{
    concat, execute, from, observer, passthrough, split, ClientConfig, ContextMap, ErrorCode,
    FetchResult, GraphQLError, GraphQLRequest, Link, LinkClient, LinkError, LinkExt, NextLink,
    Observable, Operation, OperationKind, Subscriber,
};
use futures::StreamExt;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("bgql_link=trace")
        .with_test_writer()
        .try_init();
}

fn entries(value: serde_json::Value) -> ContextMap {
    match value {
        serde_json::Value::Object(map) => map,
        _ => ContextMap::new(),
    }
}

/// Collects every event of one subscription.
async fn collect(observable: Observable) -> Vec<Result<FetchResult, ErrorCode>> {
    observable
        .into_stream()
        .map(|item| item.map_err(|error| error.code))
        .collect()
        .await
}

/// A link appending `name` to the `trail` context entry.
fn tracer(name: &'static str) -> impl Link {
    move |operation: Operation, forward: NextLink| {
        let mut trail: Vec<String> = operation.context().get("trail").unwrap_or_default();
        trail.push(name.to_string());
        operation.context().set("trail", trail);
        forward.call(operation)
    }
}

/// Terminal link answering with the context it received.
fn echo_context(operation: Operation, _forward: NextLink) -> Observable {
    Observable::of([FetchResult::data(serde_json::Value::Object(
        operation.get_context(),
    ))])
}

/// Terminal link answering with `{x: 1}`.
fn fixed(_operation: Operation, _forward: NextLink) -> Observable {
    Observable::of([FetchResult::data(json!({"x": 1}))])
}

/// Terminal link whose result arrives later; records whether it was
/// cancelled first.
fn deferred(delay: Duration, cancelled: Arc<AtomicBool>) -> impl Link {
    move |operation: Operation, _forward: NextLink| {
        let cancelled = Arc::clone(&cancelled);
        Observable::new(move |subscriber: Subscriber| {
            let cancelled = Arc::clone(&cancelled);
            let context = operation.get_context();
            tokio::spawn(async move {
                tokio::select! {
                    _ = subscriber.cancelled() => cancelled.store(true, Ordering::SeqCst),
                    _ = tokio::time::sleep(delay) => {
                        subscriber.next(FetchResult::data(serde_json::Value::Object(context)));
                        subscriber.complete();
                    }
                }
            });
        })
    }
}

/// Terminal link shaped like an HTTP transport answering with a canned
/// response; `None` means the connection was refused.
fn transport(status: Option<u16>, body: &'static [u8]) -> impl Link {
    move |_operation: Operation, _forward: NextLink| {
        Observable::from_future(move || async move {
            match status {
                Some(status) => FetchResult::from_response(status, body),
                None => Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "connection refused",
                )
                .into()),
            }
        })
    }
}

#[tokio::test]
async fn test_concat_is_associative() {
    init_tracing();

    let left = concat(tracer("a"), concat(tracer("b"), echo_context));
    let right = concat(concat(tracer("a"), tracer("b")), echo_context);

    let request = GraphQLRequest::new("query Trail { trail }");
    let left_events = collect(execute(left, request.clone())).await;
    let right_events = collect(execute(right, request)).await;

    assert_eq!(left_events, right_events);
    assert_eq!(
        left_events,
        vec![Ok(FetchResult::data(json!({"trail": ["a", "b"]})))]
    );
}

#[tokio::test]
async fn test_from_empty_is_identity() {
    let request = GraphQLRequest::new("{ x }").context_entry("k", "v");

    let direct = collect(execute(echo_context, request.clone())).await;
    let wrapped = collect(execute(concat(from(Vec::new()), echo_context), request.clone())).await;
    let folded = collect(execute(from([from(Vec::new()), echo_context.boxed()]), request)).await;

    assert_eq!(direct, wrapped);
    assert_eq!(direct, folded);
}

#[tokio::test]
async fn test_fixed_stream_through_chain() {
    let chain = from([tracer("log").boxed(), passthrough().boxed(), fixed.boxed()]);
    let observable = execute(chain, GraphQLRequest::new("{ x }"));

    assert_eq!(
        collect(observable.clone()).await,
        vec![Ok(FetchResult::data(json!({"x": 1})))]
    );

    let result = observable.first().await.unwrap();
    assert_eq!(result, FetchResult::data(json!({"x": 1})));
}

#[tokio::test]
async fn test_network_error_only_error_event() {
    let chain = tracer("log").concat(|_operation: Operation, _forward: NextLink| {
        Observable::error(LinkError::network("connection refused"))
    });
    let observable = execute(chain, GraphQLRequest::new("{ x }"));

    assert_eq!(
        collect(observable.clone()).await,
        vec![Err(ErrorCode::NetworkError)]
    );

    let err = observable.first().await.unwrap_err();
    assert_eq!(err, LinkError::network("connection refused"));
}

#[tokio::test]
async fn test_graphql_errors_travel_on_next() {
    let chain = |_operation: Operation, _forward: NextLink| {
        Observable::of([FetchResult::data(json!({"user": null}))
            .with_error(GraphQLError::new("not found").with_path([PathSegment::from("user")]))])
    };

    let result = execute(chain, GraphQLRequest::new("{ user }"))
        .first()
        .await
        .unwrap();
    assert!(result.has_errors());
    assert_eq!(result.errors[0].message, "not found");
}

#[tokio::test]
async fn test_unsubscribe_before_resolution_cancels_leaf() {
    init_tracing();

    let cancelled = Arc::new(AtomicBool::new(false));
    let events = Arc::new(AtomicUsize::new(0));

    let chain = tracer("log").concat(deferred(Duration::from_millis(50), Arc::clone(&cancelled)));
    let (n, e, c) = (Arc::clone(&events), Arc::clone(&events), Arc::clone(&events));
    let subscription = execute(chain, GraphQLRequest::new("{ slow }")).subscribe(
        observer()
            .on_next(move |_| {
                n.fetch_add(1, Ordering::SeqCst);
            })
            .on_error(move |_| {
                e.fetch_add(1, Ordering::SeqCst);
            })
            .on_complete(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }),
    );

    subscription.unsubscribe();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(subscription.is_closed());
    assert!(cancelled.load(Ordering::SeqCst));
    assert_eq!(events.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_dropping_stream_cancels_leaf() {
    let cancelled = Arc::new(AtomicBool::new(false));
    let stream = execute(
        deferred(Duration::from_secs(5), Arc::clone(&cancelled)),
        GraphQLRequest::new("{ slow }"),
    )
    .into_stream();

    drop(stream);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(cancelled.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_split_routes_to_one_side() {
    let left_calls = Arc::new(AtomicUsize::new(0));
    let right_calls = Arc::new(AtomicUsize::new(0));

    let side_link = |calls: &Arc<AtomicUsize>, side: &'static str| {
        let calls = Arc::clone(calls);
        move |_operation: Operation, _forward: NextLink| {
            calls.fetch_add(1, Ordering::SeqCst);
            Observable::of([FetchResult::data(json!({ "side": side }))])
        }
    };

    let chain = split(
        |operation: &Operation| operation.kind() == OperationKind::Mutation,
        side_link(&left_calls, "left"),
        side_link(&right_calls, "right"),
    );
    let chain = chain.boxed();

    let result = execute(chain.clone(), GraphQLRequest::new("mutation M { m }"))
        .first()
        .await
        .unwrap();
    assert_eq!(result.data, Some(json!({"side": "left"})));
    assert_eq!(left_calls.load(Ordering::SeqCst), 1);
    assert_eq!(right_calls.load(Ordering::SeqCst), 0);

    let result = execute(chain, GraphQLRequest::new("query Q { q }"))
        .first()
        .await
        .unwrap();
    assert_eq!(result.data, Some(json!({"side": "right"})));
    assert_eq!(left_calls.load(Ordering::SeqCst), 1);
    assert_eq!(right_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unterminated_chain_errors_instead_of_hanging() {
    let chain = from([tracer("a").boxed(), passthrough().boxed(), tracer("b").boxed()]);
    let observable = execute(chain, GraphQLRequest::new("query Lost { x }"));

    let events = tokio::time::timeout(Duration::from_secs(1), collect(observable.clone()))
        .await
        .unwrap();
    assert_eq!(events, vec![Err(ErrorCode::Unterminated)]);

    let err = observable.first().await.unwrap_err();
    assert_eq!(err.code, ErrorCode::Unterminated);
    assert!(err.message.contains("Lost"));
}

#[tokio::test]
async fn test_context_mutation_is_scoped_to_execution() {
    let before = Arc::new(Mutex::new(Vec::new()));
    let record = Arc::clone(&before);

    let chain = from([
        (move |operation: Operation, forward: NextLink| {
            record
                .lock()
                .unwrap()
                .push(operation.context().get_value("a"));
            forward.call(operation)
        })
        .boxed(),
        set_context(|operation: &Operation| {
            let a: i64 = operation.context().get("a").unwrap_or_default();
            entries(json!({ "a": a + 1 }))
        })
        .boxed(),
        tracer("after").boxed(),
        deferred(Duration::from_millis(20), Arc::new(AtomicBool::new(false))).boxed(),
    ]);
    let chain = chain.boxed();

    let request = GraphQLRequest::new("{ x }");
    let (first, second) = tokio::join!(
        execute(chain.clone(), request.clone()).first(),
        execute(chain, request).first(),
    );

    let expected = Some(json!({"a": 1, "trail": ["after"]}));
    assert_eq!(first.unwrap().data, expected);
    assert_eq!(second.unwrap().data, expected);
    assert_eq!(*before.lock().unwrap(), vec![None, None]);
}

#[tokio::test]
async fn test_async_context_then_forward() {
    let chain = set_context_async(|operation: &Operation| {
        let name = operation.operation_name.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok::<_, LinkError>(entries(json!({ "resolved_for": name })))
        }
    })
    .concat(echo_context);

    let result = execute(chain, GraphQLRequest::new("query Viewer { me }"))
        .first()
        .await
        .unwrap();
    assert_eq!(result.data, Some(json!({"resolved_for": "Viewer"})));
}

#[tokio::test]
async fn test_fan_out_forward() {
    let fan_out = |operation: Operation, forward: NextLink| {
        let primary = operation.clone().with_context(operation.context().fork());
        let replica = operation.with_context(primary.context().fork());
        primary.context().set("target", "primary");
        replica.context().set("target", "replica");
        Observable::merge([forward.call(primary), forward.call(replica)])
    };
    let chain = concat(fan_out, |operation: Operation, _forward: NextLink| {
        let target: Option<String> = operation.context().get("target");
        Observable::of([FetchResult::data(json!({ "target": target }))])
    });

    let mut targets: Vec<_> = collect(execute(chain, GraphQLRequest::new("{ x }")))
        .await
        .into_iter()
        .map(|event| event.unwrap().data.unwrap()["target"].clone())
        .collect();
    targets.sort_by_key(|target| target.to_string());

    assert_eq!(targets, vec![json!("primary"), json!("replica")]);
}

#[tokio::test]
async fn test_stream_backed_terminal_link() {
    let terminal = |_operation: Operation, _forward: NextLink| {
        Observable::from_stream(|| {
            futures::stream::iter([
                Ok(FetchResult::data(json!({"count": 1}))),
                Ok(FetchResult::data(json!({"count": 2}))),
            ])
        })
    };

    let events = collect(execute(terminal, GraphQLRequest::new("subscription { count }"))).await;
    assert_eq!(
        events,
        vec![
            Ok(FetchResult::data(json!({"count": 1}))),
            Ok(FetchResult::data(json!({"count": 2}))),
        ]
    );
}

#[tokio::test]
async fn test_timeout_in_chain() {
    let cancelled = Arc::new(AtomicBool::new(false));
    let chain = timeout(Duration::from_millis(10))
        .concat(deferred(Duration::from_secs(5), Arc::clone(&cancelled)));

    let events = collect(execute(chain, GraphQLRequest::new("{ slow }"))).await;
    assert_eq!(events, vec![Err(ErrorCode::Timeout)]);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(cancelled.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_client_over_chain() {
    #[derive(Debug, serde::Deserialize)]
    struct Echo {
        headers: serde_json::Value,
        trail: Vec<String>,
    }

    let client = LinkClient::with_config(
        tracer("client").concat(echo_context),
        ClientConfig::new()
            .timeout(Duration::from_secs(1))
            .header("Authorization", "Bearer token"),
    );

    let echo: Echo = client
        .query("query Me { me }")
        .variable("id", 1)
        .data()
        .await
        .unwrap();

    assert_eq!(echo.headers, json!({"Authorization": "Bearer token"}));
    assert_eq!(echo.trail, vec!["client"]);
}

#[tokio::test]
async fn test_transport_failures_use_error_channel() {
    let request = GraphQLRequest::new("{ x }");

    let events = collect(execute(tracer("log").concat(transport(None, b"")), request.clone())).await;
    assert_eq!(events, vec![Err(ErrorCode::ConnectionRefused)]);

    let events = collect(execute(transport(Some(502), b"Bad Gateway"), request.clone())).await;
    assert_eq!(events, vec![Err(ErrorCode::HttpError)]);

    let events = collect(execute(transport(Some(200), b"<html>"), request.clone())).await;
    assert_eq!(events, vec![Err(ErrorCode::InvalidResponse)]);

    let events = collect(execute(
        transport(Some(400), br#"{"errors": [{"message": "bad query"}]}"#),
        request,
    ))
    .await;
    assert_eq!(
        events,
        vec![Ok(FetchResult::errors([GraphQLError::new("bad query")]))]
    );
}
