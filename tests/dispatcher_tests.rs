// tests/dispatcher_tests.rs
mod common;

use common::{
    body_string, config_for, dead_address, request, scripted_backend, silent_backend,
    AlwaysHealthy,
};
use hyper::{Body, Client, StatusCode};
use mockito::Matcher;
use round_robin_dispatcher::metrics::MetricsRegistry;
use round_robin_dispatcher::proxy::FAILURE_BODY;
use round_robin_dispatcher::server::{Dispatcher, ServerBuilder};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tower::ServiceExt;

#[tokio::test]
async fn get_rotates_across_backends() {
    let mut first = mockito::Server::new_async().await;
    let mut second = mockito::Server::new_async().await;
    let _first_mock = first
        .mock("GET", "/")
        .with_status(200)
        .with_body("hello from first")
        .create_async()
        .await;
    let _second_mock = second
        .mock("GET", "/")
        .with_status(200)
        .with_body("hello from second")
        .create_async()
        .await;

    let config = config_for(&[first.host_with_port(), second.host_with_port()]);
    let dispatcher = Dispatcher::with_prober(&config, Arc::new(AlwaysHealthy), None).unwrap();

    let mut bodies = Vec::new();
    for _ in 0..3 {
        let response = dispatcher
            .handler()
            .oneshot(request("GET", "/", ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        bodies.push(body_string(response).await);
    }

    assert_eq!(bodies, ["hello from first", "hello from second", "hello from first"]);
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn post_forwards_method_query_and_body() {
    let mut backend = mockito::Server::new_async().await;
    let mock = backend
        .mock("POST", "/orders")
        .match_query(Matcher::UrlEncoded("id".into(), "7".into()))
        .match_body("payload")
        .with_status(201)
        .with_body("created")
        .create_async()
        .await;

    let config = config_for(&[backend.host_with_port()]);
    let dispatcher = Dispatcher::with_prober(&config, Arc::new(AlwaysHealthy), None).unwrap();

    let response = dispatcher
        .handler()
        .oneshot(request("POST", "/orders?id=7", "payload"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(body_string(response).await, "created");
    mock.assert_async().await;
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn backend_error_status_is_relayed_unchanged() {
    let mut backend = mockito::Server::new_async().await;
    let _mock = backend
        .mock("DELETE", "/items/3")
        .with_status(404)
        .with_body("no such item")
        .create_async()
        .await;

    let config = config_for(&[backend.host_with_port()]);
    let dispatcher = Dispatcher::with_prober(&config, Arc::new(AlwaysHealthy), None).unwrap();

    let response = dispatcher
        .handler()
        .oneshot(request("DELETE", "/items/3", ""))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_string(response).await, "no such item");
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn unreachable_backend_yields_server_error() {
    let config = config_for(&[dead_address()]);
    let dispatcher = Dispatcher::with_prober(&config, Arc::new(AlwaysHealthy), None).unwrap();

    let response = dispatcher
        .handler()
        .oneshot(request("GET", "/", ""))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_string(response).await, FAILURE_BODY);
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn silent_backend_times_out_with_server_error() {
    let mut config = config_for(&[silent_backend().await]);
    config.proxy.timeout_secs = 1;
    let registry = MetricsRegistry::new().unwrap();
    let metrics = registry.collector();
    let dispatcher =
        Dispatcher::with_prober(&config, Arc::new(AlwaysHealthy), Some(metrics.clone())).unwrap();

    let started = std::time::Instant::now();
    let response = dispatcher
        .handler()
        .oneshot(request("GET", "/", ""))
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(5), "{:?}", started.elapsed());
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_string(response).await, FAILURE_BODY);
    assert_eq!(
        metrics.forward_errors_total.with_label_values(&["timeout"]).get(),
        1
    );
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn truncated_body_yields_server_error() {
    // Head arrives at once; the connection closes partway through the body.
    let backend = scripted_backend(
        Duration::ZERO,
        "HTTP/1.1 200 OK\r\nContent-Length: 64\r\n\r\npartial",
    )
    .await;
    let mut config = config_for(&[backend]);
    config.proxy.timeout_secs = 1;
    let registry = MetricsRegistry::new().unwrap();
    let metrics = registry.collector();
    let dispatcher =
        Dispatcher::with_prober(&config, Arc::new(AlwaysHealthy), Some(metrics.clone())).unwrap();

    let response = dispatcher
        .handler()
        .oneshot(request("GET", "/", ""))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_string(response).await, FAILURE_BODY);
    assert_eq!(
        metrics.forward_errors_total.with_label_values(&["body_read"]).get(),
        1
    );
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn pool_size_is_reported_from_startup() {
    let config = config_for(&[dead_address(), dead_address(), dead_address()]);
    let registry = MetricsRegistry::new().unwrap();
    let metrics = registry.collector();

    let dispatcher =
        Dispatcher::with_prober(&config, Arc::new(AlwaysHealthy), Some(metrics.clone())).unwrap();

    assert_eq!(metrics.pool_size.get(), 3);
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn failed_request_is_not_retried_on_another_backend() {
    let mut live = mockito::Server::new_async().await;
    let mock = live
        .mock("GET", "/")
        .with_status(200)
        .with_body("live")
        .expect(1)
        .create_async()
        .await;

    let config = config_for(&[dead_address(), live.host_with_port()]);
    let dispatcher = Dispatcher::with_prober(&config, Arc::new(AlwaysHealthy), None).unwrap();

    let first = dispatcher.handler().oneshot(request("GET", "/", "")).await.unwrap();
    assert_eq!(first.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let second = dispatcher.handler().oneshot(request("GET", "/", "")).await.unwrap();
    assert_eq!(body_string(second).await, "live");

    mock.assert_async().await;
    dispatcher.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_split_evenly() {
    let mut first = mockito::Server::new_async().await;
    let mut second = mockito::Server::new_async().await;
    let first_mock = first
        .mock("GET", "/work")
        .with_status(200)
        .expect(10)
        .create_async()
        .await;
    let second_mock = second
        .mock("GET", "/work")
        .with_status(200)
        .expect(10)
        .create_async()
        .await;

    let config = config_for(&[first.host_with_port(), second.host_with_port()]);
    let dispatcher = Dispatcher::with_prober(&config, Arc::new(AlwaysHealthy), None).unwrap();

    let tasks: Vec<_> = (0..20)
        .map(|_| {
            let handler = dispatcher.handler();
            tokio::spawn(async move { handler.oneshot(request("GET", "/work", "")).await })
        })
        .collect();
    for response in futures::future::join_all(tasks).await {
        assert_eq!(response.unwrap().unwrap().status(), StatusCode::OK);
    }

    first_mock.assert_async().await;
    second_mock.assert_async().await;
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn serves_over_tcp_until_shutdown() {
    let mut backend = mockito::Server::new_async().await;
    let _mock = backend
        .mock("GET", "/hello")
        .with_status(200)
        .with_body("hello over tcp")
        .create_async()
        .await;

    let config = config_for(&[backend.host_with_port()]);
    let dispatcher = Dispatcher::with_prober(&config, Arc::new(AlwaysHealthy), None).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(
        ServerBuilder::from_listener(listener)
            .unwrap()
            .with_handler(dispatcher.handler())
            .serve_with_shutdown(async move {
                let _ = stop_rx.await;
            }),
    );

    let client: Client<_, Body> = Client::new();
    let response = client
        .get(format!("http://{}/hello", addr).parse().unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "hello over tcp");

    stop_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server did not stop")
        .unwrap()
        .unwrap();
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn shutdown_lets_in_flight_request_finish() {
    let backend = scripted_backend(
        Duration::from_millis(500),
        "HTTP/1.1 200 OK\r\nContent-Length: 4\r\nConnection: close\r\n\r\nslow",
    )
    .await;
    let config = config_for(&[backend]);
    let dispatcher = Dispatcher::with_prober(&config, Arc::new(AlwaysHealthy), None).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(
        ServerBuilder::from_listener(listener)
            .unwrap()
            .with_handler(dispatcher.handler())
            .with_drain_timeout(Duration::from_secs(5))
            .serve_with_shutdown(async move {
                let _ = stop_rx.await;
            }),
    );

    let in_flight = tokio::spawn(async move {
        let client: Client<_, Body> = Client::new();
        client
            .get(format!("http://{}/", addr).parse().unwrap())
            .await
    });

    // Let the request reach the backend, then stop the server under it.
    tokio::time::sleep(Duration::from_millis(150)).await;
    stop_tx.send(()).unwrap();

    let response = in_flight.await.unwrap().unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "slow");

    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server did not stop")
        .unwrap()
        .unwrap();
    assert!(TcpStream::connect(addr).await.is_err());
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn drain_timeout_bounds_shutdown() {
    let config = config_for(&[silent_backend().await]);
    let dispatcher = Dispatcher::with_prober(&config, Arc::new(AlwaysHealthy), None).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(
        ServerBuilder::from_listener(listener)
            .unwrap()
            .with_handler(dispatcher.handler())
            .with_drain_timeout(Duration::from_millis(200))
            .serve_with_shutdown(async move {
                let _ = stop_rx.await;
            }),
    );

    // Stuck until the 30s forward timeout; the drain must not wait for it.
    let _stuck = tokio::spawn(async move {
        let client: Client<_, Body> = Client::new();
        client
            .get(format!("http://{}/", addr).parse().unwrap())
            .await
    });
    tokio::time::sleep(Duration::from_millis(150)).await;
    stop_tx.send(()).unwrap();

    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server did not stop")
        .unwrap()
        .unwrap();
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn empty_backend_list_refuses_to_start() {
    let config = config_for(&[]);
    assert!(Dispatcher::with_prober(&config, Arc::new(AlwaysHealthy), None).is_err());
}
