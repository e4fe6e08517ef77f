#![allow(dead_code)]

use axum::Router;
use std::sync::Arc;
use std::time::Duration;

use crop_advisor::auth::{CredentialProvider, NoCredentials};
use crop_advisor::dispatch::RequestDispatcher;

/// Serve `router` on an ephemeral local port and return its base address.
pub async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

/// An address nothing is listening on.
pub async fn closed_address() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

pub fn dispatcher(base_url: &str) -> RequestDispatcher {
    dispatcher_with(base_url, Arc::new(NoCredentials))
}

pub fn dispatcher_with(
    base_url: &str,
    credentials: Arc<dyn CredentialProvider>,
) -> RequestDispatcher {
    RequestDispatcher::new("test", base_url, Duration::from_secs(5), credentials).unwrap()
}
