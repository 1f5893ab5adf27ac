//! HTTP client module for delivering snapshots to the telemetry collector.
//!
//! Each snapshot is sent as a single JSON POST. There is no retry: a failed
//! delivery is reported to the caller and the next tick simply sends a
//! fresh snapshot.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use tracing::debug;

use crate::config::Config;
use crate::device::Snapshot;
use crate::scheduler::DeliveryError;

/// Errors that can occur while delivering a snapshot.
#[derive(Debug)]
pub enum ClientError {
    /// HTTP request failed
    Request(reqwest::Error),

    /// Collector returned a non-success status code
    Status { code: StatusCode, message: String },

    /// Request timeout
    Timeout,

    /// Client configuration error
    Config(String),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Request(e) => write!(f, "HTTP request failed: {}", e),
            ClientError::Status { code, message } => {
                write!(f, "Collector error ({}): {}", code, message)
            }
            ClientError::Timeout => write!(f, "Request timed out"),
            ClientError::Config(e) => write!(f, "Client configuration error: {}", e),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClientError::Request(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout
        } else {
            ClientError::Request(err)
        }
    }
}

/// HTTP client for posting snapshots to `{base_url}/informations`.
///
/// One instance is shared by every device worker; reqwest pools the
/// underlying connections.
///
/// # Example
///
/// ```no_run
/// use device_fleet_simulator::client::TelemetryClient;
/// use device_fleet_simulator::device::{Device, DeviceIdentity, DeviceType};
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() {
///     let client = TelemetryClient::with_settings(
///         "http://localhost:3000/informations",
///         Duration::from_secs(5),
///     )
///     .expect("Failed to create client");
///
///     let identity = DeviceIdentity::new("DEVICE_0", DeviceType::Motor, 1500.0, 1500.0);
///     let mut device = Device::new(identity);
///
///     match client.send(&device.report()).await {
///         Ok(status) => println!("Collector answered {}", status),
///         Err(e) => eprintln!("Failed to send: {}", e),
///     }
/// }
/// ```
#[derive(Debug, Clone)]
pub struct TelemetryClient {
    /// The underlying HTTP client (reused for connection pooling)
    client: Client,

    /// URL snapshots are posted to
    informations_url: String,

    /// Request timeout duration
    timeout: Duration,
}

impl TelemetryClient {
    /// Create a new client from the service configuration.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` if the HTTP client cannot be built.
    pub fn new(config: &Config) -> Result<Self, ClientError> {
        Self::with_settings(config.informations_url.clone(), config.request_timeout)
    }

    /// Create a new client posting to an explicit URL.
    pub fn with_settings(
        informations_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| ClientError::Config(e.to_string()))?;

        Ok(Self {
            client,
            informations_url: informations_url.into(),
            timeout,
        })
    }

    /// Post one snapshot to the collector.
    ///
    /// Returns the response status on success. Any 2xx status counts as
    /// accepted; the response body is not interpreted.
    pub async fn send(&self, snapshot: &Snapshot) -> Result<StatusCode, ClientError> {
        debug!(
            serial_number = %snapshot.serial_number,
            url = %self.informations_url,
            "Sending snapshot"
        );

        let response = self
            .client
            .post(&self.informations_url)
            .json(snapshot)
            .send()
            .await?;

        let status = response.status();

        if status.is_success() {
            Ok(status)
        } else {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());

            Err(ClientError::Status {
                code: status,
                message,
            })
        }
    }

    /// Get the URL snapshots are posted to.
    pub fn informations_url(&self) -> &str {
        &self.informations_url
    }

    /// Get the request timeout duration.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Deliver a snapshot using a provided client (convenience function).
///
/// Matches the delivery callback shape expected by
/// [`Scheduler::run`](crate::scheduler::Scheduler::run).
pub async fn deliver(client: &TelemetryClient, snapshot: Snapshot) -> Result<(), DeliveryError> {
    client.send(&snapshot).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Device, DeviceIdentity, DeviceType};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn snapshot() -> Snapshot {
        let identity = DeviceIdentity::new("DEVICE_0", DeviceType::Motor, 1500.0, 1500.0);
        Device::new(identity).report()
    }

    /// Accept one connection, capture the request and answer with `status_line`.
    async fn one_shot_server(status_line: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/informations", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];

            // Read headers, then the body announced by Content-Length
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request).to_string();
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text
                        .lines()
                        .find_map(|line| {
                            let lower = line.to_ascii_lowercase();
                            lower
                                .strip_prefix("content-length:")
                                .and_then(|v| v.trim().parse::<usize>().ok())
                        })
                        .unwrap_or(0);
                    if request.len() >= end + 4 + length {
                        break;
                    }
                }
            }

            let body = "rejected";
            let response = format!(
                "{}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&request).to_string()
        });

        (url, handle)
    }

    #[test]
    fn test_client_error_display() {
        let err = ClientError::Timeout;
        assert_eq!(format!("{}", err), "Request timed out");

        let err = ClientError::Status {
            code: StatusCode::BAD_REQUEST,
            message: "Invalid JSON".to_string(),
        };
        assert!(format!("{}", err).contains("400"));
        assert!(format!("{}", err).contains("Invalid JSON"));
    }

    #[test]
    fn test_client_creation() {
        let config = Config::from_lookup(|key| match key {
            "DEVICES_QUANTITY" => Some("2".to_string()),
            "BASE_URL" => Some("http://collector:3000".to_string()),
            "DEVICES_PERIODIC_INTERVAL_INFORM" => Some("10".to_string()),
            _ => None,
        })
        .unwrap();

        let client = TelemetryClient::new(&config).unwrap();
        assert_eq!(client.informations_url(), "http://collector:3000/informations");
        assert_eq!(client.timeout(), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_send_posts_json_snapshot() {
        let (url, server) = one_shot_server("HTTP/1.1 201 Created").await;
        let client = TelemetryClient::with_settings(url, Duration::from_secs(5)).unwrap();

        let status = client.send(&snapshot()).await.unwrap();
        assert_eq!(status, StatusCode::CREATED);

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /informations"));
        assert!(request.to_ascii_lowercase().contains("content-type: application/json"));
        assert!(request.contains(r#""serialNumber":"DEVICE_0""#));
        assert!(request.contains(r#""customMetrics":{"rpm":"#));
    }

    #[tokio::test]
    async fn test_send_non_success_status() {
        let (url, server) = one_shot_server("HTTP/1.1 500 Internal Server Error").await;
        let client = TelemetryClient::with_settings(url, Duration::from_secs(5)).unwrap();

        let err = client.send(&snapshot()).await.unwrap_err();
        match err {
            ClientError::Status { code, message } => {
                assert_eq!(code, StatusCode::INTERNAL_SERVER_ERROR);
                assert_eq!(message, "rejected");
            }
            other => panic!("unexpected error: {}", other),
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_deliver_connection_refused() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = TelemetryClient::with_settings(
            format!("http://{}/informations", addr),
            Duration::from_secs(5),
        )
        .unwrap();

        assert!(deliver(&client, snapshot()).await.is_err());
    }
}
