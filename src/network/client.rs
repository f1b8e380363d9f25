//! Network Client
//!
//! TCP client for calling other nodes. Each call opens its own connection:
//! a primary may be parked on a backup's `AcquireLock` while another commit
//! talks to the same backup, and a shared connection would serialize the two.

use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::{read_message, write_message};
use crate::config::NetworkConfig;
use crate::replication::Message;
use crate::error::{Error, Result};

/// Network client for request/response calls
#[derive(Debug, Clone)]
pub struct NetworkClient {
    /// Connection timeout
    connect_timeout: Duration,
    /// Request timeout (None waits indefinitely)
    request_timeout: Option<Duration>,
}

impl NetworkClient {
    /// Create a new network client
    pub fn new(connect_timeout: Duration, request_timeout: Option<Duration>) -> Self {
        Self {
            connect_timeout,
            request_timeout,
        }
    }

    /// Create a client from the `[network]` section
    pub fn from_config(config: &NetworkConfig) -> Self {
        Self::new(config.connect_timeout(), config.request_timeout())
    }

    /// Send a message and return the raw reply
    pub async fn send(&self, address: &str, message: Message) -> Result<Message> {
        match self.request_timeout {
            Some(limit) => match timeout(limit, self.send_inner(address, message)).await {
                Ok(inner_result) => inner_result,
                Err(_) => Err(Error::ConnectionTimeout(address.to_string())),
            },
            None => self.send_inner(address, message).await,
        }
    }

    /// Send a message, turning an error reply into `Error::Remote`
    pub async fn call(&self, address: &str, message: Message) -> Result<Message> {
        match self.send(address, message).await? {
            Message::Error { code, message } => Err(Error::Remote { code, message }),
            reply => Ok(reply),
        }
    }

    async fn send_inner(&self, address: &str, message: Message) -> Result<Message> {
        let mut stream = self.connect(address).await?;
        let (mut reader, mut writer) = stream.split();

        tracing::trace!("Sending {} to {}", message.type_name(), address);
        write_message(&mut writer, &message).await?;
        read_message(&mut reader).await
    }

    /// Connect to an address
    async fn connect(&self, address: &str) -> Result<TcpStream> {
        let result = timeout(
            self.connect_timeout,
            TcpStream::connect(address),
        ).await;

        match result {
            Ok(Ok(stream)) => {
                stream.set_nodelay(true)?;
                Ok(stream)
            }
            Ok(Err(e)) => Err(Error::ConnectionFailed {
                address: address.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(Error::ConnectionTimeout(address.to_string())),
        }
    }
}

impl Default for NetworkClient {
    fn default() -> Self {
        Self::from_config(&NetworkConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connection_failure() {
        let client = NetworkClient::new(
            Duration::from_millis(100),
            Some(Duration::from_millis(500)),
        );

        // Nothing listens on this port once the listener is dropped
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let result = client.send(&address, Message::IsAlive).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().is_transport());
    }
}
