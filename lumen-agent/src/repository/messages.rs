//! Messages repository
//!
//! The request/response calls the transport uses to emulate a duplex
//! connection: handshake once, then poll for and send messages.

use async_trait::async_trait;
use lumen_client::{CoordinatorClient, Result};
use lumen_core::domain::message::Message;
use lumen_core::dto::messaging::{HandshakeRequest, HandshakeResponse, PollResponse, SendResponse};

/// Repository trait for the messaging endpoints
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Opens a logical connection (`POST /ws/handshake`)
    async fn handshake(&self, req: &HandshakeRequest) -> Result<HandshakeResponse>;

    /// Fetches pending messages for a client (`GET /ws/poll`)
    async fn poll_messages(&self, client_id: &str) -> Result<PollResponse>;

    /// Delivers one message (`POST /ws/send`)
    async fn send_message(&self, client_id: &str, message: &Message) -> Result<SendResponse>;
}

#[async_trait]
impl MessageRepository for CoordinatorClient {
    async fn handshake(&self, req: &HandshakeRequest) -> Result<HandshakeResponse> {
        CoordinatorClient::handshake(self, req).await
    }

    async fn poll_messages(&self, client_id: &str) -> Result<PollResponse> {
        CoordinatorClient::poll_messages(self, client_id).await
    }

    async fn send_message(&self, client_id: &str, message: &Message) -> Result<SendResponse> {
        CoordinatorClient::send_message(self, client_id, message).await
    }
}
